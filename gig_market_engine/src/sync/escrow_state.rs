//! The escrow state machine.
//!
//! `Created → Funded → Locked → Completed` is the happy path. `Disputed` is reachable from `Funded` or
//! `Locked` and only ever resolves manually to `Resolved`. `Refunded` is reachable from `Created` or `Funded`
//! when the job is cancelled. `Completed` directly from `Funded` covers the confirmation-only flow where no
//! explicit lock message is emitted.
//!
//! These functions are the single source of truth for legal transitions: the event application engine validates
//! against [`can_transition`], and nothing else in the system may mutate `Escrow.status`.
use crate::db_types::EscrowStatus;

/// The set of states legally reachable from `current`. Pure; used both for validation and for generating the
/// precondition table in the event application engine.
pub fn next_states(current: EscrowStatus) -> &'static [EscrowStatus] {
    use EscrowStatus::*;
    match current {
        Created => &[Funded, Refunded],
        Funded => &[Locked, Completed, Disputed, Refunded],
        Locked => &[Completed, Disputed],
        Disputed => &[Resolved],
        Completed | Resolved | Refunded => &[],
    }
}

pub fn can_transition(from: EscrowStatus, to: EscrowStatus) -> bool {
    next_states(from).contains(&to)
}

pub fn is_terminal(status: EscrowStatus) -> bool {
    next_states(status).is_empty()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db_types::EscrowStatus::*;

    const ALL: [EscrowStatus; 7] = [Created, Funded, Locked, Completed, Disputed, Resolved, Refunded];

    #[test]
    fn happy_path_is_legal() {
        assert!(can_transition(Created, Funded));
        assert!(can_transition(Funded, Locked));
        assert!(can_transition(Locked, Completed));
    }

    #[test]
    fn confirmation_only_flow_completes_from_funded() {
        assert!(can_transition(Funded, Completed));
    }

    #[test]
    fn disputes_only_from_funded_or_locked_and_resolve_manually() {
        for status in ALL {
            let expect = matches!(status, Funded | Locked);
            assert_eq!(can_transition(status, Disputed), expect, "dispute from {status}");
        }
        assert_eq!(next_states(Disputed), &[Resolved]);
    }

    #[test]
    fn refunds_only_before_locking() {
        for status in ALL {
            let expect = matches!(status, Created | Funded);
            assert_eq!(can_transition(status, Refunded), expect, "refund from {status}");
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in [Completed, Resolved, Refunded] {
            assert!(is_terminal(status));
            assert!(next_states(status).is_empty());
        }
    }

    #[test]
    fn closure_no_state_reaches_anything_outside_its_table() {
        // Exhaustive check that the machine never moves backwards: in particular Completed -> Funded is illegal.
        assert!(!can_transition(Completed, Funded));
        for from in ALL {
            for to in ALL {
                if can_transition(from, to) {
                    assert!(next_states(from).contains(&to));
                    assert_ne!(from, to, "self-transitions are never legal");
                }
            }
        }
    }
}
