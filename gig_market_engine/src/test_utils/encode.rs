//! Builders for wire-format transactions, mirroring the contracts' field schemas byte for byte.
//!
//! Each builder produces a complete [`RawTransaction`] with a fresh hash and the next logical time, so a
//! scripted sequence of calls reads like a little slice of chain history. Fields are public; tests that need a
//! specific hash or time just overwrite them.
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::{
    sync::decoder::{
        OP_ESCROW_COMPLETE,
        OP_ESCROW_CREATE,
        OP_ESCROW_DISPUTE,
        OP_ESCROW_FUND,
        OP_ESCROW_LOCK,
        OP_JOB_ASSIGN_WORKER,
        OP_JOB_CREATE,
        OP_JOB_STATUS_CHANGE,
        OP_RATING_SUBMIT,
    },
    traits::{InboundMessage, RawTransaction},
};

static NEXT_LOGICAL_TIME: AtomicU64 = AtomicU64::new(1);

pub fn tx_with_body(op_code: u32, body: Vec<u8>) -> RawTransaction {
    RawTransaction {
        hash: format!("{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>()),
        logical_time: NEXT_LOGICAL_TIME.fetch_add(1, Ordering::SeqCst),
        timestamp: Utc::now(),
        in_msg: InboundMessage { op_code, body },
    }
}

fn push_string(body: &mut Vec<u8>, s: &str) {
    body.extend_from_slice(&(s.len() as u16).to_be_bytes());
    body.extend_from_slice(s.as_bytes());
}

pub fn job_created(job_id: u64, employer: &[u8], wages: u64, duration_hours: u32, category: &str) -> RawTransaction {
    let mut body = Vec::new();
    body.extend_from_slice(&job_id.to_be_bytes());
    body.extend_from_slice(employer);
    body.extend_from_slice(&wages.to_be_bytes());
    body.extend_from_slice(&duration_hours.to_be_bytes());
    push_string(&mut body, category);
    tx_with_body(OP_JOB_CREATE, body)
}

pub fn job_status_changed(job_id: u64, status_code: u8) -> RawTransaction {
    let mut body = Vec::new();
    body.extend_from_slice(&job_id.to_be_bytes());
    body.push(status_code);
    tx_with_body(OP_JOB_STATUS_CHANGE, body)
}

pub fn worker_assigned(job_id: u64, worker: &[u8]) -> RawTransaction {
    let mut body = Vec::new();
    body.extend_from_slice(&job_id.to_be_bytes());
    body.extend_from_slice(worker);
    tx_with_body(OP_JOB_ASSIGN_WORKER, body)
}

pub fn escrow_created(escrow_id: u64, job_id: u64, amount: u64) -> RawTransaction {
    let mut body = Vec::new();
    body.extend_from_slice(&escrow_id.to_be_bytes());
    body.extend_from_slice(&job_id.to_be_bytes());
    body.extend_from_slice(&amount.to_be_bytes());
    tx_with_body(OP_ESCROW_CREATE, body)
}

pub fn escrow_funded(escrow_id: u64) -> RawTransaction {
    tx_with_body(OP_ESCROW_FUND, escrow_id.to_be_bytes().to_vec())
}

pub fn escrow_locked(escrow_id: u64) -> RawTransaction {
    tx_with_body(OP_ESCROW_LOCK, escrow_id.to_be_bytes().to_vec())
}

pub fn escrow_completed(escrow_id: u64, employer_confirmed: bool, worker_confirmed: bool) -> RawTransaction {
    let mut body = escrow_id.to_be_bytes().to_vec();
    let flags = u8::from(employer_confirmed) | (u8::from(worker_confirmed) << 1);
    body.push(flags);
    tx_with_body(OP_ESCROW_COMPLETE, body)
}

pub fn escrow_disputed(escrow_id: u64, reason: &str) -> RawTransaction {
    let mut body = escrow_id.to_be_bytes().to_vec();
    push_string(&mut body, reason);
    tx_with_body(OP_ESCROW_DISPUTE, body)
}

pub fn rating_submitted(job_id: u64, rater: &[u8], ratee: &[u8], score: u8, comment: &str) -> RawTransaction {
    let mut body = Vec::new();
    body.extend_from_slice(&job_id.to_be_bytes());
    body.extend_from_slice(rater);
    body.extend_from_slice(ratee);
    body.push(score);
    push_string(&mut body, comment);
    tx_with_body(OP_RATING_SUBMIT, body)
}
