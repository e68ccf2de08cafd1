//! Transaction decoding.
//!
//! Every contract message starts with a fixed-width (u32, big-endian) operation code, followed by a body whose
//! field layout is fixed per op code. Decoding is a pure function from a [`RawTransaction`] to a [`Decoded`]
//! value: a typed [`DomainEvent`], `Unrecognized` for op codes outside the dispatch table, or `Malformed` when
//! a known op code's body fails to parse. Decoding never touches the store.
//!
//! ## Field schema (version 1)
//!
//! All integers are big-endian. Addresses are 32 raw bytes, hex-encoded on the way in. Strings are a u16 length
//! prefix followed by that many UTF-8 bytes. Amounts are u64 in the smallest on-chain unit.
//!
//! | Op code | Event | Body |
//! |---|---|---|
//! | `0x4a420001` | JobCreated | job_id u64, employer addr, wages u64, duration u32, category str |
//! | `0x4a420002` | JobStatusChanged | job_id u64, status u8 |
//! | `0x4a420003` | WorkerAssigned | job_id u64, worker addr |
//! | `0x45530001` | EscrowCreated | escrow_id u64, job_id u64, amount u64 |
//! | `0x45530002` | EscrowFunded | escrow_id u64 |
//! | `0x45530003` | EscrowLocked | escrow_id u64 |
//! | `0x45530004` | EscrowCompleted | escrow_id u64, confirmation flags u8 (bit 0 employer, bit 1 worker) |
//! | `0x45530005` | EscrowDisputed | escrow_id u64, reason str |
//! | `0x52500001` | RatingSubmitted | job_id u64, rater addr, ratee addr, score u8, comment str |
//!
//! The status byte of `JobStatusChanged` maps 0..=6 to Posted, Assigned, InProgress, PendingConfirmation,
//! Completed, Cancelled, Disputed.
use std::fmt::Display;

use gmb_common::NanoCoin;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db_types::{JobStatus, LedgerId, WalletAddress},
    traits::RawTransaction,
};

pub const OP_JOB_CREATE: u32 = 0x4a42_0001;
pub const OP_JOB_STATUS_CHANGE: u32 = 0x4a42_0002;
pub const OP_JOB_ASSIGN_WORKER: u32 = 0x4a42_0003;
pub const OP_ESCROW_CREATE: u32 = 0x4553_0001;
pub const OP_ESCROW_FUND: u32 = 0x4553_0002;
pub const OP_ESCROW_LOCK: u32 = 0x4553_0003;
pub const OP_ESCROW_COMPLETE: u32 = 0x4553_0004;
pub const OP_ESCROW_DISPUTE: u32 = 0x4553_0005;
pub const OP_RATING_SUBMIT: u32 = 0x5250_0001;

//--------------------------------------   ContractFamily     --------------------------------------------------------
/// The three tracked contract families. Each family has its own op-code table; an op code is only meaningful
/// within its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractFamily {
    JobRegistry,
    Escrow,
    Reputation,
}

impl Display for ContractFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractFamily::JobRegistry => write!(f, "job-registry"),
            ContractFamily::Escrow => write!(f, "escrow"),
            ContractFamily::Reputation => write!(f, "reputation"),
        }
    }
}

//--------------------------------------     DomainEvent      --------------------------------------------------------
/// A typed, decoded representation of one ledger transaction relevant to this system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    JobCreated {
        ledger_id: LedgerId,
        employer: WalletAddress,
        wages: NanoCoin,
        duration_hours: i64,
        category: String,
    },
    JobStatusChanged {
        ledger_id: LedgerId,
        new_status: JobStatus,
    },
    WorkerAssigned {
        ledger_id: LedgerId,
        worker: WalletAddress,
    },
    EscrowCreated {
        ledger_id: LedgerId,
        job_ledger_id: LedgerId,
        amount: NanoCoin,
    },
    EscrowFunded {
        ledger_id: LedgerId,
    },
    EscrowLocked {
        ledger_id: LedgerId,
    },
    EscrowCompleted {
        ledger_id: LedgerId,
        employer_confirmed: bool,
        worker_confirmed: bool,
    },
    EscrowDisputed {
        ledger_id: LedgerId,
        reason: String,
    },
    RatingSubmitted {
        job_ledger_id: LedgerId,
        rater: WalletAddress,
        ratee: WalletAddress,
        score: i64,
        comment: Option<String>,
    },
}

impl DomainEvent {
    /// A short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::JobCreated { .. } => "JobCreated",
            DomainEvent::JobStatusChanged { .. } => "JobStatusChanged",
            DomainEvent::WorkerAssigned { .. } => "WorkerAssigned",
            DomainEvent::EscrowCreated { .. } => "EscrowCreated",
            DomainEvent::EscrowFunded { .. } => "EscrowFunded",
            DomainEvent::EscrowLocked { .. } => "EscrowLocked",
            DomainEvent::EscrowCompleted { .. } => "EscrowCompleted",
            DomainEvent::EscrowDisputed { .. } => "EscrowDisputed",
            DomainEvent::RatingSubmitted { .. } => "RatingSubmitted",
        }
    }
}

//--------------------------------------       Decoded        --------------------------------------------------------
/// The result of decoding one raw transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(DomainEvent),
    /// The op code is not in the family's dispatch table. Not an error: contracts emit plenty of messages this
    /// system does not care about.
    Unrecognized { op_code: u32 },
    /// The op code is known but the body does not parse against the schema. The transaction is skipped and the
    /// cycle continues.
    Malformed { op_code: u32, reason: String },
}

#[derive(Debug, Clone, Error)]
#[error("field '{field}': {reason}")]
pub struct DecodeError {
    pub field: &'static str,
    pub reason: String,
}

impl DecodeError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

/// Decode one raw transaction against the dispatch table of the given contract family.
pub fn decode(family: ContractFamily, tx: &RawTransaction) -> Decoded {
    let op_code = tx.in_msg.op_code;
    let result = match (family, op_code) {
        (ContractFamily::JobRegistry, OP_JOB_CREATE) => decode_job_created(&tx.in_msg.body),
        (ContractFamily::JobRegistry, OP_JOB_STATUS_CHANGE) => decode_job_status_changed(&tx.in_msg.body),
        (ContractFamily::JobRegistry, OP_JOB_ASSIGN_WORKER) => decode_worker_assigned(&tx.in_msg.body),
        (ContractFamily::Escrow, OP_ESCROW_CREATE) => decode_escrow_created(&tx.in_msg.body),
        (ContractFamily::Escrow, OP_ESCROW_FUND) => decode_escrow_funded(&tx.in_msg.body),
        (ContractFamily::Escrow, OP_ESCROW_LOCK) => decode_escrow_locked(&tx.in_msg.body),
        (ContractFamily::Escrow, OP_ESCROW_COMPLETE) => decode_escrow_completed(&tx.in_msg.body),
        (ContractFamily::Escrow, OP_ESCROW_DISPUTE) => decode_escrow_disputed(&tx.in_msg.body),
        (ContractFamily::Reputation, OP_RATING_SUBMIT) => decode_rating_submitted(&tx.in_msg.body),
        _ => return Decoded::Unrecognized { op_code },
    };
    match result {
        Ok(event) => Decoded::Event(event),
        Err(e) => Decoded::Malformed { op_code, reason: e.to_string() },
    }
}

fn decode_job_created(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    let ledger_id = r.ledger_id("job_id")?;
    let employer = r.address("employer")?;
    let wages = r.amount("wages")?;
    let duration_hours = i64::from(r.u32("duration")?);
    let category = r.string("category")?;
    Ok(DomainEvent::JobCreated { ledger_id, employer, wages, duration_hours, category })
}

fn decode_job_status_changed(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    let ledger_id = r.ledger_id("job_id")?;
    let code = r.u8("status")?;
    let new_status = job_status_from_code(code).ok_or_else(|| {
        DecodeError::new("status", format!("unknown job status code {code}"))
    })?;
    Ok(DomainEvent::JobStatusChanged { ledger_id, new_status })
}

fn decode_worker_assigned(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    let ledger_id = r.ledger_id("job_id")?;
    let worker = r.address("worker")?;
    Ok(DomainEvent::WorkerAssigned { ledger_id, worker })
}

fn decode_escrow_created(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    let ledger_id = r.ledger_id("escrow_id")?;
    let job_ledger_id = r.ledger_id("job_id")?;
    let amount = r.amount("amount")?;
    Ok(DomainEvent::EscrowCreated { ledger_id, job_ledger_id, amount })
}

fn decode_escrow_funded(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    Ok(DomainEvent::EscrowFunded { ledger_id: r.ledger_id("escrow_id")? })
}

fn decode_escrow_locked(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    Ok(DomainEvent::EscrowLocked { ledger_id: r.ledger_id("escrow_id")? })
}

fn decode_escrow_completed(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    let ledger_id = r.ledger_id("escrow_id")?;
    let flags = r.u8("confirmations")?;
    Ok(DomainEvent::EscrowCompleted {
        ledger_id,
        employer_confirmed: flags & 0b01 != 0,
        worker_confirmed: flags & 0b10 != 0,
    })
}

fn decode_escrow_disputed(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    let ledger_id = r.ledger_id("escrow_id")?;
    let reason = r.string("reason")?;
    Ok(DomainEvent::EscrowDisputed { ledger_id, reason })
}

fn decode_rating_submitted(body: &[u8]) -> Result<DomainEvent, DecodeError> {
    let mut r = FieldReader::new(body);
    let job_ledger_id = r.ledger_id("job_id")?;
    let rater = r.address("rater")?;
    let ratee = r.address("ratee")?;
    let score = i64::from(r.u8("score")?);
    if !(1..=5).contains(&score) {
        return Err(DecodeError::new("score", format!("score {score} outside 1..=5")));
    }
    let comment = r.string("comment")?;
    let comment = if comment.is_empty() { None } else { Some(comment) };
    Ok(DomainEvent::RatingSubmitted { job_ledger_id, rater, ratee, score, comment })
}

fn job_status_from_code(code: u8) -> Option<JobStatus> {
    let status = match code {
        0 => JobStatus::Posted,
        1 => JobStatus::Assigned,
        2 => JobStatus::InProgress,
        3 => JobStatus::PendingConfirmation,
        4 => JobStatus::Completed,
        5 => JobStatus::Cancelled,
        6 => JobStatus::Disputed,
        _ => return None,
    };
    Some(status)
}

//--------------------------------------     FieldReader      --------------------------------------------------------
/// A byte-slice cursor over a message body. All reads are bounds-checked and carry the field name so that
/// malformed transactions produce a useful warn log instead of a panic.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::new(
                field,
                format!("need {n} bytes at offset {}, body is {} bytes", self.pos, self.buf.len()),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.take(4, field)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        let bytes = self.take(8, field)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    fn ledger_id(&mut self, field: &'static str) -> Result<LedgerId, DecodeError> {
        let raw = self.u64(field)?;
        i64::try_from(raw)
            .map(LedgerId)
            .map_err(|_| DecodeError::new(field, format!("id {raw} overflows i64")))
    }

    fn amount(&mut self, field: &'static str) -> Result<NanoCoin, DecodeError> {
        let raw = self.u64(field)?;
        NanoCoin::try_from(raw).map_err(|e| DecodeError::new(field, e.to_string()))
    }

    fn address(&mut self, field: &'static str) -> Result<WalletAddress, DecodeError> {
        let bytes = self.take(32, field)?;
        let hex = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
        Ok(WalletAddress(hex))
    }

    fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = usize::from(self.u16(field)?);
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::new(field, e.to_string()))
    }
}
