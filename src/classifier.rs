//! Transfer Classification
//!
//! Splits raw indexer records into two directional buckets relative to the tracked
//! bridge address and drops anything touching the treasury. Classification is pure:
//! malformed records are skipped, never fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::source::RawRecord;

/// Base units (planck) per TAO
pub const PLANCK_PER_TAO: f64 = 1e9;

/// Which side of the bridge a transfer moves towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Arrives at the tracked address (Solana → Bittensor)
    Inbound,
    /// Leaves the tracked address (Bittensor → Solana)
    Outbound,
}

impl Direction {
    /// Human-readable bridge route
    pub fn route(&self) -> &'static str {
        match self {
            Direction::Inbound => "Solana → Bittensor",
            Direction::Outbound => "Bittensor → Solana",
        }
    }
}

/// A single classified TAO transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Extrinsic id when present, otherwise the indexer's record id
    pub id: String,
    pub extrinsic_id: Option<String>,
    pub block_number: Option<u64>,
    /// Sender ss58 address
    pub from_address: String,
    /// Recipient ss58 address
    pub to_address: String,
    /// Raw amount in planck
    pub amount_planck: u128,
    /// Amount in TAO
    pub amount: f64,
    pub timestamp: Option<String>,
}

impl TransferRecord {
    /// Whether either endpoint is `address`
    pub fn touches(&self, address: &str) -> bool {
        self.from_address == address || self.to_address == address
    }

    /// Amount rounded to 4 decimal places for display
    pub fn display_amount(&self) -> f64 {
        round_tao(self.amount)
    }

    /// Identity used to detect transfers not seen before
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.extrinsic_id.as_deref().unwrap_or_default(),
            self.from_address,
            self.to_address,
            self.amount_planck
        )
    }
}

/// Counts and totals derived from the two buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub total_after_filter: usize,
    #[serde(rename = "transfers_in")]
    pub transfers_in_count: usize,
    #[serde(rename = "transfers_out")]
    pub transfers_out_count: usize,
    pub total_in_tao: f64,
    pub total_out_tao: f64,
}

/// Output of one classification pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedResult {
    pub inbound: Vec<TransferRecord>,
    pub outbound: Vec<TransferRecord>,
    pub summary: TransferSummary,
}

impl ClassifiedResult {
    /// Build a result, deriving the summary from the buckets
    pub fn from_buckets(inbound: Vec<TransferRecord>, outbound: Vec<TransferRecord>) -> Self {
        let summary = TransferSummary {
            total_after_filter: inbound.len() + outbound.len(),
            transfers_in_count: inbound.len(),
            transfers_out_count: outbound.len(),
            total_in_tao: total_tao(&inbound),
            total_out_tao: total_tao(&outbound),
        };
        Self {
            inbound,
            outbound,
            summary,
        }
    }

    /// Records of one direction
    pub fn bucket(&self, direction: Direction) -> &[TransferRecord] {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty() && self.outbound.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    ss58: Option<String>,
}

/// Lenient view of an indexer record; every field may be absent
#[derive(Debug, Deserialize)]
struct RawTransfer {
    id: Option<Value>,
    extrinsic_id: Option<Value>,
    block_number: Option<Value>,
    from: Option<RawAccount>,
    to: Option<RawAccount>,
    amount: Option<Value>,
    timestamp: Option<String>,
}

/// Classify raw records relative to `tracked_address`.
///
/// Treasury traffic is dropped, records touching neither side of the bridge are
/// dropped, and source order is preserved within each bucket.
pub fn classify(
    raw_records: &[RawRecord],
    tracked_address: &str,
    treasury_address: &str,
) -> ClassifiedResult {
    let mut inbound = Vec::new();
    let mut outbound = Vec::new();
    let mut malformed = 0usize;

    for raw in raw_records {
        let Some(record) = decode_record(raw) else {
            malformed += 1;
            continue;
        };

        if record.touches(treasury_address) {
            continue;
        }

        match direction_of(&record, tracked_address) {
            Some(Direction::Inbound) => inbound.push(record),
            Some(Direction::Outbound) => outbound.push(record),
            None => {}
        }
    }

    if malformed > 0 {
        debug!(malformed, "Skipped malformed transfer records");
    }

    ClassifiedResult::from_buckets(inbound, outbound)
}

/// Direction of a record relative to the tracked address.
///
/// The recipient is checked first, so a self-transfer counts as inbound.
pub fn direction_of(record: &TransferRecord, tracked_address: &str) -> Option<Direction> {
    if record.to_address == tracked_address {
        Some(Direction::Inbound)
    } else if record.from_address == tracked_address {
        Some(Direction::Outbound)
    } else {
        None
    }
}

/// Decode one raw record, `None` if it is unusable
pub fn decode_record(raw: &RawRecord) -> Option<TransferRecord> {
    let tx: RawTransfer = serde_json::from_value(raw.clone()).ok()?;

    let from_address = tx.from.and_then(|a| a.ss58).filter(|s| !s.is_empty())?;
    let to_address = tx.to.and_then(|a| a.ss58).filter(|s| !s.is_empty())?;
    let amount_planck = tx.amount.as_ref().and_then(parse_planck)?;

    let extrinsic_id = tx.extrinsic_id.as_ref().and_then(scalar_string);
    let id = extrinsic_id
        .clone()
        .or_else(|| tx.id.as_ref().and_then(scalar_string))
        .unwrap_or_default();
    let block_number = tx.block_number.as_ref().and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    Some(TransferRecord {
        id,
        extrinsic_id,
        block_number,
        from_address,
        to_address,
        amount_planck,
        amount: planck_to_tao(amount_planck),
        timestamp: tx.timestamp,
    })
}

/// Parse a planck amount given as an integer string or JSON number
pub fn parse_planck(value: &Value) -> Option<u128> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
}

pub fn planck_to_tao(planck: u128) -> f64 {
    planck as f64 / PLANCK_PER_TAO
}

/// Round a TAO amount to 4 decimal places
pub fn round_tao(amount: f64) -> f64 {
    (amount * 10_000.0).round() / 10_000.0
}

fn total_tao(records: &[TransferRecord]) -> f64 {
    let planck = records
        .iter()
        .fold(0u128, |acc, r| acc.saturating_add(r.amount_planck));
    round_tao(planck_to_tao(planck))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
