//! Append-only audit log for money-moving decisions.
//!
//! One JSON object per line. Each record carries an optional hash chain
//! (`hash_prev` / `hash_self`) so any later edit or deletion of a line is
//! detectable, and a deterministic `event_id` (UUIDv5 over chain state,
//! sequence, and payload) so a replayed append produces the same id.
//!
//! Every provider transaction outcome, claim, reconciliation decision, and
//! expiry sweep writes one record here. The log is the answer to "what did
//! the daemon decide and why" long after the in-memory state is gone.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespace for deterministic event ids.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8f, 0x2a, 0x51, 0xc4, 0x7d, 0x3e, 0x4b, 0x0a, 0x9c, 0x61, 0x58, 0xe2, 0x1f, 0x0b, 0xd7,
    0x44,
]);

/// What a record is about. Closed set so log consumers can filter reliably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTopic {
    Transaction,
    Claim,
    Reward,
    Reconcile,
    Lifecycle,
}

impl AuditTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditTopic::Transaction => "transaction",
            AuditTopic::Claim => "claim",
            AuditTopic::Reward => "reward",
            AuditTopic::Reconcile => "reconcile",
            AuditTopic::Lifecycle => "lifecycle",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    /// One id per daemon process; ties records to a run.
    pub run_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub topic: AuditTopic,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only JSONL writer.
pub struct AuditWriter {
    path: PathBuf,
    run_id: Uuid,
    chained: bool,
    last_hash: Option<String>,
    seq: u64,
}

impl AuditWriter {
    /// Create a writer for a fresh log, making parent directories as needed.
    pub fn create(path: impl AsRef<Path>, run_id: Uuid, chained: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create audit log directory {}", parent.display()))?;
        }
        Ok(Self {
            path,
            run_id,
            chained,
            last_hash: None,
            seq: 0,
        })
    }

    /// Resume appending to an existing log: restore the chain tip and the
    /// sequence counter from the last line. A missing file starts fresh.
    pub fn resume(path: impl AsRef<Path>, run_id: Uuid, chained: bool) -> Result<Self> {
        let mut writer = Self::create(&path, run_id, chained)?;
        let content = match fs::read_to_string(path.as_ref()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(writer),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read audit log {}", path.as_ref().display()))
            }
        };
        let mut count = 0u64;
        let mut last_hash = None;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: AuditRecord =
                serde_json::from_str(line).context("parse existing audit record")?;
            last_hash = record.hash_self;
            count += 1;
        }
        writer.seq = count;
        writer.last_hash = last_hash;
        Ok(writer)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one record; returns it as written (ids and hashes filled in).
    pub fn append(
        &mut self,
        topic: AuditTopic,
        event_type: &str,
        payload: Value,
    ) -> Result<AuditRecord> {
        let event_id = derive_event_id(self.last_hash.as_deref(), self.seq, &payload)?;
        self.seq += 1;

        let mut record = AuditRecord {
            event_id,
            run_id: self.run_id,
            ts_utc: Utc::now(),
            topic,
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.chained {
            record.hash_prev = self.last_hash.clone();
            let hash = compute_record_hash(&record)?;
            record.hash_self = Some(hash.clone());
            self.last_hash = Some(hash);
        }

        let line = canonical_json_line(&record)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {}", self.path.display()))?;
        f.write_all(line.as_bytes()).context("write audit record")?;
        f.write_all(b"\n").context("write audit newline")?;

        Ok(record)
    }
}

/// Deterministic event id: same chain tip, sequence, and payload always
/// produce the same id, so a crash-and-replay appends an identical record.
fn derive_event_id(last_hash: Option<&str>, seq: u64, payload: &Value) -> Result<Uuid> {
    let canonical = canonical_json_line(payload)?;
    let mut material = Vec::new();
    material.extend_from_slice(last_hash.unwrap_or("genesis").as_bytes());
    material.extend_from_slice(&seq.to_be_bytes());
    material.extend_from_slice(canonical.as_bytes());
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, &material))
}

/// Record hash over the canonical JSON with `hash_self` cleared.
pub fn compute_record_hash(record: &AuditRecord) -> Result<String> {
    let mut unhashed = record.clone();
    unhashed.hash_self = None;
    let canonical = canonical_json_line(&unhashed)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Compact JSON with recursively sorted keys; the hash input format.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit record")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("stringify audit record")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Outcome of a chain verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {}", path.as_ref().display()))?;
    verify_hash_chain_str(&content)
}

/// Walk the log checking each record's `hash_prev` linkage and `hash_self`
/// integrity. Stops at the first break.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut lines = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: AuditRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit record at line {}", i + 1))?;
        lines += 1;

        if record.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, record.hash_prev
                ),
            });
        }
        if let Some(ref claimed) = record.hash_self {
            let recomputed = compute_record_hash(&record)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }
        prev_hash = record.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chain_survives_appends_and_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let run_id = Uuid::new_v4();

        let mut writer = AuditWriter::create(&path, run_id, true).unwrap();
        writer
            .append(
                AuditTopic::Transaction,
                "wager_applied",
                json!({"transaction_id": "tx-1", "amount_micros": 25_000_000}),
            )
            .unwrap();
        writer
            .append(
                AuditTopic::Claim,
                "claim_completed",
                json!({"claim_id": "c-1", "net_micros": 2_500}),
            )
            .unwrap();

        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 2 }
        );

        // Flip a digit in the payload of line 1; the chain must break there.
        let content = fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("25000000", "26000000", 1);
        assert_ne!(tampered, content);
        assert!(matches!(
            verify_hash_chain_str(&tampered).unwrap(),
            VerifyResult::Broken { line: 1, .. }
        ));
    }

    #[test]
    fn resume_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let run_id = Uuid::new_v4();

        let mut writer = AuditWriter::create(&path, run_id, true).unwrap();
        writer
            .append(AuditTopic::Lifecycle, "daemon_started", json!({}))
            .unwrap();
        drop(writer);

        let mut resumed = AuditWriter::resume(&path, run_id, true).unwrap();
        assert_eq!(resumed.seq(), 1);
        resumed
            .append(AuditTopic::Lifecycle, "daemon_stopped", json!({}))
            .unwrap();

        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 2 }
        );
    }

    #[test]
    fn event_ids_are_deterministic() {
        let payload = json!({"k": "v"});
        let a = derive_event_id(None, 0, &payload).unwrap();
        let b = derive_event_id(None, 0, &payload).unwrap();
        let c = derive_event_id(None, 1, &payload).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
