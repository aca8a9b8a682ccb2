//! File-backed quota ledger
//!
//! Persists day records as one JSON file so the daily cap survives process
//! restarts. Same lazy-rollover semantics as the in-memory ledger; a write
//! failure propagates so the controller fails closed.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use confab_session::quota::{ConsumeOutcome, DayRecord, QuotaLedger, QuotaSnapshot};
use confab_session::{DAILY_MESSAGE_LIMIT, Error, Result};

/// Quota ledger persisted to a single JSON file
pub struct FileLedger {
    path: PathBuf,
    limit: u32,
    records: Mutex<HashMap<String, DayRecord>>,
}

impl FileLedger {
    /// Open a ledger at `path`, creating parent directories if needed
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let records = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!("unreadable quota file, starting fresh: {}", e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            limit: DAILY_MESSAGE_LIMIT,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &HashMap<String, DayRecord>) -> Result<()> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| Error::Store(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| Error::Store(e.to_string()))
    }
}

#[async_trait]
impl QuotaLedger for FileLedger {
    async fn check_and_consume(&self, identity: &str) -> Result<ConsumeOutcome> {
        let today = Utc::now().date_naive();
        let mut records = self.records.lock();
        let record = records
            .entry(identity.to_string())
            .or_insert(DayRecord { day: today, used: 0 });
        *record = record.rolled(today);

        let allowed = record.used < self.limit;
        if allowed {
            record.used += 1;
        }
        let snapshot = record.snapshot(self.limit);
        if allowed {
            self.persist(&records)?;
        }
        Ok(ConsumeOutcome { allowed, snapshot })
    }

    async fn peek(&self, identity: &str) -> Result<QuotaSnapshot> {
        let today = Utc::now().date_naive();
        let records = self.records.lock();
        let record = records
            .get(identity)
            .copied()
            .unwrap_or(DayRecord { day: today, used: 0 })
            .rolled(today);
        Ok(record.snapshot(self.limit))
    }
}
