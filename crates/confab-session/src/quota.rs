//! Per-identity daily request quota
//!
//! The ledger is the only component with cross-session shared mutable state;
//! it is solely responsible for its own atomicity. Day buckets are calendar
//! days in UTC and roll over lazily: the first call observing a new day
//! treats the prior counter as reset.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// Fixed daily send limit per identity
pub const DAILY_MESSAGE_LIMIT: u32 = 50;

/// Point-in-time view of an identity's quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Start of the next day bucket
    pub reset_at: DateTime<Utc>,
}

/// Result of an attempted quota consumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// Whether one unit was consumed
    pub allowed: bool,
    /// The counter state after the attempt
    pub snapshot: QuotaSnapshot,
}

/// Atomic per-identity daily counter.
///
/// Under concurrent calls for the same identity at most `limit` consumptions
/// succeed per day bucket; calls beyond the limit leave the counter
/// unchanged. A backend failure must be treated by callers as quota
/// exceeded, never as an allowance.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Atomically consume one unit if any remain
    async fn check_and_consume(&self, identity: &str) -> Result<ConsumeOutcome>;

    /// Read the current counter without mutating it
    async fn peek(&self, identity: &str) -> Result<QuotaSnapshot>;
}

/// Start of the day after `day`, in the reference timezone
pub fn reset_time_for(day: NaiveDate) -> DateTime<Utc> {
    let next = day.succ_opt().unwrap_or(day);
    next.and_time(NaiveTime::MIN).and_utc()
}

/// One identity's counter for a single day bucket
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DayRecord {
    pub day: NaiveDate,
    pub used: u32,
}

impl DayRecord {
    /// View this record as of `today`, applying lazy rollover
    pub fn rolled(self, today: NaiveDate) -> Self {
        if self.day == today {
            self
        } else {
            Self { day: today, used: 0 }
        }
    }

    /// Snapshot of this record under the given limit
    pub fn snapshot(&self, limit: u32) -> QuotaSnapshot {
        QuotaSnapshot {
            used: self.used,
            limit,
            remaining: limit.saturating_sub(self.used),
            reset_at: reset_time_for(self.day),
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// In-process ledger backed by a mutex-guarded map
pub struct MemoryLedger {
    limit: u32,
    clock: Clock,
    records: Mutex<HashMap<String, DayRecord>>,
}

impl MemoryLedger {
    /// Create a ledger with the fixed daily limit and the system clock
    pub fn new() -> Self {
        Self::with_limit(DAILY_MESSAGE_LIMIT)
    }

    /// Create a ledger with a custom limit
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            clock: Box::new(Utc::now),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the clock, for deterministic rollover behavior
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn today(&self) -> NaiveDate {
        (self.clock)().date_naive()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaLedger for MemoryLedger {
    async fn check_and_consume(&self, identity: &str) -> Result<ConsumeOutcome> {
        let today = self.today();
        let mut records = self.records.lock();
        let record = records
            .entry(identity.to_string())
            .or_insert(DayRecord { day: today, used: 0 });
        *record = record.rolled(today);

        let allowed = record.used < self.limit;
        if allowed {
            record.used += 1;
        }
        Ok(ConsumeOutcome {
            allowed,
            snapshot: record.snapshot(self.limit),
        })
    }

    async fn peek(&self, identity: &str) -> Result<QuotaSnapshot> {
        let today = self.today();
        let records = self.records.lock();
        let record = records
            .get(identity)
            .copied()
            .unwrap_or(DayRecord { day: today, used: 0 })
            .rolled(today);
        Ok(record.snapshot(self.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_clock(ymd: (i32, u32, u32)) -> impl Fn() -> DateTime<Utc> {
        move || Utc.with_ymd_and_hms(ymd.0, ymd.1, ymd.2, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_consume_counts_up_to_limit() {
        let ledger = MemoryLedger::with_limit(3);
        for used in 1..=3 {
            let outcome = ledger.check_and_consume("u1").await.unwrap();
            assert!(outcome.allowed);
            assert_eq!(outcome.snapshot.used, used);
            assert_eq!(outcome.snapshot.remaining, 3 - used);
        }
    }

    #[tokio::test]
    async fn test_over_limit_call_is_rejected_without_mutation() {
        let ledger = MemoryLedger::with_limit(2);
        ledger.check_and_consume("u1").await.unwrap();
        ledger.check_and_consume("u1").await.unwrap();

        let outcome = ledger.check_and_consume("u1").await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.snapshot.used, 2);
        assert_eq!(outcome.snapshot.remaining, 0);

        // Still unchanged on a further attempt
        let outcome = ledger.check_and_consume("u1").await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.snapshot.used, 2);
    }

    #[tokio::test]
    async fn test_full_daily_limit_then_rejection() {
        let ledger = MemoryLedger::new();
        for _ in 0..DAILY_MESSAGE_LIMIT {
            assert!(ledger.check_and_consume("u1").await.unwrap().allowed);
        }
        let outcome = ledger.check_and_consume("u1").await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.snapshot.used, DAILY_MESSAGE_LIMIT);
    }

    #[tokio::test]
    async fn test_identities_do_not_share_buckets() {
        let ledger = MemoryLedger::with_limit(1);
        assert!(ledger.check_and_consume("u1").await.unwrap().allowed);
        assert!(ledger.check_and_consume("u2").await.unwrap().allowed);
        assert!(!ledger.check_and_consume("u1").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_peek_never_mutates() {
        let ledger = MemoryLedger::with_limit(5);
        ledger.check_and_consume("u1").await.unwrap();
        let a = ledger.peek("u1").await.unwrap();
        let b = ledger.peek("u1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.used, 1);
        assert_eq!(a.remaining, 4);
    }

    #[tokio::test]
    async fn test_peek_unknown_identity_is_fresh() {
        let ledger = MemoryLedger::new();
        let snapshot = ledger.peek("nobody").await.unwrap();
        assert_eq!(snapshot.used, 0);
        assert_eq!(snapshot.remaining, DAILY_MESSAGE_LIMIT);
    }

    #[tokio::test]
    async fn test_exhausted_on_day_d_resets_on_day_d_plus_one() {
        let ledger = MemoryLedger::with_limit(2).with_clock(fixed_clock((2026, 3, 1)));
        ledger.check_and_consume("u1").await.unwrap();
        ledger.check_and_consume("u1").await.unwrap();
        assert!(!ledger.check_and_consume("u1").await.unwrap().allowed);

        let ledger = MemoryLedger {
            limit: 2,
            clock: Box::new(fixed_clock((2026, 3, 2))),
            records: Mutex::new(
                [("u1".to_string(), DayRecord {
                    day: chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                    used: 2,
                })]
                .into_iter()
                .collect(),
            ),
        };
        let snapshot = ledger.peek("u1").await.unwrap();
        assert_eq!(snapshot.used, 0);
        assert_eq!(snapshot.remaining, 2);
        assert!(ledger.check_and_consume("u1").await.unwrap().allowed);
    }

    #[test]
    fn test_reset_time_is_start_of_next_day() {
        let day = chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let reset = reset_time_for(day);
        assert_eq!(reset, Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
    }
}
