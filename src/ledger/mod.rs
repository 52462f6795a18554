//! Cost ledger: authoritative spend record and budget gatekeeper.
//!
//! Every model invocation appends one immutable [`CostLedgerEntry`] and
//! bumps the daily/monthly period totals plus the per-session total, all
//! under a single mutex so concurrent sessions sharing a billing period
//! never lose increments. [`CostLedger::check_budget`] is the
//! strongly-consistent enforcement read the engine performs immediately
//! before each model invocation.
//!
//! Daily and monthly periods are independent; either one exceeding its
//! ceiling blocks further invocations. At 80% of a ceiling the decision
//! degrades to [`BudgetDecision::Throttled`]: the call still proceeds but
//! is flagged on the event stream.

pub mod pricing;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use pricing::{ModelPricing, PricingTable};

/// One append-only record of a model invocation's usage and cost.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub id: Uuid,
    pub session_id: String,
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost in USD, computed from the static price table at record time.
    pub cost: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Billing period over which a ceiling applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    Monthly,
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetPeriod::Daily => f.write_str("daily"),
            BudgetPeriod::Monthly => f.write_str("monthly"),
        }
    }
}

/// Outcome of a budget check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BudgetDecision {
    /// Spend is comfortably under every ceiling.
    Allowed,
    /// Usage reached the throttle ratio; the invocation proceeds flagged.
    Throttled {
        period: BudgetPeriod,
        usage_ratio: f64,
    },
    /// A ceiling is exhausted; the invocation must be refused.
    Blocked { period: BudgetPeriod },
}

/// Budget ceilings and the throttle threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BudgetConfig {
    /// USD ceiling per UTC day.
    pub daily_ceiling: f64,
    /// USD ceiling per UTC calendar month.
    pub monthly_ceiling: f64,
    /// Fraction of a ceiling at which invocations are flagged (default 0.8).
    pub throttle_ratio: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_ceiling: 50.0,
            monthly_ceiling: 500.0,
            throttle_ratio: 0.8,
        }
    }
}

/// Mutable ledger internals, guarded by one mutex.
///
/// Period totals reset lazily when the UTC date or month observed at
/// record time differs from the stored one.
struct LedgerInner {
    entries: Vec<CostLedgerEntry>,
    day: NaiveDate,
    daily_spend: f64,
    month: (i32, u32),
    monthly_spend: f64,
    session_totals: FxHashMap<String, f64>,
}

impl LedgerInner {
    fn roll_periods(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.daily_spend = 0.0;
        }
        let month = (now.year(), now.month());
        if month != self.month {
            self.month = month;
            self.monthly_spend = 0.0;
        }
    }
}

/// Append-only spend record with daily/monthly ceiling enforcement.
pub struct CostLedger {
    pricing: PricingTable,
    budget: BudgetConfig,
    inner: Mutex<LedgerInner>,
}

impl CostLedger {
    #[must_use]
    pub fn new(pricing: PricingTable, budget: BudgetConfig) -> Self {
        let now = Utc::now();
        Self {
            pricing,
            budget,
            inner: Mutex::new(LedgerInner {
                entries: Vec::new(),
                day: now.date_naive(),
                daily_spend: 0.0,
                month: (now.year(), now.month()),
                monthly_spend: 0.0,
                session_totals: FxHashMap::default(),
            }),
        }
    }

    /// Record usage for one model invocation.
    ///
    /// Computes cost from the price table, appends the entry, and bumps
    /// period and session totals in the same critical section.
    pub fn record(
        &self,
        session_id: &str,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> CostLedgerEntry {
        let now = Utc::now();
        let cost = self.pricing.cost(model_id, input_tokens, output_tokens);
        let entry = CostLedgerEntry {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            model_id: model_id.to_string(),
            input_tokens,
            output_tokens,
            cost,
            recorded_at: now,
        };

        let mut inner = self.inner.lock();
        inner.roll_periods(now);
        inner.daily_spend += cost;
        inner.monthly_spend += cost;
        *inner
            .session_totals
            .entry(session_id.to_string())
            .or_insert(0.0) += cost;
        inner.entries.push(entry.clone());

        tracing::debug!(
            session_id,
            model_id,
            input_tokens,
            output_tokens,
            cost,
            "ledger entry recorded"
        );
        entry
    }

    /// Strongly-consistent budget check performed before each invocation.
    ///
    /// The session id is not part of the decision (ceilings are shared
    /// across sessions) but is kept for trace attribution.
    pub fn check_budget(&self, session_id: &str) -> BudgetDecision {
        let mut inner = self.inner.lock();
        inner.roll_periods(Utc::now());

        let periods = [
            (BudgetPeriod::Daily, inner.daily_spend, self.budget.daily_ceiling),
            (
                BudgetPeriod::Monthly,
                inner.monthly_spend,
                self.budget.monthly_ceiling,
            ),
        ];

        for (period, spend, ceiling) in periods {
            if ceiling > 0.0 && spend >= ceiling {
                tracing::warn!(session_id, %period, spend, ceiling, "budget blocked");
                return BudgetDecision::Blocked { period };
            }
        }
        for (period, spend, ceiling) in periods {
            if ceiling > 0.0 && spend >= ceiling * self.budget.throttle_ratio {
                let usage_ratio = spend / ceiling;
                tracing::warn!(session_id, %period, usage_ratio, "budget throttled");
                return BudgetDecision::Throttled {
                    period,
                    usage_ratio,
                };
            }
        }
        BudgetDecision::Allowed
    }

    /// Running total spend for one session.
    #[must_use]
    pub fn session_total(&self, session_id: &str) -> f64 {
        self.inner
            .lock()
            .session_totals
            .get(session_id)
            .copied()
            .unwrap_or(0.0)
    }

    /// Aggregated spend for the current billing period.
    #[must_use]
    pub fn total_for(&self, period: BudgetPeriod) -> f64 {
        let mut inner = self.inner.lock();
        inner.roll_periods(Utc::now());
        match period {
            BudgetPeriod::Daily => inner.daily_spend,
            BudgetPeriod::Monthly => inner.monthly_spend,
        }
    }

    /// All entries recorded for one session, in append order.
    #[must_use]
    pub fn entries_for(&self, session_id: &str) -> Vec<CostLedgerEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Total number of recorded entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(daily: f64, monthly: f64) -> CostLedger {
        let pricing = PricingTable::empty().with_model("m", ModelPricing::new(1.0, 1.0));
        CostLedger::new(
            pricing,
            BudgetConfig {
                daily_ceiling: daily,
                monthly_ceiling: monthly,
                throttle_ratio: 0.8,
            },
        )
    }

    #[test]
    fn record_updates_session_and_period_totals() {
        let ledger = ledger_with(100.0, 1000.0);
        ledger.record("s1", "m", 1000, 1000); // $2
        ledger.record("s2", "m", 500, 500); // $1
        assert!((ledger.session_total("s1") - 2.0).abs() < 1e-9);
        assert!((ledger.total_for(BudgetPeriod::Daily) - 3.0).abs() < 1e-9);
        assert_eq!(ledger.entries_for("s1").len(), 1);
    }

    #[test]
    fn throttles_at_eighty_percent() {
        let ledger = ledger_with(10.0, 1000.0);
        ledger.record("s1", "m", 4000, 4000); // $8 = 80% of daily
        match ledger.check_budget("s1") {
            BudgetDecision::Throttled { period, .. } => assert_eq!(period, BudgetPeriod::Daily),
            other => panic!("expected throttled, got {other:?}"),
        }
    }

    #[test]
    fn blocks_at_ceiling() {
        let ledger = ledger_with(10.0, 1000.0);
        ledger.record("s1", "m", 5000, 5000); // $10
        assert!(matches!(
            ledger.check_budget("s1"),
            BudgetDecision::Blocked {
                period: BudgetPeriod::Daily
            }
        ));
    }

    #[test]
    fn monthly_ceiling_blocks_independently() {
        let ledger = ledger_with(1000.0, 5.0);
        ledger.record("s1", "m", 3000, 3000); // $6 > monthly
        assert!(matches!(
            ledger.check_budget("s1"),
            BudgetDecision::Blocked {
                period: BudgetPeriod::Monthly
            }
        ));
    }

    #[test]
    fn concurrent_records_do_not_lose_increments() {
        use std::sync::Arc;
        let ledger = Arc::new(ledger_with(0.0, 0.0));
        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || {
                let session = format!("s{i}");
                for _ in 0..100 {
                    ledger.record(&session, "m", 500, 500); // $1 each
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.entry_count(), 800);
        assert!((ledger.total_for(BudgetPeriod::Daily) - 800.0).abs() < 1e-6);
    }
}
