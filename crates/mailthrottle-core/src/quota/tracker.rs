//! Quota tracker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::model::{QuotaConfig, QuotaLedger, QuotaSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::{Error, Result};

/// Tracks quota usage for any number of identities.
///
/// One lock guards every ledger. Each check is O(1) and the lock is never
/// held across an await point, so unrelated identities only contend for
/// the few instructions of a window roll.
///
/// Construct one tracker per process and share it behind an [`Arc`].
#[derive(Debug)]
pub struct QuotaTracker {
    config: QuotaConfig,
    clock: Arc<dyn Clock>,
    ledgers: Mutex<HashMap<String, QuotaLedger>>,
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}

impl QuotaTracker {
    /// Creates a tracker reading the system clock.
    #[must_use]
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a tracker reading time from `clock`.
    #[must_use]
    pub fn with_clock(config: QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the tracker configuration.
    #[must_use]
    pub const fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Returns true if `units` more can be spent by `identity` right now.
    ///
    /// Rolls the identity's windows first. A call fits when it keeps the
    /// current second at or below the rate ceiling and today's usage at or
    /// below the daily allowance. While the daily allowance is not in reach,
    /// the answer depends on the rate window alone.
    pub fn can_proceed(&self, identity: &str, units: u32) -> bool {
        let now = self.clock.now();
        let mut ledgers = self.ledgers();
        let ledger = ledgers
            .entry(identity.to_owned())
            .or_insert_with(|| QuotaLedger::new(now));
        ledger.roll(now);

        u64::from(ledger.units_this_second) + u64::from(units) <= u64::from(self.config.rate_limit)
            && ledger.daily_units.saturating_add(u64::from(units)) <= self.config.daily_limit
    }

    /// Records `units` spent by `identity`.
    ///
    /// Never gates: usage reported after the fact is always recorded.
    pub fn record_usage(&self, identity: &str, units: u32) {
        let now = self.clock.now();
        let mut ledgers = self.ledgers();
        let ledger = ledgers
            .entry(identity.to_owned())
            .or_insert_with(|| QuotaLedger::new(now));
        ledger.roll(now);
        ledger.record(units);
    }

    /// Waits until `units` can be spent by `identity`.
    ///
    /// Polls [`Self::can_proceed`] every `poll_interval`. Requests that can
    /// never fit (larger than the rate ceiling, or beyond what is left of
    /// today's allowance) fail immediately instead of waiting out the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaTimeout`] if capacity is not available within
    /// `timeout`.
    pub async fn await_quota(&self, identity: &str, units: u32, timeout: Duration) -> Result<()> {
        let started = Instant::now();

        loop {
            if self.can_proceed(identity, units) {
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= timeout || !self.can_ever_fit(identity, units) {
                warn!(identity, units, ?waited, "Quota wait timed out");
                return Err(Error::QuotaTimeout {
                    identity: identity.to_owned(),
                    units,
                    waited,
                });
            }

            debug!(identity, units, "Waiting for quota");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Returns true if today's allowance is used up.
    #[must_use]
    pub fn is_daily_limit_reached(&self, identity: &str) -> bool {
        self.view(identity)
            .is_some_and(|ledger| ledger.daily_units >= self.config.daily_limit)
    }

    /// Returns units still available in the current second.
    #[must_use]
    pub fn remaining_rate(&self, identity: &str) -> u32 {
        let used = self.view(identity).map_or(0, |ledger| ledger.units_this_second);
        self.config.rate_limit.saturating_sub(used)
    }

    /// Returns a snapshot of `identity`'s usage.
    #[must_use]
    pub fn usage_snapshot(&self, identity: &str) -> QuotaSnapshot {
        let (units_used, daily_units) = self
            .view(identity)
            .map_or((0, 0), |ledger| (ledger.units_this_second, ledger.daily_units));

        QuotaSnapshot {
            identity: identity.to_owned(),
            units_used,
            rate_limit: self.config.rate_limit,
            rate_available: self.config.rate_limit.saturating_sub(units_used),
            daily_units,
            daily_limit: self.config.daily_limit,
            daily_available: self.config.daily_limit.saturating_sub(daily_units),
        }
    }

    /// Forgets all usage recorded for `identity`.
    pub fn reset(&self, identity: &str) {
        self.ledgers().remove(identity);
    }

    /// Returns the identity's ledger with windows rolled, without mutating it.
    fn view(&self, identity: &str) -> Option<QuotaLedger> {
        let now = self.clock.now();
        self.ledgers().get(identity).map(|ledger| ledger.rolled(now))
    }

    fn can_ever_fit(&self, identity: &str, units: u32) -> bool {
        let daily_units = self.view(identity).map_or(0, |ledger| ledger.daily_units);
        units <= self.config.rate_limit
            && daily_units.saturating_add(u64::from(units)) <= self.config.daily_limit
    }

    fn ledgers(&self) -> MutexGuard<'_, HashMap<String, QuotaLedger>> {
        self.ledgers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
