//! Per-identity quota accounting.
//!
//! The remote API charges every method a fixed number of quota units and
//! enforces two budgets per user: a per-second rate ceiling (250 units by
//! default) and a daily allowance. [`QuotaTracker`] keeps one ledger per
//! identity and answers whether a call of a given cost may go out now.
//!
//! The tracker never gates by itself: callers check with
//! [`QuotaTracker::can_proceed`] or wait with [`QuotaTracker::await_quota`],
//! then report what they spent with [`QuotaTracker::record_usage`].

mod model;
mod tracker;

pub use model::{AccountKind, QuotaConfig, QuotaSnapshot, QuotaUnit};
pub use tracker::QuotaTracker;
