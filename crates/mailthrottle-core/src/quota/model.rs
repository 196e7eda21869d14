//! Quota data models.

use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};

/// Default per-user rate ceiling, in units per second.
pub const DEFAULT_RATE_LIMIT: u32 = 250;

/// Daily allowance for workspace accounts.
pub const WORKSPACE_DAILY_LIMIT: u64 = 1_000_000_000;

/// Conservative daily allowance for consumer accounts.
pub const CONSUMER_DAILY_LIMIT: u64 = 1_000_000;

/// Default interval between quota polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cost of each remote API method, in quota units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaUnit {
    /// `messages.list`
    MessagesList,
    /// `messages.get`
    MessagesGet,
    /// `messages.send`
    MessagesSend,
    /// `messages.modify`
    MessagesModify,
    /// `messages.batchModify`
    MessagesBatchModify,
    /// `messages.delete`
    MessagesDelete,
    /// `messages.trash`
    MessagesTrash,
    /// `messages.untrash`
    MessagesUntrash,
    /// `threads.list`
    ThreadsList,
    /// `threads.get`
    ThreadsGet,
    /// `threads.modify`
    ThreadsModify,
    /// `threads.trash`
    ThreadsTrash,
    /// `labels.list`
    LabelsList,
    /// `labels.get`
    LabelsGet,
    /// `labels.create`
    LabelsCreate,
    /// `labels.update`
    LabelsUpdate,
    /// `labels.delete`
    LabelsDelete,
    /// `drafts.list`
    DraftsList,
    /// `drafts.get`
    DraftsGet,
    /// `drafts.create`
    DraftsCreate,
    /// `drafts.send`
    DraftsSend,
    /// `drafts.delete`
    DraftsDelete,
    /// `getProfile`
    ProfileGet,
    /// `attachments.get`
    AttachmentsGet,
}

impl QuotaUnit {
    /// Returns the number of units the method consumes.
    #[must_use]
    pub const fn units(self) -> u32 {
        match self {
            Self::LabelsList | Self::LabelsGet => 1,
            Self::MessagesList
            | Self::MessagesGet
            | Self::MessagesModify
            | Self::MessagesTrash
            | Self::MessagesUntrash
            | Self::ThreadsList
            | Self::ThreadsModify
            | Self::ThreadsTrash
            | Self::LabelsCreate
            | Self::LabelsUpdate
            | Self::LabelsDelete
            | Self::DraftsList
            | Self::DraftsGet
            | Self::ProfileGet
            | Self::AttachmentsGet => 5,
            Self::MessagesDelete | Self::ThreadsGet | Self::DraftsCreate | Self::DraftsDelete => 10,
            Self::MessagesBatchModify => 50,
            Self::MessagesSend | Self::DraftsSend => 100,
        }
    }
}

/// Kind of account, which determines the default daily allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountKind {
    /// Workspace (organisation) account.
    #[default]
    Workspace,
    /// Consumer account.
    Consumer,
}

impl AccountKind {
    /// Returns the daily allowance for this kind of account.
    #[must_use]
    pub const fn daily_limit(self) -> u64 {
        match self {
            Self::Workspace => WORKSPACE_DAILY_LIMIT,
            Self::Consumer => CONSUMER_DAILY_LIMIT,
        }
    }
}

/// Quota tracker configuration.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Units allowed per identity per second.
    pub rate_limit: u32,
    /// Units allowed per identity per calendar day.
    pub daily_limit: u64,
    /// Interval between polls while waiting for capacity.
    pub poll_interval: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self::for_account(AccountKind::default())
    }
}

impl QuotaConfig {
    /// Creates a configuration with the defaults for `kind`.
    #[must_use]
    pub const fn for_account(kind: AccountKind) -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            daily_limit: kind.daily_limit(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the per-second rate ceiling.
    #[must_use]
    pub const fn rate_limit(mut self, units: u32) -> Self {
        self.rate_limit = units;
        self
    }

    /// Overrides the daily allowance.
    #[must_use]
    pub const fn daily_limit(mut self, units: u64) -> Self {
        self.daily_limit = units;
        self
    }

    /// Sets the polling interval used by `await_quota`.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Point-in-time view of one identity's usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Identity the snapshot describes.
    pub identity: String,
    /// Units used in the current one-second window.
    pub units_used: u32,
    /// Per-second ceiling.
    pub rate_limit: u32,
    /// Units still available in the current window.
    pub rate_available: u32,
    /// Units used today.
    pub daily_units: u64,
    /// Daily allowance.
    pub daily_limit: u64,
    /// Units still available today.
    pub daily_available: u64,
}

/// Usage counters for one identity.
#[derive(Debug, Clone)]
pub(crate) struct QuotaLedger {
    pub(crate) units_this_second: u32,
    window_start: DateTime<Local>,
    pub(crate) daily_units: u64,
    daily_window_start: DateTime<Local>,
}

impl QuotaLedger {
    pub(crate) const fn new(now: DateTime<Local>) -> Self {
        Self {
            units_this_second: 0,
            window_start: now,
            daily_units: 0,
            daily_window_start: now,
        }
    }

    /// Rolls the per-second window once a full second has elapsed and the
    /// daily window once the calendar date has changed.
    pub(crate) fn roll(&mut self, now: DateTime<Local>) {
        if now - self.window_start >= TimeDelta::seconds(1) {
            self.units_this_second = 0;
            self.window_start = now;
        }

        if now.date_naive() > self.daily_window_start.date_naive() {
            self.daily_units = 0;
            self.daily_window_start = now;
        }
    }

    /// Returns the ledger as it would look after rolling, without mutating.
    pub(crate) fn rolled(&self, now: DateTime<Local>) -> Self {
        let mut view = self.clone();
        view.roll(now);
        view
    }

    pub(crate) fn record(&mut self, units: u32) {
        self.units_this_second = self.units_this_second.saturating_add(units);
        self.daily_units = self.daily_units.saturating_add(u64::from(units));
    }
}
