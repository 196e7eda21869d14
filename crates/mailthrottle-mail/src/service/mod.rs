//! Mail service layer.
//!
//! Bridges callers and a [`crate::MailTransport`], applying quota, retries,
//! batching and cache wiring to every operation.

pub mod mail;

pub use mail::{DEFAULT_BULK_CAP, DEFAULT_UNREAD_QUERY, MAX_PAGE_SIZE, MailService};
