//! # mailthrottle-mail
//!
//! Bulk mail operations for a quota-constrained email API.
//!
//! [`MailService`] wraps a caller-supplied [`MailTransport`] and runs every
//! request through the `mailthrottle-core` machinery: quota accounting per
//! identity, retries with exponential backoff, chunked batch execution with
//! per-item results, and an optional local result cache.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mailthrottle_core::QuotaTracker;
//! # use mailthrottle_mail::{MailService, MailTransport, MessageFormat};
//! # async fn demo<T: MailTransport>(transport: Arc<T>) -> mailthrottle_mail::Result<()> {
//! let quota = Arc::new(QuotaTracker::default());
//! let service = MailService::new(transport, quota, "work");
//!
//! let fetched = service
//!     .batch_get_messages(&["18c2f0a1b", "18c2f0a1c"], MessageFormat::Full)
//!     .await;
//! println!("{} of {} fetched", fetched.succeeded, fetched.total);
//!
//! let archived = service.archive_all("older_than:1y", 500).await?;
//! println!("archived {}", archived.succeeded);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod request;
pub mod service;
pub mod transport;

pub use error::{Result, ServiceError};
pub use request::{ApiRequest, LABEL_INBOX, LABEL_UNREAD, MessageFormat};
pub use service::{DEFAULT_BULK_CAP, DEFAULT_UNREAD_QUERY, MailService};
pub use transport::{ListPage, MailTransport};
