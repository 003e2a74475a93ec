///! External interfaces of the dispatcher
///!
///! The batch core is wired against these traits; production adapters and
///! test doubles both live on the other side of them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    Attachment, ConfirmationRecord, DirectoryEntry, EventTemplate, FailedAddressEntry, ProviderAck,
};

/// Mail provider outcome taxonomy.
///
/// Quota exhaustion is the one variant that stops a run; everything else
/// is scoped to the group being sent.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider quota exceeded: {detail}")]
    QuotaExceeded { detail: String },

    #[error("delivery rejected: {detail}")]
    Rejected { detail: String },

    #[error("transient provider failure: {detail}")]
    Transient { detail: String },
}

impl ProviderError {
    pub fn is_quota(&self) -> bool {
        matches!(self, ProviderError::QuotaExceeded { .. })
    }
}

/// Record persistence, owned by the upstream logging platform.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Pending records with a contact timestamp at or after `since`,
    /// capped at `limit`.
    async fn find_pending(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConfirmationRecord>>;

    /// Write a record back (image ref and/or sent flag updates).
    async fn save(&self, record: &ConfirmationRecord) -> Result<()>;

    /// The event a record belongs to, with its template reference.
    async fn event(&self, event_id: &str) -> Result<Option<EventTemplate>>;

    /// Known email of a station registered on the platform.
    async fn station_email(&self, station_id: &str) -> Result<Option<String>>;

    /// Append an unresolved-address entry. Returns true when the
    /// (callsign, event) pair was not on file yet.
    async fn record_failed_address(&self, entry: &FailedAddressEntry) -> Result<bool>;
}

/// Binary blob storage for templates and composited cards.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: &[u8], folder: &str) -> Result<String>;
    async fn get(&self, url_ref: &str) -> Result<Vec<u8>>;
}

/// Callsign directory. Implementations cache internally with a TTL.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    async fn lookup(&self, callsign: &str) -> Result<Option<DirectoryEntry>>;
}

/// Outbound mail.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Send one digest. A returned error carries the classification the
    /// sender needs to decide between retry-next-run and abort-run.
    async fn send_digest(
        &self,
        address: &str,
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<ProviderAck, ProviderError>;
}

/// Fire-and-forget operator alerting. Failures are the implementation's
/// problem; callers never wait on delivery.
#[async_trait]
pub trait AdminAlert: Send + Sync {
    async fn notify(&self, message: &str, channel: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_classification_is_explicit() {
        let quota = ProviderError::QuotaExceeded { detail: "452 4.2.2 quota".into() };
        let rejected = ProviderError::Rejected { detail: "550 mailbox unavailable".into() };
        let transient = ProviderError::Transient { detail: "connection reset".into() };

        assert!(quota.is_quota());
        assert!(!rejected.is_quota());
        assert!(!transient.is_quota());
    }
}
