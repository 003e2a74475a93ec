///! Shared contract between the logging platform and the eQSL dispatcher
///!
///! Data model types plus the external interface traits the dispatcher is
///! wired with. Nothing in here does I/O.

pub mod interfaces;
pub mod types;

pub use interfaces::{AdminAlert, BlobStore, DirectoryLookup, MailProvider, ProviderError, RecordStore};
pub use types::{
    Attachment, ConfirmationRecord, DirectoryEntry, EventTemplate, FailedAddressEntry, ProviderAck,
    TextOffsets,
};
