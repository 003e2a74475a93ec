///! Batched delivery
///!
///! Destination resolution and grouping, the quota-aware sender, and the
///! orchestrator that wires one scheduled run together.

pub mod directory;
pub mod grouper;
pub mod orchestrator;
pub mod sender;

pub use directory::HttpDirectoryLookup;
pub use grouper::{DeliveryGroup, RecipientGrouper, clean_callsign};
pub use orchestrator::{BatchOrchestrator, RunConfig, RunSummary};
pub use sender::{GroupOutcome, QuotaAwareSender};
