//! `freshdesk_harvest` mirrors Freshdesk tickets and conversations into SQLite
//! under the account's API rate limit, and turns the exported history into
//! JSONL training data.

/// Runtime configuration loading and validation.
pub mod config;
/// JSONL export of stored tickets.
pub mod export;
/// Freshdesk API client with bounded retries.
pub mod freshdesk;
/// Logging helpers used throughout the crate.
pub mod logging;
/// Runtime metrics counters.
pub mod metrics;
/// Ticket, conversation and persona data models.
pub mod model;
/// Page-by-page listing of Freshdesk collections.
pub mod pagination;
/// Rate budget tracking and pause decisions.
pub mod rate_limit;
/// SQLite ticket store.
pub mod store;
/// Full, incremental and id-range sync.
pub mod sync;
/// Header stripping and training-text normalization.
pub mod text;
/// Token counting for dataset statistics.
pub mod tokenize;
/// Training/validation dataset generation.
pub mod training;
