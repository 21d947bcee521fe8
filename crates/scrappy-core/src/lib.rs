// # scrappy-core
//
// Core library for the Scrappy DDNS change-detection service.
//
// Clients periodically report "token + public IP". The service remembers the
// last address per token and pushes an alert to the owner whenever it changes.
// This crate holds everything except the HTTP listener and the concrete push
// provider.
//
// ## Architecture Overview
//
// - **TokenRegistry**: Immutable token -> display name mapping, loaded once
// - **AddressStore**: Trait for the per-token "last known IP" record with
//   atomic compare-and-set
// - **Notifier**: Trait for the outbound alert channel
// - **ChangeDetector**: Orchestrates one observation: validate, extract,
//   compare-and-set, notify
// - **ProviderRegistry**: Plugin-based registry for stores and notifiers
//
// ## Design Principles
//
// 1. **State truth over alert delivery**: a committed address change is never
//    rolled back because a notification failed
// 2. **Per-token atomicity**: concurrent observations for one token serialize
//    inside the store; different tokens never contend
// 3. **No ambient globals**: every component is constructed and injected
// 4. **Library-First**: the daemon is a thin shell around this crate

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod registry;
pub mod state;
pub mod tokens;
pub mod traits;

// Re-export core types for convenience
pub use address::Observation;
pub use config::{
    AddressStoreConfig, NotifierConfig, NotifyDispatch, NotifyPolicy, ServerConfig, ServiceConfig,
};
pub use engine::{
    ChangeDetector, DetectorEvent, DetectorStats, NotificationStatus, ObservationOutcome,
    StatsSnapshot,
};
pub use error::{Error, Result};
pub use notifier::LogNotifier;
pub use registry::ProviderRegistry;
pub use state::{FileAddressStore, MemoryAddressStore};
pub use tokens::TokenRegistry;
pub use traits::{AddressRecord, AddressStore, CasOutcome, Notifier};
