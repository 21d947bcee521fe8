//! Core traits for the Scrappy DDNS service
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`AddressStore`]: Per-token "last known IP" with atomic compare-and-set
//! - [`Notifier`]: Single best-effort alert to the service owner

pub mod address_store;
pub mod notifier;

pub use address_store::{AddressRecord, AddressStore, AddressStoreFactory, CasOutcome};
pub use notifier::{Notifier, NotifierFactory};
