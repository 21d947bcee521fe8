// # Address Store Trait
//
// Defines the interface for the durable per-token "last known address".
//
// ## Purpose
//
// The address store is the only shared mutable state in the service. It
// tracks, per token:
// - The last accepted IP address
// - When that address was first seen
//
// ## Atomicity
//
// `compare_and_set` is the single mutation. Implementations must make it
// atomic per token: two concurrent calls for the same token can never both
// observe the same stale value and both report a change.
//
// ## Implementations
//
// - File-based: one JSON record file per token (`state::file`)
// - In-memory: `HashMap` behind a write lock (`state::memory`)
//
// ## Usage
//
// ```rust,ignore
// use scrappy_core::AddressStore;
//
// let outcome = store.compare_and_set("abc123", "1.2.3.4".parse()?).await?;
// if outcome.changed {
//     println!("was {:?}", outcome.previous);
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;

/// Persisted record for one token
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AddressRecord {
    /// The last accepted IP address (normalized)
    pub last_ip: IpAddr,
    /// When this address was accepted
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl AddressRecord {
    /// Create a new record stamped with the current time
    ///
    /// # Visibility
    ///
    /// This is `pub(crate)` so records are only minted by store implementations
    /// as part of `compare_and_set`.
    pub(crate) fn new(last_ip: IpAddr) -> Self {
        Self {
            last_ip,
            last_updated: chrono::Utc::now(),
        }
    }
}

/// Result of a compare-and-set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasOutcome {
    /// Whether the stored address was replaced
    pub changed: bool,
    /// The address before this call (absent on first observation)
    pub previous: Option<IpAddr>,
}

impl CasOutcome {
    /// A call that replaced `previous`
    pub fn changed(previous: Option<IpAddr>) -> Self {
        Self {
            changed: true,
            previous,
        }
    }

    /// A call that found `current` already stored
    pub fn unchanged(current: IpAddr) -> Self {
        Self {
            changed: false,
            previous: Some(current),
        }
    }
}

/// Trait for address store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Ownership
///
/// The store exclusively owns the persisted representation. No other
/// component reads or writes record files directly, and the store alone
/// performs the locking discipline.
///
/// # Failure
///
/// Read or write failures surface as `Error::Storage`. A failure for one
/// token must leave every other token's record intact, and must never be
/// reported as "unchanged".
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Get the last known IP for a token
    ///
    /// # Returns
    ///
    /// - `Ok(Some(IpAddr))`: The last known IP
    /// - `Ok(None)`: Token never observed
    /// - `Err(Error)`: Storage error
    async fn get(&self, token: &str) -> Result<Option<IpAddr>, crate::Error>;

    /// Get the full record for a token
    async fn get_record(&self, token: &str) -> Result<Option<AddressRecord>, crate::Error>;

    /// Atomically replace the stored address if it differs from `new_ip`
    ///
    /// # Returns
    ///
    /// - `Ok(CasOutcome { changed: true, previous })`: `new_ip` is now stored
    /// - `Ok(CasOutcome { changed: false, .. })`: `new_ip` was already stored
    /// - `Err(Error)`: Storage error, nothing was written
    async fn compare_and_set(&self, token: &str, new_ip: IpAddr)
    -> Result<CasOutcome, crate::Error>;

    /// List all tokens with a stored record
    async fn list_tokens(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing address stores from configuration
#[async_trait]
pub trait AddressStoreFactory: Send + Sync {
    /// Create an AddressStore instance from configuration
    async fn create(
        &self,
        config: &crate::config::AddressStoreConfig,
    ) -> Result<std::sync::Arc<dyn AddressStore>, crate::Error>;
}
