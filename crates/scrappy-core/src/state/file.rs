// # File Address Store
//
// File-based implementation of AddressStore with crash-safe writes.
//
// ## Layout
//
// One record file per token in a single directory:
//
// ```text
// <directory>/<token>.ip
// ```
//
// Tokens made only of ASCII letters, digits, `-`, `_` and `.` (not leading)
// are used as the file name as is. Every other byte is written as `%XX`, so
// any token maps to exactly one file inside the directory.
//
// Each file holds a small JSON document:
//
// ```json
// {
//   "version": "1.0",
//   "last_ip": "1.2.3.4",
//   "last_updated": "2025-01-09T12:00:00Z"
// }
// ```
//
// A file containing only a bare IP literal is also accepted on read, so
// caches written by older deployments keep their last known address.
//
// ## Crash Recovery
//
// - Atomic writes: the record is written to `<token>.ip.tmp`, synced, then
//   renamed over `<token>.ip`. A crash leaves either the old or the new
//   record, never a torn one.
// - Corruption is reported, not guessed around: an unparsable record is a
//   `Storage` error for that token. Treating it as absent would fabricate a
//   change on the next observation.
//
// ## Locking
//
// A lock table holds one async mutex per token. `compare_and_set` re-reads
// the record from disk while holding that token's mutex, so concurrent
// observations for one token serialize and different tokens never contend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::config::AddressStoreConfig;
use crate::traits::address_store::{AddressRecord, AddressStore, AddressStoreFactory, CasOutcome};

/// Record file format version
/// Used for future migration if format changes
const RECORD_FILE_VERSION: &str = "1.0";

/// Record file extension
const RECORD_EXTENSION: &str = "ip";

/// Serializable record file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RecordFileFormat {
    version: String,
    last_ip: IpAddr,
    last_updated: chrono::DateTime<chrono::Utc>,
}

/// File-based address store with per-token locking
///
/// # Example
///
/// ```rust,no_run
/// use scrappy_core::state::FileAddressStore;
/// use scrappy_core::traits::AddressStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileAddressStore::open("/var/lib/scrappy").await?;
///
///     let outcome = store.compare_and_set("abc123", "1.2.3.4".parse()?).await?;
///     assert!(outcome.changed);
///
///     let ip = store.get("abc123").await?;
///     assert_eq!(ip, Some("1.2.3.4".parse()?));
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileAddressStore {
    directory: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileAddressStore {
    /// Open a store rooted at `directory`, creating it if needed
    pub async fn open<P: AsRef<Path>>(directory: P) -> Result<Self, Error> {
        let directory = directory.as_ref().to_path_buf();

        fs::create_dir_all(&directory).await.map_err(|e| {
            Error::config(format!(
                "Failed to create address store directory {}: {}",
                directory.display(),
                e
            ))
        })?;

        let metadata = fs::metadata(&directory).await.map_err(|e| {
            Error::config(format!(
                "Failed to inspect address store directory {}: {}",
                directory.display(),
                e
            ))
        })?;
        if !metadata.is_dir() {
            return Err(Error::config(format!(
                "Address store path is not a directory: {}",
                directory.display()
            )));
        }

        tracing::debug!("Opened address store at {}", directory.display());

        Ok(Self {
            directory,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the record files
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Get (or create) the mutex guarding one token's record
    async fn lock_for(&self, token: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Get path to a token's record file
    fn record_path(&self, token: &str) -> Result<PathBuf, Error> {
        if token.is_empty() {
            return Err(Error::storage("Token cannot be empty"));
        }
        Ok(self
            .directory
            .join(format!("{}.{}", encode_file_stem(token), RECORD_EXTENSION)))
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(record_path: &Path) -> PathBuf {
        let mut temp = record_path.as_os_str().to_owned();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    /// Read a record file
    ///
    /// Missing file means "never observed". Anything unreadable or
    /// unparsable is a storage error.
    async fn read_record(path: &Path) -> Result<Option<AddressRecord>, Error> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::storage(format!(
                    "Failed to read record file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        if let Ok(record_file) = serde_json::from_str::<RecordFileFormat>(&content) {
            if record_file.version != RECORD_FILE_VERSION {
                tracing::warn!(
                    "Record file version mismatch: expected {}, got {}. Attempting to load anyway.",
                    RECORD_FILE_VERSION,
                    record_file.version
                );
            }
            return Ok(Some(AddressRecord {
                last_ip: record_file.last_ip.to_canonical(),
                last_updated: record_file.last_updated,
            }));
        }

        // Bare IP literal from an older cache
        if let Ok(ip) = content.trim().parse::<IpAddr>() {
            let last_updated = fs::metadata(path)
                .await
                .and_then(|m| m.modified())
                .map(chrono::DateTime::<chrono::Utc>::from)
                .unwrap_or_else(|_| chrono::Utc::now());
            tracing::debug!("Read legacy record file {}", path.display());
            return Ok(Some(AddressRecord {
                last_ip: ip.to_canonical(),
                last_updated,
            }));
        }

        Err(Error::storage(format!(
            "Record file {} is corrupted: neither a record document nor an IP address",
            path.display()
        )))
    }

    /// Write a record file atomically
    async fn write_record(&self, path: &Path, record: &AddressRecord) -> Result<(), Error> {
        let record_file = RecordFileFormat {
            version: RECORD_FILE_VERSION.to_string(),
            last_ip: record.last_ip,
            last_updated: record.last_updated,
        };

        let json = serde_json::to_string_pretty(&record_file)
            .map_err(|e| Error::storage(format!("Failed to serialize record: {}", e)))?;

        let temp_path = Self::temp_path(path);
        if let Err(e) = Self::write_temp(&temp_path, json.as_bytes()).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        // Atomic rename (temp -> actual)
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::storage(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            )));
        }

        self.sync_directory().await;

        tracing::trace!("Record written to file: {}", path.display());
        Ok(())
    }

    /// Write and sync the temporary file
    async fn write_temp(temp_path: &Path, bytes: &[u8]) -> Result<(), Error> {
        let mut file = fs::File::create(temp_path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to create temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.write_all(bytes).await.map_err(|e| {
            Error::storage(format!(
                "Failed to write to temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            Error::storage(format!(
                "Failed to sync temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Persist the rename itself
    ///
    /// The record is already consistent at this point; failure only widens
    /// the window in which a power loss reverts to the previous record.
    #[cfg(unix)]
    async fn sync_directory(&self) {
        let result = match fs::File::open(&self.directory).await {
            Ok(dir) => dir.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(
                "Failed to sync address store directory {}: {}",
                self.directory.display(),
                e
            );
        }
    }

    #[cfg(not(unix))]
    async fn sync_directory(&self) {}
}

#[async_trait]
impl AddressStore for FileAddressStore {
    async fn get(&self, token: &str) -> Result<Option<IpAddr>, Error> {
        Ok(self.get_record(token).await?.map(|record| record.last_ip))
    }

    async fn get_record(&self, token: &str) -> Result<Option<AddressRecord>, Error> {
        let path = self.record_path(token)?;
        // Renames are atomic, so an unlocked read sees either record
        Self::read_record(&path).await
    }

    async fn compare_and_set(&self, token: &str, new_ip: IpAddr) -> Result<CasOutcome, Error> {
        let path = self.record_path(token)?;
        let lock = self.lock_for(token).await;
        let _guard = lock.lock().await;

        let previous = Self::read_record(&path).await?.map(|record| record.last_ip);
        if previous == Some(new_ip) {
            return Ok(CasOutcome::unchanged(new_ip));
        }

        self.write_record(&path, &AddressRecord::new(new_ip)).await?;
        Ok(CasOutcome::changed(previous))
    }

    async fn list_tokens(&self) -> Result<Vec<String>, Error> {
        let mut entries = fs::read_dir(&self.directory).await.map_err(|e| {
            Error::storage(format!(
                "Failed to list address store directory {}: {}",
                self.directory.display(),
                e
            ))
        })?;

        let mut tokens = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage(format!("Failed to read directory entry: {}", e)))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(token) = name
                .strip_suffix(".ip")
                .and_then(decode_file_stem)
            {
                tokens.push(token);
            }
        }

        Ok(tokens)
    }

    async fn flush(&self) -> Result<(), Error> {
        // Every compare_and_set is synced before it returns
        Ok(())
    }
}

/// Record file name (without extension) for a token
fn encode_file_stem(token: &str) -> String {
    let mut stem = String::with_capacity(token.len());
    for (index, byte) in token.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && index > 0);
        if plain {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

/// Token for a record file name, if the name is one we would have written
fn decode_file_stem(stem: &str) -> Option<String> {
    let raw = stem.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut index = 0;
    while index < raw.len() {
        if raw[index] == b'%' {
            let hex = stem.get(index + 1..index + 3)?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            index += 3;
        } else {
            bytes.push(raw[index]);
            index += 1;
        }
    }

    let token = String::from_utf8(bytes).ok()?;
    (!token.is_empty() && encode_file_stem(&token) == stem).then_some(token)
}

/// Factory for the `file` store type
pub struct FileAddressStoreFactory;

#[async_trait]
impl AddressStoreFactory for FileAddressStoreFactory {
    async fn create(&self, config: &AddressStoreConfig) -> Result<Arc<dyn AddressStore>, Error> {
        match config {
            AddressStoreConfig::File { directory } => {
                Ok(Arc::new(FileAddressStore::open(directory).await?))
            }
            _ => Err(Error::config("Invalid config for file address store")),
        }
    }
}
