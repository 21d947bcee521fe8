// Log output
//
// Logs go to stdout unless `SCRAPPY_LOG_FILE` names a file. The file is
// rotated by size: once a record would push it past `MAX_LOG_BYTES` it is
// renamed to `<file>.1`, older backups shift up, and anything beyond
// `LOG_BACKUPS` is dropped.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Size at which the log file is rotated
pub const MAX_LOG_BYTES: u64 = 1024 * 1024;

/// Rotated files kept next to the live one
pub const LOG_BACKUPS: usize = 5;

/// Install the global subscriber
pub fn init(level: Level, log_file: Option<&Path>) -> Result<()> {
    let builder = FmtSubscriber::builder().with_max_level(level);

    match log_file {
        Some(path) => {
            let writer = RotatingFileWriter::open(path, MAX_LOG_BYTES, LOG_BACKUPS)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let subscriber = builder.with_ansi(false).with_writer(writer).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set tracing subscriber")?;
        }
        None => {
            tracing::subscriber::set_global_default(builder.finish())
                .context("Failed to set tracing subscriber")?;
        }
    }

    Ok(())
}

/// Size-rotated log file shared by every event
#[derive(Clone)]
pub struct RotatingFileWriter {
    file: Arc<Mutex<RotatingFile>>,
}

impl RotatingFileWriter {
    /// Open (or create) `path` for appending
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            file: Arc::new(Mutex::new(RotatingFile {
                path: path.to_path_buf(),
                file,
                size,
                max_bytes,
                backups,
            })),
        })
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileGuard {
            file: self.file.clone(),
        }
    }
}

/// Writer handed out per event
pub struct RotatingFileGuard {
    file: Arc<Mutex<RotatingFile>>,
}

impl Write for RotatingFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_record(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .file
            .flush()
    }
}

struct RotatingFile {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    backups: usize,
}

impl RotatingFile {
    fn write_record(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.size > 0 && self.size + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backups > 0 {
            for index in (1..self.backups).rev() {
                let from = backup_path(&self.path, index);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, index + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

/// `<path>.<index>`
fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", index));
    PathBuf::from(name)
}
