//! Copies database log files from a remote log store into a local directory.
//!
//! The remote side hands out each file in portions. Every call returns a
//! marker that must be passed back to get the next portion, until the store
//! reports that no data is pending.

use crate::Error;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[cfg(feature = "download")]
pub use rds::RdsLogStore;

/// One chunk of a remote log file.
///
/// # Fields
///
/// * `data` - Log text contained in this chunk
/// * `marker` - Position to resume from on the next call
/// * `additional_data_pending` - Whether the file has more data after this chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPortion {
    pub data: String,
    pub marker: Option<String>,
    pub additional_data_pending: bool,
}

/// A remote store that holds the server's log files.
pub trait LogStore {
    /// Names of every log file the store currently holds.
    fn list_log_files(&self) -> Result<Vec<String>, Error>;

    /// Fetches the portion of `log_file_name` that starts at `marker`, or the
    /// first portion when no marker is given.
    fn download_portion(
        &self,
        log_file_name: &str,
        marker: Option<&str>,
    ) -> Result<LogPortion, Error>;
}

/// What happened to one remote log file during [`download_logs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// Fetched and written to this path.
    Downloaded(PathBuf),
    /// A local copy already existed; nothing was fetched.
    Exists(PathBuf),
    /// Skipped because the server is still writing to it.
    Active(String),
}

/// Local name for a remote log file: its first `error` becomes `logs`.
///
/// RDS names PostgreSQL logs `error/postgresql.log.<stamp>`, so downloads land
/// in a `logs/` directory.
#[must_use]
pub fn local_file_name(log_file_name: &str) -> String {
    log_file_name.replacen("error", "logs", 1)
}

/// Whether `log_file_name` is the file for the hour containing `now`.
#[must_use]
pub fn is_active_log(log_file_name: &str, now: DateTime<Utc>) -> bool {
    let stamp = now.format("%Y-%m-%d-%H").to_string();
    log_file_name.contains(&stamp)
}

/// Reads one remote file portion by portion and returns its whole text.
pub fn download_file<S: LogStore + ?Sized>(store: &S, log_file_name: &str) -> Result<String, Error> {
    let mut data = String::new();
    let mut marker: Option<String> = None;
    loop {
        let portion = store.download_portion(log_file_name, marker.as_deref())?;
        data.push_str(&portion.data);
        debug!(
            file = log_file_name,
            bytes = portion.data.len(),
            pending = portion.additional_data_pending,
            "received log portion"
        );
        match portion.marker {
            Some(next) if portion.additional_data_pending => marker = Some(next),
            _ => break,
        }
    }
    Ok(data)
}

/// Writes `data` to a temporary file beside `path` and renames it into place,
/// so an interrupted write never leaves a partial file at `path`.
fn write_atomically(path: &Path, data: &[u8]) -> Result<(), Error> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(data)?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Downloads every finished log file that has no local copy under `root`.
///
/// The file for the current hour is left alone since the server is still
/// appending to it. Running this again only fetches files that are new.
pub fn download_logs<S: LogStore + ?Sized>(
    store: &S,
    root: &Path,
    now: DateTime<Utc>,
) -> Result<Vec<Download>, Error> {
    let mut outcomes = Vec::new();
    for log_file_name in store.list_log_files()? {
        if is_active_log(&log_file_name, now) {
            debug!(file = %log_file_name, "skipping log file still being written");
            outcomes.push(Download::Active(log_file_name));
            continue;
        }

        let local = root.join(local_file_name(&log_file_name));
        if local.exists() {
            info!(path = %local.display(), "log file already present");
            outcomes.push(Download::Exists(local));
            continue;
        }

        let data = download_file(store, &log_file_name)?;
        write_atomically(&local, data.as_bytes())?;
        info!(path = %local.display(), "downloaded log file");
        outcomes.push(Download::Downloaded(local));
    }
    Ok(outcomes)
}

#[cfg(feature = "download")]
mod rds {
    use super::{LogPortion, LogStore};
    use crate::Error;
    use aws_config::BehaviorVersion;
    use tokio::runtime::{Builder, Runtime};

    /// [`LogStore`] for an Amazon RDS instance.
    ///
    /// Credentials and region come from the usual AWS environment
    /// (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_REGION`, profiles).
    /// Calls block on a private single-threaded runtime.
    pub struct RdsLogStore {
        client: aws_sdk_rds::Client,
        runtime: Runtime,
        db_instance_identifier: String,
    }

    impl RdsLogStore {
        pub fn from_env(db_instance_identifier: impl Into<String>) -> Result<Self, Error> {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            let config = runtime.block_on(aws_config::defaults(BehaviorVersion::latest()).load());
            Ok(Self {
                client: aws_sdk_rds::Client::new(&config),
                runtime,
                db_instance_identifier: db_instance_identifier.into(),
            })
        }
    }

    fn fetch_error(err: impl Into<aws_sdk_rds::Error>) -> Error {
        Error::Fetch(Box::new(err.into()))
    }

    impl LogStore for RdsLogStore {
        fn list_log_files(&self) -> Result<Vec<String>, Error> {
            let mut names = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let resp = self
                    .runtime
                    .block_on(
                        self.client
                            .describe_db_log_files()
                            .db_instance_identifier(&self.db_instance_identifier)
                            .set_marker(marker.take())
                            .send(),
                    )
                    .map_err(fetch_error)?;
                names.extend(
                    resp.describe_db_log_files()
                        .iter()
                        .filter_map(|file| file.log_file_name())
                        .map(str::to_string),
                );
                match resp.marker() {
                    Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                    _ => break,
                }
            }
            Ok(names)
        }

        fn download_portion(
            &self,
            log_file_name: &str,
            marker: Option<&str>,
        ) -> Result<LogPortion, Error> {
            let resp = self
                .runtime
                .block_on(
                    self.client
                        .download_db_log_file_portion()
                        .db_instance_identifier(&self.db_instance_identifier)
                        .log_file_name(log_file_name)
                        .set_marker(marker.map(str::to_string))
                        .send(),
                )
                .map_err(fetch_error)?;
            Ok(LogPortion {
                data: resp.log_file_data().unwrap_or_default().to_string(),
                marker: resp.marker().map(str::to_string),
                additional_data_pending: resp.additional_data_pending().unwrap_or(false),
            })
        }
    }
}
