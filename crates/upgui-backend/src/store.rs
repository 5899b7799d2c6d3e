//! Persisted configuration lifecycle
//!
//! [`ConfigStore`] is the only writer of `config.json`. Everything else
//! receives read-only snapshots; downgrade decisions made during startup
//! mutate the in-memory configuration only and reach disk on the next
//! explicit save.

use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use upgui_core::config::{Configuration, DaemonMode, DataPaths};
use upgui_core::prelude::*;

/// Owns the on-disk configuration under `<config_dir>/gui/config.json`.
pub struct ConfigStore {
    config_dir: PathBuf,
    gui_dir: PathBuf,
    config_file: PathBuf,
    config: Configuration,
}

impl ConfigStore {
    /// Platform default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        if cfg!(windows) {
            PathBuf::from("C:\\ProgramData\\uplexa")
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".uplexa")
        }
    }

    /// Open (creating if needed) the configuration directory layout and
    /// initialize the in-memory configuration from compiled-in defaults.
    /// Nothing is read from disk yet; see [`ConfigStore::merge_from_disk`].
    pub fn open(config_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&config_dir)?;
        let gui_dir = config_dir.join("gui");
        std::fs::create_dir_all(&gui_dir)?;
        let config_file = gui_dir.join("config.json");
        let config = Configuration::defaults(&config_dir);

        Ok(Self {
            config_dir,
            gui_dir,
            config_file,
            config,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Read-only copy for collaborators.
    pub fn snapshot(&self) -> Configuration {
        self.config.clone()
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Where the GUI's own logs go (not the services' logs, which live
    /// under the data directory).
    pub fn log_dir(&self) -> PathBuf {
        self.gui_dir.join("logs")
    }

    /// Read the persisted configuration.
    ///
    /// A missing file is the normal first-run case and maps to
    /// [`Error::ConfigNotFound`]; so does an unparseable file, since the
    /// only sane recovery for either is falling back to defaults.
    pub fn load(&self) -> Result<Configuration> {
        let text = std::fs::read_to_string(&self.config_file).map_err(|e| {
            debug!("config read failed: {e}");
            Error::ConfigNotFound {
                path: self.config_file.clone(),
            }
        })?;
        Configuration::from_json(&text).map_err(|e| {
            warn!("config file is not valid JSON, falling back to defaults: {e}");
            Error::ConfigNotFound {
                path: self.config_file.clone(),
            }
        })
    }

    /// Overlay persisted values onto the in-memory configuration and write
    /// the merged result back, so options added in newer releases appear
    /// on disk after the first start.
    pub fn merge_from_disk(&mut self) -> Result<()> {
        let disk = self.load()?;
        self.config.merge(&disk);
        self.persist()
    }

    /// Merge a partial configuration and persist the full result.
    /// Returns a snapshot of the new effective configuration.
    pub fn save(&mut self, partial: &Configuration) -> Result<Configuration> {
        self.config.merge(partial);
        self.persist()?;
        Ok(self.snapshot())
    }

    /// In-memory daemon mode override (startup downgrade decisions).
    pub fn set_daemon_mode(&mut self, mode: DaemonMode) {
        self.config.set_daemon_mode(mode);
    }

    /// Write the full configuration, pretty-printed, under an exclusive
    /// file lock. The store is the single writer of this file; the lock
    /// guards against a second GUI instance.
    fn persist(&self) -> Result<()> {
        let content = self.config.to_json_pretty()?;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.config_file)?;
        file.lock_exclusive()?;

        file.write_all(content.as_bytes())?;
        file.flush()?;

        // Lock is released when the file handle drops.
        debug!("Saved configuration to {:?}", self.config_file);
        Ok(())
    }

    /// Verify the data directory layout is present and writable, creating
    /// the storage subdirectories as needed.
    ///
    /// The data directory itself is never created here: a missing one
    /// usually means an unmounted network drive, and the user has to pick
    /// a new location. Idempotent; run once per startup attempt.
    pub fn validate_data_paths(&self) -> Result<DataPaths> {
        let app = self.config.app()?;

        if !app.data_dir.exists() {
            return Err(Error::path_unavailable(&app.data_dir, "not found"));
        }

        let paths = app.data_paths();
        for dir in [&paths.base, &paths.ledger_dir, &paths.log_dir, &paths.wallet_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::path_unavailable(dir, format!("cannot create: {e}")))?;
        }

        check_dir_access(&self.config_dir)?;
        check_dir_access(&self.gui_dir)?;
        check_file_access(&self.config_file)?;
        for dir in [&paths.ledger_dir, &paths.log_dir, &paths.wallet_dir] {
            check_dir_access(dir)?;
        }

        Ok(paths)
    }
}

/// Verify a directory is readable and writable by actually exercising
/// both: list it, then create and remove a probe file.
fn check_dir_access(dir: &Path) -> Result<()> {
    std::fs::read_dir(dir).map_err(|e| Error::path_unavailable(dir, format!("not readable: {e}")))?;

    let probe = dir.join(".upgui-write-test");
    std::fs::write(&probe, b"")
        .map_err(|e| Error::path_unavailable(dir, format!("not writable: {e}")))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

/// Verify a file can be opened for read and write.
fn check_file_access(file: &Path) -> Result<()> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(file)
        .map(|_| ())
        .map_err(|e| Error::path_unavailable(file, format!("not accessible: {e}")))
}
