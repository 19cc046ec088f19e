use std::fmt;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

use failure::{Error, ResultExt};
use lockfile::Lockfile;

use crate::config;
use crate::device::Classifier;
use crate::hotplug::Dispatcher;
use crate::ingest::{Ingest, Ingestor};
use crate::metadata_extractor::{FFMpegExtractor, FrameExtractor};
use crate::mountable::{MountResolver, ProcMounts};
use crate::shutdown::{self, CancelToken};
use crate::triage::Triage;
use crate::usb_camera::UsbConnector;

/// Name of the lock file kept in the incoming directory while a daemon owns it.
pub const LOCK_FILE: &str = ".camwatch.lock";

/// Ctx is the global context object. Constructed by consuming a `config::Config`.
pub struct Ctx {
    pub cfg: config::Config,
    // The lock is optional so that tools can run alongside the daemon, but making it part of this
    // API means the daemon can't accidentally end up without one.
    _lock: Option<Lockfile>,
    /// Cancelled once, when the process is asked to shut down.
    cancel: CancelToken,
}

impl fmt::Debug for Ctx {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Ctx")
            .field("cfg", &self.cfg)
            .field("locked", &self._lock.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// The pid recorded in a lock file whose owner is no longer running.
///
/// A lock we can't read, or that names a live process, is never considered stale.
fn stale_owner(lock_path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(lock_path).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;
    if Path::new("/proc").join(pid.to_string()).exists() {
        None
    } else {
        Some(pid)
    }
}

fn acquire_lock(incoming_dir: &Path) -> Result<Lockfile, Error> {
    let lock_path = incoming_dir.join(LOCK_FILE);
    info!("Acquiring the camwatch lock at {:?}", &lock_path);
    if let Some(pid) = stale_owner(&lock_path) {
        warn!("Removing stale lock {:?} left by pid {}", &lock_path, pid);
        fs::remove_file(&lock_path)
            .with_context(|_| format!("Removing stale lock {:?}", &lock_path))?;
    }
    let lock = Lockfile::create(&lock_path)
        .map_err(|e| format_err!("Couldn't lock {:?}, is another camwatchd running? ({:?})", &lock_path, e))?;
    fs::write(&lock_path, format!("{}\n", process::id()))
        .with_context(|_| format!("Recording our pid in {:?}", &lock_path))?;
    Ok(lock)
}

impl Ctx {
    /// Create a new context object.
    ///
    /// This creates the incoming directory if it does not exist, and takes the lock inside it.
    pub fn create(cfg: config::Config) -> Result<Ctx, Error> {
        Self::create_ctx(cfg, true)
    }

    /// Create a new context object without acquiring the camwatch lock.
    ///
    /// Archive writes are safe against a concurrently running daemon, but nothing stops two
    /// unlocked contexts ingesting the same card twice.
    pub fn create_without_lock(cfg: config::Config) -> Result<Ctx, Error> {
        Self::create_ctx(cfg, false)
    }

    fn create_ctx(cfg: config::Config, should_lock: bool) -> Result<Ctx, Error> {
        fs::create_dir_all(cfg.incoming_dir())
            .with_context(|_| format!("Creating incoming directory {:?}", cfg.incoming_dir()))?;

        let _lock = if should_lock {
            Some(acquire_lock(cfg.incoming_dir())?)
        } else {
            None
        };

        Ok(Ctx {
            cfg,
            _lock,
            cancel: CancelToken::new(),
        })
    }

    pub fn setup_signal_handler(&self) -> Result<(), ctrlc::Error> {
        shutdown::install_signal_handler(&self.cancel)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Whether or not we ought to proceed, this provides a hook for early exit.
    pub fn running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn triage(&self, extractor: Arc<dyn FrameExtractor>) -> Triage {
        Triage::new(&self.cfg, extractor)
    }

    /// The triage pipeline backed by the system's ffmpeg.
    pub fn ffmpeg_triage(&self) -> Result<Triage, Error> {
        let extractor = FFMpegExtractor::new()?;
        Ok(self.triage(Arc::new(extractor)))
    }

    pub fn ingestor(&self) -> Result<Ingestor, Error> {
        Ok(Ingestor::new(self.ffmpeg_triage()?, Arc::new(UsbConnector::new()?)))
    }

    pub fn dispatcher(&self, ingest: Arc<dyn Ingest>) -> Dispatcher {
        let table = ProcMounts::new(self.cfg.mount_point_base());
        let resolver = MountResolver::new(
            Box::new(table),
            self.cfg.mount_poll_attempts(),
            self.cfg.mount_poll_interval(),
        );
        Dispatcher::new(
            Classifier::new(self.cfg.camera_models()),
            resolver,
            ingest,
            self.cancel.clone(),
        )
    }
}
