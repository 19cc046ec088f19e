use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use failure::{Error, ResultExt};

use crate::device::DeviceEvent;
use crate::reporting::IngestReport;
use crate::shutdown::CancelToken;
use crate::triage::{Triage, TriageOutcome};

/// A file object stored on a camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFile {
    pub handle: u32,
    pub name: String,
    /// `None` when the camera can't say, which PTP does for objects of 4GiB or more.
    pub size: Option<u64>,
}

impl CameraFile {
    /// A name safe to create inside a local directory. Anything that looks like a path is reduced
    /// to its last component.
    pub fn local_name(&self) -> PathBuf {
        match Path::new(&self.name).file_name() {
            Some(name) => PathBuf::from(name),
            None => PathBuf::from(format!("object-{:08x}", self.handle)),
        }
    }
}

/// An open transfer session with a camera.
pub trait CameraSession {
    /// Every file object on the camera, across all of its storages.
    fn files(&mut self) -> Result<Vec<CameraFile>, Error>;

    /// Stream `file`'s content into `out`, returning the number of bytes written.
    fn download(&mut self, file: &CameraFile, out: &mut dyn Write) -> Result<u64, Error>;

    fn close(&mut self) -> Result<(), Error>;
}

/// Opens sessions with the camera behind a device event.
pub trait CameraConnector: Send + Sync {
    fn connect(&self, device: &DeviceEvent) -> Result<Box<dyn CameraSession>, Error>;
}

/// Closes the session it holds when dropped, however the worker leaves.
struct SessionGuard {
    session: Box<dyn CameraSession>,
    name: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        match self.session.close() {
            Ok(()) => debug!("Closed session with {}", &self.name),
            Err(e) => warn!("Couldn't close session with {}: {}", &self.name, e),
        }
    }
}

fn download_to(session: &mut dyn CameraSession, file: &CameraFile, dest: &Path) -> Result<u64, Error> {
    let mut out = File::create(dest).with_context(|_| format!("Creating {:?}", dest))?;
    let size = session.download(file, &mut out)?;
    if let Some(expected) = file.size {
        if size != expected {
            bail!("Downloaded {} of {} bytes of {}", size, expected, &file.name);
        }
    }
    out.sync_all()?;
    Ok(size)
}

/// Download every file from a PTP camera and triage it into the archive.
///
/// Files are staged one at a time in a private directory under `staging_root`, which is removed
/// when this returns.
pub fn ingest_camera(
    connector: &dyn CameraConnector,
    device: &DeviceEvent,
    staging_root: &Path,
    triage: &Triage,
    cancel: &CancelToken,
    report: &mut IngestReport,
) -> Result<(), Error> {
    let mut guard = SessionGuard {
        session: connector.connect(device)?,
        name: device.description(),
    };
    let files = guard.session.files()?;
    info!("Found {} files on {}", files.len(), &guard.name);

    let staging = tempfile::Builder::new()
        .prefix(".ptp-")
        .tempdir_in(staging_root)
        .with_context(|_| format!("Creating staging directory in {:?}", staging_root))?;

    for (i, file) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Ingestion from {} cancelled after {} of {} files", &guard.name, i, files.len());
            report.mark_cancelled();
            break;
        }

        let dest = staging.path().join(file.local_name());
        match download_to(&mut *guard.session, file, &dest) {
            Ok(size) => debug!("Downloaded {} ({} bytes)", &file.name, size),
            Err(e) => {
                error!("Couldn't download {} from {}: {}", &file.name, &guard.name, e);
                report.record_failure(&file.name, &e);
                let _ = fs::remove_file(&dest);
                continue;
            }
        }

        let outcome = triage.triage(&dest, cancel);
        if let Err(e) = fs::remove_file(&dest) {
            warn!("Couldn't remove staged {:?}: {}", &dest, e);
        }
        match outcome {
            Ok(outcome) => {
                report.record(&outcome);
                if let TriageOutcome::Cancelled { .. } = outcome {
                    break;
                }
            }
            Err(e) => {
                error!("Couldn't ingest {} from {}: {}", &file.name, &guard.name, e);
                report.record_failure(&file.name, &e);
            }
        }
    }
    Ok(())
}
