use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::prelude::*;
use failure::Error;

use crate::device::DeviceEvent;
use crate::mass_storage;
use crate::ptp_device::{self, CameraConnector};
use crate::reporting::IngestReport;
use crate::shutdown::CancelToken;
use crate::triage::Triage;

/// Where a job reads media from.
#[derive(Debug, Clone)]
pub enum SourceHandle {
    /// A mass storage device's mounted filesystem.
    Mount(PathBuf),
    /// A camera to open a PTP session with.
    Camera(DeviceEvent),
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceHandle::Mount(path) => write!(f, "mount {}", path.display()),
            SourceHandle::Camera(device) => write!(f, "ptp {}", device.description()),
        }
    }
}

/// One device's worth of work. Owned by the worker thread processing it.
#[derive(Debug)]
pub struct IngestionJob {
    pub device_path: String,
    pub source: SourceHandle,
    pub started_at: DateTime<Local>,
    pub cancel: CancelToken,
}

impl IngestionJob {
    pub fn new<P: Into<String>>(device_path: P, source: SourceHandle, cancel: CancelToken) -> IngestionJob {
        IngestionJob {
            device_path: device_path.into(),
            source,
            started_at: Local::now(),
            cancel,
        }
    }
}

/// Carries out ingestion jobs.
pub trait Ingest: Send + Sync {
    fn ingest(&self, job: &IngestionJob) -> Result<IngestReport, Error>;
}

/// Ingests jobs into the archive for real.
pub struct Ingestor {
    triage: Triage,
    connector: Arc<dyn CameraConnector>,
    staging_root: PathBuf,
}

impl fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingestor")
            .field("triage", &self.triage)
            .field("staging_root", &self.staging_root)
            .finish()
    }
}

impl Ingestor {
    /// PTP downloads are staged in a temporary directory inside the archive root, so that they're
    /// on the same filesystem as the buckets they end up in.
    pub fn new(triage: Triage, connector: Arc<dyn CameraConnector>) -> Ingestor {
        let staging_root = triage.archive().root().to_path_buf();
        Ingestor {
            triage,
            connector,
            staging_root,
        }
    }
}

impl Ingest for Ingestor {
    fn ingest(&self, job: &IngestionJob) -> Result<IngestReport, Error> {
        let started = Instant::now();
        let mut report = IngestReport::new(job.device_path.as_str(), job.source.to_string());
        info!(
            "Starting ingestion of {} from {} at {}",
            &job.device_path,
            &job.source,
            job.started_at.format("%H:%M:%S")
        );

        match &job.source {
            SourceHandle::Mount(path) => {
                mass_storage::ingest_mount(path, &self.triage, &job.cancel, &mut report)?
            }
            SourceHandle::Camera(device) => ptp_device::ingest_camera(
                &*self.connector,
                device,
                &self.staging_root,
                &self.triage,
                &job.cancel,
                &mut report,
            )?,
        }

        report.finish(started.elapsed());
        if report.is_cancelled() {
            info!("Ingestion of {} was cancelled; partial results kept", &job.device_path);
        }
        Ok(report)
    }
}
