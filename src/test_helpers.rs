use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use failure::Error;

use crate::device::DeviceEvent;
use crate::ingest::{Ingest, IngestionJob};
use crate::metadata_extractor::FrameExtractor;
use crate::mountable::MountTable;
use crate::ptp_device::{CameraConnector, CameraSession};
use crate::reporting::IngestReport;
use crate::shutdown::CancelToken;

pub(crate) fn tempdir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// A minimal JPEG whose only content is an EXIF block with `DateTimeOriginal` set to `date`.
pub(crate) fn jpeg_with_exif_date(date: &str) -> Vec<u8> {
    const IFD0_OFFSET: u32 = 8;
    const EXIF_IFD_OFFSET: u32 = IFD0_OFFSET + 18;
    const DATE_OFFSET: u32 = EXIF_IFD_OFFSET + 18;

    let mut tiff = b"MM\x00\x2a".to_vec();
    push_u32(&mut tiff, IFD0_OFFSET);

    // IFD0, holding only the pointer to the Exif IFD
    push_u16(&mut tiff, 1);
    push_u16(&mut tiff, 0x8769);
    push_u16(&mut tiff, 4);
    push_u32(&mut tiff, 1);
    push_u32(&mut tiff, EXIF_IFD_OFFSET);
    push_u32(&mut tiff, 0);

    // Exif IFD with DateTimeOriginal
    push_u16(&mut tiff, 1);
    push_u16(&mut tiff, 0x9003);
    push_u16(&mut tiff, 2);
    push_u32(&mut tiff, date.len() as u32 + 1);
    push_u32(&mut tiff, DATE_OFFSET);
    push_u32(&mut tiff, 0);

    assert_eq!(tiff.len() as u32, DATE_OFFSET);
    tiff.extend_from_slice(date.as_bytes());
    tiff.push(0);

    let mut jpeg = vec![0xff, 0xd8, 0xff, 0xe1];
    push_u16(&mut jpeg, (2 + 6 + tiff.len()) as u16);
    jpeg.extend_from_slice(b"Exif\x00\x00");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xff, 0xd9]);
    jpeg
}

/// A mount table that reports nothing for the first `empty_calls` lookups, then `path`.
pub(crate) struct StaticMountTable {
    path: Option<PathBuf>,
    empty_calls: u32,
    calls: Arc<AtomicU32>,
}

impl StaticMountTable {
    pub fn never() -> StaticMountTable {
        StaticMountTable {
            path: None,
            empty_calls: 0,
            calls: Default::default(),
        }
    }

    pub fn always<P: Into<PathBuf>>(path: P) -> StaticMountTable {
        Self::after(0, path, Default::default())
    }

    pub fn after<P: Into<PathBuf>>(empty_calls: u32, path: P, calls: Arc<AtomicU32>) -> StaticMountTable {
        StaticMountTable {
            path: Some(path.into()),
            empty_calls,
            calls,
        }
    }
}

impl MountTable for StaticMountTable {
    fn mount_points(&self, _: &DeviceEvent) -> Result<Vec<PathBuf>, Error> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.path {
            Some(ref path) if previous >= self.empty_calls => Ok(vec![path.clone()]),
            _ => Ok(vec![]),
        }
    }
}

/// Pretends to decode videos of a fixed length, writing placeholder frames.
pub(crate) struct FakeExtractor {
    duration: Option<f64>,
    failing: HashSet<u64>,
    cancel_after: Option<(usize, CancelToken)>,
    calls: Arc<Mutex<Vec<u64>>>,
}

impl FakeExtractor {
    pub fn new(duration: f64) -> FakeExtractor {
        FakeExtractor {
            duration: Some(duration),
            failing: HashSet::new(),
            cancel_after: None,
            calls: Default::default(),
        }
    }

    /// An extractor that can't work out how long anything is.
    pub fn unprobeable() -> FakeExtractor {
        FakeExtractor {
            duration: None,
            ..FakeExtractor::new(0.0)
        }
    }

    pub fn failing_at(mut self, offset: u64) -> FakeExtractor {
        self.failing.insert(offset);
        self
    }

    /// Cancel `token` once `frames` frames have been requested.
    pub fn cancelling_after(mut self, frames: usize, token: CancelToken) -> FakeExtractor {
        self.cancel_after = Some((frames, token));
        self
    }

    /// The offsets of every frame requested so far.
    pub fn calls(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.calls)
    }
}

impl FrameExtractor for FakeExtractor {
    fn duration(&self, video: &Path) -> Result<f64, Error> {
        self.duration
            .ok_or_else(|| format_err!("{:?}: Invalid data found when processing input", video))
    }

    fn extract_frame(&self, video: &Path, offset_secs: u64, dest: &Path) -> Result<(), Error> {
        let requested = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(offset_secs);
            calls.len()
        };
        if let Some((frames, ref token)) = self.cancel_after {
            if requested >= frames {
                token.cancel();
            }
        }
        if self.failing.contains(&offset_secs) {
            bail!("No frame at {}s of {:?}", offset_secs, video);
        }
        fs::write(dest, b"\xff\xd8frame\xff\xd9")?;
        Ok(())
    }
}

/// A connector for builds where no camera should ever be reached.
pub(crate) struct NoCameras;

impl CameraConnector for NoCameras {
    fn connect(&self, device: &DeviceEvent) -> Result<Box<dyn CameraSession>, Error> {
        bail!("No camera at {}", &device.path)
    }
}

/// An `Ingest` that records what it was asked to do, and does nothing else.
#[derive(Clone, Default)]
pub(crate) struct RecordingIngest {
    jobs: Arc<Mutex<Vec<(String, String)>>>,
    delay: Duration,
    ignore_cancel: bool,
    panicking: Option<String>,
}

impl RecordingIngest {
    pub fn new() -> RecordingIngest {
        Default::default()
    }

    /// Take `delay` over each job.
    pub fn with_delay(mut self, delay: Duration) -> RecordingIngest {
        self.delay = delay;
        self
    }

    pub fn ignoring_cancel(mut self) -> RecordingIngest {
        self.ignore_cancel = true;
        self
    }

    pub fn panicking_for(mut self, device_path: &str) -> RecordingIngest {
        self.panicking = Some(device_path.to_string());
        self
    }

    /// Device path and source description of every job started so far.
    pub fn jobs(&self) -> Vec<(String, String)> {
        self.jobs.lock().unwrap().clone()
    }
}

impl Ingest for RecordingIngest {
    fn ingest(&self, job: &IngestionJob) -> Result<IngestReport, Error> {
        self.jobs
            .lock()
            .unwrap()
            .push((job.device_path.clone(), job.source.to_string()));

        if self.ignore_cancel {
            thread::sleep(self.delay);
        } else {
            job.cancel.sleep(self.delay);
        }
        if self.panicking.as_ref() == Some(&job.device_path) {
            panic!("Worker for {} fell over", &job.device_path);
        }
        Ok(IngestReport::new(job.device_path.as_str(), job.source.to_string()))
    }
}
