use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use failure::{bail, Error};
use tempfile::TempDir;
use walkdir::WalkDir;

use camwatch::config::Config;
use camwatch::device::{Classifier, DeviceAction, DeviceEvent};
use camwatch::hotplug::{Dispatcher, EventLoop};
use camwatch::ingest::{Ingest, IngestionJob, Ingestor};
use camwatch::metadata_extractor::FrameExtractor;
use camwatch::mountable::{MountResolver, MountTable};
use camwatch::ptp_device::{CameraConnector, CameraSession};
use camwatch::reporting::IngestReport;
use camwatch::shutdown::CancelToken;
use camwatch::triage::Triage;

const POLL: Duration = Duration::from_millis(20);

struct NoFrames;

impl FrameExtractor for NoFrames {
    fn duration(&self, _: &Path) -> Result<f64, Error> {
        Ok(0.0)
    }

    fn extract_frame(&self, _: &Path, _: u64, _: &Path) -> Result<(), Error> {
        bail!("no frames here")
    }
}

/// A camera that refuses every connection.
#[derive(Default)]
struct BrokenCameras {
    attempts: AtomicUsize,
}

impl CameraConnector for BrokenCameras {
    fn connect(&self, _: &DeviceEvent) -> Result<Box<dyn CameraSession>, Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        bail!("LIBUSB_ERROR_ACCESS")
    }
}

struct NeverMounted;

impl MountTable for NeverMounted {
    fn mount_points(&self, _: &DeviceEvent) -> Result<Vec<PathBuf>, Error> {
        Ok(vec![])
    }
}

/// Counts jobs per device, optionally holding each one for a while.
#[derive(Default)]
struct CountingIngest {
    hold: Duration,
    jobs: Mutex<Vec<String>>,
}

impl Ingest for CountingIngest {
    fn ingest(&self, job: &IngestionJob) -> Result<IngestReport, Error> {
        self.jobs.lock().unwrap().push(job.device_path.clone());
        job.cancel.sleep(self.hold);
        Ok(IngestReport::new(job.device_path.as_str(), job.source.to_string()))
    }
}

fn classifier() -> Classifier {
    Classifier::new(vec!["canon", "gopro"])
}

fn resolver(table: Box<dyn MountTable>) -> MountResolver {
    MountResolver::new(table, 3, Duration::from_millis(10))
}

fn card(root: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let mount = root.join(name);
    fs::create_dir_all(&mount).unwrap();
    for (path, body) in files {
        let path = mount.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }
    mount
}

fn mass_storage(path: &str, model: &str, mount: &Path) -> DeviceEvent {
    DeviceEvent::new(path, DeviceAction::Add)
        .with_property("ID_MODEL", model)
        .with_mount_point(mount)
}

fn archived_names(archive: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(archive)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Runs an event loop fed by the returned sender on a background thread until `cancel` fires.
fn spawn_loop(
    dispatcher: Dispatcher,
    cancel: &CancelToken,
) -> (Sender<DeviceEvent>, thread::JoinHandle<usize>) {
    let (tx, rx) = channel();
    let event_loop = EventLoop::new(rx, dispatcher, POLL, cancel.clone());
    let handle = thread::spawn(move || event_loop.run(Duration::from_secs(5)));
    (tx, handle)
}

fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_cards_are_archived_and_a_broken_camera_is_survived() {
    let cards = TempDir::new().unwrap();
    let incoming = TempDir::new().unwrap();
    let first = card(
        cards.path(),
        "canon",
        &[("DCIM/100CANON/IMG_0001.JPG", "first"), ("DCIM/100CANON/notes.txt", "skip me")],
    );
    let second = card(cards.path(), "gopro", &[("DCIM/100GOPRO/GX010001.MP4", "second")]);

    let cfg = Config::build(incoming.path());
    let connector = Arc::new(BrokenCameras::default());
    let ingestor = Ingestor::new(Triage::new(&cfg, Arc::new(NoFrames)), connector.clone());
    let cancel = CancelToken::new();
    let dispatcher = Dispatcher::new(
        classifier(),
        resolver(Box::new(NeverMounted)),
        Arc::new(ingestor),
        cancel.clone(),
    );
    let (tx, handle) = spawn_loop(dispatcher, &cancel);

    tx.send(mass_storage("/usb1/1-1", "Canon EOS 80D", &first)).unwrap();
    tx.send(DeviceEvent::new("/usb1/1-2", DeviceAction::Add).with_property("ID_GPHOTO2", "1"))
        .unwrap();
    tx.send(mass_storage("/usb1/1-3", "GoPro HERO9", &second)).unwrap();

    let archive = incoming.path().to_path_buf();
    wait_for("both cards to be archived", || {
        let names = archived_names(&archive);
        names.contains(&"IMG_0001.JPG".to_string()) && names.contains(&"GX010001.MP4".to_string())
    });
    wait_for("the camera to be tried", || connector.attempts.load(Ordering::SeqCst) == 1);

    cancel.cancel();
    assert_eq!(handle.join().unwrap(), 0);

    let names = archived_names(incoming.path());
    assert!(!names.contains(&"notes.txt".to_string()));
    assert_eq!(
        names.iter().filter(|name| name.as_str() == "IMG_0001.JPG").count(),
        1
    );
    // The source cards are never modified.
    assert!(first.join("DCIM/100CANON/IMG_0001.JPG").exists());
}

#[test]
fn test_repeated_add_is_ingested_once() {
    let cards = TempDir::new().unwrap();
    let mount = card(cards.path(), "canon", &[]);
    let ingest = Arc::new(CountingIngest {
        hold: Duration::from_millis(300),
        ..Default::default()
    });
    let cancel = CancelToken::new();
    let dispatcher = Dispatcher::new(
        classifier(),
        resolver(Box::new(NeverMounted)),
        ingest.clone(),
        cancel.clone(),
    );
    let (tx, handle) = spawn_loop(dispatcher, &cancel);

    tx.send(mass_storage("/usb1/1-1", "Canon EOS R", &mount)).unwrap();
    tx.send(mass_storage("/usb1/1-1", "Canon EOS R", &mount)).unwrap();
    tx.send(mass_storage("/usb1/1-1", "Canon EOS R", &mount)).unwrap();

    wait_for("the first job", || !ingest.jobs.lock().unwrap().is_empty());
    thread::sleep(POLL * 3);
    cancel.cancel();
    handle.join().unwrap();

    assert_eq!(*ingest.jobs.lock().unwrap(), vec!["/usb1/1-1".to_string()]);
}

#[test]
fn test_device_is_ingested_again_after_the_first_job_ends() {
    let cards = TempDir::new().unwrap();
    let mount = card(cards.path(), "canon", &[]);
    let ingest = Arc::new(CountingIngest::default());
    let cancel = CancelToken::new();
    let dispatcher = Dispatcher::new(
        classifier(),
        resolver(Box::new(NeverMounted)),
        ingest.clone(),
        cancel.clone(),
    );
    let (tx, handle) = spawn_loop(dispatcher, &cancel);

    tx.send(mass_storage("/usb1/1-1", "Canon EOS R", &mount)).unwrap();
    wait_for("the first job", || ingest.jobs.lock().unwrap().len() == 1);
    // Give the worker time to finish and release the device.
    thread::sleep(POLL * 5);
    tx.send(mass_storage("/usb1/1-1", "Canon EOS R", &mount)).unwrap();
    wait_for("the second job", || ingest.jobs.lock().unwrap().len() == 2);

    cancel.cancel();
    handle.join().unwrap();
}

#[test]
fn test_shutdown_is_prompt_when_idle() {
    let cancel = CancelToken::new();
    let dispatcher = Dispatcher::new(
        classifier(),
        resolver(Box::new(NeverMounted)),
        Arc::new(CountingIngest::default()),
        cancel.clone(),
    );
    let (_tx, handle) = spawn_loop(dispatcher, &cancel);
    thread::sleep(POLL * 3);

    let asked = Instant::now();
    cancel.cancel();
    assert_eq!(handle.join().unwrap(), 0);
    assert!(asked.elapsed() < POLL + Duration::from_millis(500));
}

#[test]
fn test_shutdown_cancels_running_jobs() {
    let cards = TempDir::new().unwrap();
    let mount = card(cards.path(), "gopro", &[]);
    let ingest = Arc::new(CountingIngest {
        hold: Duration::from_secs(60),
        ..Default::default()
    });
    let cancel = CancelToken::new();
    let dispatcher = Dispatcher::new(
        classifier(),
        resolver(Box::new(NeverMounted)),
        ingest.clone(),
        cancel.clone(),
    );
    let (tx, handle) = spawn_loop(dispatcher, &cancel);

    tx.send(mass_storage("/usb2/2-1", "GoPro MAX", &mount)).unwrap();
    wait_for("the job to start", || ingest.jobs.lock().unwrap().len() == 1);

    let asked = Instant::now();
    cancel.cancel();
    assert_eq!(handle.join().unwrap(), 0);
    assert!(asked.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_unmounted_device_is_never_ingested() {
    let ingest = Arc::new(CountingIngest::default());
    let cancel = CancelToken::new();
    let dispatcher = Dispatcher::new(
        classifier(),
        resolver(Box::new(NeverMounted)),
        ingest.clone(),
        cancel.clone(),
    );
    let (tx, handle) = spawn_loop(dispatcher, &cancel);

    tx.send(DeviceEvent::new("/usb1/1-4", DeviceAction::Add).with_property("ID_MODEL", "Canon PowerShot"))
        .unwrap();
    // Three attempts ten milliseconds apart, with plenty to spare.
    thread::sleep(Duration::from_millis(300));
    cancel.cancel();
    handle.join().unwrap();

    assert!(ingest.jobs.lock().unwrap().is_empty());
}
