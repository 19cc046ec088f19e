//! The event loop at the heart of the daemon.
//!
//! Device events are drained from an `EventSource` on the calling thread, classified in the order
//! they arrive, and every camera gets a worker thread of its own. The loop never waits on a
//! worker; it only reaps the ones that have finished.

use std::collections::HashSet;
use std::fmt;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use failure::Error;

use crate::device::{CameraProtocol, Classification, Classifier, DeviceAction, DeviceEvent};
use crate::ingest::{Ingest, IngestionJob, SourceHandle};
use crate::mountable::{MountResolver, Resolution};
use crate::shutdown::CancelToken;

const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// A subscription to device notifications. Dropping it unsubscribes.
pub trait EventSource {
    /// Every event delivered since the last call, in delivery order. Must not block.
    fn poll(&mut self) -> Result<Vec<DeviceEvent>, Error>;
}

impl EventSource for Receiver<DeviceEvent> {
    fn poll(&mut self) -> Result<Vec<DeviceEvent>, Error> {
        let mut events = vec![];
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(events),
            }
        }
    }
}

/// The set of device paths with a worker currently attached.
#[derive(Debug, Clone, Default)]
pub struct ActiveDevices {
    paths: Arc<Mutex<HashSet<String>>>,
}

impl ActiveDevices {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // Every operation leaves the set consistent, so a poisoned lock is still usable.
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `path` active, unless it already is. The claim is released when dropped.
    pub fn claim(&self, path: &str) -> Option<ActiveClaim> {
        if self.lock().insert(path.to_string()) {
            Some(ActiveClaim {
                devices: self.clone(),
                path: path.to_string(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof that a device path is being worked on.
#[derive(Debug)]
pub struct ActiveClaim {
    devices: ActiveDevices,
    path: String,
}

impl Drop for ActiveClaim {
    fn drop(&mut self) {
        self.devices.lock().remove(&self.path);
    }
}

/// What became of one event.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Shutdown had been requested; the event was dropped.
    ShuttingDown,
    /// Only `add` events are acted on.
    NotAnAdd,
    NotACamera,
    /// A worker is already processing this device.
    AlreadyActive,
    Spawned(CameraProtocol),
    SpawnFailed,
}

/// Classifies events and hands cameras to worker threads.
pub struct Dispatcher {
    classifier: Classifier,
    resolver: Arc<MountResolver>,
    ingest: Arc<dyn Ingest>,
    active: ActiveDevices,
    cancel: CancelToken,
    workers: Vec<(String, JoinHandle<()>)>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("classifier", &self.classifier)
            .field("resolver", &self.resolver)
            .field("active", &self.active)
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Work out where a classified device's media is, then ingest it.
fn run_worker(
    event: DeviceEvent,
    classification: Classification,
    resolver: &MountResolver,
    ingest: &dyn Ingest,
    cancel: CancelToken,
) {
    let source = match classification.protocol {
        CameraProtocol::Ptp => SourceHandle::Camera(event.clone()),
        CameraProtocol::MassStorage => match resolver.resolve(&event, &cancel) {
            Resolution::Mounted(path) => SourceHandle::Mount(path),
            Resolution::TimedOut { attempts } => {
                error!(
                    "{} never showed up as mounted after {} attempts, skipping it",
                    event.description(),
                    attempts
                );
                return;
            }
            Resolution::Cancelled => {
                info!("Stopped waiting for {} to be mounted", event.description());
                return;
            }
        },
        CameraProtocol::None => return,
    };

    let job = IngestionJob::new(event.path.as_str(), source, cancel);
    match ingest.ingest(&job) {
        Ok(report) => report.log(),
        Err(e) => error!("Ingestion of {} failed: {}", event.description(), e),
    }
}

impl Dispatcher {
    pub fn new(
        classifier: Classifier,
        resolver: MountResolver,
        ingest: Arc<dyn Ingest>,
        cancel: CancelToken,
    ) -> Dispatcher {
        Dispatcher {
            classifier,
            resolver: Arc::new(resolver),
            ingest,
            active: Default::default(),
            cancel,
            workers: vec![],
        }
    }

    pub fn active(&self) -> &ActiveDevices {
        &self.active
    }

    /// Number of workers that haven't been reaped yet.
    pub fn in_flight(&self) -> usize {
        self.workers.len()
    }

    /// Act on one event. Never blocks on the work it starts.
    pub fn handle_event(&mut self, event: DeviceEvent) -> Dispatch {
        if self.cancel.is_cancelled() {
            debug!("Shutting down, discarding {} event for {}", event.action, &event.path);
            return Dispatch::ShuttingDown;
        }

        match event.action {
            DeviceAction::Add => {}
            DeviceAction::Remove => {
                info!("Device removed: {}", event.description());
                if self.active.contains(&event.path) {
                    warn!("{} was removed while still being ingested", &event.path);
                }
                return Dispatch::NotAnAdd;
            }
            DeviceAction::Other => {
                trace!("Ignoring {} event for {}", event.action, &event.path);
                return Dispatch::NotAnAdd;
            }
        }

        let classification = self.classifier.classify(&event);
        if !classification.is_camera() {
            debug!("{} is not a camera ({})", event.description(), &classification.evidence);
            return Dispatch::NotACamera;
        }
        info!(
            "{} is a {} camera: {}",
            event.description(),
            classification.protocol,
            &classification.evidence
        );

        let claim = match self.active.claim(&event.path) {
            Some(claim) => claim,
            None => {
                info!("{} is already being ingested, ignoring", &event.path);
                return Dispatch::AlreadyActive;
            }
        };

        let protocol = classification.protocol;
        let path = event.path.clone();
        let resolver = Arc::clone(&self.resolver);
        let ingest = Arc::clone(&self.ingest);
        let cancel = self.cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("ingest {}", &path))
            .spawn(move || {
                let _claim = claim;
                run_worker(event, classification, &resolver, &*ingest, cancel);
            });

        match spawned {
            Ok(handle) => {
                self.workers.push((path, handle));
                Dispatch::Spawned(protocol)
            }
            Err(e) => {
                error!("Couldn't start a worker for {}: {}", &path, e);
                Dispatch::SpawnFailed
            }
        }
    }

    /// Join every worker that has finished.
    pub fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .workers
            .drain(..)
            .partition(|(_, handle)| handle.is_finished());
        self.workers = running;

        for (path, handle) in finished {
            match handle.join() {
                Ok(()) => debug!("Worker for {} finished", &path),
                Err(_) => error!("Worker for {} panicked", &path),
            }
        }
    }

    /// Wait up to `grace` for in-flight workers, returning how many were still running.
    pub fn wait(&mut self, grace: Duration) -> usize {
        // An unrepresentable grace period waits for as long as it takes.
        let deadline = Instant::now().checked_add(grace);
        loop {
            self.reap();
            if self.workers.is_empty() {
                return 0;
            }
            let now = Instant::now();
            let deadline = match deadline {
                Some(deadline) => deadline,
                None => {
                    thread::sleep(REAP_INTERVAL);
                    continue;
                }
            };
            if now >= deadline {
                warn!(
                    "Giving up on {} workers still running after {:?}",
                    self.workers.len(),
                    grace
                );
                return self.workers.len();
            }
            thread::sleep(REAP_INTERVAL.min(deadline - now));
        }
    }
}

/// Drains an event source into a `Dispatcher` until cancelled.
pub struct EventLoop<S: EventSource> {
    source: S,
    dispatcher: Dispatcher,
    poll_interval: Duration,
    cancel: CancelToken,
}

impl<S: EventSource> fmt::Debug for EventLoop<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("dispatcher", &self.dispatcher)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl<S: EventSource> EventLoop<S> {
    pub fn new(
        source: S,
        dispatcher: Dispatcher,
        poll_interval: Duration,
        cancel: CancelToken,
    ) -> EventLoop<S> {
        EventLoop {
            source,
            dispatcher,
            poll_interval,
            cancel,
        }
    }

    /// Run until the cancel token fires. The source is dropped before waiting up to `grace` for
    /// workers; returns the number of workers abandoned.
    pub fn run(self, grace: Duration) -> usize {
        let EventLoop {
            mut source,
            mut dispatcher,
            poll_interval,
            cancel,
        } = self;

        info!("Watching for devices");
        while !cancel.is_cancelled() {
            match source.poll() {
                Ok(events) => {
                    for event in events {
                        dispatcher.handle_event(event);
                    }
                }
                Err(e) => error!("Couldn't read device events: {}", e),
            }
            dispatcher.reap();
            cancel.sleep(poll_interval);
        }

        info!("Unsubscribing from device events");
        drop(source);

        let in_flight = dispatcher.in_flight();
        if in_flight > 0 {
            info!("Waiting up to {:?} for {} workers", grace, in_flight);
        }
        dispatcher.wait(grace)
    }
}
