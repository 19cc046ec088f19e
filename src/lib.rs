#![deny(unused_must_use)]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![warn(clippy::all)]

#[macro_use]
extern crate failure;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate handlebars;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

/// The date-organised archive: buckets, collision handling, and copying files in without losing
/// their metadata.
pub mod archive;

/// Details pertaining to parsing the configuration file.
pub mod config;

/// The global context object that is threaded throughout the run of the program. This module also
/// deals with some implementation details, like ensuring that the incoming directory exists as
/// part of standing up the context.
pub mod ctx;

/// Some helpers associated with driving the clis that ship with camwatch.
pub mod cli;

/// Device events, and the classifier that decides which devices are cameras.
pub mod device;

/// A module concerning itself with presenting information in a human readable format.
pub mod formatting;

/// The hotplug event loop, which turns device events into worker threads.
pub mod hotplug;

/// Ingestion jobs and the `Ingest` trait that carries them out.
pub mod ingest;

/// Walking mounted filesystems.
pub mod mass_storage;

/// EXIF capture dates, and pulling frames out of videos.
pub mod metadata_extractor;

/// Contains machinery relating to finding where devices are mounted.
pub mod mountable;

/// The camera-session traits we use to talk to PTP devices, and the worker that downloads from
/// them.
pub mod ptp_device;

/// Contains the machinery for generating an ingest report. This handles both building the report
/// object up in memory, as well as rendering it to something we can log.
pub mod reporting;

/// Cooperative cancellation, and the signal handler that triggers it.
pub mod shutdown;

/// Sorting individual files into the archive.
pub mod triage;

/// Our bindings to libusb and the ptp crate.
#[cfg(feature = "usb")]
pub mod usb_camera;
#[cfg(not(feature = "usb"))]
#[path = "dummy_ptp.rs"]
pub mod usb_camera;

/// The udev monitor we receive hotplug events from.
#[cfg(feature = "udev")]
pub mod udev_source;
#[cfg(not(feature = "udev"))]
#[path = "dummy_udev.rs"]
pub mod udev_source;

mod version;

/// What version of camwatch do you have :)
pub use crate::version::VERSION;

/// Who wrote this
pub use crate::version::AUTHOR;

#[cfg(test)]
/// Helpers for use in tests
mod test_helpers;
