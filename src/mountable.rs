use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use failure::{Error, ResultExt};
use regex::Regex;

use crate::device::DeviceEvent;
use crate::shutdown::CancelToken;

/// A view of which filesystems are currently mounted for a device.
pub trait MountTable: Send + Sync {
    /// All current mount points belonging to `device`, best candidate first.
    fn mount_points(&self, device: &DeviceEvent) -> Result<Vec<PathBuf>, Error>;
}

/// Reads the kernel's mount table, attributing block devices to a USB device through sysfs.
///
/// A partition belongs to a USB device when its canonical sysfs path lies beneath the USB
/// device's own sysfs path. Mounts outside of `base` are ignored.
#[derive(Debug, Clone)]
pub struct ProcMounts {
    mounts: PathBuf,
    sys_root: PathBuf,
    base: PathBuf,
}

impl ProcMounts {
    pub fn new<P: AsRef<Path>>(base: P) -> ProcMounts {
        ProcMounts::with_roots("/proc/self/mounts", "/sys", base)
    }

    /// Construct a mount table reading alternative `mounts` and sysfs locations.
    pub fn with_roots<M, S, B>(mounts: M, sys_root: S, base: B) -> ProcMounts
    where
        M: AsRef<Path>,
        S: AsRef<Path>,
        B: AsRef<Path>,
    {
        ProcMounts {
            mounts: mounts.as_ref().to_path_buf(),
            sys_root: sys_root.as_ref().to_path_buf(),
            base: base.as_ref().to_path_buf(),
        }
    }

    /// Names of the block devices (eg `sdb`, `sdb1`) sitting beneath `device` in sysfs.
    fn block_devices(&self, device: &DeviceEvent) -> Result<Vec<String>, Error> {
        let syspath = self.sys_root.join(device.path.trim_start_matches('/'));
        let syspath = match fs::canonicalize(&syspath) {
            Ok(path) => path,
            // The device went away before we got to look at it.
            Err(_) => return Ok(vec![]),
        };

        let mut out = vec![];
        let class = self.sys_root.join("class/block");
        for entry in fs::read_dir(&class).with_context(|_| format!("Reading {:?}", &class))? {
            let entry = entry?;
            match fs::canonicalize(entry.path()) {
                Ok(target) if target.starts_with(&syspath) => {
                    out.push(entry.file_name().to_string_lossy().into_owned());
                }
                _ => {}
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Undo the octal escaping the kernel applies to whitespace and backslashes in the mount table.
pub fn unescape_mount_field(field: &str) -> String {
    lazy_static! {
        static ref OCTAL: Regex = Regex::new(r"\\([0-7]{3})").expect("Couldn't compile regex");
    }

    OCTAL
        .replace_all(field, |caps: &regex::Captures<'_>| {
            u8::from_str_radix(&caps[1], 8)
                .map(|byte| (byte as char).to_string())
                .unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Parse the `(source, target)` pairs out of a mount table.
pub fn parse_mount_table(body: &str) -> Vec<(String, PathBuf)> {
    body.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some((
                unescape_mount_field(source),
                PathBuf::from(unescape_mount_field(target)),
            ))
        })
        .collect()
}

impl MountTable for ProcMounts {
    fn mount_points(&self, device: &DeviceEvent) -> Result<Vec<PathBuf>, Error> {
        let blocks = self.block_devices(device)?;
        if blocks.is_empty() {
            return Ok(vec![]);
        }

        let body = fs::read_to_string(&self.mounts)
            .with_context(|_| format!("Reading mount table {:?}", &self.mounts))?;

        Ok(parse_mount_table(&body)
            .into_iter()
            .filter(|(source, target)| {
                // Sources are usually /dev/sdXN, but may be a /dev/disk/by-* symlink.
                let source = fs::canonicalize(source).unwrap_or_else(|_| PathBuf::from(source));
                let name = source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                blocks.contains(&name) && target.starts_with(&self.base)
            })
            .map(|(_, target)| target)
            .collect())
    }
}

/// What became of an attempt to find where a device is mounted.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Mounted(PathBuf),
    /// Nothing appeared within the configured number of attempts.
    TimedOut { attempts: u32 },
    Cancelled,
}

/// Maps a mass storage device onto its mount point, waiting a bounded time for an automounter to
/// catch up.
pub struct MountResolver {
    table: Box<dyn MountTable>,
    attempts: u32,
    interval: Duration,
}

impl std::fmt::Debug for MountResolver {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("MountResolver")
            .field("attempts", &self.attempts)
            .field("interval", &self.interval)
            .finish()
    }
}

fn first_existing(candidates: &[PathBuf]) -> Option<&PathBuf> {
    candidates.iter().find(|path| path.exists())
}

impl MountResolver {
    pub fn new(table: Box<dyn MountTable>, attempts: u32, interval: Duration) -> MountResolver {
        MountResolver {
            table,
            attempts,
            interval,
        }
    }

    pub fn resolve(&self, device: &DeviceEvent, cancel: &CancelToken) -> Resolution {
        if let Some(path) = device.mount_points.first() {
            if path.exists() {
                return Resolution::Mounted(path.clone());
            }
            debug!("Reported mount point {:?} doesn't exist, polling", path);
        }

        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                info!("Cancelled while waiting for {} to mount", &device.path);
                return Resolution::Cancelled;
            }

            match self.table.mount_points(device) {
                Ok(points) => {
                    if let Some(path) = first_existing(&points) {
                        info!("Found {} mounted at {:?}", &device.path, path);
                        return Resolution::Mounted(path.clone());
                    }
                    debug!(
                        "No mount for {} yet (attempt {}/{})",
                        &device.path, attempt, self.attempts
                    );
                }
                Err(e) => {
                    warn!("Couldn't read mount table for {}: {}", &device.path, e);
                }
            }

            if attempt < self.attempts && cancel.sleep(self.interval) {
                info!("Cancelled while waiting for {} to mount", &device.path);
                return Resolution::Cancelled;
            }
        }

        Resolution::TimedOut {
            attempts: self.attempts,
        }
    }
}
