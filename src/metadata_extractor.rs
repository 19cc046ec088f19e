//! Extract capture metadata from media files, and frames from videos.
//!
//! Still images are read with `kamadak-exif`. For video the plausible rust options still aren't
//! there, so we shell out to `ffprobe` and `ffmpeg`, doing so behind the `FrameExtractor` trait so
//! the rest of the pipeline doesn't care.

use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::{Command, Stdio};

use chrono::prelude::*;
use failure::{Error, ResultExt};

/// The format EXIF stores timestamps in.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Parse an EXIF timestamp. Anything not in exactly `YYYY:MM:DD HH:MM:SS` form is rejected.
pub fn parse_exif_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim_end_matches('\0').trim();
    NaiveDateTime::parse_from_str(value, EXIF_DATETIME_FORMAT).ok()
}

fn read_original_datetime(path: &Path) -> Result<Option<NaiveDateTime>, Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new()
        .read_from_container(&mut reader)
        .map_err(|e| format_err!("EXIF parse error: {}", e))?;

    let field = match exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY) {
        Some(field) => field,
        None => return Ok(None),
    };

    match field.value {
        exif::Value::Ascii(ref values) => Ok(values
            .first()
            .map(|raw| String::from_utf8_lossy(raw))
            .and_then(|raw| parse_exif_datetime(&raw))),
        _ => Ok(None),
    }
}

/// The original capture time recorded in a file's EXIF data, if there is one we can read.
pub fn capture_datetime<P: AsRef<Path>>(path: P) -> Option<NaiveDateTime> {
    let path = path.as_ref();
    match read_original_datetime(path) {
        Ok(datetime) => {
            if datetime.is_none() {
                debug!("No original capture time in {:?}", path);
            }
            datetime
        }
        Err(e) => {
            debug!("Couldn't read EXIF from {:?}: {}", path, e);
            None
        }
    }
}

/// Decodes videos far enough to report their length and render single frames.
pub trait FrameExtractor: Send + Sync {
    /// Length of the video in seconds.
    fn duration(&self, video: &Path) -> Result<f64, Error>;

    /// Render the frame at `offset_secs` into the JPEG file `dest`.
    fn extract_frame(&self, video: &Path, offset_secs: u64, dest: &Path) -> Result<(), Error>;
}

/// Most frames taken from any one video, whatever its reported duration.
pub const MAX_SCREENCAPS: usize = 10_000;

/// Offsets, in whole seconds, at which frames should be taken from a video of `duration` seconds.
///
/// Starts at zero and steps by `interval` up to but not including the truncated duration, giving
/// at most `MAX_SCREENCAPS` offsets.
/// ```rust
/// # use camwatch::metadata_extractor::screencap_offsets;
/// assert_eq!(screencap_offsets(65.0, 30), vec![0, 30, 60]);
/// assert_eq!(screencap_offsets(60.0, 30), vec![0, 30]);
/// ```
pub fn screencap_offsets(duration: f64, interval: u64) -> Vec<u64> {
    if interval == 0 || !duration.is_finite() || duration <= 0.0 {
        return vec![];
    }
    let end = duration.trunc() as u64;
    (0..end)
        .step_by(interval as usize)
        .take(MAX_SCREENCAPS)
        .collect()
}

#[derive(Debug)]
pub struct FFMpegExtractor {
    ffmpeg: String,
    ffprobe: String,
}

impl FFMpegExtractor {
    /// Create an extractor using `ffmpeg` and `ffprobe` from `$PATH`. If the Err case is returned
    /// ffmpeg is either broken or nonexistant.
    pub fn new() -> Result<Self, Error> {
        Self::with_binaries("ffmpeg", "ffprobe")
    }

    pub fn with_binaries<S: Into<String>>(ffmpeg: S, ffprobe: S) -> Result<Self, Error> {
        let extractor = FFMpegExtractor {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        };
        for binary in &[&extractor.ffmpeg, &extractor.ffprobe] {
            Command::new(binary)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .with_context(|_| format!("Couldn't run {}", binary))?;
        }
        Ok(extractor)
    }
}

/// Run a command to completion, returning its stdout or an error carrying its stderr.
fn run<S: AsRef<OsStr>>(command: &mut Command, name: S) -> Result<Vec<u8>, Error> {
    let output = command.stdin(Stdio::null()).output()?;
    if !output.status.success() {
        bail!(
            "{} failed ({}): {}",
            name.as_ref().to_string_lossy(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

impl FrameExtractor for FFMpegExtractor {
    fn duration(&self, video: &Path) -> Result<f64, Error> {
        let stdout = run(
            Command::new(&self.ffprobe)
                .arg("-v")
                .arg("error")
                .arg("-show_entries")
                .arg("format=duration")
                .arg("-of")
                .arg("default=noprint_wrappers=1:nokey=1")
                .arg(video),
            &self.ffprobe,
        )?;
        let text = String::from_utf8_lossy(&stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|e| format_err!("Couldn't parse duration {:?} of {:?}: {}", text.trim(), video, e))
    }

    fn extract_frame(&self, video: &Path, offset_secs: u64, dest: &Path) -> Result<(), Error> {
        run(
            Command::new(&self.ffmpeg)
                .arg("-y")
                .arg("-v")
                .arg("error")
                .arg("-ss")
                .arg(offset_secs.to_string())
                .arg("-i")
                .arg(video)
                .arg("-frames:v")
                .arg("1")
                .arg("-q:v")
                .arg("2")
                .arg(dest),
            &self.ffmpeg,
        )?;
        if !dest.exists() {
            bail!("ffmpeg produced no frame at {}s of {:?}", offset_secs, video);
        }
        Ok(())
    }
}
