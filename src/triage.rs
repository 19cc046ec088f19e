use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::prelude::*;
use failure::Error;
use serde::Serialize;

use crate::archive::{Archive, Archived};
use crate::config::Config;
use crate::formatting;
use crate::metadata_extractor::{self, FrameExtractor};
use crate::shutdown::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A file we've decided to archive. The capture date is worked out once, when this is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    /// Lower cased, without the leading dot.
    pub extension: String,
    pub kind: MediaKind,
    pub capture_date: NaiveDate,
}

/// Frames taken from one video.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Screencaps {
    pub written: Vec<PathBuf>,
    pub failed: usize,
}

#[derive(Debug)]
pub enum TriageOutcome {
    Archived {
        file: MediaFile,
        archived: Archived,
        screencaps: Screencaps,
    },
    /// Not an extension we were configured to care about.
    Unsupported { path: PathBuf },
    /// Cancellation was observed. If it arrived while taking frames the file itself was already
    /// archived at `archived`.
    Cancelled { archived: Option<Archived> },
}

/// The name a frame at `offset_secs` into the video with file stem `stem` is stored under.
///
/// ```rust
/// # use camwatch::triage::screencap_name;
/// assert_eq!(screencap_name("MVI_0001", 3725), "MVI_0001_screenshot_01-02-05.jpg");
/// ```
pub fn screencap_name(stem: &str, offset_secs: u64) -> String {
    format!("{}_screenshot_{}.jpg", stem, formatting::offset_label(offset_secs))
}

/// Sorts files into the archive, taking screencaps from videos on the way.
#[derive(Clone)]
pub struct Triage {
    archive: Archive,
    image_extensions: Vec<String>,
    video_extensions: Vec<String>,
    screencap_interval: u64,
    extractor: Arc<dyn FrameExtractor>,
}

impl fmt::Debug for Triage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Triage")
            .field("archive", &self.archive)
            .field("image_extensions", &self.image_extensions)
            .field("video_extensions", &self.video_extensions)
            .field("screencap_interval", &self.screencap_interval)
            .finish()
    }
}

impl Triage {
    pub fn new(cfg: &Config, extractor: Arc<dyn FrameExtractor>) -> Triage {
        Triage {
            archive: Archive::new(cfg.incoming_dir()),
            image_extensions: cfg.image_extensions().to_vec(),
            video_extensions: cfg.video_extensions().to_vec(),
            screencap_interval: cfg.screencap_interval(),
            extractor,
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Which kind of media `path` is, going by its extension alone.
    pub fn kind_of(&self, path: &Path) -> Option<(String, MediaKind)> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        if self.image_extensions.contains(&extension) {
            Some((extension, MediaKind::Image))
        } else if self.video_extensions.contains(&extension) {
            Some((extension, MediaKind::Video))
        } else {
            None
        }
    }

    /// Build the `MediaFile` for `path`, resolving its capture date. Files without a usable EXIF
    /// capture time are dated today.
    pub fn media_file(&self, path: &Path) -> Option<MediaFile> {
        let (extension, kind) = self.kind_of(path)?;
        let capture_date = match metadata_extractor::capture_datetime(path) {
            Some(datetime) => datetime.date(),
            None => Local::now().date_naive(),
        };
        Some(MediaFile {
            path: path.to_path_buf(),
            extension,
            kind,
            capture_date,
        })
    }

    /// Archive one file.
    ///
    /// Errors are for this file only; callers log them and carry on with the next.
    pub fn triage(&self, path: &Path, cancel: &CancelToken) -> Result<TriageOutcome, Error> {
        if cancel.is_cancelled() {
            return Ok(TriageOutcome::Cancelled { archived: None });
        }

        let file = match self.media_file(path) {
            Some(file) => file,
            None => {
                info!("Skipping {:?}: unsupported file type", path);
                return Ok(TriageOutcome::Unsupported {
                    path: path.to_path_buf(),
                });
            }
        };
        debug!("{:?} is a {} captured {}", path, file.kind, file.capture_date);

        let archived = self.archive.store(path, file.capture_date)?;

        // A duplicate video already had its frames taken when it was first archived.
        let fresh_video = match archived {
            Archived::Copied { ref path, .. } if file.kind == MediaKind::Video => Some(path.clone()),
            _ => None,
        };
        let screencaps = match fresh_video {
            Some(copy) => match self.screencaps(&copy, file.capture_date, cancel)? {
                Some(screencaps) => screencaps,
                None => {
                    return Ok(TriageOutcome::Cancelled {
                        archived: Some(archived),
                    })
                }
            },
            None => Screencaps::default(),
        };

        Ok(TriageOutcome::Archived {
            file,
            archived,
            screencaps,
        })
    }

    /// Take a frame every `screencap_interval` seconds from the archived `video`. Returns None if
    /// cancelled part way through.
    fn screencaps(
        &self,
        video: &Path,
        date: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<Option<Screencaps>, Error> {
        let mut screencaps = Screencaps::default();
        let duration = match self.extractor.duration(video) {
            Ok(duration) => duration,
            Err(e) => {
                error!("Couldn't probe duration of {:?}: {}", video, e);
                screencaps.failed += 1;
                return Ok(Some(screencaps));
            }
        };

        let offsets = metadata_extractor::screencap_offsets(duration, self.screencap_interval);
        if offsets.is_empty() {
            return Ok(Some(screencaps));
        }

        let stem = video
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        if offsets.len() == metadata_extractor::MAX_SCREENCAPS {
            warn!(
                "{:?} claims to run for {}s, only taking its first {} screencaps",
                video,
                duration,
                offsets.len()
            );
        }
        let dir = self.archive.ensure_screencaps(date)?;
        info!("Taking {} screencaps from {:?}", offsets.len(), video);

        for offset in offsets {
            if cancel.is_cancelled() {
                info!(
                    "Cancelled after {} screencaps of {:?}",
                    screencaps.written.len(),
                    video
                );
                return Ok(None);
            }
            let dest = dir.join(screencap_name(&stem, offset));
            match self.extractor.extract_frame(video, offset, &dest) {
                Ok(()) => {
                    debug!("Wrote {:?}", &dest);
                    screencaps.written.push(dest);
                }
                Err(e) => {
                    error!("Couldn't extract frame at {}s of {:?}: {}", offset, video, e);
                    screencaps.failed += 1;
                }
            }
        }
        Ok(Some(screencaps))
    }
}
