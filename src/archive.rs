use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use failure::{Error, ResultExt};
use filetime::FileTime;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::formatting;

/// Name of the per-bucket directory holding frames taken from videos.
pub const SCREENCAPS_DIR: &str = "screencaps";

/// How many alternative names we try before giving up on a colliding file.
const MAX_RENAMES: usize = 1000;

const BLOCK_SIZE: usize = 64 * 1024;

/// The date-organised archive rooted at the incoming directory.
///
/// Several workers may write into the same bucket at once. Buckets are created with
/// `create_dir_all`, which tolerates losing the race, and files are written to a temporary name
/// in the bucket before being linked into place without clobbering anything.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

/// The result of copying one file into the archive.
#[derive(Debug, PartialEq, Eq)]
pub enum Archived {
    Copied {
        path: PathBuf,
        size: u64,
        sha256: [u8; 32],
    },
    /// An identical file was already present.
    Duplicate { path: PathBuf },
}

impl Archived {
    pub fn path(&self) -> &Path {
        match self {
            Archived::Copied { path, .. } | Archived::Duplicate { path } => path,
        }
    }
}

/// Copy everything from `reader` to `writer`, returning the byte count and SHA-256 of the data.
fn copy_and_hash<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<(u64, [u8; 32])> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0; BLOCK_SIZE];
    let mut size = 0;
    loop {
        let len = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => len,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..len]);
        writer.write_all(&buf[..len])?;
        size += len as u64;
    }
    let mut digest = [0; 32];
    digest.copy_from_slice(&hasher.finalize());
    Ok((size, digest))
}

/// SHA-256 of a file already on disk.
pub fn hash_file<P: AsRef<Path>>(path: P) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let (_, digest) = copy_and_hash(&mut file, &mut io::sink())?;
    Ok(digest)
}

/// The `n`th alternative name for `name`: `clip.mp4` becomes `clip-1.mp4`, `clip-2.mp4`, ...
fn alternative_name(name: &Path, n: usize) -> PathBuf {
    let stem = name
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.extension() {
        Some(ext) => PathBuf::from(format!("{}-{}.{}", stem, n, ext.to_string_lossy())),
        None => PathBuf::from(format!("{}-{}", stem, n)),
    }
}

/// Give `dest` the permissions and timestamps of `source`.
fn preserve_metadata(source: &Path, dest: &Path) -> Result<(), Error> {
    let meta = fs::metadata(source)?;
    fs::set_permissions(dest, meta.permissions())?;
    filetime::set_file_times(
        dest,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )?;
    Ok(())
}

impl Archive {
    pub fn new<P: AsRef<Path>>(root: P) -> Archive {
        Archive {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The bucket for a capture date, eg `<root>/2024-03-15`.
    pub fn bucket(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date.format("%Y-%m-%d").to_string())
    }

    pub fn screencaps(&self, date: NaiveDate) -> PathBuf {
        self.bucket(date).join(SCREENCAPS_DIR)
    }

    /// Create the bucket for `date` if it doesn't exist yet, returning its path.
    pub fn ensure_bucket(&self, date: NaiveDate) -> Result<PathBuf, Error> {
        let bucket = self.bucket(date);
        fs::create_dir_all(&bucket).with_context(|_| format!("Creating bucket {:?}", &bucket))?;
        Ok(bucket)
    }

    pub fn ensure_screencaps(&self, date: NaiveDate) -> Result<PathBuf, Error> {
        let dir = self.screencaps(date);
        fs::create_dir_all(&dir).with_context(|_| format!("Creating {:?}", &dir))?;
        Ok(dir)
    }

    /// Copy `source` into the bucket for `date`, keeping its file name.
    ///
    /// If a file of that name is already archived with the same content nothing is written. If
    /// the content differs the copy is stored under the next free `<stem>-<n>.<ext>` name.
    pub fn store<P: AsRef<Path>>(&self, source: P, date: NaiveDate) -> Result<Archived, Error> {
        let source = source.as_ref();
        let name = source
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| format_err!("{:?} has no file name", source))?;

        let bucket = self.ensure_bucket(date)?;

        let mut staged = NamedTempFile::new_in(&bucket)
            .with_context(|_| format!("Creating temporary file in {:?}", &bucket))?;
        let (size, sha256) = {
            let mut input = File::open(source)
                .with_context(|_| format!("Opening {:?}", source))?;
            copy_and_hash(&mut input, staged.as_file_mut())
                .with_context(|_| format!("Copying {:?}", source))?
        };
        staged.as_file().sync_all()?;

        let mut candidate = name.clone();
        for n in 1..=MAX_RENAMES {
            let dest = bucket.join(&candidate);
            match staged.persist_noclobber(&dest) {
                Ok(_) => {
                    preserve_metadata(source, &dest)?;
                    info!(
                        "Archived {:?} to {:?} ({}b, sha256={})",
                        source,
                        &dest,
                        formatting::human_readable_size(size),
                        hex::encode(&sha256[..8])
                    );
                    return Ok(Archived::Copied { path: dest, size, sha256 });
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    staged = e.file;
                    if hash_file(&dest)? == sha256 {
                        info!("{:?} is already archived as {:?}", source, &dest);
                        return Ok(Archived::Duplicate { path: dest });
                    }
                    candidate = alternative_name(&name, n);
                }
                Err(e) => {
                    return Err(format_err!("Couldn't move {:?} into {:?}: {}", source, &dest, e.error));
                }
            }
        }
        bail!("Couldn't find a free name for {:?} in {:?}", source, &bucket);
    }
}
