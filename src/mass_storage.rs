use std::path::Path;

use failure::Error;
use walkdir::WalkDir;

use crate::reporting::IngestReport;
use crate::shutdown::CancelToken;
use crate::triage::{Triage, TriageOutcome};

/// Walk a mounted volume, triaging every regular file on it into the archive.
///
/// Files are visited in file name order and symlinks are not followed. Cancellation is checked
/// before every file; whatever was archived up to that point stays archived.
pub fn ingest_mount(
    root: &Path,
    triage: &Triage,
    cancel: &CancelToken,
    report: &mut IngestReport,
) -> Result<(), Error> {
    if !root.is_dir() {
        bail!("Mount point {:?} is not a directory", root);
    }
    info!("Ingesting files from {:?}", root);

    let mut seen = 0;
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        if cancel.is_cancelled() {
            info!("Ingestion of {:?} cancelled after {} files", root, seen);
            report.mark_cancelled();
            return Ok(());
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                error!("Couldn't read {:?}: {}", &path, e);
                report.record_failure(&path, &e.into());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        seen += 1;
        match triage.triage(entry.path(), cancel) {
            Ok(outcome) => {
                report.record(&outcome);
                if let TriageOutcome::Cancelled { .. } = outcome {
                    info!("Ingestion of {:?} cancelled after {} files", root, seen);
                    return Ok(());
                }
            }
            Err(e) => {
                error!("Couldn't ingest {:?}: {}", entry.path(), e);
                report.record_failure(entry.path(), &e);
            }
        }
    }
    Ok(())
}
