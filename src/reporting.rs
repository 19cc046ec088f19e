use std::path::Path;
use std::time::Duration;

use failure::Error;
use handlebars::{Handlebars, RenderError};
use serde::Serialize;

use crate::archive::Archived;
use crate::formatting::{human_readable_size, human_readable_time};
use crate::triage::TriageOutcome;

handlebars_helper!(header: |v: str| format!("{}\n{}", v, str::repeat("=", v.len())));
handlebars_helper!(human_size: |v: u64| format!("{}b", human_readable_size(v)));
handlebars_helper!(human_time: |v: u64| human_readable_time(Duration::from_secs(v)));

fn handlebars() -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();
    handlebars.register_helper("header", Box::new(header));
    handlebars.register_helper("human_readable_size", Box::new(human_size));
    handlebars.register_helper("human_readable_time", Box::new(human_time));
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.set_strict_mode(true);
    handlebars
}

/// A file that couldn't be ingested, and why.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FailedFile {
    path: String,
    error: String,
}

impl FailedFile {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn error(&self) -> &str {
        &self.error
    }
}

/// A report describing how ingesting one device went.
#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    device: String,
    source: String,
    archived: usize,
    archived_bytes: u64,
    duplicates: usize,
    unsupported: usize,
    screencaps: usize,
    failed_screencaps: usize,
    failures: Vec<FailedFile>,
    cancelled: bool,
    elapsed_secs: u64,
}

impl IngestReport {
    pub fn new<D: Into<String>, S: Into<String>>(device: D, source: S) -> IngestReport {
        IngestReport {
            device: device.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    fn record_archived(&mut self, archived: &Archived) {
        match archived {
            Archived::Copied { size, .. } => {
                self.archived += 1;
                self.archived_bytes += size;
            }
            Archived::Duplicate { .. } => self.duplicates += 1,
        }
    }

    /// Fold the result of triaging one file into this report.
    pub fn record(&mut self, outcome: &TriageOutcome) {
        match outcome {
            TriageOutcome::Archived {
                archived,
                screencaps,
                ..
            } => {
                self.record_archived(archived);
                self.screencaps += screencaps.written.len();
                self.failed_screencaps += screencaps.failed;
            }
            TriageOutcome::Unsupported { .. } => self.unsupported += 1,
            TriageOutcome::Cancelled { archived } => {
                if let Some(archived) = archived {
                    self.record_archived(archived);
                }
                self.cancelled = true;
            }
        }
    }

    pub fn record_failure<P: AsRef<Path>>(&mut self, path: P, error: &Error) {
        self.failures.push(FailedFile {
            path: path.as_ref().display().to_string(),
            error: error.to_string(),
        });
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.elapsed_secs = elapsed.as_secs();
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn archived(&self) -> usize {
        self.archived
    }

    pub fn archived_bytes(&self) -> u64 {
        self.archived_bytes
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn unsupported(&self) -> usize {
        self.unsupported
    }

    pub fn screencaps(&self) -> usize {
        self.screencaps
    }

    pub fn failures(&self) -> &[FailedFile] {
        &self.failures
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn to_plaintext(&self) -> Result<String, RenderError> {
        handlebars().render_template(INGEST_REPORT_TEMPLATE, &self)
    }

    /// Write the rendered report to the log, one line per entry.
    pub fn log(&self) {
        match self.to_plaintext() {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    info!("{}", line);
                }
            }
            Err(e) => {
                warn!("Couldn't render report for {}: {}", &self.device, e);
                info!(
                    "{}: archived {}, {} duplicates, {} failures",
                    &self.device,
                    self.archived,
                    self.duplicates,
                    self.failures.len()
                );
            }
        }
    }
}


static INGEST_REPORT_TEMPLATE: &str = "\
{{header \"CAMWATCH INGEST REPORT\"}}
device:      {{device}}
source:      {{source}}
archived:    {{archived}} files ({{human_readable_size archived_bytes}})
duplicates:  {{duplicates}}
unsupported: {{unsupported}}
screencaps:  {{screencaps}}{{#if failed_screencaps}} ({{failed_screencaps}} failed){{/if}}
elapsed:     {{human_readable_time elapsed_secs}}
{{#if cancelled}}Ingestion was cancelled before finishing.
{{/if}}\
{{#if failures}}{{header \"Failures\"}}
{{#each failures}}    {{this.path}}: {{this.error}}
{{/each}}{{/if}}";
