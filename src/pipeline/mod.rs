pub mod outcome;

use std::sync::Arc;

use log::{info, warn};

use crate::config::UploadDefaults;
use crate::sheet::RowStore;
use crate::source::{ResolvedSource, SourceResolver};
use crate::upload::{ChunkedUploader, CredentialProvider, UploadError, UploadRequest};
pub use outcome::JobOutcome;

/// One self-contained unit of work started by a trigger.
pub trait Job: Send + Sync {
    fn run_once(&self) -> JobOutcome;
}

fn discard_logged(source: &ResolvedSource) {
    if let Err(e) = source.discard() {
        warn!("failed to remove temp file {}: {}", source.path().display(), e);
    }
}

/// Removes an owned source file when dropped, even if the job unwinds.
struct CleanupGuard<'a>(&'a ResolvedSource);

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        discard_logged(self.0);
    }
}

/// Read row → resolve source → upload → delete row.
pub struct JobRunner {
    rows: Arc<dyn RowStore>,
    resolver: SourceResolver,
    credentials: Arc<dyn CredentialProvider>,
    uploader: ChunkedUploader,
    defaults: UploadDefaults,
    delete_row_after_upload: bool,
}

impl JobRunner {
    pub fn new(
        rows: Arc<dyn RowStore>,
        resolver: SourceResolver,
        credentials: Arc<dyn CredentialProvider>,
        uploader: ChunkedUploader,
        defaults: UploadDefaults,
    ) -> Self {
        Self {
            rows,
            resolver,
            credentials,
            uploader,
            defaults,
            delete_row_after_upload: true,
        }
    }

    pub fn keep_rows(mut self) -> Self {
        self.delete_row_after_upload = false;
        self
    }

    fn execute(&self) -> JobOutcome {
        let row = match self.rows.first_row() {
            Ok(Some(row)) => row,
            Ok(None) => {
                // clear a stray blank row; failure here is not reported
                if let Err(e) = self.rows.delete_first_row() {
                    warn!("could not delete empty first row: {}", e);
                }
                return JobOutcome::EmptyRow;
            }
            Err(e) => {
                return JobOutcome::RowAccessFailed {
                    message: e.to_string(),
                }
            }
        };
        info!("processing row with source {}", row.source);

        let source = match self.resolver.resolve(&row.source) {
            Ok(source) => source,
            Err(e) => {
                if let Some(partial) = &e.partial {
                    discard_logged(partial);
                }
                return JobOutcome::SourceFailed {
                    message: e.to_string(),
                };
            }
        };

        let video_id = {
            let _guard = CleanupGuard(&source);

            let host = match self.credentials.upload_client() {
                Ok(host) => host,
                Err(e) => {
                    return JobOutcome::AuthFailed {
                        message: e.to_string(),
                    }
                }
            };

            let request =
                UploadRequest::new(source.path(), &row.title, &row.description, &self.defaults);
            match self.uploader.upload(host.as_ref(), &request) {
                Ok(video_id) => video_id,
                Err(UploadError::LimitExceeded(message)) => {
                    return JobOutcome::UploadLimitExceeded { message }
                }
                Err(e) => {
                    return JobOutcome::UploadFailed {
                        message: e.to_string(),
                    }
                }
            }
        };

        if self.delete_row_after_upload {
            if let Err(e) = self.rows.delete_first_row() {
                return JobOutcome::RowDeleteFailed {
                    message: e.to_string(),
                    video_id,
                };
            }
        }

        JobOutcome::Uploaded { video_id }
    }
}

impl Job for JobRunner {
    fn run_once(&self) -> JobOutcome {
        let outcome = self.execute();
        info!("job finished with status {}", outcome.status());
        outcome
    }
}
