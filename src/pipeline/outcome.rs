use crate::upload::VideoId;

/// The single terminal result of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Uploaded and the row was consumed.
    Uploaded { video_id: VideoId },
    /// The platform refused further uploads; the row is kept.
    UploadLimitExceeded { message: String },
    /// The first row had no source.
    EmptyRow,
    /// The row store could not be read.
    RowAccessFailed { message: String },
    /// The video file could not be obtained.
    SourceFailed { message: String },
    /// No authorised upload client could be created.
    AuthFailed { message: String },
    /// The upload stopped for a reason other than the limit.
    UploadFailed { message: String },
    /// The video is live but the row could not be removed.
    RowDeleteFailed { message: String, video_id: VideoId },
}

impl JobOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            JobOutcome::Uploaded { .. } => "OK",
            JobOutcome::UploadLimitExceeded { .. } => "UPLOAD_LIMIT",
            JobOutcome::EmptyRow => "EMPTY_SHEET",
            JobOutcome::RowAccessFailed { .. } => "SHEETS_ACCESS_ERROR",
            JobOutcome::SourceFailed { .. } => "DOWNLOAD_ERROR",
            JobOutcome::AuthFailed { .. } => "YOUTUBE_AUTH_ERROR",
            JobOutcome::UploadFailed { .. } => "UPLOAD_ERROR",
            JobOutcome::RowDeleteFailed { .. } => "ROW_DELETE_ERROR",
        }
    }

    /// Video id, when the upload itself went through.
    pub fn video_id(&self) -> Option<&str> {
        match self {
            JobOutcome::Uploaded { video_id } | JobOutcome::RowDeleteFailed { video_id, .. } => {
                Some(video_id)
            }
            _ => None,
        }
    }
}
