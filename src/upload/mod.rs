pub mod youtube;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::config::{self, UploadDefaults};

pub type VideoId = String;

const UPLOAD_LIMIT_MARKERS: [&str; 2] = [
    "uploadLimitExceeded",
    "exceeded the number of videos they may upload",
];

pub const UPLOAD_LIMIT_MESSAGE: &str = "Лимит отправки видео на YouTube";

/// Everything the video host needs to publish one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file_path: PathBuf,
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub visibility: String,
    pub made_for_kids: bool,
    pub tags: Vec<String>,
}

impl UploadRequest {
    /// An empty title falls back to the file name; titles are cut to 100 chars.
    pub fn new(file_path: &Path, title: &str, description: &str, defaults: &UploadDefaults) -> Self {
        let title = if title.trim().is_empty() {
            file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            title.to_string()
        };

        Self {
            file_path: file_path.to_path_buf(),
            title: title.chars().take(config::MAX_TITLE_CHARS).collect(),
            description: description.to_string(),
            category_id: defaults.category_id.clone(),
            visibility: defaults.visibility.clone(),
            made_for_kids: defaults.made_for_kids,
            tags: defaults.tags.clone(),
        }
    }

    /// `snippet` + `status` body of a `videos.insert` call.
    pub fn metadata(&self) -> serde_json::Value {
        let mut snippet = json!({
            "title": self.title,
            "description": self.description,
            "categoryId": self.category_id,
        });
        if !self.tags.is_empty() {
            snippet["tags"] = json!(self.tags);
        }
        json!({
            "snippet": snippet,
            "status": {
                "privacyStatus": self.visibility,
                "selfDeclaredMadeForKids": self.made_for_kids,
            }
        })
    }
}

/// A failed chunk request. Everything except an upload-limit signal is retried.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ChunkError {
    pub status: Option<u16>,
    pub message: String,
    pub body: String,
}

impl ChunkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            body: String::new(),
        }
    }

    pub fn with_response(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status: Some(status),
            message: format!("upload request returned {status}: {body}"),
            body,
        }
    }

    pub fn is_upload_limit(&self) -> bool {
        UPLOAD_LIMIT_MARKERS
            .iter()
            .any(|m| self.body.contains(m) || self.message.contains(m))
    }
}

impl From<reqwest::Error> for ChunkError {
    fn from(e: reqwest::Error) -> Self {
        Self {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
            body: String::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{0}")]
    LimitExceeded(String),
    #[error("upload gave up after {attempts} failed attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ChunkError },
    #[error("cannot read upload file: {0}")]
    Io(#[from] io::Error),
}

/// Result of one successful chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkProgress {
    /// More data remains; `bytes_sent` is what the host has confirmed so far.
    Pending { bytes_sent: u64 },
    Done(VideoId),
}

/// An open resumable upload. Each call sends the next outstanding chunk; a
/// failed call leaves the position unchanged so the same chunk is retried.
pub trait UploadSession {
    fn total_bytes(&self) -> u64;
    fn next_chunk(&mut self) -> Result<ChunkProgress, ChunkError>;
}

/// A video platform able to start resumable uploads.
pub trait VideoHost: Send {
    fn open_session(
        &self,
        request: &UploadRequest,
        chunk_size: usize,
    ) -> Result<Box<dyn UploadSession>, UploadError>;
}

/// Hands out an authorised [`VideoHost`]. Called once per job, before any
/// chunk is sent.
pub trait CredentialProvider: Send + Sync {
    fn upload_client(&self) -> Result<Box<dyn VideoHost>, AuthError>;
}

/// How transient chunk failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated on one chunk. `None` retries forever.
    pub max_retries: Option<u32>,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Retry every transient failure; only the upload limit stops the loop.
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_retries: None,
            backoff,
        }
    }

    pub fn bounded(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            backoff,
        }
    }

    fn allows(&self, failures: u32) -> bool {
        self.max_retries.map_or(true, |max| failures <= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(config::UPLOAD_BACKOFF)
    }
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Drives an [`UploadSession`] to completion.
#[derive(Clone)]
pub struct ChunkedUploader {
    chunk_size: usize,
    policy: RetryPolicy,
    sleeper: Sleeper,
    show_progress: bool,
}

impl Default for ChunkedUploader {
    fn default() -> Self {
        Self {
            chunk_size: config::UPLOAD_CHUNK_SIZE,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(std::thread::sleep),
            show_progress: true,
        }
    }
}

impl ChunkedUploader {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn upload(&self, host: &dyn VideoHost, request: &UploadRequest) -> Result<VideoId, UploadError> {
        info!(
            "uploading {} as \"{}\"",
            request.file_path.display(),
            request.title
        );
        let mut session = host.open_session(request, self.chunk_size)?;

        let progress = self.progress_bar(session.total_bytes());
        let mut failures = 0u32;

        loop {
            match session.next_chunk() {
                Ok(ChunkProgress::Pending { bytes_sent }) => {
                    failures = 0;
                    progress.set_position(bytes_sent);
                }
                Ok(ChunkProgress::Done(video_id)) => {
                    progress.finish_and_clear();
                    info!("upload complete, video id {}", video_id);
                    return Ok(video_id);
                }
                Err(e) if e.is_upload_limit() => {
                    progress.abandon();
                    warn!("upload limit reached: {}", e);
                    return Err(UploadError::LimitExceeded(UPLOAD_LIMIT_MESSAGE.to_string()));
                }
                Err(e) => {
                    failures += 1;
                    if !self.policy.allows(failures) {
                        progress.abandon();
                        return Err(UploadError::RetriesExhausted {
                            attempts: failures,
                            last: e,
                        });
                    }
                    warn!("retrying upload chunk (attempt {}): {}", failures + 1, e);
                    (self.sleeper)(self.policy.backoff);
                }
            }
        }
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted session: pops one result per chunk request.
    pub(crate) struct ScriptedSession {
        pub script: VecDeque<Result<ChunkProgress, ChunkError>>,
        pub calls: Arc<Mutex<u32>>,
    }

    impl UploadSession for ScriptedSession {
        fn total_bytes(&self) -> u64 {
            100
        }

        fn next_chunk(&mut self) -> Result<ChunkProgress, ChunkError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(ChunkError::new("script exhausted")))
        }
    }

    pub(crate) struct ScriptedHost {
        pub script: Mutex<Option<VecDeque<Result<ChunkProgress, ChunkError>>>>,
        pub calls: Arc<Mutex<u32>>,
        pub requests: Arc<Mutex<Vec<UploadRequest>>>,
    }

    impl ScriptedHost {
        pub(crate) fn new(script: Vec<Result<ChunkProgress, ChunkError>>) -> Self {
            Self {
                script: Mutex::new(Some(script.into())),
                calls: Arc::new(Mutex::new(0)),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl VideoHost for ScriptedHost {
        fn open_session(
            &self,
            request: &UploadRequest,
            _chunk_size: usize,
        ) -> Result<Box<dyn UploadSession>, UploadError> {
            self.requests.lock().unwrap().push(request.clone());
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedSession {
                script,
                calls: self.calls.clone(),
            }))
        }
    }

    fn recording_uploader() -> (ChunkedUploader, Arc<Mutex<Vec<Duration>>>) {
        let waits = Arc::new(Mutex::new(Vec::new()));
        let recorded = waits.clone();
        let uploader = ChunkedUploader::default()
            .with_progress(false)
            .with_sleeper(move |d| recorded.lock().unwrap().push(d));
        (uploader, waits)
    }

    fn request() -> UploadRequest {
        UploadRequest::new(Path::new("/tmp/v.mp4"), "T", "D", &UploadDefaults::default())
    }

    #[test]
    fn test_title_truncated_to_100_chars() {
        let long: String = "я".repeat(150);
        let req = UploadRequest::new(Path::new("/tmp/v.mp4"), &long, "", &UploadDefaults::default());
        assert_eq!(req.title.chars().count(), 100);
    }

    #[test]
    fn test_empty_title_uses_file_name() {
        let req = UploadRequest::new(Path::new("/videos/clip01.mp4"), "  ", "", &UploadDefaults::default());
        assert_eq!(req.title, "clip01.mp4");
        assert_eq!(req.description, "");
    }

    #[test]
    fn test_metadata_shape() {
        let meta = request().metadata();
        assert_eq!(meta["snippet"]["title"], "T");
        assert_eq!(meta["snippet"]["categoryId"], "22");
        assert_eq!(meta["snippet"]["tags"][0], "Shorts");
        assert_eq!(meta["status"]["privacyStatus"], "public");
        assert_eq!(meta["status"]["selfDeclaredMadeForKids"], false);
    }

    #[test]
    fn test_upload_limit_markers() {
        assert!(ChunkError::with_response(400, r#"{"reason":"uploadLimitExceeded"}"#).is_upload_limit());
        assert!(ChunkError::with_response(
            400,
            "The user has exceeded the number of videos they may upload."
        )
        .is_upload_limit());
        assert!(!ChunkError::with_response(500, "backend error").is_upload_limit());
        assert!(!ChunkError::new("connection reset").is_upload_limit());
    }

    #[test]
    fn test_transient_failures_retried_until_success() {
        let host = ScriptedHost::new(vec![
            Err(ChunkError::new("reset")),
            Err(ChunkError::with_response(503, "unavailable")),
            Ok(ChunkProgress::Pending { bytes_sent: 50 }),
            Err(ChunkError::new("timeout")),
            Ok(ChunkProgress::Done("vid-1".into())),
        ]);
        let (uploader, waits) = recording_uploader();

        let id = uploader.upload(&host, &request()).unwrap();
        assert_eq!(id, "vid-1");
        assert_eq!(*host.calls.lock().unwrap(), 5);
        assert_eq!(*waits.lock().unwrap(), vec![config::UPLOAD_BACKOFF; 3]);
    }

    #[test]
    fn test_upload_limit_stops_immediately() {
        let host = ScriptedHost::new(vec![
            Err(ChunkError::new("reset")),
            Err(ChunkError::with_response(403, "uploadLimitExceeded")),
            Ok(ChunkProgress::Done("never".into())),
        ]);
        let (uploader, waits) = recording_uploader();

        match uploader.upload(&host, &request()) {
            Err(UploadError::LimitExceeded(msg)) => assert_eq!(msg, UPLOAD_LIMIT_MESSAGE),
            other => panic!("expected limit error, got {other:?}"),
        }
        assert_eq!(*host.calls.lock().unwrap(), 2);
        assert_eq!(waits.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_bounded_policy_gives_up() {
        let host = ScriptedHost::new(vec![
            Err(ChunkError::new("a")),
            Err(ChunkError::new("b")),
            Err(ChunkError::new("c")),
        ]);
        let (uploader, waits) = recording_uploader();
        let uploader = uploader.with_policy(RetryPolicy::bounded(2, Duration::from_millis(1)));

        match uploader.upload(&host, &request()) {
            Err(UploadError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.message, "c");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(waits.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_progress_resets_failure_count() {
        let host = ScriptedHost::new(vec![
            Err(ChunkError::new("a")),
            Ok(ChunkProgress::Pending { bytes_sent: 10 }),
            Err(ChunkError::new("b")),
            Ok(ChunkProgress::Done("vid-2".into())),
        ]);
        let (uploader, _) = recording_uploader();
        let uploader = uploader.with_policy(RetryPolicy::bounded(1, Duration::ZERO));
        assert_eq!(uploader.upload(&host, &request()).unwrap(), "vid-2");
    }
}
