//! Turning a row's source cell into a local video file.
//!
//! A source may be a local path, a Google Drive link or any HTTP(S) URL.
//! Resolution builds an ordered list of [`Strategy`] values and tries them in
//! turn; only a failed authenticated Drive download falls through to the
//! public-link download.

pub mod drive;
pub mod validate;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use reqwest::blocking::Client;
use thiserror::Error;

use crate::auth::AuthError;
use crate::config;
use drive::DriveClient;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Источник видео не найден: {0}")]
    NotFound(String),
    #[error("Скачан слишком маленький файл ({0} байт)")]
    TooSmall(u64),
    #[error("Получен HTML вместо видео (страница Google Drive)")]
    UnexpectedHtml,
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("drive api returned {status}: {body}")]
    DriveApi { status: u16, body: String },
    #[error("drive authorization failed: {0}")]
    Auth(#[from] AuthError),
    #[error("local file error: {0}")]
    Io(#[from] io::Error),
}

/// A local file ready for upload.
///
/// `owned` files were created by the resolver and must be discarded by the
/// caller once the upload attempt is over. Borrowed files are never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    path: PathBuf,
    owned: bool,
}

impl ResolvedSource {
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: false,
        }
    }

    pub fn owned(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Remove an owned file. A file that is already gone counts as removed.
    pub fn discard(&self) -> io::Result<()> {
        if !self.owned {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Resolution failure, together with any temp file left behind by the
/// failing download. The caller owns `partial` and must discard it.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ResolveError {
    pub error: SourceError,
    pub partial: Option<ResolvedSource>,
}

impl ResolveError {
    fn bare(error: SourceError) -> Self {
        Self {
            error,
            partial: None,
        }
    }

    fn discard_partial(&self) {
        if let Some(partial) = &self.partial {
            if let Err(e) = partial.discard() {
                warn!("failed to remove {}: {}", partial.path().display(), e);
            }
        }
    }
}

/// One way of obtaining the video file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Local(PathBuf),
    DriveApi(String),
    DrivePublic(String),
    Http(String),
}

impl Strategy {
    /// Whether a failure of this strategy lets the next one run.
    ///
    /// Local filesystem faults stop resolution outright.
    fn falls_through(&self, err: &SourceError) -> bool {
        matches!(self, Strategy::DriveApi(_)) && !matches!(err, SourceError::Io(_))
    }
}

/// Strip whitespace and quotes, then expand `~` and environment variables.
/// Unknown variables are left untouched.
pub fn normalize_spec(spec: &str) -> String {
    let trimmed = spec.trim().trim_matches('"').trim_matches('\'');
    shellexpand::full_with_context_no_errors(
        trimmed,
        || std::env::var("HOME").ok(),
        |var| std::env::var(var).ok(),
    )
    .into_owned()
}

pub struct SourceResolver {
    http: Client,
    drive: Option<DriveClient>,
    drive_public_base: String,
    temp_dir: Option<PathBuf>,
}

impl SourceResolver {
    /// `http` serves the public-link and generic downloads; it should keep a
    /// cookie store so Drive's confirm cookie survives between requests.
    pub fn new(http: Client, drive: Option<DriveClient>, drive_public_base: impl Into<String>) -> Self {
        Self {
            http,
            drive,
            drive_public_base: drive_public_base.into(),
            temp_dir: None,
        }
    }

    /// Place downloads in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Ordered strategies for `spec`, first success wins.
    pub fn plan(&self, spec: &str) -> Result<Vec<Strategy>, SourceError> {
        let src = normalize_spec(spec);

        if Path::new(&src).is_file() {
            return Ok(vec![Strategy::Local(PathBuf::from(src))]);
        }

        if let Some(id) = drive::extract_drive_id(&src) {
            let mut plan = Vec::with_capacity(2);
            if self.drive.is_some() {
                plan.push(Strategy::DriveApi(id.clone()));
            }
            plan.push(Strategy::DrivePublic(id));
            return Ok(plan);
        }

        if src.starts_with("http://") || src.starts_with("https://") {
            return Ok(vec![Strategy::Http(src)]);
        }

        Err(SourceError::NotFound(src))
    }

    pub fn resolve(&self, spec: &str) -> Result<ResolvedSource, ResolveError> {
        let plan = self.plan(spec).map_err(ResolveError::bare)?;
        let mut attempts = plan.into_iter().peekable();

        while let Some(strategy) = attempts.next() {
            match self.attempt(&strategy) {
                Ok(resolved) => {
                    info!(
                        "resolved source to {} (owned: {})",
                        resolved.path().display(),
                        resolved.is_owned()
                    );
                    return Ok(resolved);
                }
                Err(err) if attempts.peek().is_some() && strategy.falls_through(&err.error) => {
                    warn!("{:?} failed, trying next source strategy: {}", strategy, err);
                    err.discard_partial();
                }
                Err(err) => return Err(err),
            }
        }

        Err(ResolveError::bare(SourceError::NotFound(normalize_spec(spec))))
    }

    fn attempt(&self, strategy: &Strategy) -> Result<ResolvedSource, ResolveError> {
        match strategy {
            Strategy::Local(path) => Ok(ResolvedSource::borrowed(path.clone())),
            Strategy::DriveApi(id) => match &self.drive {
                Some(drive) => self.download_into(|f| drive.download(id, f)),
                None => Err(ResolveError::bare(SourceError::NotFound(id.clone()))),
            },
            Strategy::DrivePublic(id) => self.download_into(|f| {
                drive::public_download(&self.http, &self.drive_public_base, id, f)
            }),
            Strategy::Http(url) => self.download_into(|f| http_download(&self.http, url, f)),
        }
    }

    /// Create an owned temp file, fill it and validate the result.
    ///
    /// The temp file is registered as owned before any bytes are written, so a
    /// failed or invalid download still hands it back for cleanup.
    fn download_into<F>(&self, fill: F) -> Result<ResolvedSource, ResolveError>
    where
        F: FnOnce(&mut File) -> Result<(), SourceError>,
    {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ytsheet-").suffix(".mp4");
        let temp = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let (mut file, path) = temp
            .and_then(|t| t.keep().map_err(|e| e.error))
            .map_err(|e| ResolveError::bare(SourceError::Io(e)))?;
        let source = ResolvedSource::owned(path);

        let result = fill(&mut file).and_then(|()| Ok(file.flush()?));
        drop(file);
        let result = result.and_then(|()| validate::ensure_valid_video(source.path()));

        match result {
            Ok(()) => Ok(source),
            Err(error) => Err(ResolveError {
                error,
                partial: Some(source),
            }),
        }
    }
}

fn http_download(http: &Client, url: &str, out: &mut File) -> Result<(), SourceError> {
    info!("downloading {}", url);
    let mut resp = http
        .get(url)
        .timeout(config::HTTP_DOWNLOAD_TIMEOUT)
        .send()?
        .error_for_status()?;
    resp.copy_to(out)?;
    Ok(())
}
