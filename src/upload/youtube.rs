//! YouTube Data API v3 resumable upload.
//!
//! The session is initiated lazily on the first chunk request, so an
//! upload-limit refusal at initiation takes the same path as one raised by a
//! chunk. Progress is tracked from the `Range` header of `308` responses.

use std::fs::File;
use std::sync::Arc;

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::auth::{AuthError, TokenSource};
use crate::chunker;
use crate::config;

use super::{
    ChunkError, ChunkProgress, CredentialProvider, UploadError, UploadRequest, UploadSession,
    VideoHost,
};

/// Issues [`YoutubeHost`] clients backed by a token source.
pub struct YoutubeUploader {
    http: Client,
    base: String,
    tokens: Arc<dyn TokenSource>,
}

impl YoutubeUploader {
    pub fn new(http: Client, base: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            base: base.into(),
            tokens,
        }
    }
}

impl CredentialProvider for YoutubeUploader {
    /// Fails early when no token can be obtained. Every request of the
    /// session asks the token source again, so a token that expires mid-upload
    /// is replaced on the next retry.
    fn upload_client(&self) -> Result<Box<dyn VideoHost>, AuthError> {
        self.tokens.access_token()?;
        Ok(Box::new(YoutubeHost {
            http: self.http.clone(),
            base: self.base.clone(),
            tokens: Arc::clone(&self.tokens),
        }))
    }
}

/// An authorised YouTube client.
pub struct YoutubeHost {
    http: Client,
    base: String,
    tokens: Arc<dyn TokenSource>,
}

impl VideoHost for YoutubeHost {
    fn open_session(
        &self,
        request: &UploadRequest,
        chunk_size: usize,
    ) -> Result<Box<dyn UploadSession>, UploadError> {
        let file = File::open(&request.file_path)?;
        let total = file.metadata()?.len();

        Ok(Box::new(YoutubeSession {
            http: self.http.clone(),
            init_url: format!("{}/upload/youtube/v3/videos", self.base),
            tokens: Arc::clone(&self.tokens),
            metadata: request.metadata(),
            file,
            total,
            offset: 0,
            chunk_size,
            session_uri: None,
        }))
    }
}

#[derive(Deserialize)]
struct VideoResource {
    id: Option<String>,
}

struct YoutubeSession {
    http: Client,
    init_url: String,
    tokens: Arc<dyn TokenSource>,
    metadata: serde_json::Value,
    file: File,
    total: u64,
    offset: u64,
    chunk_size: usize,
    session_uri: Option<String>,
}

impl YoutubeSession {
    fn token(&self) -> Result<String, ChunkError> {
        self.tokens
            .access_token()
            .map_err(|e| ChunkError::new(format!("cannot refresh upload token: {e}")))
    }

    fn initiate(&self) -> Result<String, ChunkError> {
        let token = self.token()?;
        let resp = self
            .http
            .post(&self.init_url)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", self.total.to_string())
            .timeout(config::API_TIMEOUT)
            .json(&self.metadata)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ChunkError::with_response(
                status.as_u16(),
                resp.text().unwrap_or_default(),
            ));
        }

        resp.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ChunkError::new("no Location header in upload initiation response"))
    }
}

/// Next offset from a `Range: bytes=0-N` header.
fn next_offset(range: Option<&str>) -> u64 {
    range
        .and_then(|r| r.trim().strip_prefix("bytes="))
        .and_then(|r| r.rsplit('-').next())
        .and_then(|end| end.parse::<u64>().ok())
        .map_or(0, |end| end + 1)
}

impl UploadSession for YoutubeSession {
    fn total_bytes(&self) -> u64 {
        self.total
    }

    fn next_chunk(&mut self) -> Result<ChunkProgress, ChunkError> {
        let uri = match &self.session_uri {
            Some(uri) => uri.clone(),
            None => {
                let uri = self.initiate()?;
                debug!("resumable session opened at {}", uri);
                self.session_uri = Some(uri.clone());
                uri
            }
        };

        let chunk = chunker::read_chunk_at(&mut self.file, self.offset, self.chunk_size, self.total)
            .map_err(|e| ChunkError::new(format!("cannot read upload file: {e}")))?;
        let content_range = if chunk.data.is_empty() {
            format!("bytes */{}", self.total)
        } else {
            format!("bytes {}-{}/{}", chunk.offset, chunk.end(), self.total)
        };
        debug!("sending {} (last: {})", content_range, chunk.is_last);

        let token = self.token()?;
        let resp = self
            .http
            .put(&uri)
            .bearer_auth(token)
            .header(CONTENT_RANGE, content_range)
            .body(chunk.data)
            .send()?;

        let status = resp.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            self.offset = next_offset(resp.headers().get(RANGE).and_then(|v| v.to_str().ok()));
            return Ok(ChunkProgress::Pending {
                bytes_sent: self.offset,
            });
        }

        if status.is_success() {
            let video: VideoResource = resp.json()?;
            return video
                .id
                .map(ChunkProgress::Done)
                .ok_or_else(|| ChunkError::new("upload response carried no video id"));
        }

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate();
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            // expired session, start over
            self.session_uri = None;
            self.offset = 0;
        }
        Err(ChunkError::with_response(
            status.as_u16(),
            resp.text().unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::config::UploadDefaults;
    use crate::upload::ChunkedUploader;
    use mockito::Matcher;
    use std::path::Path;

    fn write_video(dir: &tempfile::TempDir, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, data).unwrap();
        path
    }

    fn uploader_for(server: &mockito::Server) -> YoutubeUploader {
        YoutubeUploader::new(Client::new(), server.url(), Arc::new(StaticToken::new("yt-token")))
    }

    #[test]
    fn test_next_offset() {
        assert_eq!(next_offset(Some("bytes=0-3")), 4);
        assert_eq!(next_offset(Some("bytes=0-524287")), 524288);
        assert_eq!(next_offset(None), 0);
        assert_eq!(next_offset(Some("garbage")), 0);
    }

    #[test]
    fn test_chunked_upload_roundtrip() {
        let mut server = mockito::Server::new();
        let session_url = format!("{}/upload/session/xyz", server.url());

        let init = server
            .mock("POST", "/upload/youtube/v3/videos")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "resumable".into()),
                Matcher::UrlEncoded("part".into(), "snippet,status".into()),
            ]))
            .match_header("authorization", "Bearer yt-token")
            .match_header("x-upload-content-length", "10")
            .match_body(Matcher::PartialJsonString(
                r#"{"snippet":{"title":"My clip","categoryId":"22"}}"#.into(),
            ))
            .with_status(200)
            .with_header("location", &session_url)
            .expect(1)
            .create();
        let first = server
            .mock("PUT", "/upload/session/xyz")
            .match_header("content-range", "bytes 0-3/10")
            .with_status(308)
            .with_header("range", "bytes=0-3")
            .create();
        let second = server
            .mock("PUT", "/upload/session/xyz")
            .match_header("content-range", "bytes 4-7/10")
            .with_status(308)
            .with_header("range", "bytes=0-7")
            .create();
        let last = server
            .mock("PUT", "/upload/session/xyz")
            .match_header("content-range", "bytes 8-9/10")
            .with_status(200)
            .with_body(r#"{"kind":"youtube#video","id":"vid42"}"#)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let path = write_video(&dir, b"0123456789");
        let host = uploader_for(&server).upload_client().unwrap();
        let request = UploadRequest::new(&path, "My clip", "desc", &UploadDefaults::default());

        let uploader = ChunkedUploader::default().with_chunk_size(4).with_progress(false);
        let id = uploader.upload(host.as_ref(), &request).unwrap();
        assert_eq!(id, "vid42");

        init.assert();
        first.assert();
        second.assert();
        last.assert();
    }

    /// Hands out "stale" for the first `stale_calls` requests, "fresh" after.
    struct RotatingToken {
        calls: std::sync::Mutex<u32>,
        stale_calls: u32,
        invalidated: std::sync::atomic::AtomicBool,
    }

    impl TokenSource for RotatingToken {
        fn access_token(&self) -> Result<String, AuthError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            Ok(if *calls <= self.stale_calls { "stale" } else { "fresh" }.to_string())
        }

        fn invalidate(&self) {
            self.invalidated.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_expired_token_replaced_mid_upload() {
        let mut server = mockito::Server::new();
        let session_url = format!("{}/upload/session/rot", server.url());
        server
            .mock("POST", "/upload/youtube/v3/videos")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("location", &session_url)
            .expect(1)
            .create();
        let rejected = server
            .mock("PUT", "/upload/session/rot")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(r#"{"error":{"code":401,"message":"Invalid Credentials"}}"#)
            .expect(1)
            .create();
        let accepted = server
            .mock("PUT", "/upload/session/rot")
            .match_header("authorization", "Bearer fresh")
            .with_status(201)
            .with_body(r#"{"id":"vid-rot"}"#)
            .expect(1)
            .create();

        // upload_client check, initiation and the first PUT all see "stale"
        let tokens = Arc::new(RotatingToken {
            calls: std::sync::Mutex::new(0),
            stale_calls: 3,
            invalidated: std::sync::atomic::AtomicBool::new(false),
        });
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(&dir, b"0123456789");
        let host = YoutubeUploader::new(Client::new(), server.url(), tokens.clone())
            .upload_client()
            .unwrap();
        let request = UploadRequest::new(&path, "clip", "", &UploadDefaults::default());

        let uploader = ChunkedUploader::default()
            .with_progress(false)
            .with_policy(crate::upload::RetryPolicy::bounded(3, std::time::Duration::ZERO));
        assert_eq!(uploader.upload(host.as_ref(), &request).unwrap(), "vid-rot");

        rejected.assert();
        accepted.assert();
        assert_eq!(*tokens.calls.lock().unwrap(), 4);
        assert!(tokens.invalidated.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_limit_at_initiation() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/upload/youtube/v3/videos")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"errors":[{"reason":"uploadLimitExceeded"}]}}"#)
            .expect(1)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let path = write_video(&dir, b"abc");
        let host = uploader_for(&server).upload_client().unwrap();
        let request = UploadRequest::new(&path, "", "", &UploadDefaults::default());

        let uploader = ChunkedUploader::default()
            .with_progress(false)
            .with_sleeper(|_| panic!("limit must not be retried"));
        assert!(matches!(
            uploader.upload(host.as_ref(), &request),
            Err(UploadError::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let server = mockito::Server::new();
        let host = uploader_for(&server).upload_client().unwrap();
        let request = UploadRequest::new(
            Path::new("/no/such/video.mp4"),
            "x",
            "",
            &UploadDefaults::default(),
        );
        assert!(matches!(
            ChunkedUploader::default()
                .with_progress(false)
                .upload(host.as_ref(), &request),
            Err(UploadError::Io(_))
        ));
    }
}
