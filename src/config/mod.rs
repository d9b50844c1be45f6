use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

// Upload parameters
pub const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024; // 8 MiB
pub const UPLOAD_BACKOFF: Duration = Duration::from_secs(3);
pub const MAX_TITLE_CHARS: usize = 100;
pub const DEFAULT_CATEGORY_ID: &str = "22";
pub const DEFAULT_VISIBILITY: &str = "public";
pub const DEFAULT_MADE_FOR_KIDS: bool = false;
pub const DEFAULT_TAGS: &[&str] = &["Shorts"];

// Download validation
pub const MIN_VIDEO_BYTES: u64 = 200 * 1024; // 200 KiB
pub const HTML_SNIFF_BYTES: usize = 65536;

// Network timeouts
pub const DRIVE_TIMEOUT: Duration = Duration::from_secs(180);
pub const HTTP_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
pub const API_TIMEOUT: Duration = Duration::from_secs(30);
pub const POLL_TIMEOUT_SECS: u64 = 60;

// Row layout: source, title, description
pub const COL_SOURCE: &str = "A";
pub const COL_DESCRIPTION: &str = "C";

pub const DEFAULT_SHEET_NAME: &str = "Лист1";
pub const DEFAULT_TRIGGER_TEXT: &str = "1";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_WORKER_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

/// Static metadata attached to every uploaded video.
#[derive(Debug, Clone)]
pub struct UploadDefaults {
    pub category_id: String,
    pub visibility: String,
    pub made_for_kids: bool,
    pub tags: Vec<String>,
}

impl Default for UploadDefaults {
    fn default() -> Self {
        Self {
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            visibility: DEFAULT_VISIBILITY.to_string(),
            made_for_kids: DEFAULT_MADE_FOR_KIDS,
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Base URLs of every remote API the bot talks to.
///
/// Production values come from [`Default`]; tests point them at a mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub telegram: String,
    pub sheets: String,
    pub drive_api: String,
    pub drive_public: String,
    pub youtube_upload: String,
    pub oauth_token: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            telegram: "https://api.telegram.org".to_string(),
            sheets: "https://sheets.googleapis.com".to_string(),
            drive_api: "https://www.googleapis.com".to_string(),
            drive_public: "https://drive.google.com".to_string(),
            youtube_upload: "https://www.googleapis.com".to_string(),
            oauth_token: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at one base URL.
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            telegram: base.clone(),
            sheets: base.clone(),
            drive_api: base.clone(),
            drive_public: base.clone(),
            youtube_upload: base.clone(),
            oauth_token: format!("{base}/token"),
        }
    }
}

/// Runtime configuration shared by every deployment shape.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub trigger_text: String,
    pub delete_row_after_upload: bool,
    pub upload: UploadDefaults,
    pub endpoints: Endpoints,
}

impl BotConfig {
    /// Build a configuration, reporting every missing required value at once.
    pub fn new(
        telegram_token: Option<String>,
        spreadsheet_id: Option<String>,
        sheet_name: Option<String>,
        trigger_text: Option<String>,
    ) -> Result<Self, ConfigError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        let mut missing = Vec::new();
        if !present(&telegram_token) {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        if !present(&spreadsheet_id) {
            missing.push("SPREADSHEET_ID");
        }
        if !present(&sheet_name) {
            missing.push("SHEET_NAME");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        Ok(Self {
            telegram_token: telegram_token.unwrap_or_default(),
            spreadsheet_id: normalize_sheet_id(&spreadsheet_id.unwrap_or_default()),
            sheet_name: sheet_name.unwrap_or_default(),
            trigger_text: trigger_text.unwrap_or_else(|| DEFAULT_TRIGGER_TEXT.to_string()),
            delete_row_after_upload: true,
            upload: UploadDefaults::default(),
            endpoints: Endpoints::default(),
        })
    }
}

/// Accept either a bare spreadsheet id or a full spreadsheet URL.
pub fn normalize_sheet_id(raw: &str) -> String {
    static SHEET_URL_RX: OnceLock<Regex> = OnceLock::new();
    let rx = SHEET_URL_RX
        .get_or_init(|| Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("static regex"));
    let raw = raw.trim();
    rx.captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw.to_string())
}
