use std::sync::Arc;

use log::info;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::auth::{AuthError, TokenSource};
use crate::config;

#[derive(Error, Debug)]
pub enum RowStoreError {
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("sheets api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Sheet '{0}' not found")]
    SheetNotFound(String),
    #[error("invalid sheets url: {0}")]
    Url(String),
}

/// One pending job: where the video is and how to title it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub source: String,
    pub title: String,
    pub description: String,
}

impl Row {
    /// Build a row from raw cells; `None` when the source cell is blank.
    pub fn from_cells(cells: &[String]) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
        let source = cell(0);
        if source.is_empty() {
            return None;
        }
        Some(Self {
            source,
            title: cell(1),
            description: cell(2),
        })
    }
}

/// The table of pending jobs, consumed from the top.
pub trait RowStore: Send + Sync {
    fn first_row(&self) -> Result<Option<Row>, RowStoreError>;
    fn delete_first_row(&self) -> Result<(), RowStoreError>;
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[serde(default)]
    sheet_id: i64,
    title: String,
}

/// Google Sheets v4 backed row store.
pub struct GoogleSheets {
    http: Client,
    base: String,
    spreadsheet_id: String,
    sheet_name: String,
    tokens: Arc<dyn TokenSource>,
}

impl GoogleSheets {
    pub fn new(
        http: Client,
        base: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        sheet_name: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            base: base.into(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
            tokens,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RowStoreError> {
        let mut url = Url::parse(&self.base).map_err(|e| RowStoreError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| RowStoreError::Url(self.base.clone()))?
            .pop_if_empty()
            .push("v4")
            .push("spreadsheets")
            .extend(segments);
        Ok(url)
    }

    fn check(resp: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, RowStoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(RowStoreError::Api {
            status: status.as_u16(),
            body: resp.text().unwrap_or_default(),
        })
    }

    fn sheet_id(&self, token: &str) -> Result<i64, RowStoreError> {
        let url = self.url(&[&self.spreadsheet_id])?;
        let resp = self
            .http
            .get(url)
            .query(&[("fields", "sheets.properties")])
            .bearer_auth(token)
            .timeout(config::API_TIMEOUT)
            .send()?;
        let meta: SpreadsheetMeta = Self::check(resp)?.json()?;

        meta.sheets
            .into_iter()
            .map(|s| s.properties)
            .find(|p| p.title == self.sheet_name)
            .map(|p| p.sheet_id)
            .ok_or_else(|| RowStoreError::SheetNotFound(self.sheet_name.clone()))
    }
}

impl RowStore for GoogleSheets {
    fn first_row(&self) -> Result<Option<Row>, RowStoreError> {
        let token = self.tokens.access_token()?;
        let range = format!(
            "{}!{}1:{}1",
            self.sheet_name,
            config::COL_SOURCE,
            config::COL_DESCRIPTION
        );
        let url = self.url(&[&self.spreadsheet_id, "values", &range])?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .timeout(config::API_TIMEOUT)
            .send()?;
        let values: ValueRange = Self::check(resp)?.json()?;

        Ok(values.values.first().and_then(|cells| Row::from_cells(cells)))
    }

    fn delete_first_row(&self) -> Result<(), RowStoreError> {
        let token = self.tokens.access_token()?;
        let sheet_id = self.sheet_id(&token)?;
        let url = self.url(&[&format!("{}:batchUpdate", self.spreadsheet_id)])?;

        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": 0,
                        "endIndex": 1,
                    }
                }
            }]
        });

        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .timeout(config::API_TIMEOUT)
            .json(&body)
            .send()?;
        Self::check(resp)?;
        info!("deleted first row of '{}'", self.sheet_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use mockito::Matcher;

    fn store(server: &mockito::Server) -> GoogleSheets {
        GoogleSheets::new(
            Client::new(),
            server.url(),
            "SHEET",
            "Sheet1",
            Arc::new(StaticToken::new("sheets-token")),
        )
    }

    #[test]
    fn test_row_from_cells() {
        let cells = vec![" /tmp/a.mp4 ".to_string(), " T ".to_string()];
        let row = Row::from_cells(&cells).unwrap();
        assert_eq!(row.source, "/tmp/a.mp4");
        assert_eq!(row.title, "T");
        assert_eq!(row.description, "");

        assert_eq!(Row::from_cells(&["  ".to_string(), "title".to_string()]), None);
        assert_eq!(Row::from_cells(&[]), None);
    }

    #[test]
    fn test_first_row_read() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v4/spreadsheets/SHEET/values/Sheet1!A1:C1")
            .match_header("authorization", "Bearer sheets-token")
            .with_status(200)
            .with_body(r#"{"range":"Sheet1!A1:C1","values":[["https://x/v.mp4","Title","Desc"]]}"#)
            .create();

        let row = store(&server).first_row().unwrap().unwrap();
        assert_eq!(
            row,
            Row {
                source: "https://x/v.mp4".into(),
                title: "Title".into(),
                description: "Desc".into(),
            }
        );
    }

    #[test]
    fn test_first_row_missing() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v4/spreadsheets/SHEET/values/Sheet1!A1:C1")
            .with_status(200)
            .with_body(r#"{"range":"Sheet1!A1:C1","majorDimension":"ROWS"}"#)
            .create();
        assert_eq!(store(&server).first_row().unwrap(), None);
    }

    #[test]
    fn test_first_row_access_error() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v4/spreadsheets/SHEET/values/Sheet1!A1:C1")
            .with_status(403)
            .with_body("PERMISSION_DENIED")
            .create();
        match store(&server).first_row() {
            Err(RowStoreError::Api { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "PERMISSION_DENIED");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_first_row() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v4/spreadsheets/SHEET")
            .match_query(Matcher::UrlEncoded("fields".into(), "sheets.properties".into()))
            .with_status(200)
            .with_body(
                r#"{"sheets":[{"properties":{"sheetId":0,"title":"Other"}},
                              {"properties":{"sheetId":777,"title":"Sheet1"}}]}"#,
            )
            .create();
        let update = server
            .mock("POST", "/v4/spreadsheets/SHEET:batchUpdate")
            .match_body(Matcher::PartialJsonString(
                r#"{"requests":[{"deleteDimension":{"range":{"sheetId":777,"dimension":"ROWS","startIndex":0,"endIndex":1}}}]}"#.into(),
            ))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create();

        store(&server).delete_first_row().unwrap();
        update.assert();
    }

    #[test]
    fn test_delete_unknown_sheet() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v4/spreadsheets/SHEET")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"sheets":[{"properties":{"sheetId":1,"title":"Other"}}]}"#)
            .create();

        let err = store(&server).delete_first_row().unwrap_err();
        assert_eq!(err.to_string(), "Sheet 'Sheet1' not found");
    }
}
