// src/sheets/client.rs

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::auth::AccessToken;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Anything that can hand back the cell grid for an A1 range.
#[allow(async_fn_in_trait)]
pub trait ValueSource {
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest<'a> {
    value_input_option: &'a str,
    data: Vec<UpdateRange<'a>>,
}

#[derive(Debug, Serialize)]
struct UpdateRange<'a> {
    range: &'a str,
    values: &'a [Vec<String>],
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResponse {
    #[serde(default)]
    pub total_updated_cells: u64,
    #[serde(default)]
    pub total_updated_ranges: u64,
}

pub struct SheetsClient {
    http: Client,
    token: AccessToken,
    spreadsheet_id: String,
    base_url: String,
}

impl SheetsClient {
    pub fn new(http: Client, token: AccessToken, spreadsheet_id: impl Into<String>) -> Self {
        Self {
            http,
            token,
            spreadsheet_id: spreadsheet_id.into(),
            base_url: SHEETS_API.to_string(),
        }
    }

    /// Point the client at another API root (used against local fakes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("parsing API root {}", self.base_url))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("API root {} cannot take path segments", self.base_url))?;
            segments.pop_if_empty().push(&self.spreadsheet_id);
            segments.extend(tail);
        }
        Ok(url)
    }

    async fn send_with_retry<F>(&self, what: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempts = 0;
        loop {
            let result = build().bearer_auth(self.token.as_str()).send().await;
            let retryable = match &result {
                Ok(resp) => {
                    resp.status() == StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error()
                }
                Err(e) => e.is_connect() || e.is_timeout(),
            };
            if retryable && attempts < MAX_RETRIES {
                attempts += 1;
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempts - 1);
                warn!(request = what, attempt = attempts, delay_ms = backoff, "Retrying");
                sleep(Duration::from_millis(backoff)).await;
                continue;
            }

            let resp = result.with_context(|| format!("{} failed", what))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                error!(request = what, %status, "request failed");
                bail!("{} returned {}: {}", what, status, body);
            }
            return Ok(resp);
        }
    }

    #[instrument(level = "info", skip(self, data), fields(ranges = data.len()))]
    pub async fn batch_update(
        &self,
        data: &BTreeMap<String, Vec<Vec<String>>>,
    ) -> Result<BatchUpdateResponse> {
        let url = self.endpoint(&["values:batchUpdate"])?;
        let body = BatchUpdateRequest {
            value_input_option: "USER_ENTERED",
            data: data
                .iter()
                .map(|(range, values)| UpdateRange { range, values })
                .collect(),
        };
        let what = format!("POST {}", url);
        let resp = self
            .send_with_retry(&what, || self.http.post(url.clone()).json(&body))
            .await?;
        let summary: BatchUpdateResponse = resp
            .json()
            .await
            .with_context(|| format!("decoding response of {}", what))?;
        info!(
            cells = summary.total_updated_cells,
            ranges = summary.total_updated_ranges,
            "batch update applied"
        );
        Ok(summary)
    }
}

impl ValueSource for SheetsClient {
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.endpoint(&["values", range])?;
        let what = format!("GET {}", url);
        debug!(%range, "fetching values");
        let resp = self
            .send_with_retry(&what, || self.http.get(url.clone()))
            .await?;
        let body: ValueRange = resp
            .json()
            .await
            .with_context(|| format!("decoding response of {}", what))?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
