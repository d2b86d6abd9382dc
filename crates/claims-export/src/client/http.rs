//! Blocking HTTP implementation of [`ClaimsClient`].

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::ACCEPT;

use super::{ClaimsClient, ClientError};
use crate::fhir::{Bundle, EOB_RESOURCE_TYPE};

const FHIR_JSON: &str = "application/fhir+json";
const MAX_ERROR_BODY: usize = 300;

pub struct HttpClaimsClient {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl HttpClaimsClient {
    pub fn new(base_url: &str, page_size: u32, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size,
        })
    }

    pub fn search_url(&self) -> String {
        format!("{}/{}", self.base_url, EOB_RESOURCE_TYPE)
    }

    fn send(&self, url: &str, request: RequestBuilder) -> Result<Bundle, ClientError> {
        let response = request
            .header(ACCEPT, FHIR_JSON)
            .send()
            .map_err(|e| ClientError::Transport {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        let body = response.text().map_err(|e| ClientError::Transport {
            url: url.to_string(),
            source: e,
        })?;

        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ClientError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn last_updated_param(since: DateTime<Utc>) -> String {
    format!("ge{}", since.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl ClaimsClient for HttpClaimsClient {
    fn fetch_first_page(
        &self,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Bundle, ClientError> {
        let url = self.search_url();
        let mut query = vec![
            ("patient", patient_id.to_string()),
            ("excludeSAMHSA", "true".to_string()),
            ("_count", self.page_size.to_string()),
        ];
        if let Some(since) = since {
            query.push(("_lastUpdated", last_updated_param(since)));
        }
        let request = self.client.get(&url).query(&query);
        self.send(&url, request)
    }

    fn fetch_next_page(&self, bundle: &Bundle) -> Result<Bundle, ClientError> {
        let url = bundle.next_link().ok_or(ClientError::NoNextPage)?;
        self.send(url, self.client.get(url))
    }
}
