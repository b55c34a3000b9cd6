//! Client side of the external translation provider.
//!
//! The hub only sees the [`Translator`] trait; [`HttpTranslator`] is the
//! production implementation that talks JSON over HTTPS with basic auth.
//! Every failure is returned to the caller, which falls back to the
//! untranslated text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};

use crate::config::Credentials;

pub const DEFAULT_ENDPOINT: &str =
    "https://gateway.watsonplatform.net/language-translator/api/v2/translate";

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("translation provider answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("translation provider returned an unusable body: {0}")]
    Malformed(String),
    #[error("translation did not finish within {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait Translator: Send + Sync + 'static {
    async fn translate(&self, source: &str, target: &str, text: &str)
    -> Result<String, TranslateError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    source: &'a str,
    target: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    translation: String,
}

pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
}

impl HttpTranslator {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            credentials,
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(
        &self,
        source: &str,
        target: &str,
        text: &str,
    ) -> Result<String, TranslateError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(header::ACCEPT, "application/json")
            .json(&TranslateRequest {
                source,
                target,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TranslateError::Status { status, body });
        }

        parse_body(&body)
    }
}

/// Accepts either the provider's JSON envelope or a bare plain-text answer.
fn parse_body(body: &str) -> Result<String, TranslateError> {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => {
            let parsed: TranslateResponse = serde_json::from_value(value)
                .map_err(|err| TranslateError::Malformed(err.to_string()))?;
            parsed
                .translations
                .into_iter()
                .next()
                .map(|t| t.translation)
                .ok_or_else(|| TranslateError::Malformed("no translations in response".into()))
        }
        Err(_) => {
            let text = body.trim();
            if text.is_empty() {
                return Err(TranslateError::Malformed("empty response body".into()));
            }
            Ok(text.to_string())
        }
    }
}
