//! HTTP client for the mail API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{codes, ApiError, Result};
use super::types::{
    parse_count_response, parse_detail_response, parse_list_response, DetailPayload, ErrorEnvelope,
    ListQuery, MessageStub,
};

/// Low-priority hint sent with every indexing request.
pub const LOW_PRIORITY: &str = "u=7";

/// Server codes that mean success.
const SUCCESS_CODES: [i64; 2] = [1000, 1001];

/// Maximum length of a response body quoted in an error message.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// The remote calls the indexing pipeline needs.
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Lists one page of message stubs, newest first.
    async fn list_messages(&self, query: &ListQuery) -> Result<Vec<MessageStub>>;

    /// Fetches the full message including its encrypted body.
    async fn message_detail(&self, message_id: &str) -> Result<DetailPayload>;

    /// Returns the total number of messages carrying `label_id`.
    async fn message_count(&self, label_id: &str) -> Result<u64>;
}

/// Authenticated session used for every request.
#[derive(Clone)]
pub struct ApiSession {
    pub uid: String,
    pub access_token: SecretString,
}

impl std::fmt::Debug for ApiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSession")
            .field("uid", &self.uid)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Transport settings for [`HttpMailApi`].
#[derive(Debug, Clone)]
pub struct HttpMailApiOptions {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub priority: String,
}

impl Default for HttpMailApiOptions {
    fn default() -> Self {
        Self {
            base_url: "https://mail.proton.me/api".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            priority: LOW_PRIORITY.to_string(),
        }
    }
}

/// [`MailApi`] implementation over reqwest.
pub struct HttpMailApi {
    client: Client,
    base_url: String,
    priority: String,
    session: ApiSession,
}

impl HttpMailApi {
    pub fn new(options: HttpMailApiOptions, session: ApiSession) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            priority: options.priority,
            session,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(path, "GET");

        let response = self
            .client
            .get(&url)
            .query(query)
            .header("priority", &self.priority)
            .header("x-pm-uid", &self.session.uid)
            .bearer_auth(self.session.access_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes().await?;

        if !status.is_success() {
            let err = decode_error(status.as_u16(), retry_after, &body);
            warn!(path, status = status.as_u16(), code = err.code(), "Request failed");
            return Err(err);
        }

        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadResponse(format!("invalid JSON body: {}", e)))?;

        // Some failures arrive as 200 with a non-success envelope.
        if let Some(code) = value.get("Code").and_then(Value::as_i64) {
            if !SUCCESS_CODES.contains(&code) {
                let message = value
                    .get("Error")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Err(ApiError::Http {
                    status: status.as_u16(),
                    code,
                    message,
                    retry_after,
                });
            }
        }

        Ok(value)
    }
}

#[async_trait]
impl MailApi for HttpMailApi {
    async fn list_messages(&self, query: &ListQuery) -> Result<Vec<MessageStub>> {
        let value = self
            .get_json("/mail/v4/messages", &query.to_query_pairs())
            .await?;
        parse_list_response(value)
    }

    async fn message_detail(&self, message_id: &str) -> Result<DetailPayload> {
        let value = self
            .get_json(&format!("/mail/v4/messages/{}", message_id), &[])
            .await?;
        parse_detail_response(value)
    }

    async fn message_count(&self, label_id: &str) -> Result<u64> {
        let value = self.get_json("/mail/v4/messages/count", &[]).await?;
        parse_count_response(&value, label_id)
    }
}

/// Reads a `retry-after` header given in seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Builds the error for a non-success response.
///
/// The status is always preserved. When the body is not a server error
/// envelope the code falls back to [`codes::BAD_RESPONSE`].
pub fn decode_error(status: u16, retry_after: Option<Duration>, body: &[u8]) -> ApiError {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => ApiError::Http {
            status,
            code: envelope.code,
            message: envelope.error,
            retry_after,
        },
        Err(_) => ApiError::Http {
            status,
            code: codes::BAD_RESPONSE,
            message: truncate_body(body),
            retry_after,
        },
    }
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() > MAX_ERROR_BODY_LENGTH {
        let cut: String = text.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", cut)
    } else {
        text.into_owned()
    }
}
