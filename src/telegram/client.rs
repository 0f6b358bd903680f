//! Thin typed client for the Telegram Bot API. Long polling and message
//! sending only; everything else the API offers is out of scope.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Overall request deadline; must exceed the longest poll timeout so the
/// server, not the client, ends an idle long poll.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(70);

const BASE_URL: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("telegram http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram http status: {0}")]
    Status(reqwest::StatusCode),
    #[error("telegram api error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<Sender>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Seam between the poll loop and the wire, so dispatcher tests can run
/// against a scripted transport.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Fetches the next batch of message updates. `offset` is only sent when
    /// positive; a non-positive `timeout` falls back to the default.
    async fn get_updates(&self, offset: i64, timeout: Duration)
    -> Result<Vec<Update>, ClientError>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ClientError>;
}

pub struct Client {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(token: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_base_url(token, BASE_URL)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            token: token.into(),
            base_url: base_url.into(),
            http,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }
}

fn into_result<T>(body: ApiResponse<T>) -> Result<T, ClientError>
where
    T: Default,
{
    if !body.ok {
        return Err(ClientError::Api(body.description.unwrap_or_default()));
    }
    Ok(body.result.unwrap_or_default())
}

#[async_trait]
impl TelegramApi for Client {
    async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, ClientError> {
        let timeout = if timeout.is_zero() {
            DEFAULT_POLL_TIMEOUT
        } else {
            timeout
        };
        let mut query: Vec<(&str, String)> = vec![
            ("timeout", timeout.as_secs().to_string()),
            ("allowed_updates", r#"["message"]"#.to_owned()),
        ];
        if offset > 0 {
            query.push(("offset", offset.to_string()));
        }
        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ClientError::Status(status));
        }
        into_result(response.json::<ApiResponse<Vec<Update>>>().await?)
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ClientError> {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ClientError::Status(status));
        }
        // The echoed message body is not interesting beyond the ok flag.
        into_result(response.json::<ApiResponse<serde_json::Value>>().await?)?;
        Ok(())
    }
}
