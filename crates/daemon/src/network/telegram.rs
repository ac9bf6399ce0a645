//! Telegram Bot API client.
//!
//! Long polling only:
//! - `getUpdates` with a server-side timeout
//! - `sendMessage` for replies
//! - `getFile` followed by a streamed download of the file bytes
//!
//! The token is part of every URL, so request errors are stripped of their
//! URL before they are returned or logged.

use std::fmt;
use std::io;
use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt};
use protocol::error::ProtocolError;
use protocol::wire::{self, ApiResponse, GetUpdates, Update};
use protocol::{FileRef, OutboundMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::files::{ByteStream, DownloadError, FileSource};

/// Extra time allowed on top of the long-poll timeout.
const POLL_SLACK: Duration = Duration::from_secs(10);

/// Timeout for short API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by the Bot API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport or HTTP status failure.
    #[error("http error: {0}")]
    Http(reqwest::Error),

    /// The API answered with `ok: false` or an unusable body.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// `getFile` returned no download path.
    #[error("no download path for file {0}")]
    NoFilePath(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Http(e.without_url())
    }
}

/// Bot API client bound to one token.
#[derive(Clone)]
pub struct BotApi {
    client: reqwest::Client,
    /// Base URL without trailing slash.
    base_url: String,
    token: String,
    poll_timeout: Duration,
}

impl fmt::Debug for BotApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotApi")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl BotApi {
    /// Create a client.
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        poll_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            poll_timeout,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.base_url,
            self.token,
            file_path.trim_start_matches('/')
        )
    }

    async fn call<P, T>(&self, method: &str, params: &P, timeout: Duration) -> Result<T, ApiError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(method, "Bot API call");
        let response: ApiResponse<T> = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(params)
            .send()
            .await?
            .json()
            .await?;

        Ok(response.into_result()?)
    }

    /// Fetch updates after `offset`, waiting up to the poll timeout.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ApiError> {
        let params = GetUpdates {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: vec!["message".to_string()],
        };
        self.call("getUpdates", &params, self.poll_timeout + POLL_SLACK)
            .await
    }

    /// Send a text message.
    pub async fn send_message(&self, message: OutboundMessage) -> Result<(), ApiError> {
        let params: wire::SendMessage = message.into();
        let _sent: serde_json::Value = self
            .call("sendMessage", &params, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Resolve a file id to its download path.
    pub async fn get_file(&self, file_id: &str) -> Result<wire::File, ApiError> {
        let params = serde_json::json!({ "file_id": file_id });
        self.call("getFile", &params, REQUEST_TIMEOUT).await
    }

    /// Open the bytes of a file as a stream.
    pub async fn open_file(&self, file: &FileRef) -> Result<ByteStream, ApiError> {
        let meta = self.get_file(&file.file_id).await?;
        let path = meta
            .file_path
            .ok_or_else(|| ApiError::NoFilePath(file.file_id.clone()))?;

        let response = self
            .client
            .get(self.file_url(&path))
            .send()
            .await?
            .error_for_status()?;

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::other(e.without_url()));
        Ok(stream.boxed())
    }
}

impl FileSource for BotApi {
    async fn fetch(&self, file: &FileRef) -> Result<ByteStream, DownloadError> {
        self.open_file(file)
            .await
            .map_err(|e| DownloadError::Fetch(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> BotApi {
        BotApi::new(base, "123:secret", Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_method_url() {
        let api = api("https://api.telegram.org/");
        assert_eq!(
            api.method_url("getUpdates"),
            "https://api.telegram.org/bot123:secret/getUpdates"
        );
    }

    #[test]
    fn test_file_url() {
        let api = api("http://localhost:8081");
        assert_eq!(
            api.file_url("documents/file_1.pdf"),
            "http://localhost:8081/file/bot123:secret/documents/file_1.pdf"
        );
        assert_eq!(
            api.file_url("/photos/p.jpg"),
            "http://localhost:8081/file/bot123:secret/photos/p.jpg"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let shown = format!("{:?}", api("https://api.telegram.org"));
        assert!(!shown.contains("secret"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn test_protocol_error_passthrough() {
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )
        .unwrap();
        let err: ApiError = response.into_result().unwrap_err().into();
        assert_eq!(err.to_string(), "bot api error 401: Unauthorized");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_http_error() {
        // Port 9 on localhost is not expected to serve HTTP
        let api = api("http://127.0.0.1:9");
        let err = api.get_file("abc").await.unwrap_err();
        assert!(matches!(err, ApiError::Http(_)));
        assert!(!err.to_string().contains("secret"));
    }
}
