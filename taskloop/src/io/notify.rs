//! Human-readable progress notifications.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::error::SinkError;
use crate::io::config::NotifyConfig;

/// Port for fire-and-forget progress messages.
pub trait Notifier {
    fn notify(&self, message: &str) -> Result<(), SinkError>;
}

/// Discards every message. Used when no endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, message: &str) -> Result<(), SinkError> {
        debug!(message, "notification dropped (no endpoint)");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct NotifyBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_id: Option<&'a str>,
}

/// POSTs `{"message", "voice_id"}` JSON to a configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::blocking::Client,
    url: String,
    voice_id: Option<String>,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, voice_id: Option<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Notify(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            voice_id,
        })
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, message: &str) -> Result<(), SinkError> {
        let body = NotifyBody {
            message,
            voice_id: self.voice_id.as_deref(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| SinkError::Notify(format!("POST {}: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Notify(format!("POST {} returned {status}", self.url)));
        }
        debug!(url = %self.url, "notification sent");
        Ok(())
    }
}

/// Build the notifier described by `config`.
pub fn from_config(config: &NotifyConfig) -> Result<Box<dyn Notifier>, SinkError> {
    match &config.url {
        Some(url) => Ok(Box::new(HttpNotifier::new(
            url.clone(),
            config.voice_id.clone(),
            Duration::from_millis(config.timeout_ms),
        )?)),
        None => Ok(Box::new(NullNotifier)),
    }
}
