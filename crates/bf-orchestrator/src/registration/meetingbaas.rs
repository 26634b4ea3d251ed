//! Meeting BaaS bot registration
//!
//! Registering an instance creates a bot that joins the meeting and streams
//! audio to and from the instance's tunnel over WebSocket.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use bf_core::config::{RegistrationConfig, API_KEY_ENV};
use bf_core::error::{ConfigError, RegistrationError};
use bf_core::traits::{RegistrationId, RegistrationRequest, Registrar};

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-meeting-baas-api-key";

/// Seconds a bot waits in a waiting room before giving up
const WAITING_ROOM_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
struct CreatedBot {
    bot_id: Value,
}

/// JSON body for `POST /bots`
pub fn build_request_body(request: &RegistrationRequest, deduplication_key: &str) -> Value {
    let streaming = request.streaming_url();
    json!({
        "meeting_url": request.meeting_url,
        "bot_name": request.bot_name,
        "recording_mode": "speaker_view",
        "bot_image": request.bot_image,
        "entry_message": request.entry_message,
        "reserved": true,
        "speech_to_text": { "provider": "Default" },
        "automatic_leave": { "waiting_room_timeout": WAITING_ROOM_TIMEOUT_SECS },
        "deduplication_key": deduplication_key,
        "streaming": { "input": streaming, "output": streaming },
    })
}

/// HTTP client for the Meeting BaaS bots API
pub struct MeetingBaasClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl MeetingBaasClient {
    pub fn new(config: &RegistrationConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingField(API_KEY_ENV.into()))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn bots_url(&self) -> String {
        format!("{}/bots", self.api_base)
    }
}

#[async_trait]
impl Registrar for MeetingBaasClient {
    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationId, RegistrationError> {
        let deduplication_key = uuid::Uuid::new_v4().to_string();
        let body = build_request_body(request, &deduplication_key);

        tracing::info!("Creating bot with name: {}", request.bot_name);
        tracing::debug!("Bot configuration: {}", body);

        let response = self
            .http
            .post(self.bots_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RegistrationError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RegistrationError::Request(e.to_string()))?;

        if status != StatusCode::OK {
            return Err(RegistrationError::Service {
                status: status.as_u16(),
                body: text,
            });
        }

        let created: CreatedBot = serde_json::from_str(&text)
            .map_err(|e| RegistrationError::MalformedResponse(e.to_string()))?;
        let bot_id = match created.bot_id {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(RegistrationError::MalformedResponse(format!(
                    "unexpected bot_id: {}",
                    other
                )))
            }
        };

        tracing::info!("Bot created with ID: {}", bot_id);
        Ok(RegistrationId(bot_id))
    }

    async fn deregister(&self, id: &RegistrationId) -> Result<(), RegistrationError> {
        tracing::info!("Deleting bot {}", id);

        let response = self
            .http
            .delete(format!("{}/{}", self.bots_url(), id))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| RegistrationError::Request(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistrationError::Service {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Bot {} deleted", id);
        Ok(())
    }
}
