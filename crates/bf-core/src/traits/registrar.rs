//! Remote registration traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistrationError;

/// Identifier assigned by the registration service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub String);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to announce one pipeline instance to a meeting
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    /// Meeting the bot should join
    pub meeting_url: String,
    /// Public `https://` URL of the instance's tunnel
    pub public_url: String,
    pub bot_name: String,
    pub bot_image: String,
    pub entry_message: String,
}

impl RegistrationRequest {
    /// WebSocket URL the service streams audio to and from
    pub fn streaming_url(&self) -> String {
        streaming_url(&self.public_url)
    }
}

/// Convert a tunnel's public URL to its WebSocket form
///
/// `https://` becomes `wss://` and `http://` becomes `ws://`; anything else
/// is returned unchanged.
pub fn streaming_url(public_url: &str) -> String {
    if let Some(rest) = public_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = public_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        public_url.to_string()
    }
}

/// Registers pipeline instances with a remote meeting service
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Register an instance and return the service's identifier for it
    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationId, RegistrationError>;

    /// Remove a previous registration
    async fn deregister(&self, id: &RegistrationId) -> Result<(), RegistrationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_url() {
        assert_eq!(streaming_url("https://abc.ngrok.io"), "wss://abc.ngrok.io");
        assert_eq!(
            streaming_url("https://abc.ngrok-free.app/path"),
            "wss://abc.ngrok-free.app/path"
        );
        assert_eq!(streaming_url("http://localhost:4040"), "ws://localhost:4040");
        assert_eq!(streaming_url("wss://already"), "wss://already");
    }
}
