use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Text returned for `GET /`, which never reaches the pipeline.
pub const METHOD_NOT_ALLOWED: &str = "GET method not allowed, use POST";

const EPHEMERAL: &str = "ephemeral";

/// Reply body understood by the chat platform's slash commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub icon_url: String,
    pub response_type: String,
    pub text: String,
    pub username: String,
}

impl CommandResponse {
    /// A reply only the invoking user sees, signed with the configured identity.
    pub fn ephemeral(config: &Config, text: impl Into<String>) -> Self {
        Self {
            icon_url: config.icon_url.clone(),
            response_type: EPHEMERAL.to_string(),
            text: text.into(),
            username: config.username.clone(),
        }
    }
}
