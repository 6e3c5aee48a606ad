use serde::Deserialize;
use thiserror::Error;

/// Fields posted by the chat platform's slash command / outgoing webhook.
///
/// Only `token`, `user_name`, `channel_name` and `text` are read; the other
/// webhook fields are accepted so the platform's full payload decodes.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
#[allow(dead_code)]
pub struct IncomingPayload {
    pub token: String,
    pub team_id: String,
    pub team_domain: String,
    pub channel_id: String,
    pub channel_name: String,
    pub timestamp: Option<i64>,
    pub user_id: String,
    pub user_name: String,
    pub post_id: String,
    pub text: String,
    pub trigger_word: String,
    pub file_ids: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum FormError {
    #[error("Unable to parse form :: missing form body")]
    MissingBody,
    #[error("Unable to parse form :: {0}")]
    Malformed(String),
    #[error("Unable to decode struct :: {0}")]
    Decode(String),
}

impl IncomingPayload {
    /// Decode an `application/x-www-form-urlencoded` body.
    ///
    /// The raw body is checked first, so a body that is not a form at all is
    /// told apart from a form whose values don't fit.
    pub fn from_form(body: &[u8]) -> Result<Self, FormError> {
        if body.is_empty() {
            return Err(FormError::MissingBody);
        }
        check_form_syntax(body)?;
        serde_urlencoded::from_bytes(body).map_err(|e| FormError::Decode(e.to_string()))
    }
}

/// `serde_urlencoded` decodes leniently, so bad escapes and `;` separators
/// are rejected here.
fn check_form_syntax(body: &[u8]) -> Result<(), FormError> {
    if body.contains(&b';') {
        return Err(FormError::Malformed(
            "invalid semicolon separator in query".to_string(),
        ));
    }

    let mut i = 0;
    while i < body.len() {
        if body[i] != b'%' {
            i += 1;
            continue;
        }
        let valid = body
            .get(i + 1..i + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            let end = (i + 3).min(body.len());
            return Err(FormError::Malformed(format!(
                "invalid URL escape {:?}",
                String::from_utf8_lossy(&body[i..end])
            )));
        }
        i += 3;
    }
    Ok(())
}
