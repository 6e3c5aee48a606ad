//! Slash command to annotation pipeline.
//!
//! `parse form -> decode payload -> token check -> extract dates ->
//! classify and validate tags -> emptiness checks -> send`, where every
//! step can end the command with a message for the user.

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::grafana::{AnnotationRequest, AnnotationSender, SendError};
use crate::payload::{FormError, IncomingPayload};

/// Tag added to every annotation so its origin is visible in Grafana.
pub const MARKER_TAG: &str = "fyi";

const DATE_PATTERN: &str = r"[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Every way a command can be refused. The `Display` text is what the user sees.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error("Bad token received :: {0}")]
    BadToken(String),
    #[error("Unable to parse time :: {0}")]
    BadTime(String),
    #[error("Unknown tag **{field}**, these tags are available \n - tags: _```{allowed}```_")]
    UnknownTag { field: String, allowed: String },
    #[error("No tag specify, **one** of these tags are mandatory \n - tags: _```{0}```_")]
    NoTag(String),
    #[error("No message specify \n - example: _```/command reboot server #outage```_")]
    NoMessage,
    #[error(transparent)]
    Send(#[from] SendError),
}

/// One whitespace-separated piece of the command text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Tag(&'a str),
    Message(&'a str),
}

/// Any field longer than one byte that contains `#` is a tag; its first
/// character is dropped whether or not that character is the `#`.
pub fn classify(field: &str) -> Field<'_> {
    if field.len() > 1 && field.contains('#') {
        let mut chars = field.chars();
        chars.next();
        Field::Tag(chars.as_str())
    } else {
        Field::Message(field)
    }
}

pub fn tag_is_allowed(tag: &str, allowed: &[String]) -> bool {
    allowed.is_empty() || allowed.iter().any(|t| t == tag)
}

/// Renders a tag list as `[a b c]` for error messages.
fn bracketed(tags: &[String]) -> String {
    format!("[{}]", tags.join(" "))
}

pub fn check_token(payload: &IncomingPayload, config: &Config) -> Result<(), CommandError> {
    if !config.token.is_empty() && config.token != payload.token {
        return Err(CommandError::BadToken(payload.token.clone()));
    }
    Ok(())
}

fn date_regex() -> &'static Regex {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    DATE_RE.get_or_init(|| Regex::new(DATE_PATTERN).expect("date pattern is valid"))
}

/// Start and end of the annotated region, taken from the first two
/// `YYYY-MM-DD HH:MM:SS` stamps in the text (UTC, epoch milliseconds).
pub fn extract_times(text: &str) -> Result<(Option<i64>, Option<i64>), CommandError> {
    let mut times = date_regex().find_iter(text).take(2).map(|m| {
        NaiveDateTime::parse_from_str(m.as_str(), DATE_FORMAT)
            .map(|dt| dt.and_utc().timestamp_millis())
            .map_err(|_| CommandError::BadTime(m.as_str().to_string()))
    });
    let start = times.next().transpose()?;
    let end = times.next().transpose()?;
    Ok((start, end))
}

/// Turn a decoded payload into the annotation to send.
pub fn compose(
    payload: &IncomingPayload,
    config: &Config,
) -> Result<AnnotationRequest, CommandError> {
    let (time, time_end) = extract_times(&payload.text)?;

    let mut tags = vec![MARKER_TAG.to_string(), payload.user_name.clone()];
    let mut words = Vec::new();

    for field in payload.text.split_whitespace() {
        match classify(field) {
            Field::Tag(tag) => {
                if !tag_is_allowed(tag, &config.tags) {
                    return Err(CommandError::UnknownTag {
                        field: field.to_string(),
                        allowed: bracketed(&config.tags),
                    });
                }
                tags.push(tag.to_string());
            }
            Field::Message(word) => words.push(word),
        }
    }

    if tags.len() <= 2 && !config.tags.is_empty() {
        return Err(CommandError::NoTag(bracketed(&config.tags)));
    }
    if words.is_empty() {
        return Err(CommandError::NoMessage);
    }

    Ok(AnnotationRequest {
        text: words.join(" "),
        tags,
        time,
        time_end,
    })
}

async fn run(
    body: &[u8],
    config: &Config,
    sender: &dyn AnnotationSender,
) -> Result<String, CommandError> {
    let payload = IncomingPayload::from_form(body)?;
    debug!(
        "Command from {} in {}: {:?}",
        payload.user_name, payload.channel_name, payload.text
    );

    check_token(&payload, config)?;
    let annotation = compose(&payload, config)?;
    let message = sender.send(&annotation).await?;

    info!(
        "Annotation sent for {} with tags {:?}",
        payload.user_name, annotation.tags
    );
    Ok(message)
}

/// Run one command end to end and return the reply text.
///
/// Failures are not errors at this level: they become the text shown to
/// the user, and are logged with the same wording.
pub async fn process_command(
    body: &[u8],
    config: &Config,
    sender: &dyn AnnotationSender,
) -> String {
    match run(body, config, sender).await {
        Ok(message) => message,
        Err(e) => {
            warn!("{}", e);
            e.to_string()
        }
    }
}
