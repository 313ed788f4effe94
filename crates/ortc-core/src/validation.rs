//! Input validation shared by every outbound operation
//!
//! Channel names, application keys, tokens and subchannels may only carry
//! `[A-Za-z0-9_\-:/.]`. Sizes are measured in UTF-8 bytes.

use crate::{Error, Result, MAX_CHANNEL_SIZE, MAX_CONNECTION_METADATA_SIZE};

/// Check that `input` only contains characters the server accepts
pub fn is_valid_input(input: &str) -> bool {
    input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '/' | '.'))
}

/// Check that `input` is an absolute http(s)/ws(s) URL with a host
pub fn is_valid_url(input: &str) -> bool {
    match url::Url::parse(input.trim()) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https" | "ws" | "wss")
                && parsed.host_str().map_or(false, |h| !h.is_empty())
        }
        Err(_) => false,
    }
}

/// Validate a channel name: non-empty, valid characters, at most
/// [`MAX_CHANNEL_SIZE`] bytes.
pub fn validate_channel(channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(Error::InvalidArguments("Channel is null or empty".to_string()));
    }
    if !is_valid_input(channel) {
        return Err(Error::InvalidArguments(
            "Channel has invalid characters".to_string(),
        ));
    }
    check_channel_size(channel)
}

/// Check only the byte budget of a channel name
pub fn check_channel_size(channel: &str) -> Result<()> {
    if channel.len() > MAX_CHANNEL_SIZE {
        return Err(Error::InvalidArguments(format!(
            "Channel size exceeds the limit of {} characters",
            MAX_CHANNEL_SIZE
        )));
    }
    Ok(())
}

/// Check the byte budget of the connection metadata
pub fn check_metadata_size(metadata: &str) -> Result<()> {
    if metadata.len() > MAX_CONNECTION_METADATA_SIZE {
        return Err(Error::InvalidArguments(format!(
            "Connection metadata size exceeds the limit of {} characters",
            MAX_CONNECTION_METADATA_SIZE
        )));
    }
    Ok(())
}

/// Validate a required credential-like field (`what` names it in the error)
pub fn validate_required(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArguments(format!("{} is null or empty", what)));
    }
    if !is_valid_input(value) {
        return Err(Error::InvalidArguments(format!(
            "{} has invalid characters",
            what
        )));
    }
    Ok(())
}

/// Domain pattern a channel is also authorised under.
///
/// `domain:channel` maps to `domain:*`; a channel without `:` (or starting
/// with one) maps to itself.
pub fn domain_pattern(channel: &str) -> String {
    match channel.find(':') {
        Some(index) if index > 0 => format!("{}*", &channel[..=index]),
        _ => channel.to_string(),
    }
}
