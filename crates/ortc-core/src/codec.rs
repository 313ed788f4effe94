//! ORTC Text Codec
//!
//! Outbound commands are semicolon-joined text:
//! ```text
//! validate;{appKey};{authToken};{subchannel};{sessionId};{metadata}[;{hbTime};{hbFails}]
//! subscribe;{appKey};{authToken};{channel};{hash}
//! unsubscribe;{appKey};{channel}
//! send;{appKey};{authToken};{channel};{hash};{id}_{part}-{total}_{fragment}
//! sendproxy;{appKey};{privateKey};{channel};{id}_{part}-{total}_{fragment}
//! b
//! ```
//!
//! Inbound frames are classified in priority order:
//! ```text
//! o                                      socket open, send validate
//! h                                      heartbeat, ignored
//! a["{"op":"<op>",<args>}"]              operation
//! c[<code>,"<reason>"]                   close
//! a["{"ch":"<channel>","m":"<message>"}"] data
//! ```
//! Every inbound frame has `\"` turned into `"` before matching.

use crate::multipart::Part;
use crate::permissions::Permissions;
use crate::{Error, Result};

/// Operation names sent by the server
pub mod op {
    pub const VALIDATED: &str = "ortc-validated";
    pub const SUBSCRIBED: &str = "ortc-subscribed";
    pub const UNSUBSCRIBED: &str = "ortc-unsubscribed";
    pub const ERROR: &str = "ortc-error";
}

/// Single-character frames
pub const OPEN_FRAME: &str = "o";
pub const HEARTBEAT_ACK_FRAME: &str = "h";
pub const HEARTBEAT_FRAME: &str = "b";

const OPERATION_PREFIX: &str = "a[\"{\"op\":\"";
const OPERATION_SUFFIX: &str = "}\"]";
const DATA_PREFIX: &str = "a[\"{\"ch\":\"";
const DATA_SEPARATOR: &str = "\",\"m\":\"";
const DATA_SUFFIX: &str = "\"}\"]";

// ============================================================================
// OUTBOUND
// ============================================================================

/// Heartbeat parameters appended to the validate command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatParams {
    pub time: u32,
    pub fails: u32,
}

/// Commands the client sends to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Validate {
        app_key: &'a str,
        auth_token: &'a str,
        announcement_sub_channel: &'a str,
        session_id: &'a str,
        metadata: &'a str,
        heartbeat: Option<HeartbeatParams>,
    },
    Subscribe {
        app_key: &'a str,
        auth_token: &'a str,
        channel: &'a str,
        hash: &'a str,
    },
    Unsubscribe {
        app_key: &'a str,
        channel: &'a str,
    },
    Send {
        app_key: &'a str,
        auth_token: &'a str,
        channel: &'a str,
        hash: &'a str,
        part: &'a Part,
    },
    SendProxy {
        app_key: &'a str,
        private_key: &'a str,
        channel: &'a str,
        part: &'a Part,
    },
    Heartbeat,
}

/// Encode a command as a text frame
pub fn encode(command: &Command<'_>) -> String {
    match command {
        Command::Validate {
            app_key,
            auth_token,
            announcement_sub_channel,
            session_id,
            metadata,
            heartbeat,
        } => {
            let mut frame = format!(
                "validate;{};{};{};{};{}",
                app_key, auth_token, announcement_sub_channel, session_id, metadata
            );
            if let Some(hb) = heartbeat {
                frame.push_str(&format!(";{};{}", hb.time, hb.fails));
            }
            frame
        }
        Command::Subscribe {
            app_key,
            auth_token,
            channel,
            hash,
        } => format!("subscribe;{};{};{};{}", app_key, auth_token, channel, hash),
        Command::Unsubscribe { app_key, channel } => {
            format!("unsubscribe;{};{}", app_key, channel)
        }
        Command::Send {
            app_key,
            auth_token,
            channel,
            hash,
            part,
        } => format!(
            "send;{};{};{};{};{}",
            app_key, auth_token, channel, hash, part
        ),
        Command::SendProxy {
            app_key,
            private_key,
            channel,
            part,
        } => format!("sendproxy;{};{};{};{}", app_key, private_key, channel, part),
        Command::Heartbeat => HEARTBEAT_FRAME.to_string(),
    }
}

// ============================================================================
// INBOUND
// ============================================================================

/// Error reported by the server through `ortc-error`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Operation the error refers to (`validate`, `subscribe`, `send_maxsize`...)
    pub op: Option<String>,
    pub channel: Option<String>,
    pub message: String,
}

/// Server operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Validated {
        /// `None` when the server sent no permission object (`"up":null`)
        permissions: Option<Permissions>,
        /// Session expiration in minutes
        session_expiration: Option<u32>,
        /// Server flagged itself busy; the reconnect timer keeps running
        busy: bool,
    },
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    Error(ServerError),
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Socket opened; the client must validate
    Open,
    /// Heartbeat acknowledgement
    Heartbeat,
    Operation(Operation),
    Close {
        code: Option<u16>,
        reason: String,
    },
    /// Channel payload, already un-escaped but possibly a multi-part fragment
    Data {
        channel: String,
        message: String,
    },
}

/// Classify an inbound text frame.
///
/// Returns [`Error::UnknownOperation`] for operation frames with an
/// unrecognised op and [`Error::Protocol`] for anything else that does not
/// parse.
pub fn decode(frame: &str) -> Result<Inbound> {
    if frame == OPEN_FRAME {
        return Ok(Inbound::Open);
    }
    if frame == HEARTBEAT_ACK_FRAME {
        return Ok(Inbound::Heartbeat);
    }

    let text = frame.replace("\\\"", "\"");

    if let Some((name, args)) = split_operation(&text) {
        return decode_operation(name, args, &text).map(Inbound::Operation);
    }

    if let Some(close) = decode_close(&text) {
        return Ok(close);
    }

    if let Some((channel, message)) = split_data(&text) {
        return Ok(Inbound::Data {
            channel: channel.to_string(),
            message: unescape_payload(message),
        });
    }

    Err(Error::Protocol(format!("Unknown message received: {}", frame)))
}

fn split_operation(text: &str) -> Option<(&str, &str)> {
    let body = text
        .strip_prefix(OPERATION_PREFIX)?
        .strip_suffix(OPERATION_SUFFIX)?;
    let name_end = body.find('"')?;
    let name = &body[..name_end];
    let args = body[name_end..].strip_prefix("\",")?;
    if name.is_empty() {
        return None;
    }
    Some((name, args))
}

fn decode_operation(name: &str, args: &str, text: &str) -> Result<Operation> {
    match name {
        op::VALIDATED => decode_validated(args),
        op::SUBSCRIBED => decode_channel_args(args).map(|channel| Operation::Subscribed { channel }),
        op::UNSUBSCRIBED => {
            decode_channel_args(args).map(|channel| Operation::Unsubscribed { channel })
        }
        op::ERROR => decode_error_args(args).map(Operation::Error),
        other => Err(Error::UnknownOperation {
            op: other.to_string(),
            frame: text.to_string(),
        }),
    }
}

fn decode_validated(args: &str) -> Result<Operation> {
    const UP: &str = "\"up\":";
    const SET: &str = ",\"set\":";

    let up_start = args
        .find(UP)
        .ok_or_else(|| Error::Protocol(format!("malformed ortc-validated arguments: {}", args)))?;
    let after_up = &args[up_start + UP.len()..];

    let (up, set) = match after_up.rfind(SET) {
        Some(index) => (&after_up[..index], Some(&after_up[index + SET.len()..])),
        None => (after_up, None),
    };

    let up = up.trim();
    let permissions = if up.is_empty() || up == "null" {
        None
    } else {
        Some(Permissions::parse(up))
    };

    let session_expiration = set
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '}').trim())
        .and_then(|s| s.parse::<u32>().ok());

    Ok(Operation::Validated {
        permissions,
        session_expiration,
        busy: args.contains("busy"),
    })
}

fn decode_channel_args(args: &str) -> Result<String> {
    args.strip_prefix("\"ch\":\"")
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|channel| !channel.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol(format!("malformed channel arguments: {}", args)))
}

fn decode_error_args(args: &str) -> Result<ServerError> {
    let malformed = || Error::Protocol(format!("malformed ortc-error arguments: {}", args));

    let mut body = args
        .strip_prefix("\"ex\":{")
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(malformed)?;

    let mut op = None;
    if let Some(rest) = body.strip_prefix("\"op\":\"") {
        let end = rest.find("\",").ok_or_else(malformed)?;
        op = Some(rest[..end].to_string());
        body = &rest[end + 2..];
    }

    let mut channel = None;
    if let Some(rest) = body.strip_prefix("\"ch\":\"") {
        let end = rest.rfind("\",\"ex\":\"").ok_or_else(malformed)?;
        channel = Some(rest[..end].to_string());
        body = &rest[end + 2..];
    }

    let message = body
        .strip_prefix("\"ex\":\"")
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(malformed)?;

    Ok(ServerError {
        op: op.filter(|o| !o.is_empty()),
        channel: channel.filter(|c| !c.is_empty()),
        message: message.to_string(),
    })
}

fn decode_close(text: &str) -> Option<Inbound> {
    let body = text.strip_prefix('c')?;
    let body = body.strip_prefix('[').unwrap_or(body);
    let body = body.strip_suffix(']').unwrap_or(body);

    let (code, reason) = match body.split_once(',') {
        Some((code, reason)) => (code, reason),
        None => (body, ""),
    };
    if code.is_empty() || code.contains('"') {
        return None;
    }

    Some(Inbound::Close {
        code: code.trim().parse().ok(),
        reason: reason.trim_matches('"').to_string(),
    })
}

fn split_data(text: &str) -> Option<(&str, &str)> {
    let body = text.strip_prefix(DATA_PREFIX)?.strip_suffix(DATA_SUFFIX)?;
    body.split_once(DATA_SEPARATOR)
}

/// Undo the second level of escaping applied to channel payloads.
///
/// `\\\\` becomes `\`, `\\"` becomes `"` and `\\n` becomes a newline;
/// everything else is copied through.
pub fn unescape_payload(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("\\\\\\\\") {
            out.push('\\');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("\\\\\"") {
            out.push('"');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("\\\\n") {
            out.push('\n');
            rest = tail;
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
    }

    out
}
