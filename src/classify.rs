//! Turns raw remote-console text into a semantic [`Outcome`].
//!
//! Classification is a pure function of the response text and the command that
//! produced it. Rules are applied in a fixed order; the first match wins:
//!
//! 1. vendor-extended success markers (case-insensitive)
//! 2. silent-success sentinels, acknowledged according to the command's intent
//! 3. ordered error patterns (case-insensitive substring)
//! 4. roster text
//! 5. any other text is a plain reply
//!
//! A missing response (`None`) is [`Outcome::Unknown`].

use std::fmt;

/// Substrings emitted by extended console plugins on success.
const VENDOR_MARKERS: &[&str] = &["asa", "helena", "v0.8", "status:", "100%", "(1/1)"];

/// Responses servers send when a command ran but produced no output.
const SILENT_SUCCESS: &[&str] = &[
    "",
    "Server received, But no response!!",
    "Command Processed",
    "OK",
];

/// Checked in order; the first pattern found in the lowercased text decides the kind.
const ERROR_PATTERNS: &[(&str, ErrorKind)] = &[
    ("command not found", ErrorKind::UnknownCommand),
    ("invalid blueprint", ErrorKind::InvalidBlueprint),
    ("player not found", ErrorKind::PlayerNotFound),
    ("permission denied", ErrorKind::PermissionDenied),
    ("timeout", ErrorKind::Timeout),
    ("connection", ErrorKind::Connection),
    ("error", ErrorKind::ServerError),
];

pub const NO_PLAYERS: &str = "No Players Connected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownCommand,
    InvalidBlueprint,
    PlayerNotFound,
    PermissionDenied,
    Timeout,
    Connection,
    ServerError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnknownCommand => "command not recognised",
            ErrorKind::InvalidBlueprint => "invalid blueprint path",
            ErrorKind::PlayerNotFound => "player not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Timeout => "server timeout",
            ErrorKind::Connection => "connection problem",
            ErrorKind::ServerError => "server error",
        };
        f.write_str(s)
    }
}

/// What a silent acknowledgement confirms, inferred from the command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Grant,
    Chat,
    Roster,
    Generic,
}

impl Acknowledgement {
    pub fn for_command(command: &str) -> Self {
        if command.contains("GiveItemToEOSID") || command.contains("hb.givecryotoeosid") {
            Acknowledgement::Grant
        } else if command.contains("ServerChat") || command.contains("Broadcast") {
            Acknowledgement::Chat
        } else if command.contains("ListPlayers") {
            Acknowledgement::Roster
        } else {
            Acknowledgement::Generic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessDetail {
    /// Extended plugin output, carried verbatim.
    Vendor(String),
    /// The server accepted the command silently; `text` is the sentinel it sent.
    Acknowledged { intent: Acknowledgement, text: String },
    /// A player roster; `online` counts roster entries.
    Roster { online: usize },
    /// Any other reply text.
    Reply(String),
}

impl fmt::Display for SuccessDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessDetail::Vendor(text) => write!(f, "extended response: {}", text),
            SuccessDetail::Acknowledged { intent, text } => {
                let what = match intent {
                    Acknowledgement::Grant => "item granted",
                    Acknowledgement::Chat => "message sent",
                    Acknowledgement::Roster => "player list retrieved",
                    Acknowledgement::Generic => "command executed",
                };
                if text.is_empty() {
                    write!(f, "{} (silent acknowledgement)", what)
                } else {
                    write!(f, "{} ({})", what, text)
                }
            }
            SuccessDetail::Roster { online } => write!(f, "{} player(s) online", online),
            SuccessDetail::Reply(text) => write!(f, "{}", text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(SuccessDetail),
    Error { kind: ErrorKind, detail: String },
    Unknown(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(d) => write!(f, "ok: {}", d),
            Outcome::Error { kind, detail } => write!(f, "error ({}): {}", kind, detail),
            Outcome::Unknown(d) => write!(f, "unknown: {}", d),
        }
    }
}

/// Classify a console response. Total and deterministic.
pub fn classify(raw: Option<&str>, command: &str) -> Outcome {
    let Some(raw) = raw else {
        return Outcome::Unknown("no response from server".to_string());
    };
    let text = raw.trim();
    let lower = text.to_lowercase();

    if VENDOR_MARKERS.iter().any(|m| lower.contains(m)) {
        return Outcome::Success(SuccessDetail::Vendor(text.to_string()));
    }

    if SILENT_SUCCESS.contains(&text) {
        return Outcome::Success(SuccessDetail::Acknowledged {
            intent: Acknowledgement::for_command(command),
            text: text.to_string(),
        });
    }

    for (pattern, kind) in ERROR_PATTERNS {
        if lower.contains(pattern) {
            return Outcome::Error {
                kind: *kind,
                detail: text.to_string(),
            };
        }
    }

    if text.contains(NO_PLAYERS) {
        return Outcome::Success(SuccessDetail::Roster { online: 0 });
    }
    let online = text
        .lines()
        .filter(|l| split_roster_line(l).is_some())
        .count();
    if online > 0 {
        return Outcome::Success(SuccessDetail::Roster { online });
    }

    Outcome::Success(SuccessDetail::Reply(text.to_string()))
}

/// Split a roster entry of the shape `<index>. <name>, <word>` into `(name, word)`.
///
/// The index is one or more digits followed by a dot and at least one space;
/// the name runs to the first comma and is trimmed; after the comma and at
/// least one space the leading run of word characters is returned. The word
/// is not validated as an identity here.
pub fn split_roster_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?;
    let after_ws = rest.trim_start();
    if after_ws.len() == rest.len() {
        return None;
    }
    let comma = after_ws.find(',')?;
    let name = after_ws[..comma].trim();
    if name.is_empty() {
        return None;
    }
    let tail = &after_ws[comma + 1..];
    let word_start = tail.trim_start();
    if word_start.len() == tail.len() {
        return None;
    }
    let end = word_start
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(word_start.len());
    if end == 0 {
        return None;
    }
    Some((name, &word_start[..end]))
}
