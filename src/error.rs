use std::time::Duration;

use thiserror::Error;

/// A server entry in `servers.json` that failed field validation. Such entries
/// are skipped at load time and never reach the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server '{server}': missing required field '{field}'")]
    MissingField { server: String, field: &'static str },

    #[error("server '{server}': invalid value for '{field}': {reason}")]
    InvalidField {
        server: String,
        field: &'static str,
        reason: String,
    },

    #[error("server '{0}': entry is not an object")]
    NotAnObject(String),
}

/// Failures at the remote-command boundary. Returned unchanged to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Unknown server id, disabled server, or no default server when one was requested.
    #[error("server '{0}' is unknown or disabled")]
    Disabled(String),

    #[error("remote console driver is not available in this build")]
    ProtocolUnavailable,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("command timed out after {0:?}")]
    TimedOut(Duration),
}

/// A roster line that did not yield a usable (name, identity) pair.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("line does not match 'index. name, identity'")]
    Malformed,

    #[error("identity '{0}' is not 32 alphanumeric characters")]
    InvalidIdentity(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("{player} already claimed level {level}")]
    AlreadyClaimed { player: String, level: u32 },

    #[error("no reward is configured for level {0}")]
    NoDefinition(u32),

    #[error("{0} has no valid external identity")]
    InvalidIdentity(String),

    #[error("only {succeeded} of {total} reward commands succeeded")]
    PartialExecution { succeeded: usize, total: usize },

    #[error("a claim for {player} level {level} is already running")]
    InProgress { player: String, level: u32 },

    #[error("account {0} is not linked to a player")]
    NotLinked(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewardError {
    #[error("{player} has not claimed level {level}")]
    NotClaimed { player: String, level: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("player '{0}' has not been seen on any server")]
    UnknownPlayer(String),

    #[error("account id must not be empty")]
    EmptyAccount,
}

/// Failures of player-targeted admin commands.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("player '{0}' has not been seen on any server")]
    UnknownPlayer(String),

    #[error("{0} has no valid external identity")]
    InvalidIdentity(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("server '{0}' not found")]
    UnknownServer(String),

    #[error("server '{0}' is disabled")]
    DisabledServer(String),
}

/// Store I/O failure. Logged by callers; the process keeps running on in-memory state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
