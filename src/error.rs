use std::io;

use thiserror::Error;
use tokio::time::error::Elapsed;

/// Errors raised by the RCON transport and the commands built on top of it.
#[derive(Debug, Error)]
pub enum RconError {
    #[error("failed to bind a local UDP port: {0}")]
    FailedPortBind(io::Error),
    #[error("server is unreachable: {0}")]
    UnreachableHost(io::Error),
    #[error("failed to send packet: {0}")]
    SendError(io::Error),
    #[error("failed to receive packet: {0}")]
    ReceiveError(io::Error),
    #[error("timed out waiting for the server")]
    Timeout(#[from] Elapsed),
    #[error("unknown packet header {0:#x}")]
    UnknownPacketHeader(i32),
    #[error("reply too short to carry a packet header ({0} bytes)")]
    TruncatedPacket(usize),
    #[error("bad rcon password")]
    BadPassword,
    #[error("no rcon password configured")]
    NoPassword,
    #[error("cvar `{0}` does not exist")]
    UnknownCvar(String),
    #[error("unexpected reply to `{command}`: {reply:?}")]
    UnexpectedReply { command: String, reply: String },
    #[error("no player named `{0}` is in game")]
    MissingPlayer(String),
    #[error("bad message template: {0}")]
    Template(#[from] TemplateError),
}

/// A line matched a grammar but one of its fields could not be converted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("field `{field}` is not a number: {observed:?}")]
    UnparseableNumber { field: &'static str, observed: String },
}

/// Why a [crate::dispatch::Dispatcher::wait_for] call produced no event.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("waiter was cancelled before an event arrived")]
    Cancelled,
    #[error("event kind `{kind}` has no field `{field}`")]
    UnknownField { kind: &'static str, field: String },
    #[error("waiter check failed: {0}")]
    Check(Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder `{{{0}}}`")]
    UnknownPlaceholder(String),
    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),
}

/// Errors that stop [crate::server::Server::run].
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("either a log file or a pty master descriptor is required")]
    NoLogSource,
    #[error("log source failed: {0}")]
    Io(#[from] io::Error),
}
