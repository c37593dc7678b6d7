//! Resting place for [ServerConfig]

#[cfg(unix)]
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::time::Duration;

use crate::rcon::DEFAULT_TIMEOUT;

/// Default port of Digital Paint: Paintball 2 servers
pub const DEFAULT_PORT: u16 = 27910;

/// Everything needed to watch and administer one server
#[derive(Debug)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub rcon_password: Option<String>,
    /// Console log to follow. Ignored when [Self::pty_master] is set.
    pub log_file: Option<PathBuf>,
    /// Master side of the pty the server process writes its console to
    #[cfg(unix)]
    pub pty_master: Option<OwnedFd>,
    /// Block the `maploaded` nickname on start, so nobody can fake map changes
    pub init_vars: bool,
    /// Also process what is already in the log file
    pub scan_old: bool,
    /// Keep waiting for new lines at end of file; when `false` the run ends at EOF
    pub follow: bool,
    /// Trace every raw log line
    pub debug_lines: bool,
    /// Sleep between polls of an idle log file
    pub poll_interval: Duration,
    pub rcon_timeout: Duration,
}

impl ServerConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ..Self::default()
        }
    }

    /// `hostname:port`, as the RCON client connects to it
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            rcon_password: None,
            log_file: None,
            #[cfg(unix)]
            pty_master: None,
            init_vars: true,
            scan_old: false,
            follow: true,
            debug_lines: false,
            poll_interval: Duration::from_millis(50),
            rcon_timeout: DEFAULT_TIMEOUT,
        }
    }
}
