use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::RconError;
use crate::packet::{RequestPacket, ResponsePacket, MAX_PACKET_SIZE};
use crate::player::{parse_players, Player};
use crate::status::ServerStatus;
use crate::text::render;

/// Default receive timeout of a single exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

static CVAR_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"(.*?)" is "(.*?)""#).expect("CVAR_VALUE compilation failed")
});

/// Source of the live player roster, consulted by the chat filter.
pub trait Roster: Send + Sync {
    fn players(&self) -> BoxFuture<'_, Result<Vec<Player>, RconError>>;
}

/// Stateless UDP client for the server's remote console.
///
/// Each call is a fresh bind/connect/send/receive exchange. Calls made through one client
/// (or its clones) never overlap.
#[derive(Debug, Clone)]
pub struct RconClient {
    host: String,
    password: Option<String>,
    timeout_dur: Duration,
    in_flight: Arc<Mutex<()>>,
}

impl RconClient {
    /// `host` is anything [UdpSocket::connect] accepts, e.g. `127.0.0.1:27910`.
    pub fn new(host: impl Into<String>, password: Option<String>) -> Self {
        RconClient {
            host: host.into(),
            password,
            timeout_dur: DEFAULT_TIMEOUT,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_timeout(mut self, timeout_dur: Duration) -> Self {
        self.timeout_dur = timeout_dur;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Executes a console command and returns the text after the reply's `print` line.
    ///
    /// Example usage:
    /// ```no_run
    /// # async fn f() -> Result<(), dpbot::error::RconError> {
    /// let rcon = dpbot::rcon::RconClient::new("127.0.0.1:27910", Some("hello".into()));
    /// let ips = rcon.send("sv listuserip").await?;
    /// # Ok(()) }
    /// ```
    pub async fn send(&self, command: &str) -> Result<String, RconError> {
        let password = self.password.as_deref().ok_or(RconError::NoPassword)?;
        let reply = self.exchange(RequestPacket::rcon(password, command)).await?;
        if reply.is_bad_password() {
            return Err(RconError::BadPassword);
        }
        Ok(reply.payload().to_string())
    }

    /// Sends the public `status` query and returns the raw payload.
    pub async fn status(&self) -> Result<String, RconError> {
        let reply = self.exchange(RequestPacket::Status).await?;
        Ok(reply.payload().to_string())
    }

    async fn exchange(&self, request: RequestPacket) -> Result<ResponsePacket, RconError> {
        let _guard = self.in_flight.lock().await;

        // just arbitrarily bind any port, doesn't matter really
        let sock: UdpSocket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(RconError::FailedPortBind)?;

        timeout(self.timeout_dur, sock.connect(&self.host))
            .await?
            .map_err(RconError::UnreachableHost)?;

        if let RequestPacket::Rcon { command, .. } = &request {
            debug!("rcon {}: {command}", self.host);
        }
        timeout(self.timeout_dur, sock.send(&request.pack()))
            .await?
            .map_err(RconError::SendError)?;

        let mut resp_buf = [0u8; MAX_PACKET_SIZE];
        let received = timeout(self.timeout_dur, sock.recv(&mut resp_buf))
            .await?
            .map_err(RconError::ReceiveError)?;
        trace!("{received} bytes from {}", self.host);

        ResponsePacket::unpack(&resp_buf[..received])
    }

    /// Parsed server status.
    pub async fn get_status(&self) -> Result<ServerStatus, RconError> {
        Ok(ServerStatus::parse(&self.status().await?))
    }

    /// Player names from the status query; works without a password.
    pub async fn simple_playerlist(&self) -> Result<Vec<String>, RconError> {
        Ok(self.get_status().await?.player_names())
    }

    /// Current roster from `sv players`.
    pub async fn players(&self) -> Result<Vec<Player>, RconError> {
        Ok(parse_players(&self.send("sv players").await?))
    }

    pub async fn player(&self, nick: &str) -> Result<Option<Player>, RconError> {
        Ok(self.players().await?.into_iter().find(|p| p.nick == nick))
    }

    /// True when every nick is currently in game.
    pub async fn nicks_valid(&self, nicks: &[&str]) -> Result<bool, RconError> {
        let players = self.players().await?;
        Ok(nicks.iter().all(|nick| players.iter().any(|p| p.nick == *nick)))
    }

    /// Says a message rendered through [render]. Escape user input with [crate::text::escape].
    pub async fn say(&self, template: &str) -> Result<String, RconError> {
        let message = render(template)?;
        self.send(&format!("say \"{message}\"")).await
    }

    pub async fn cprint(&self, template: &str) -> Result<String, RconError> {
        let message = render(template)?;
        self.send(&format!("sv cprint \"{message}\"")).await
    }

    pub async fn kick(&self, id: u32) -> Result<String, RconError> {
        self.send(&format!("kick {id}")).await
    }

    pub async fn kick_nick(&self, nick: &str) -> Result<String, RconError> {
        let id = self.id_of(nick).await?;
        self.kick(id).await
    }

    /// Temporarily bans a player for `minutes`.
    pub async fn tempoban(&self, id: u32, minutes: u32) -> Result<String, RconError> {
        self.send(&format!("tban {id} {minutes}")).await
    }

    pub async fn tempoban_nick(&self, nick: &str, minutes: u32) -> Result<String, RconError> {
        let id = self.id_of(nick).await?;
        self.tempoban(id, minutes).await
    }

    pub async fn remove_tempobans(&self) -> Result<String, RconError> {
        self.send("removetbans").await
    }

    /// Bans an address (or range) and saves the ban list.
    pub async fn permaban(&self, ip: &str) -> Result<String, RconError> {
        let resp = self.send(&format!("addip {ip}")).await?;
        Ok(resp + "\n" + &self.send("writeban").await?)
    }

    pub async fn remove_permaban(&self, ip: &str) -> Result<String, RconError> {
        let resp = self.send(&format!("removeip {ip}")).await?;
        Ok(resp + "\n" + &self.send("writeban").await?)
    }

    pub async fn set_cvar(&self, var: &str, value: &str) -> Result<String, RconError> {
        self.send(&format!("set {var} \"{value}\"")).await
    }

    pub async fn get_cvar(&self, var: &str) -> Result<String, RconError> {
        let command = format!("\"{var}\"");
        let reply = self.send(&command).await?;
        if reply.starts_with(&format!("Unknown command \"{var}\".")) {
            return Err(RconError::UnknownCvar(var.to_string()));
        }
        match CVAR_VALUE.captures(&reply) {
            Some(captures) if &captures[1] == var => Ok(captures[2].to_string()),
            _ => Err(RconError::UnexpectedReply { command, reply }),
        }
    }

    async fn id_of(&self, nick: &str) -> Result<u32, RconError> {
        self.player(nick).await?
            .map(|p| p.id)
            .ok_or_else(|| RconError::MissingPlayer(nick.to_string()))
    }
}

impl Roster for RconClient {
    fn players(&self) -> BoxFuture<'_, Result<Vec<Player>, RconError>> {
        Box::pin(RconClient::players(self))
    }
}
