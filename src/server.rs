//! Resting place for [Server]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, HandlerResult, Matcher};
use crate::error::{DispatchError, ListenError, RconError, WaitError};
use crate::event::{Event, EventKind};
use crate::parse::decode_line;
use crate::rcon::{RconClient, Roster};
use crate::source::LogSource;

/// Nick that would let a player fake `== Map Loaded: ... ==` lines
const SPOOFED_MAP_NICK: &str = "maploaded";

/// A watched Digital Paint: Paintball 2 server.
///
/// Share it behind an [Arc]: one task drives [Server::run] while handlers and other tasks
/// wait for events and send commands.
///
/// ```no_run
/// # async fn f() -> Result<(), Box<dyn std::error::Error>> {
/// use std::sync::Arc;
/// use dpbot::{config::ServerConfig, event::{Event, EventKind}, server::Server};
///
/// let server = Arc::new(Server::new(ServerConfig {
///     rcon_password: Some("hello".into()),
///     log_file: Some("qconsole27910.log".into()),
///     ..ServerConfig::default()
/// }));
/// let rcon = server.rcon().clone();
/// server.on(EventKind::Chat, move |event| {
///     let rcon = rcon.clone();
///     async move {
///         if let Event::Chat { message, .. } = event {
///             if message == "!hi" {
///                 rcon.say("{C}AHi!").await?;
///             }
///         }
///         Ok(())
///     }
/// });
/// server.run().await?;
/// # Ok(()) }
/// ```
pub struct Server {
    config: ServerConfig,
    rcon: RconClient,
    roster: Arc<dyn Roster>,
    dispatcher: Dispatcher,
    alive: AtomicBool,
    stop: watch::Sender<bool>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let rcon = Self::client_for(&config);
        let roster = Arc::new(rcon.clone());
        Self::with_client(config, rcon, roster)
    }

    /// Uses `roster` instead of RCON `sv players` to validate chat lines.
    pub fn with_roster(config: ServerConfig, roster: Arc<dyn Roster>) -> Self {
        let rcon = Self::client_for(&config);
        Self::with_client(config, rcon, roster)
    }

    fn client_for(config: &ServerConfig) -> RconClient {
        RconClient::new(config.address(), config.rcon_password.clone())
            .with_timeout(config.rcon_timeout)
    }

    fn with_client(config: ServerConfig, rcon: RconClient, roster: Arc<dyn Roster>) -> Self {
        let (stop, _) = watch::channel(false);
        Server {
            config,
            rcon,
            roster,
            dispatcher: Dispatcher::new(),
            alive: AtomicBool::new(false),
            stop,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rcon(&self) -> &RconClient {
        &self.rcon
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Replaces the handler for `kind`, see [Dispatcher::register].
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.dispatcher.register(kind, handler);
    }

    /// Like [Server::on], naming the kind as in `"elimination"` or `"flag_grabbed"`.
    pub fn on_named<F, Fut>(&self, kind: &str, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.dispatcher.register_named(kind, handler)
    }

    /// True while [Server::run] is reading the log.
    pub fn is_listening(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Makes the current [Server::run] return after the line it is processing. During
    /// start-up it returns before reading any line.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Reads the log until [Server::stop] is called or the source ends.
    ///
    /// Fails before reading anything when neither a log file nor a pty is configured.
    /// Pending waiters are cancelled when this returns.
    pub async fn run(&self) -> Result<(), ListenError> {
        self.stop.send_replace(false);
        let mut stop = self.stop.subscribe();

        let mut source = LogSource::open(&self.config).await?;

        if self.config.init_vars && self.rcon.has_password() {
            tokio::select! {
                _ = stopped(&mut stop) => {},
                outcome = self.block_spoofed_map_nick() => if let Err(err) = outcome {
                    warn!("couldn't update sv_blockednames: {err}");
                },
            }
        }

        self.dispatcher.reopen();
        self.alive.store(true, Ordering::SeqCst);
        info!("listening to {}", self.config.address());

        let result = loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break Ok(()),
                line = source.next_line() => match line {
                    Ok(Some(line)) => {
                        self.process_line(&line).await;
                        tokio::task::yield_now().await;
                    },
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(ListenError::Io(err)),
                },
            }
        };

        drop(source);
        self.alive.store(false, Ordering::SeqCst);
        self.dispatcher.shutdown();
        info!("stopped listening to {}", self.config.address());
        result
    }

    /// Decodes one log line and dispatches its events.
    ///
    /// A chat line only counts when its nick is in game; otherwise the remaining grammars get
    /// their chance, so console text dressed up as chat can't be spoofed.
    pub async fn process_line(&self, line: &str) {
        if self.config.debug_lines {
            trace!("{line}");
        }
        for decoded in decode_line(line) {
            match decoded {
                Ok(Event::Chat { nick, message }) => {
                    if self.in_game(&nick).await {
                        self.dispatcher.dispatch(Event::Chat { nick, message });
                        return;
                    }
                    debug!("ignoring chat-like line from unknown nick {nick:?}");
                }
                Ok(event) => self.dispatcher.dispatch(event),
                Err(err) => warn!("dropping event of {line:?}: {err}"),
            }
        }
    }

    async fn in_game(&self, nick: &str) -> bool {
        match self.roster.players().await {
            Ok(players) => players.iter().any(|p| p.nick == nick),
            Err(err) => {
                warn!("couldn't fetch the roster: {err}");
                false
            }
        }
    }

    async fn block_spoofed_map_nick(&self) -> Result<(), RconError> {
        let blocked = self.rcon.get_cvar("sv_blockednames").await?;
        if blocked.split(',').any(|nick| nick == SPOOFED_MAP_NICK) {
            return Ok(());
        }
        let value = if blocked.is_empty() {
            SPOOFED_MAP_NICK.to_string()
        } else {
            format!("{blocked},{SPOOFED_MAP_NICK}")
        };
        self.rcon.set_cvar("sv_blockednames", &value).await?;
        Ok(())
    }

    /// Waits for an event of `kind` accepted by `matcher`; `Ok(None)` on timeout.
    pub async fn wait_for(&self, kind: EventKind, matcher: Matcher, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        self.dispatcher.wait_for(kind, matcher, timeout).await
    }

    pub async fn wait_for_message(&self, nick: Option<&str>, message: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("nick", nick)
            .field_opt("message", message);
        self.wait_for(EventKind::Chat, matcher, timeout).await
    }

    pub async fn wait_for_elim(&self, killer_nick: Option<&str>, killer_weapon: Option<&str>, victim_nick: Option<&str>,
                               victim_weapon: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("killer_nick", killer_nick)
            .field_opt("killer_weapon", killer_weapon)
            .field_opt("victim_nick", victim_nick)
            .field_opt("victim_weapon", victim_weapon);
        self.wait_for(EventKind::Elimination, matcher, timeout).await
    }

    pub async fn wait_for_respawn(&self, team: Option<&str>, nick: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("team", team)
            .field_opt("nick", nick);
        self.wait_for(EventKind::Respawn, matcher, timeout).await
    }

    pub async fn wait_for_entrance(&self, nick: Option<&str>, build: Option<&str>, addr: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("nick", nick)
            .field_opt("build", build)
            .field_opt("addr", addr);
        self.wait_for(EventKind::Entrance, matcher, timeout).await
    }

    pub async fn wait_for_flag_captured(&self, team: Option<&str>, nick: Option<&str>, flag: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("team", team)
            .field_opt("nick", nick)
            .field_opt("flag", flag);
        self.wait_for(EventKind::FlagCaptured, matcher, timeout).await
    }

    pub async fn wait_for_flag_grab(&self, nick: Option<&str>, flag: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("nick", nick)
            .field_opt("flag", flag);
        self.wait_for(EventKind::FlagGrabbed, matcher, timeout).await
    }

    pub async fn wait_for_flag_drop(&self, nick: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        self.wait_for(EventKind::FlagDropped, Matcher::new().field_opt("nick", nick), timeout).await
    }

    pub async fn wait_for_elim_teams_flag(&self, team: Option<&str>, nick: Option<&str>, points: Option<i64>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("team", team)
            .field_opt("nick", nick)
            .field_opt("points", points);
        self.wait_for(EventKind::ElimTeamsFlagBonus, matcher, timeout).await
    }

    pub async fn wait_for_round_started(&self, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        self.wait_for(EventKind::RoundStarted, Matcher::new(), timeout).await
    }

    pub async fn wait_for_round_end(&self, team: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        self.wait_for(EventKind::RoundEnded, Matcher::new().field_opt("team", team), timeout).await
    }

    pub async fn wait_for_team_switched(&self, nick: Option<&str>, old_team: Option<&str>, new_team: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("nick", nick)
            .field_opt("old_team", old_team)
            .field_opt("new_team", new_team);
        self.wait_for(EventKind::TeamSwitched, matcher, timeout).await
    }

    pub async fn wait_for_game_end(&self, score_blue: Option<&str>, score_red: Option<&str>, score_yellow: Option<&str>,
                                   score_purple: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("score_blue", score_blue)
            .field_opt("score_red", score_red)
            .field_opt("score_yellow", score_yellow)
            .field_opt("score_purple", score_purple);
        self.wait_for(EventKind::GameEnded, matcher, timeout).await
    }

    pub async fn wait_for_mapchange(&self, mapname: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        self.wait_for(EventKind::MapChanged, Matcher::new().field_opt("mapname", mapname), timeout).await
    }

    pub async fn wait_for_namechange(&self, old_nick: Option<&str>, new_nick: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        let matcher = Matcher::new()
            .field_opt("old_nick", old_nick)
            .field_opt("new_nick", new_nick);
        self.wait_for(EventKind::NameChanged, matcher, timeout).await
    }

    pub async fn wait_for_disconnect(&self, nick: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        self.wait_for(EventKind::Disconnected, Matcher::new().field_opt("nick", nick), timeout).await
    }

    pub async fn wait_for_gamemode(&self, gamemode: Option<&str>, timeout: Option<Duration>) -> Result<Option<Event>, WaitError> {
        self.wait_for(EventKind::GameModeAnnounced, Matcher::new().field_opt("gamemode", gamemode), timeout).await
    }
}

/// Resolves once the stop flag is raised, including when it already is.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            // the sender lives as long as the server
            std::future::pending::<()>().await;
        }
    }
}
