//! Async toolkit for watching and administering [Digital Paint: Paintball 2](https://dplogin.com) servers.
//!
//! Console log lines are decoded into typed [event::Event]s and routed by a
//! [dispatch::Dispatcher] to one handler per kind and to one-shot waiters. Commands go out
//! over the server's UDP remote console through [rcon::RconClient].
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod packet;
pub mod parse;
pub mod player;
pub mod rcon;
pub mod server;
pub mod source;
pub mod status;
pub mod text;

pub use config::ServerConfig;
pub use dispatch::{Dispatcher, Matcher};
pub use event::{Event, EventKind, Value};
pub use rcon::RconClient;
pub use server::Server;
