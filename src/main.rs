use std::path::PathBuf;

use clap::Parser;
use log::{error, info};
use strum::IntoEnumIterator;

use dpbot::{Event, EventKind, Server, ServerConfig};

/// Follows a Digital Paint: Paintball 2 server's console log and reports what happens in game.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address, used for rcon
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[clap(short, long, default_value_t = dpbot::config::DEFAULT_PORT)]
    port: u16,
    /// Rcon password; chat is only reported when the roster can be checked with it
    #[clap(short = 'P', long)]
    password: Option<String>,
    /// Console log written by the server
    #[clap(short, long)]
    log_file: PathBuf,
    /// Process lines already in the log
    #[clap(long)]
    scan_old: bool,
    /// Stop at the end of the log instead of waiting for new lines
    #[clap(long)]
    no_follow: bool,
    /// Don't touch sv_blockednames on start
    #[clap(long)]
    no_init_vars: bool,
    /// Trace every raw log line
    #[clap(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        rcon_password: args.password,
        log_file: Some(args.log_file),
        scan_old: args.scan_old,
        follow: !args.no_follow,
        init_vars: !args.no_init_vars,
        debug_lines: args.debug,
        ..ServerConfig::new(args.host, args.port)
    };
    let server = Server::new(config);

    for kind in EventKind::iter() {
        server.on(kind, report);
    }

    if let Err(err) = server.run().await {
        error!("couldn't follow the log: {err}");
        return Err(err.into());
    }
    Ok(())
}

async fn report(event: Event) -> dpbot::dispatch::HandlerResult {
    let fields = event.fields().into_iter()
        .map(|(name, value)| format!("{name}={value:?}"))
        .collect::<Vec<_>>()
        .join(" ");
    info!("{} {fields}", event.kind());
    Ok(())
}
