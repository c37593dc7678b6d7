use std::collections::BTreeMap;

use crate::text::decode;

/// One line of the status player list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPlayer {
    pub score: String,
    pub ping: String,
    /// Name with in-game formatting removed.
    pub name: String,
}

/// Server status as obtained by [crate::rcon::RconClient::get_status].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    /// Server variables from the first status line, e.g. `hostname`, `mapname`, `elim`.
    pub vars: BTreeMap<String, String>,
    pub players: Vec<StatusPlayer>,
}

impl ServerStatus {
    /// Parses the payload of a status reply (everything after the `print` line).
    ///
    /// The first line is `\key\value\key\value...`, every following non-empty line is
    /// `<score> <ping> "<name>"`.
    pub fn parse(payload: &str) -> ServerStatus {
        let mut lines = payload.split('\n');
        let variables = lines.next().unwrap_or_default();

        let mut items = variables.split('\\').skip(1);
        let mut vars = BTreeMap::new();
        while let Some(key) = items.next() {
            vars.insert(key.to_string(), items.next().unwrap_or_default().to_string());
        }

        let players = lines
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let cleaned = decode(line);
                let mut parts = cleaned.splitn(3, ' ');
                let score = parts.next()?;
                let ping = parts.next()?;
                let name = parts.next()?;
                let name = name.strip_prefix('"').and_then(|n| n.strip_suffix('"')).unwrap_or(name);
                Some(StatusPlayer {
                    score: score.to_string(),
                    ping: ping.to_string(),
                    name: name.to_string(),
                })
            })
            .collect();

        ServerStatus { vars, players }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn player_names(&self) -> Vec<String> {
        self.players.iter().map(|p| p.name.clone()).collect()
    }
}
