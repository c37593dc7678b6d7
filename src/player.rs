use once_cell::sync::Lazy;
use regex::Regex;

static PLAYER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+) \(?(.*?)\)?\] \* (?:OP \d+, )?(.+) \((b\d+)\)")
        .expect("PLAYER_LINE compilation failed")
});

/// A player as listed by `sv players`. Rebuilt on every roster query, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// In-game slot id, used by `kick` and `tban`.
    pub id: u32,
    pub nick: String,
    /// dplogin.com account id, `None` when the player has no account.
    pub dplogin: Option<String>,
    /// Game build, e.g. `b41`.
    pub build: String,
}

/// Parses the reply to `sv players` into [Player]s.
pub fn parse_players(response: &str) -> Vec<Player> {
    PLAYER_LINE.captures_iter(response)
        .filter_map(|captures| Some(Player {
            id: captures[1].parse().ok()?,
            nick: captures[3].to_string(),
            dplogin: Some(captures[2].to_string()).filter(|id| !id.is_empty()),
            build: captures[4].to_string(),
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster() {
        let players = parse_players("0 (12345)] * mRokita (b41)\n3 ] * OP 1, hTml (b40)\n");
        assert_eq!(players, vec![
            Player { id: 0, nick: "mRokita".into(), dplogin: Some("12345".into()), build: "b41".into() },
            Player { id: 3, nick: "hTml".into(), dplogin: None, build: "b40".into() },
        ]);
    }

    #[test]
    fn nothing_to_parse() {
        assert!(parse_players("No players.\n").is_empty());
    }
}
