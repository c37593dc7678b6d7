//! Decoding of console log lines into [Event]s.
//!
//! Lines look like `[HH:MM:SS] <rest>`. Each grammar of [GRAMMARS] is tried in order and every
//! match yields one candidate event; unmatched lines yield nothing.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::DecodeError;
use crate::event::{Event, EventKind};

const TEAM: &str = "(Red|Purple|Blue|Yellow)";

/// One entry of the ordered grammar table.
pub struct Grammar {
    pub kind: EventKind,
    regex: Regex,
    assemble: fn(&Captures) -> Result<Event, DecodeError>,
}

fn grammar(kind: EventKind, body: &str, assemble: fn(&Captures) -> Result<Event, DecodeError>) -> Grammar {
    let regex = Regex::new(&format!(r"^\[\d\d:\d\d:\d\d\] {body}\r?$"))
        .unwrap_or_else(|err| panic!("grammar for {kind} failed to compile: {err}"));
    Grammar { kind, regex, assemble }
}

/// Log grammars in priority order.
pub static GRAMMARS: Lazy<Vec<Grammar>> = Lazy::new(|| vec![
    // [19:54:18] hTml: test
    grammar(EventKind::Chat, r"(?:\[OBS\] |\[ELIM\] )?(.*?): (.*?)", |c| Ok(Event::Chat {
        nick: text(c, 1),
        message: text(c, 2),
    })),
    // [18:54:24] *|ACEBot_1| (Spyder SE) eliminated *|herself| (Spyder SE).
    // [12:25:44] *whoa eliminated herself with a paintgren.
    grammar(EventKind::Elimination,
            r"\*(.*?) (?:\((.*?)\) eliminated \*(.*?) \((.*?)\)\.|eliminated (himself|herself) with a paintgren\.)",
            |c| Ok(match c.get(5) {
                Some(_) => Event::Elimination {
                    killer_nick: text(c, 1),
                    killer_weapon: "paintgren".into(),
                    victim_nick: text(c, 1),
                    victim_weapon: "paintgren".into(),
                    suicide: true,
                },
                None => Event::Elimination {
                    killer_nick: text(c, 1),
                    killer_weapon: text(c, 2),
                    victim_nick: text(c, 3),
                    victim_weapon: text(c, 4),
                    suicide: false,
                },
            })),
    // [19:03:57] *Red's ACEBot_6 revived!
    grammar(EventKind::Respawn, r"\*(.*?)'s (.*?) revived!", |c| Ok(Event::Respawn {
        team: text(c, 1),
        nick: text(c, 2),
    })),
    // [19:03:57] mRokita entered the game (build 41) [127.0.0.1:22345]
    grammar(EventKind::Entrance, r"(.*?) entered the game \((.*?)\) \[(.*?)\]", |c| Ok(Event::Entrance {
        nick: text(c, 1),
        build: text(c, 2),
        addr: text(c, 3),
    })),
    // [18:54:24] *Red's hTml returned the *Blue flag!
    grammar(EventKind::FlagCaptured, r"\*(.*?)'s (.*?) returned the(?: \*(.*?))? flag!", |c| Ok(Event::FlagCaptured {
        team: text(c, 1),
        nick: text(c, 2),
        flag: optional(c, 3),
    })),
    // [19:30:23] *Blue's mRokita earned 3 points for possesion of eliminated teams flag!
    grammar(EventKind::ElimTeamsFlagBonus,
            r"\*(.*?)'s (.*?) earned (\S+) points for possesion of eliminated teams flag!",
            |c| Ok(Event::ElimTeamsFlagBonus {
                team: text(c, 1),
                nick: text(c, 2),
                points: number(c, 3, "points")?,
            })),
    // [10:20:11] Round started...
    grammar(EventKind::RoundStarted, r"Round started\.\.\.", |_| Ok(Event::RoundStarted)),
    // [10:20:11] mRokita switched from *Blue to *Red.
    // [10:20:11] mRokita joined the *Red team.
    // [10:20:11] mRokita is now observing.
    grammar(EventKind::TeamSwitched,
            &format!(r"(?:(.*?) switched from \*?{TEAM} to \*?{TEAM}\.|(.*?) joined the \*?{TEAM} team\.|(.*?) is now observing\.)"),
            |c| Ok(if c.get(1).is_some() {
                Event::TeamSwitched { nick: text(c, 1), old_team: optional(c, 2), new_team: text(c, 3) }
            } else if c.get(4).is_some() {
                Event::TeamSwitched { nick: text(c, 4), old_team: Some("Observer".into()), new_team: text(c, 5) }
            } else {
                Event::TeamSwitched { nick: text(c, 6), old_team: None, new_team: "Observer".into() }
            })),
    // [10:20:11] 0:00 left in match.
    // [10:20:11] Blue:3,Red:5
    grammar(EventKind::GameEnded,
            &format!(r"(?:0:00 left in match\.|({TEAM}:\d+(?:,{TEAM}:\d+)*))"),
            |c| Ok(parse_game_summary(c.get(1).map_or("", |m| m.as_str())))),
    // [10:20:11] == Map Loaded: airtime ==
    grammar(EventKind::MapChanged, r"== Map Loaded: (.+) ==", |c| Ok(Event::MapChanged {
        mapname: text(c, 1),
    })),
    // [19:54:54] name1 changed name to name2.
    grammar(EventKind::NameChanged, r"(.*?) changed name to (.*?)\.", |c| Ok(Event::NameChanged {
        old_nick: text(c, 1),
        new_nick: text(c, 2),
    })),
    // [19:03:57] whoa disconnected.
    grammar(EventKind::Disconnected, r"(.*?) disconnected\.", |c| Ok(Event::Disconnected {
        nick: text(c, 1),
    })),
    // [19:03:57] *whoa got the *Red flag!
    grammar(EventKind::FlagGrabbed, r"\*(.*?) got the(?: \*(.*?))? flag!", |c| Ok(Event::FlagGrabbed {
        nick: text(c, 1),
        flag: optional(c, 2),
    })),
    // [19:03:57] *whoa dropped the flag!
    grammar(EventKind::FlagDropped, r"\*(.*?) dropped the flag!", |c| Ok(Event::FlagDropped {
        nick: text(c, 1),
    })),
    // [14:38:50] Blue team wins the round!
    grammar(EventKind::RoundEnded, r"(.*?) team wins the round!", |c| Ok(Event::RoundEnded {
        team: text(c, 1),
    })),
    // [14:38:50] === Team Flag CTF ===
    grammar(EventKind::GameModeAnnounced,
            r"=== (Deathmatch|Team Flag CTF|Single Flag CTF|Team Siege|Team Elim|Team Deathmatch|Team KOTH|Pong) ===",
            |c| Ok(Event::GameModeAnnounced { gamemode: text(c, 1) })),
]);

/// Tries every grammar against `line`, returning one result per matching grammar, in table order.
pub fn decode_line(line: &str) -> Vec<Result<Event, DecodeError>> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    GRAMMARS.iter()
        .filter_map(|grammar| grammar.regex.captures(line).map(|captures| (grammar.assemble)(&captures)))
        .collect()
}

/// Builds a [Event::GameEnded] out of `Team:score` pairs separated by commas.
/// Teams that are not mentioned get no score.
pub fn parse_game_summary(summary: &str) -> Event {
    let (mut score_blue, mut score_red, mut score_yellow, mut score_purple) = (None, None, None, None);
    for (team, score) in summary.split(',').filter_map(|pair| pair.split_once(':')) {
        let slot = match team.trim() {
            "Blue" => &mut score_blue,
            "Red" => &mut score_red,
            "Yellow" => &mut score_yellow,
            "Purple" => &mut score_purple,
            _ => continue,
        };
        *slot = Some(score.trim().to_string());
    }
    Event::GameEnded { score_blue, score_red, score_yellow, score_purple }
}

fn text(captures: &Captures, group: usize) -> String {
    captures.get(group).map_or_else(String::new, |m| m.as_str().to_string())
}

fn optional(captures: &Captures, group: usize) -> Option<String> {
    captures.get(group)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(captures: &Captures, group: usize, field: &'static str) -> Result<i64, DecodeError> {
    let observed = text(captures, group);
    observed.parse()
        .map_err(|_| DecodeError::UnparseableNumber { field, observed })
}
