//! Typed server events decoded from the console log.

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Every category of log line the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Chat,
    Elimination,
    Respawn,
    Entrance,
    FlagCaptured,
    FlagGrabbed,
    FlagDropped,
    ElimTeamsFlagBonus,
    RoundStarted,
    RoundEnded,
    TeamSwitched,
    GameEnded,
    MapChanged,
    NameChanged,
    Disconnected,
    GameModeAnnounced,
}

impl EventKind {
    /// Field names of this kind's events, in positional order.
    pub fn field_names(self) -> &'static [&'static str] {
        match self {
            EventKind::Chat => &["nick", "message"],
            EventKind::Elimination => &["killer_nick", "killer_weapon", "victim_nick", "victim_weapon", "suicide"],
            EventKind::Respawn => &["team", "nick"],
            EventKind::Entrance => &["nick", "build", "addr"],
            EventKind::FlagCaptured => &["team", "nick", "flag"],
            EventKind::FlagGrabbed => &["nick", "flag"],
            EventKind::FlagDropped => &["nick"],
            EventKind::ElimTeamsFlagBonus => &["team", "nick", "points"],
            EventKind::RoundStarted => &[],
            EventKind::RoundEnded => &["team"],
            EventKind::TeamSwitched => &["nick", "old_team", "new_team"],
            EventKind::GameEnded => &["score_blue", "score_red", "score_yellow", "score_purple"],
            EventKind::MapChanged => &["mapname"],
            EventKind::NameChanged => &["old_nick", "new_nick"],
            EventKind::Disconnected => &["nick"],
            EventKind::GameModeAnnounced => &["gamemode"],
        }
    }
}

/// A single field value, as seen by waiter filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Option<String>> for Value {
    fn from(text: Option<String>) -> Self {
        text.map_or(Value::Null, Value::Text)
    }
}

/// A decoded server event. Optional fields are `None` when the line did not carry them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Chat { nick: String, message: String },
    Elimination { killer_nick: String, killer_weapon: String, victim_nick: String, victim_weapon: String, suicide: bool },
    Respawn { team: String, nick: String },
    Entrance { nick: String, build: String, addr: String },
    FlagCaptured { team: String, nick: String, flag: Option<String> },
    FlagGrabbed { nick: String, flag: Option<String> },
    FlagDropped { nick: String },
    ElimTeamsFlagBonus { team: String, nick: String, points: i64 },
    RoundStarted,
    RoundEnded { team: String },
    /// `old_team` is `None` when a player starts observing.
    TeamSwitched { nick: String, old_team: Option<String>, new_team: String },
    /// Scores are `None` for teams absent from the match.
    GameEnded { score_blue: Option<String>, score_red: Option<String>, score_yellow: Option<String>, score_purple: Option<String> },
    MapChanged { mapname: String },
    NameChanged { old_nick: String, new_nick: String },
    Disconnected { nick: String },
    GameModeAnnounced { gamemode: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Chat { .. } => EventKind::Chat,
            Event::Elimination { .. } => EventKind::Elimination,
            Event::Respawn { .. } => EventKind::Respawn,
            Event::Entrance { .. } => EventKind::Entrance,
            Event::FlagCaptured { .. } => EventKind::FlagCaptured,
            Event::FlagGrabbed { .. } => EventKind::FlagGrabbed,
            Event::FlagDropped { .. } => EventKind::FlagDropped,
            Event::ElimTeamsFlagBonus { .. } => EventKind::ElimTeamsFlagBonus,
            Event::RoundStarted => EventKind::RoundStarted,
            Event::RoundEnded { .. } => EventKind::RoundEnded,
            Event::TeamSwitched { .. } => EventKind::TeamSwitched,
            Event::GameEnded { .. } => EventKind::GameEnded,
            Event::MapChanged { .. } => EventKind::MapChanged,
            Event::NameChanged { .. } => EventKind::NameChanged,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::GameModeAnnounced { .. } => EventKind::GameModeAnnounced,
        }
    }

    /// Field values in the order given by [EventKind::field_names].
    pub fn values(&self) -> Vec<Value> {
        match self.clone() {
            Event::Chat { nick, message } => vec![nick.into(), message.into()],
            Event::Elimination { killer_nick, killer_weapon, victim_nick, victim_weapon, suicide } =>
                vec![killer_nick.into(), killer_weapon.into(), victim_nick.into(), victim_weapon.into(), suicide.into()],
            Event::Respawn { team, nick } => vec![team.into(), nick.into()],
            Event::Entrance { nick, build, addr } => vec![nick.into(), build.into(), addr.into()],
            Event::FlagCaptured { team, nick, flag } => vec![team.into(), nick.into(), flag.into()],
            Event::FlagGrabbed { nick, flag } => vec![nick.into(), flag.into()],
            Event::FlagDropped { nick } => vec![nick.into()],
            Event::ElimTeamsFlagBonus { team, nick, points } => vec![team.into(), nick.into(), points.into()],
            Event::RoundStarted => vec![],
            Event::RoundEnded { team } => vec![team.into()],
            Event::TeamSwitched { nick, old_team, new_team } => vec![nick.into(), old_team.into(), new_team.into()],
            Event::GameEnded { score_blue, score_red, score_yellow, score_purple } =>
                vec![score_blue.into(), score_red.into(), score_yellow.into(), score_purple.into()],
            Event::MapChanged { mapname } => vec![mapname.into()],
            Event::NameChanged { old_nick, new_nick } => vec![old_nick.into(), new_nick.into()],
            Event::Disconnected { nick } => vec![nick.into()],
            Event::GameModeAnnounced { gamemode } => vec![gamemode.into()],
        }
    }

    /// Named view of the fields.
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        self.kind().field_names().iter().copied().zip(self.values()).collect()
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields().into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn kind_names() {
        assert_eq!(EventKind::FlagGrabbed.to_string(), "flag_grabbed");
        assert_eq!("elim_teams_flag_bonus".parse::<EventKind>(), Ok(EventKind::ElimTeamsFlagBonus));
        assert!("flag_grab".parse::<EventKind>().is_err());
        assert_eq!(EventKind::iter().count(), 16);
    }

    #[test]
    fn fields_follow_names() {
        let event = Event::TeamSwitched { nick: "mRokita".into(), old_team: None, new_team: "Observer".into() };
        assert_eq!(event.fields(), vec![
            ("nick", Value::from("mRokita")),
            ("old_team", Value::Null),
            ("new_team", Value::from("Observer")),
        ]);
        assert_eq!(event.field("new_team"), Some(Value::from("Observer")));
        assert_eq!(event.field("team"), None);
        assert!(Event::RoundStarted.fields().is_empty());
    }
}
