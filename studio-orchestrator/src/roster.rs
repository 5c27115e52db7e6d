//! Participant roster: identifier to team assignment.

use crate::error::{OrchestratorError, Result};
use crate::naming::username_of;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("Email regex should compile - static pattern")
});

/// Team assignment. Numeric labels are normalized to `Number` so values that
/// went through a text-only store compare equal to the originals.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Team {
    Number(u64),
    Label(String),
}

impl Team {
    pub fn normalized(self) -> Self {
        match self {
            Team::Label(label) => match label.trim().parse::<u64>() {
                Ok(number) => Team::Number(number),
                Err(_) => Team::Label(label),
            },
            number => number,
        }
    }
}

impl From<u64> for Team {
    fn from(number: u64) -> Self {
        Team::Number(number)
    }
}

impl From<&str> for Team {
    fn from(label: &str) -> Self {
        Team::Label(label.to_string()).normalized()
    }
}

impl From<String> for Team {
    fn from(label: String) -> Self {
        Team::Label(label).normalized()
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Number(n) => write!(f, "{n}"),
            Team::Label(label) => f.write_str(label),
        }
    }
}

/// A roster member with its derived username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub username: String,
    pub team: Team,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    members: BTreeMap<String, Team>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, participant: impl Into<String>, team: impl Into<Team>) {
        self.members
            .insert(participant.into(), team.into().normalized());
    }

    pub fn get(&self, participant: &str) -> Option<&Team> {
        self.members.get(participant)
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.members.contains_key(participant)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Team)> {
        self.members.iter()
    }

    /// Resolve usernames for every member, rejecting identifiers that yield
    /// an empty username and distinct identifiers that share one.
    pub fn participants(&self) -> Result<Vec<Participant>> {
        let mut by_username: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        let mut participants = Vec::with_capacity(self.members.len());

        for (id, team) in &self.members {
            let username = username_of(id);
            if username.is_empty() {
                return Err(OrchestratorError::InvalidInput(format!(
                    "participant '{id}' does not yield a usable username"
                )));
            }
            by_username.entry(username.clone()).or_default().push(id);
            participants.push(Participant {
                id: id.clone(),
                username,
                team: team.clone(),
            });
        }

        if let Some((username, identifiers)) = by_username.into_iter().find(|(_, ids)| ids.len() > 1)
        {
            return Err(OrchestratorError::NameCollision {
                username,
                identifiers: identifiers.into_iter().map(str::to_string).collect(),
            });
        }

        Ok(participants)
    }

    /// Check every identifier looks like an email address.
    pub fn validate_emails(&self) -> Result<()> {
        match self.members.keys().find(|id| !EMAIL_REGEX.is_match(id)) {
            Some(id) => Err(OrchestratorError::InvalidInput(format!(
                "{id} is not a valid email address"
            ))),
            None => Ok(()),
        }
    }
}

impl<K, T> FromIterator<(K, T)> for Roster
where
    K: Into<String>,
    T: Into<Team>,
{
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut roster = Roster::new();
        for (participant, team) in iter {
            roster.insert(participant, team);
        }
        roster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_normalization() {
        assert_eq!(Team::from("7"), Team::Number(7));
        assert_eq!(Team::from(" 7 "), Team::Number(7));
        assert_eq!(Team::from("red"), Team::Label("red".to_string()));
        assert_eq!(Team::Label("12".into()).normalized(), Team::from(12u64));
    }

    #[test]
    fn test_team_serde_is_untagged() {
        assert_eq!(serde_json::to_string(&Team::Number(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Team::from("blue")).unwrap(), "\"blue\"");
        let team: Team = serde_json::from_str("3").unwrap();
        assert_eq!(team, Team::Number(3));
    }

    #[test]
    fn test_participants_derive_usernames() {
        let roster: Roster = [("alice@example.com", 1u64), ("bob.jones@example.com", 2)]
            .into_iter()
            .collect();
        let participants = roster.participants().unwrap();
        let usernames: Vec<_> = participants.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(usernames, vec!["alice", "bobjones"]);
    }

    #[test]
    fn test_collision_detected() {
        let roster: Roster = [
            ("alice.smith@example.com", 1u64),
            ("alicesmith@example.org", 1),
            ("carol@example.com", 2),
        ]
        .into_iter()
        .collect();

        match roster.participants() {
            Err(OrchestratorError::NameCollision {
                username,
                identifiers,
            }) => {
                assert_eq!(username, "alicesmith");
                assert_eq!(
                    identifiers,
                    vec!["alice.smith@example.com", "alicesmith@example.org"]
                );
            }
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[test]
    fn test_distinct_local_parts_do_not_collide() {
        let roster: Roster = [("alice@example.com", 1u64), ("alice.smith@example.com", 1)]
            .into_iter()
            .collect();
        assert_eq!(roster.participants().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_username_rejected() {
        let mut roster = Roster::new();
        roster.insert("...@example.com", 1u64);
        assert!(matches!(
            roster.participants(),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_emails() {
        let mut roster = Roster::new();
        roster.insert("alice@example.com", 1u64);
        assert!(roster.validate_emails().is_ok());

        roster.insert("not-an-email", 1u64);
        assert!(roster.validate_emails().is_err());
    }
}
