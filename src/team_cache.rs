use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::table_io::write_atomically;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRecord {
    pub team_id: String,
    pub name: String,
    pub tag: String,
    pub player_ids: BTreeSet<String>,
}

/// On-disk shape: `{"<team id>": {"id", "name", "tag", "players": [..]}}`.
/// Entries are keyed by `id` once loaded; the map key only fills in a blank
/// `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TeamEntry {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    players: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TeamCache {
    teams: BTreeMap<String, TeamRecord>,
}

impl TeamCache {
    /// A missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).with_context(|| format!("open {}", path.display())),
        };
        Self::from_json(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let entries: BTreeMap<String, TeamEntry> =
            serde_json::from_str(raw).context("invalid team cache json")?;
        let teams = entries
            .into_iter()
            .map(|(key, entry)| {
                let team_id = if entry.id.trim().is_empty() {
                    key
                } else {
                    entry.id
                };
                let record = TeamRecord {
                    team_id,
                    name: entry.name,
                    tag: entry.tag,
                    player_ids: entry.players.iter().map(u64::to_string).collect(),
                };
                (record.team_id.clone(), record)
            })
            .collect();
        Ok(Self { teams })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = self
            .teams
            .iter()
            .map(|(key, team)| {
                let players = team
                    .player_ids
                    .iter()
                    .filter_map(|id| id.parse::<u64>().ok())
                    .collect();
                (
                    key.clone(),
                    TeamEntry {
                        id: team.team_id.clone(),
                        name: team.name.clone(),
                        tag: team.tag.clone(),
                        players,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        let json = serde_json::to_vec_pretty(&entries).context("serialize team cache")?;
        write_atomically(path, &json)
    }

    pub fn upsert(&mut self, team: TeamRecord) {
        self.teams.insert(team.team_id.clone(), team);
    }

    pub fn get(&self, team_id: &str) -> Option<&TeamRecord> {
        self.teams.get(team_id)
    }

    pub fn team_for_player(&self, player_id: &str) -> Option<&TeamRecord> {
        self.teams
            .values()
            .find(|team| team.player_ids.contains(player_id))
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}
