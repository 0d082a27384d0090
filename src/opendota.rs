use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::error::PipelineError;
use crate::fetch::{RetryPolicy, fetch_text};
use crate::http_client::http_client;
use crate::rate_limit::RequestBudget;

const OPENDOTA_API_BASE: &str = "https://api.opendota.com/api";

/// A player's record on one hero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroStat {
    pub hero_id: u32,
    pub games: u32,
    pub wins: u32,
    /// Unix seconds; 0 when the hero was never played.
    pub last_played: i64,
}

impl HeroStat {
    pub fn winrate(&self) -> f64 {
        if self.games == 0 {
            0.0
        } else {
            self.wins as f64 / self.games as f64
        }
    }

    pub fn last_played_at(&self) -> Option<DateTime<Utc>> {
        if self.last_played <= 0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp(self.last_played, 0)
    }
}

/// Anything that can produce the full per-hero record of a player.
pub trait HeroStatSource: Sync {
    fn hero_stats(&self, player_id: &str) -> Result<Vec<HeroStat>, PipelineError>;
}

pub struct OpenDotaClient {
    client: &'static Client,
    retry: RetryPolicy,
    budget: Arc<RequestBudget>,
}

impl OpenDotaClient {
    pub fn new(retry: RetryPolicy, budget: Arc<RequestBudget>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            retry,
            budget,
        })
    }
}

pub fn player_heroes_url(player_id: &str) -> String {
    format!("{OPENDOTA_API_BASE}/players/{player_id}/heroes")
}

impl HeroStatSource for OpenDotaClient {
    fn hero_stats(&self, player_id: &str) -> Result<Vec<HeroStat>, PipelineError> {
        let url = player_heroes_url(player_id);
        let label = format!("opendota heroes {player_id}");
        let body = fetch_text(
            self.client,
            &label,
            |client| client.get(&url),
            &self.retry,
            &self.budget,
        )?;
        parse_player_heroes_json(&body).map_err(|reason| PipelineError::fetch_failed(label, reason))
    }
}

#[derive(Debug, Deserialize)]
struct OpenDotaHeroRow {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    hero_id: u32,
    #[serde(default)]
    last_played: Option<i64>,
    #[serde(default)]
    games: u32,
    #[serde(default)]
    win: u32,
}

/// Parses `/players/{id}/heroes`. The with/against columns are ignored.
///
/// The whole response is rejected if any row is inconsistent, so callers
/// never see a partial hero set.
pub fn parse_player_heroes_json(raw: &str) -> Result<Vec<HeroStat>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let rows: Vec<OpenDotaHeroRow> =
        serde_json::from_str(trimmed).map_err(|err| format!("invalid heroes json: {err}"))?;

    let mut seen = HashSet::with_capacity(rows.len());
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if row.win > row.games {
            return Err(format!(
                "hero {} reports {} wins in {} games",
                row.hero_id, row.win, row.games
            ));
        }
        if !seen.insert(row.hero_id) {
            return Err(format!("hero {} listed twice", row.hero_id));
        }
        out.push(HeroStat {
            hero_id: row.hero_id,
            games: row.games,
            wins: row.win,
            last_played: row.last_played.unwrap_or(0),
        });
    }
    out.sort_by_key(|h| h.hero_id);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{HeroStat, parse_player_heroes_json, player_heroes_url};

    #[test]
    fn heroes_url_uses_account_id() {
        assert_eq!(
            player_heroes_url("162015739"),
            "https://api.opendota.com/api/players/162015739/heroes"
        );
    }

    #[test]
    fn accepts_string_hero_ids() {
        let raw = r#"[{"hero_id":"14","last_played":1700000000,"games":4,"win":3}]"#;
        let heroes = parse_player_heroes_json(raw).unwrap();
        assert_eq!(
            heroes,
            vec![HeroStat {
                hero_id: 14,
                games: 4,
                wins: 3,
                last_played: 1_700_000_000
            }]
        );
        assert!(heroes[0].last_played_at().is_some());
    }

    #[test]
    fn rejects_more_wins_than_games() {
        let raw = r#"[{"hero_id":1,"games":2,"win":5}]"#;
        assert!(parse_player_heroes_json(raw).is_err());
    }

    #[test]
    fn rejects_duplicate_heroes() {
        let raw = r#"[{"hero_id":1,"games":2,"win":1},{"hero_id":1,"games":3,"win":1}]"#;
        assert!(parse_player_heroes_json(raw).is_err());
    }

    #[test]
    fn never_played_hero_has_zero_winrate() {
        let hero = HeroStat {
            hero_id: 2,
            games: 0,
            wins: 0,
            last_played: 0,
        };
        assert_eq!(hero.winrate(), 0.0);
        assert!(hero.last_played_at().is_none());
    }
}
