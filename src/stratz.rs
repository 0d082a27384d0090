use std::sync::Arc;

use anyhow::Result;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::PipelineError;
use crate::fetch::{RetryPolicy, fetch_text};
use crate::http_client::http_client;
use crate::rate_limit::RequestBudget;

const STRATZ_GRAPHQL_URL: &str = "https://api.stratz.com/graphql";

/// Career-level performance Stratz reports for one steam account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub steam_account_id: u64,
    pub match_count: u32,
    pub win_count: u32,
    pub behavior_score: Option<u32>,
    pub imp: Option<f64>,
    pub rank: Option<u32>,
}

impl PerformanceSummary {
    pub fn winrate(&self) -> f64 {
        if self.match_count == 0 {
            0.0
        } else {
            (self.win_count as f64 / self.match_count as f64).clamp(0.0, 1.0)
        }
    }
}

/// Batched performance lookups keyed by steam account id.
pub trait PerformanceSource: Sync {
    /// Largest batch one call accepts.
    fn batch_size(&self) -> usize;

    fn performance(&self, account_ids: &[u64]) -> Result<Vec<PerformanceSummary>, PipelineError>;
}

pub struct StratzClient {
    client: &'static Client,
    api_key: String,
    batch_size: usize,
    retry: RetryPolicy,
    budget: Arc<RequestBudget>,
}

impl StratzClient {
    pub fn new(
        api_key: String,
        batch_size: usize,
        retry: RetryPolicy,
        budget: Arc<RequestBudget>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            batch_size: batch_size.max(1),
            retry,
            budget,
        })
    }
}

impl PerformanceSource for StratzClient {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn performance(&self, account_ids: &[u64]) -> Result<Vec<PerformanceSummary>, PipelineError> {
        if account_ids.is_empty() {
            return Ok(Vec::new());
        }
        let label = format!("stratz players {account_ids:?}");
        if account_ids.len() > self.batch_size {
            return Err(PipelineError::fetch_failed(
                label,
                format!("batch of {} exceeds limit {}", account_ids.len(), self.batch_size),
            ));
        }
        let payload = json!({ "query": players_query(account_ids) });
        let bearer = format!("Bearer {}", self.api_key);
        let body = fetch_text(
            self.client,
            &label,
            |client| {
                client
                    .post(STRATZ_GRAPHQL_URL)
                    .header(CONTENT_TYPE, "application/json")
                    .header(AUTHORIZATION, bearer.as_str())
                    .header("User-Agent", "STRATZ_API")
                    .json(&payload)
            },
            &self.retry,
            &self.budget,
        )?;
        parse_stratz_players_json(&body).map_err(|reason| PipelineError::fetch_failed(label, reason))
    }
}

pub fn players_query(account_ids: &[u64]) -> String {
    let ids = account_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{{ players(steamAccountIds: [{ids}]) {{ steamAccount {{ id }} matchCount winCount behaviorScore performance {{ imp rank }} }} }}"
    )
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<PlayersData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PlayersData {
    #[serde(default)]
    players: Vec<Option<StratzPlayer>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StratzPlayer {
    steam_account: Option<SteamAccount>,
    #[serde(default)]
    match_count: Option<u32>,
    #[serde(default)]
    win_count: Option<u32>,
    #[serde(default)]
    behavior_score: Option<u32>,
    #[serde(default)]
    performance: Option<StratzPerformance>,
}

#[derive(Debug, Deserialize)]
struct SteamAccount {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct StratzPerformance {
    #[serde(default)]
    imp: Option<f64>,
    #[serde(default)]
    rank: Option<u32>,
}

pub fn parse_stratz_players_json(raw: &str) -> Result<Vec<PerformanceSummary>, String> {
    let resp: GraphqlResponse =
        serde_json::from_str(raw.trim()).map_err(|err| format!("invalid stratz json: {err}"))?;
    if !resp.errors.is_empty() {
        let messages = resp
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(format!("graphql errors: {messages}"));
    }
    let Some(data) = resp.data else {
        return Err("graphql response without data".to_string());
    };

    let mut out = Vec::with_capacity(data.players.len());
    for player in data.players.into_iter().flatten() {
        let Some(account) = player.steam_account else {
            continue;
        };
        let match_count = player.match_count.unwrap_or(0);
        let win_count = player.win_count.unwrap_or(0);
        if win_count > match_count {
            return Err(format!(
                "account {} reports {win_count} wins in {match_count} matches",
                account.id
            ));
        }
        out.push(PerformanceSummary {
            steam_account_id: account.id,
            match_count,
            win_count,
            behavior_score: player.behavior_score,
            imp: player.performance.as_ref().and_then(|p| p.imp),
            rank: player.performance.as_ref().and_then(|p| p.rank),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{PerformanceSummary, parse_stratz_players_json, players_query};

    #[test]
    fn query_lists_every_account() {
        let q = players_query(&[27676663, 80266369]);
        assert!(q.contains("steamAccountIds: [27676663, 80266369]"));
        assert!(q.contains("matchCount"));
    }

    #[test]
    fn graphql_errors_fail_the_batch() {
        let raw = r#"{"errors":[{"message":"rate limited"}],"data":null}"#;
        let err = parse_stratz_players_json(raw).unwrap_err();
        assert!(err.contains("rate limited"));
    }

    #[test]
    fn null_players_are_skipped() {
        let raw = r#"{"data":{"players":[null,{"steamAccount":{"id":5},"matchCount":10,"winCount":4}]}}"#;
        let parsed = parse_stratz_players_json(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].steam_account_id, 5);
        assert!((parsed[0].winrate() - 0.4).abs() < 1e-12);
        assert_eq!(parsed[0].imp, None);
    }

    #[test]
    fn empty_record_has_zero_winrate() {
        let p = PerformanceSummary {
            steam_account_id: 1,
            match_count: 0,
            win_count: 0,
            behavior_score: None,
            imp: None,
            rank: None,
        };
        assert_eq!(p.winrate(), 0.0);
    }
}
