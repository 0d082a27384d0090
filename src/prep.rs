use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::FetchOptions;
use crate::error::PipelineError;
use crate::opendota::{HeroStat, HeroStatSource};
use crate::player_id::account_id;
use crate::sheets::{PlayerRecord, ROLE_COUNT, SeasonBudget};
use crate::stratz::{PerformanceSource, PerformanceSummary};
use crate::table_io::write_serialized_csv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsStatus {
    /// Hero stats fetched and non-empty.
    Fetched,
    /// Fetched, but the account has no recorded games (new or private).
    Empty,
    /// The fetch failed; hero fields are zero-filled.
    Failed,
    /// The batch was aborted before this player was fetched.
    Skipped,
}

/// One player of one season, joined with whatever external stats exist.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub record: PlayerRecord,
    pub budget: SeasonBudget,
    pub stats_status: StatsStatus,
    pub heroes: Vec<HeroStat>,
    pub performance: Option<PerformanceSummary>,
}

pub struct StatSources<'a> {
    pub heroes: &'a dyn HeroStatSource,
    pub performance: Option<&'a dyn PerformanceSource>,
}

#[derive(Debug, Clone)]
pub struct SeasonStage {
    pub season: String,
    pub rows: Vec<StagedRow>,
    pub failures: Vec<PipelineError>,
    pub aborted: bool,
}

/// Joins every record of a season with its fetched stats.
///
/// Every input record produces exactly one row, in input order. Players
/// whose stats could not be fetched are zero-filled and reported in
/// `failures`. Once `abort_after_failures` fetches have failed the
/// remaining players are staged as `Skipped` without further requests.
pub fn stage_season(
    season: &str,
    records: Vec<PlayerRecord>,
    budget: SeasonBudget,
    sources: &StatSources<'_>,
    options: &FetchOptions,
) -> SeasonStage {
    let failed = AtomicUsize::new(0);
    let aborted = AtomicBool::new(false);
    let threshold = options.abort_after_failures.max(1);

    let fetched: Vec<(StatsStatus, Vec<HeroStat>, Option<PipelineError>)> =
        with_fetch_pool(options.parallelism, || {
            records
                .par_iter()
                .map(|record| {
                    if aborted.load(Ordering::Acquire) {
                        return (
                            StatsStatus::Skipped,
                            Vec::new(),
                            Some(PipelineError::fetch_failed(
                                format!("opendota heroes {}", record.player_id),
                                "skipped after fetch batch was aborted",
                            )),
                        );
                    }
                    match sources.heroes.hero_stats(&record.player_id) {
                        Ok(heroes) if heroes.is_empty() => (StatsStatus::Empty, heroes, None),
                        Ok(heroes) => (StatsStatus::Fetched, heroes, None),
                        Err(err) => {
                            let count = failed.fetch_add(1, Ordering::AcqRel) + 1;
                            if count >= threshold && !aborted.swap(true, Ordering::AcqRel) {
                                warn!(%season, failures = count, "aborting fetch batch");
                            }
                            (StatsStatus::Failed, Vec::new(), Some(err))
                        }
                    }
                })
                .collect()
        });

    let aborted = aborted.into_inner();
    let mut failures = Vec::new();
    let mut performance = HashMap::new();
    if let Some(source) = sources.performance.filter(|_| !aborted) {
        let (found, errors) = fetch_performance(&records, source, options);
        performance = found;
        failures.extend(errors);
    }

    let mut rows = Vec::with_capacity(records.len());
    for (record, (stats_status, heroes, err)) in records.into_iter().zip(fetched) {
        if let Some(err) = err {
            warn!(%season, player_id = %record.player_id, %err, "hero stats unavailable, zero-filling");
            failures.push(err);
        }
        let perf = account_id(&record.player_id)
            .ok()
            .and_then(|id| performance.get(&id).cloned());
        rows.push(StagedRow {
            record,
            budget,
            stats_status,
            heroes,
            performance: perf,
        });
    }

    info!(
        %season,
        players = rows.len(),
        failures = failures.len(),
        aborted,
        "season staged"
    );
    SeasonStage {
        season: season.to_string(),
        rows,
        failures,
        aborted,
    }
}

fn fetch_performance(
    records: &[PlayerRecord],
    source: &dyn PerformanceSource,
    options: &FetchOptions,
) -> (HashMap<u64, PerformanceSummary>, Vec<PipelineError>) {
    let ids = records
        .iter()
        .filter_map(|r| account_id(&r.player_id).ok())
        .collect::<Vec<_>>();
    let batch = source.batch_size().max(1);

    let results: Vec<Result<Vec<PerformanceSummary>, PipelineError>> =
        with_fetch_pool(options.parallelism, || {
            ids.par_chunks(batch)
                .map(|chunk| source.performance(chunk))
                .collect()
        });

    let mut found = HashMap::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(rows) => {
                for row in rows {
                    found.insert(row.steam_account_id, row);
                }
            }
            Err(err) => {
                warn!(%err, "performance batch failed");
                errors.push(err);
            }
        }
    }
    debug!(found = found.len(), requested = ids.len(), "performance fetched");
    (found, errors)
}

fn with_fetch_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads.clamp(1, 8))
        .build()
    {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StagedCsvRow {
    player_id: String,
    season: String,
    mmr: u32,
    p1: u8,
    p2: u8,
    p3: u8,
    p4: u8,
    p5: u8,
    cost: Option<u32>,
    budget_count: u32,
    budget_mean: f64,
    budget_std: f64,
    budget_min: f64,
    budget_max: f64,
    budget_sum: f64,
    stats_status: StatsStatus,
    hero_stats: String,
    performance: String,
}

impl StagedCsvRow {
    fn from_row(row: &StagedRow) -> Result<Self> {
        let c = row.record.role_comfort;
        Ok(Self {
            player_id: row.record.player_id.clone(),
            season: row.record.season.clone(),
            mmr: row.record.mmr,
            p1: c[0],
            p2: c[1],
            p3: c[2],
            p4: c[3],
            p5: c[4],
            cost: row.record.cost,
            budget_count: row.budget.count,
            budget_mean: row.budget.mean,
            budget_std: row.budget.std,
            budget_min: row.budget.min,
            budget_max: row.budget.max,
            budget_sum: row.budget.sum,
            stats_status: row.stats_status,
            hero_stats: serde_json::to_string(&row.heroes).context("encode hero stats")?,
            performance: match &row.performance {
                Some(p) => serde_json::to_string(p).context("encode performance")?,
                None => String::new(),
            },
        })
    }

    fn into_row(self) -> Result<StagedRow> {
        let heroes: Vec<HeroStat> = if self.hero_stats.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&self.hero_stats)
                .with_context(|| format!("decode hero stats of {}", self.player_id))?
        };
        let performance = if self.performance.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(&self.performance)
                    .with_context(|| format!("decode performance of {}", self.player_id))?,
            )
        };
        let role_comfort: [u8; ROLE_COUNT] = [self.p1, self.p2, self.p3, self.p4, self.p5];
        Ok(StagedRow {
            record: PlayerRecord {
                player_id: self.player_id,
                mmr: self.mmr,
                role_comfort,
                cost: self.cost,
                season: self.season,
            },
            budget: SeasonBudget {
                count: self.budget_count,
                mean: self.budget_mean,
                std: self.budget_std,
                min: self.budget_min,
                max: self.budget_max,
                sum: self.budget_sum,
            },
            stats_status: self.stats_status,
            heroes,
            performance,
        })
    }
}

pub fn write_staged_table(path: &Path, rows: &[StagedRow]) -> Result<()> {
    let csv_rows = rows
        .iter()
        .map(StagedCsvRow::from_row)
        .collect::<Result<Vec<_>>>()?;
    write_serialized_csv(path, &csv_rows)
}

pub fn read_staged_table(path: &Path) -> Result<Vec<StagedRow>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut out = Vec::new();
    for row in rdr.deserialize::<StagedCsvRow>() {
        let row = row.with_context(|| format!("read {}", path.display()))?;
        out.push(row.into_row()?);
    }
    Ok(out)
}
