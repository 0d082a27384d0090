use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::{
    FeatureTable, HeroSchema, engineer_features, read_feature_table, write_feature_table,
};
use crate::model::{
    LinearBaseline, RegressionMetrics, evaluate, load_model, predict, save_model, train, train_test_split,
    write_predictions,
};
use crate::prep::{StagedRow, StatSources, read_staged_table, stage_season, write_staged_table};
use crate::sheets::{
    CaptainSheet, SeasonBudget, discover_season_files, read_captain_sheet, read_draft_sheet,
};
use crate::team_cache::TeamCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Past seasons with auction results.
    Training,
    /// Upcoming sign-ups without a cost.
    Prediction,
}

impl DatasetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Training => "training",
            DatasetKind::Prediction => "prediction",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "training" | "train" => Some(DatasetKind::Training),
            "prediction" | "predict" => Some(DatasetKind::Prediction),
            _ => None,
        }
    }

    fn source_dir(self, config: &PipelineConfig) -> &Path {
        match self {
            DatasetKind::Training => &config.data_dir,
            DatasetKind::Prediction => &config.input_dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonReport {
    pub season: String,
    pub path: PathBuf,
    pub players: usize,
    pub rejected_rows: usize,
    pub fetch_failures: usize,
    pub aborted: bool,
}

/// A season left out of the run because one of its sheets lacks a required
/// column.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSeason {
    pub season: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PrepSummary {
    pub kind: DatasetKind,
    pub seasons: Vec<SeasonReport>,
    pub skipped: Vec<SkippedSeason>,
}

impl PrepSummary {
    pub fn players(&self) -> usize {
        self.seasons.iter().map(|s| s.players).sum()
    }
}

/// Reads every season's sheets for `kind`, fetches stats and writes one
/// staged table per season.
pub fn prepare_dataset(
    config: &PipelineConfig,
    kind: DatasetKind,
    sources: &StatSources<'_>,
) -> Result<PrepSummary> {
    let source_dir = kind.source_dir(config);
    let staging_dir = config.staging_dir(kind.as_str());
    let seasons = discover_season_files(source_dir)?;
    if seasons.is_empty() {
        warn!(dir = %source_dir.display(), kind = kind.as_str(), "no season sheets found");
    }

    let mut reports = Vec::with_capacity(seasons.len());
    let mut skipped = Vec::new();
    for files in seasons {
        let Some(draft_path) = files.draft.as_deref() else {
            continue;
        };
        let budget = match files.captains.as_deref() {
            Some(path) => match season_budget(path) {
                Ok(budget) => budget,
                Err(err) if is_missing_column(&err) => {
                    warn!(
                        season = %files.season,
                        %err,
                        "captains sheet unusable, using default budget"
                    );
                    SeasonBudget::default()
                }
                Err(err) => return Err(err),
            },
            None => SeasonBudget::default(),
        };

        let sheet = match read_draft_sheet(draft_path, &files.season) {
            Ok(sheet) => sheet,
            Err(err) if is_missing_column(&err) => {
                warn!(season = %files.season, %err, "skipping season");
                skipped.push(SkippedSeason {
                    season: files.season.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };
        for err in &sheet.rejected {
            warn!(season = %files.season, %err, "draft row rejected");
        }
        let rejected_rows = sheet.rejected.len();

        let stage = stage_season(&files.season, sheet.records, budget, sources, &config.fetch);
        let path = staging_dir.join(format!("{}.csv", files.season));
        write_staged_table(&path, &stage.rows)
            .with_context(|| format!("write staged table for {}", files.season))?;

        reports.push(SeasonReport {
            season: stage.season,
            path,
            players: stage.rows.len(),
            rejected_rows,
            fetch_failures: stage.failures.len(),
            aborted: stage.aborted,
        });
    }

    Ok(PrepSummary {
        kind,
        seasons: reports,
        skipped,
    })
}

fn is_missing_column(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingColumn { .. })
    )
}

fn season_budget(path: &Path) -> Result<SeasonBudget> {
    let CaptainSheet { budget, rejected } = read_captain_sheet(path)?;
    for err in &rejected {
        warn!(file = %path.display(), %err, "captain row rejected");
    }
    if budget.count == 0 {
        warn!(file = %path.display(), "captains sheet has no money values");
    }
    Ok(budget)
}

/// Staged tables of one kind, in season order. A missing directory is empty.
pub fn load_staged(config: &PipelineConfig, kind: DatasetKind) -> Result<Vec<StagedRow>> {
    let dir = config.staging_dir(kind.as_str());
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("list {}", dir.display())),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("list {}", dir.display()))?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut rows = Vec::new();
    for path in paths {
        rows.extend(read_staged_table(&path)?);
    }
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct FeatureSummary {
    pub heroes: usize,
    pub features: usize,
    pub training_rows: usize,
    pub prediction_rows: usize,
    pub training_path: PathBuf,
    pub prediction_path: PathBuf,
}

/// Builds one hero schema over both datasets and writes both feature tables
/// with it, so their columns line up exactly.
pub fn engineer_datasets(config: &PipelineConfig) -> Result<FeatureSummary> {
    let training = load_staged(config, DatasetKind::Training)?;
    let prediction = load_staged(config, DatasetKind::Prediction)?;
    let schema = HeroSchema::from_tables(&[training.as_slice(), prediction.as_slice()])?;

    let training_rows = engineer_features(&training, &schema);
    let prediction_rows = engineer_features(&prediction, &schema);

    let training_path = config.training_features_path();
    let prediction_path = config.prediction_features_path();
    write_feature_table(&training_path, &schema, &training_rows)?;
    write_feature_table(&prediction_path, &schema, &prediction_rows)?;

    let features = schema.feature_names().len();
    info!(
        heroes = schema.len(),
        features,
        training = training_rows.len(),
        prediction = prediction_rows.len(),
        "feature tables written"
    );
    Ok(FeatureSummary {
        heroes: schema.len(),
        features,
        training_rows: training_rows.len(),
        prediction_rows: prediction_rows.len(),
        training_path,
        prediction_path,
    })
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub model_path: PathBuf,
    pub train_samples: usize,
    /// Scored on rows held out of a preliminary fit; `None` when the split
    /// left too few rows to train on.
    pub holdout: Option<RegressionMetrics>,
    /// Linear baseline scored on the same held-out rows.
    pub baseline_holdout: Option<RegressionMetrics>,
    pub in_sample: RegressionMetrics,
}

/// Scores a held-out split, then refits on every labelled row and saves.
pub fn train_and_save(config: &PipelineConfig) -> Result<TrainSummary> {
    let FeatureTable { schema, rows } = read_feature_table(&config.training_features_path())?;
    let params = &config.forest;

    let (fit_rows, test_rows) = train_test_split(&rows, config.test_fraction, params.seed);
    let holdout = if test_rows.is_empty() {
        None
    } else {
        match train(&fit_rows, &schema, params) {
            Ok(model) => Some(evaluate(&model, &schema, &test_rows)?),
            Err(err) => {
                warn!(%err, "skipping holdout evaluation");
                None
            }
        }
    };
    let baseline_holdout = if holdout.is_none() {
        None
    } else {
        match LinearBaseline::fit(&fit_rows, &schema) {
            Ok(baseline) => Some(baseline.evaluate(&schema, &test_rows)?),
            Err(err) => {
                warn!(%err, "skipping linear baseline");
                None
            }
        }
    };
    if let (Some(forest), Some(linear)) = (&holdout, &baseline_holdout) {
        info!(
            forest_r2 = forest.r_squared,
            linear_r2 = linear.r_squared,
            "holdout scores"
        );
    }

    let model = train(&rows, &schema, params)?;
    let in_sample = evaluate(&model, &schema, &rows)?;
    let model_path = config.model_path();
    save_model(&model_path, &model)?;
    info!(
        samples = model.train_samples,
        trees = params.n_trees,
        path = %model_path.display(),
        "cost model saved"
    );

    Ok(TrainSummary {
        model_path,
        train_samples: model.train_samples,
        holdout,
        baseline_holdout,
        in_sample,
    })
}

#[derive(Debug, Clone)]
pub struct PredictSummary {
    pub path: PathBuf,
    pub predictions: usize,
    /// Players already on a team in the team cache.
    pub rostered: usize,
}

pub fn predict_and_save(config: &PipelineConfig) -> Result<PredictSummary> {
    let model = load_model(&config.model_path())?;
    let FeatureTable { schema, rows } = read_feature_table(&config.prediction_features_path())?;
    let predictions = predict(&model, &schema, &rows)?;

    let teams = TeamCache::load(&config.team_cache).unwrap_or_else(|err| {
        warn!(%err, "team cache unreadable, ignoring");
        TeamCache::default()
    });
    let mut rostered = 0;
    for p in &predictions {
        if let Some(team) = teams.team_for_player(&p.player_id) {
            rostered += 1;
            info!(player_id = %p.player_id, team = %team.name, tag = %team.tag, "player already rostered");
        }
    }

    let path = config.predictions_path();
    write_predictions(&path, &predictions)?;
    Ok(PredictSummary {
        path,
        predictions: predictions.len(),
        rostered,
    })
}

#[cfg(test)]
mod tests {
    use super::DatasetKind;

    #[test]
    fn dataset_kind_accepts_short_names() {
        assert_eq!(DatasetKind::parse("Train"), Some(DatasetKind::Training));
        assert_eq!(DatasetKind::parse(" prediction "), Some(DatasetKind::Prediction));
        assert_eq!(DatasetKind::parse("all"), None);
        assert_eq!(DatasetKind::Prediction.as_str(), "prediction");
    }
}
