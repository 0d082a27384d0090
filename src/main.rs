use std::sync::Arc;

use anyhow::{Result, anyhow};

use rd2l_cost_model::config::PipelineConfig;
use rd2l_cost_model::model::RegressionMetrics;
use rd2l_cost_model::opendota::OpenDotaClient;
use rd2l_cost_model::pipeline::{self, DatasetKind, PrepSummary};
use rd2l_cost_model::prep::StatSources;
use rd2l_cost_model::rate_limit::RequestBudget;
use rd2l_cost_model::stratz::{PerformanceSource, StratzClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Prep,
    Features,
    Train,
    Predict,
    All,
}

fn main() -> Result<()> {
    rd2l_cost_model::init_runtime();
    let config = PipelineConfig::from_env();

    let stage = match parse_arg("stage") {
        Some(raw) => parse_stage(&raw).ok_or_else(|| anyhow!("unknown stage {raw:?}"))?,
        None => Stage::All,
    };
    let kinds = match parse_arg("kind") {
        Some(raw) if raw.eq_ignore_ascii_case("both") => both_kinds(),
        Some(raw) => vec![DatasetKind::parse(&raw).ok_or_else(|| anyhow!("unknown kind {raw:?}"))?],
        None => both_kinds(),
    };

    if matches!(stage, Stage::Prep | Stage::All) {
        run_prep(&config, &kinds)?;
    }
    if matches!(stage, Stage::Features | Stage::All) {
        let summary = pipeline::engineer_datasets(&config)?;
        println!("Feature engineering complete");
        println!("Heroes: {} (features: {})", summary.heroes, summary.features);
        println!(
            "Training rows: {} -> {}",
            summary.training_rows,
            summary.training_path.display()
        );
        println!(
            "Prediction rows: {} -> {}",
            summary.prediction_rows,
            summary.prediction_path.display()
        );
    }
    if matches!(stage, Stage::Train | Stage::All) {
        let summary = pipeline::train_and_save(&config)?;
        println!("Training complete");
        println!("Model: {}", summary.model_path.display());
        println!("Samples: {}", summary.train_samples);
        match summary.holdout {
            Some(m) => print_metrics("holdout", &m),
            None => println!("holdout: n/a"),
        }
        if let Some(m) = summary.baseline_holdout {
            print_metrics("linear baseline (holdout)", &m);
        }
        print_metrics("in-sample", &summary.in_sample);
    }
    if matches!(stage, Stage::Predict | Stage::All) {
        let summary = pipeline::predict_and_save(&config)?;
        println!("Prediction complete");
        println!("Predictions: {} -> {}", summary.predictions, summary.path.display());
        if summary.rostered > 0 {
            println!("Already rostered: {}", summary.rostered);
        }
    }
    Ok(())
}

fn run_prep(config: &PipelineConfig, kinds: &[DatasetKind]) -> Result<()> {
    let budget = Arc::new(RequestBudget::per_minute(config.fetch.requests_per_minute));
    let opendota = OpenDotaClient::new(config.fetch.retry.clone(), Arc::clone(&budget))?;
    let stratz = match &config.stratz_api_key {
        Some(key) => Some(StratzClient::new(
            key.clone(),
            config.stratz_batch_size,
            config.fetch.retry.clone(),
            Arc::clone(&budget),
        )?),
        None => {
            tracing::info!("STRATZ_API_KEY not set; stratz columns will be zero");
            None
        }
    };
    let sources = StatSources {
        heroes: &opendota,
        performance: stratz.as_ref().map(|s| s as &dyn PerformanceSource),
    };

    for kind in kinds {
        let summary = pipeline::prepare_dataset(config, *kind, &sources)?;
        print_prep(&summary);
    }
    println!("Requests issued: {}", budget.requests_issued());
    Ok(())
}

fn print_prep(summary: &PrepSummary) {
    println!("Prep complete ({})", summary.kind.as_str());
    println!("Seasons: {}", summary.seasons.len());
    println!("Players staged: {}", summary.players());
    for season in &summary.seasons {
        println!(
            "season {}: players={} rejected={} fetch_failures={}{} -> {}",
            season.season,
            season.players,
            season.rejected_rows,
            season.fetch_failures,
            if season.aborted { " (aborted)" } else { "" },
            season.path.display()
        );
    }
    for skipped in &summary.skipped {
        println!("season {}: skipped ({})", skipped.season, skipped.reason);
    }
}

fn print_metrics(label: &str, m: &RegressionMetrics) {
    println!(
        "{label}: n={} mae={:.2} rmse={:.2} r2={:.3}",
        m.samples, m.mae, m.rmse, m.r_squared
    );
}

fn both_kinds() -> Vec<DatasetKind> {
    vec![DatasetKind::Training, DatasetKind::Prediction]
}

fn parse_stage(raw: &str) -> Option<Stage> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "prep" => Some(Stage::Prep),
        "features" => Some(Stage::Features),
        "train" => Some(Stage::Train),
        "predict" => Some(Stage::Predict),
        "all" => Some(Stage::All),
        _ => None,
    }
}

fn parse_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("--{name}=");
    let flag = format!("--{name}");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if *arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
