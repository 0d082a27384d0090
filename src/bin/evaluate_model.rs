use std::path::PathBuf;

use anyhow::{Context, Result};

use rd2l_cost_model::config::PipelineConfig;
use rd2l_cost_model::features::read_feature_table;
use rd2l_cost_model::model::{evaluate, load_model};

fn main() -> Result<()> {
    rd2l_cost_model::init_runtime();
    let config = PipelineConfig::from_env();

    let model_path = parse_path_arg("model").unwrap_or_else(|| config.model_path());
    let features_path =
        parse_path_arg("features").unwrap_or_else(|| config.training_features_path());

    let model = load_model(&model_path)
        .with_context(|| format!("load model {}", model_path.display()))?;
    let table = read_feature_table(&features_path)?;
    let metrics = evaluate(&model, &table.schema, &table.rows)?;

    println!("Model: {} (trained {})", model_path.display(), model.trained_at);
    println!("Trained on: {} rows, {} trees", model.train_samples, model.params.n_trees);
    println!("Features: {}", features_path.display());
    println!("Rows scored: {}/{}", metrics.samples, table.rows.len());
    println!("MAE:  {:.3}", metrics.mae);
    println!("MSE:  {:.3}", metrics.mse);
    println!("RMSE: {:.3}", metrics.rmse);
    println!("R2:   {:.4}", metrics.r_squared);
    Ok(())
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("--{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if *arg == format!("--{name}") {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}
