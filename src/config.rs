use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fetch::RetryPolicy;
use crate::model::ForestParams;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_INPUT_DIR: &str = "input";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_TEAM_CACHE: &str = "data/teams.json";

/// Runtime settings, resolved from the environment (after `.env` loading).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub team_cache: PathBuf,
    pub fetch: FetchOptions,
    pub stratz_api_key: Option<String>,
    pub stratz_batch_size: usize,
    pub forest: ForestParams,
    pub test_fraction: f64,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub parallelism: usize,
    pub retry: RetryPolicy,
    pub requests_per_minute: u32,
    pub abort_after_failures: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            parallelism: 6,
            retry: RetryPolicy::default(),
            requests_per_minute: 60,
            abort_after_failures: 25,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let retry = RetryPolicy {
            max_attempts: env_or("FETCH_MAX_ATTEMPTS", 4u32).max(1),
            base_delay: Duration::from_millis(env_or("FETCH_BACKOFF_MS", 2_000u64)),
            max_delay: Duration::from_millis(env_or("FETCH_MAX_BACKOFF_MS", 30_000u64)),
        };
        let fetch = FetchOptions {
            parallelism: env_or("FETCH_PARALLELISM", 6usize).clamp(1, 8),
            retry,
            requests_per_minute: env_or("FETCH_REQUESTS_PER_MINUTE", 60u32).max(1),
            abort_after_failures: env_or("FETCH_ABORT_AFTER_FAILURES", 25usize).max(1),
        };

        let defaults = ForestParams::default();
        let forest = ForestParams {
            n_trees: env_or("MODEL_TREES", defaults.n_trees).max(1),
            max_depth: env_or("MODEL_MAX_DEPTH", defaults.max_depth).max(1),
            min_samples_leaf: env_or("MODEL_MIN_SAMPLES_LEAF", defaults.min_samples_leaf).max(1),
            seed: env_or("MODEL_SEED", defaults.seed),
            min_rows: env_or("MODEL_MIN_TRAINING_ROWS", defaults.min_rows).max(1),
            ..defaults
        };

        Self {
            data_dir: env_path("RD2L_DATA_DIR", DEFAULT_DATA_DIR),
            input_dir: env_path("RD2L_INPUT_DIR", DEFAULT_INPUT_DIR),
            output_dir: env_path("RD2L_OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
            team_cache: env_path("RD2L_TEAM_CACHE", DEFAULT_TEAM_CACHE),
            fetch,
            stratz_api_key: env::var("STRATZ_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            stratz_batch_size: env_or("STRATZ_BATCH_SIZE", 5usize).clamp(1, 50),
            forest,
            test_fraction: env_or("MODEL_TEST_FRACTION", 0.2f64).clamp(0.0, 0.5),
        }
    }

    pub fn staging_dir(&self, kind: &str) -> PathBuf {
        self.output_dir.join("staging").join(kind)
    }

    pub fn training_features_path(&self) -> PathBuf {
        self.output_dir.join("training_features.csv")
    }

    pub fn prediction_features_path(&self) -> PathBuf {
        self.output_dir.join("prediction_features.csv")
    }

    pub fn model_path(&self) -> PathBuf {
        self.output_dir.join("cost_model.json")
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.output_dir.join("predictions.csv")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => PathBuf::from(raw.trim()),
        _ => PathBuf::from(default),
    }
}
