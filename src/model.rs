use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::features::{BASE_FEATURE_NAMES, FeatureRow, HeroSchema};
use crate::sheets::ROLE_COUNT;
use crate::table_io::{write_atomically, write_serialized_csv};

pub const MODEL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of features considered at each split (1.0 = all).
    pub max_features: f64,
    pub seed: u64,
    pub min_rows: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: 1.0,
            seed: 42,
            min_rows: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Trained cost regressor plus the column layout it was trained on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostModel {
    pub version: u32,
    pub trained_at: String,
    pub feature_names: Vec<String>,
    pub train_samples: usize,
    pub params: ForestParams,
    trees: Vec<RegressionTree>,
}

impl CostModel {
    pub fn predict_vector(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        sum / self.trees.len() as f64
    }

    fn check_schema(&self, schema: &HeroSchema) -> Result<(), PipelineError> {
        let names = schema.feature_names();
        if names != self.feature_names {
            return Err(PipelineError::FeatureSchemaMismatch {
                expected: self.feature_names.len(),
                found: names.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub player_id: String,
    pub season: String,
    pub predicted_cost: f64,
    pub mmr: u32,
    pub role_comfort: [u8; ROLE_COUNT],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r_squared: f64,
}

fn is_trainable(row: &FeatureRow) -> bool {
    row.cost.is_some() && row.mmr > 0
}

/// Rejects rows whose per-hero blocks were not laid out by `schema`.
fn check_row_widths(schema: &HeroSchema, rows: &[FeatureRow]) -> Result<(), PipelineError> {
    let heroes = schema.len();
    match rows
        .iter()
        .find(|r| r.hero_games.len() != heroes || r.hero_winrates.len() != heroes)
    {
        Some(row) => Err(PipelineError::FeatureSchemaMismatch {
            expected: schema.feature_names().len(),
            found: BASE_FEATURE_NAMES.len() + row.hero_games.len() + row.hero_winrates.len(),
        }),
        None => Ok(()),
    }
}

/// Fits a random forest on every labelled row with a known MMR.
pub fn train(
    rows: &[FeatureRow],
    schema: &HeroSchema,
    params: &ForestParams,
) -> Result<CostModel, PipelineError> {
    check_row_widths(schema, rows)?;
    let usable = rows.iter().filter(|r| is_trainable(r)).collect::<Vec<_>>();
    let required = params.min_rows.max(1);
    if usable.len() < required {
        return Err(PipelineError::InsufficientData {
            available: usable.len(),
            required,
        });
    }

    let x = usable.iter().map(|r| r.feature_vector()).collect::<Vec<_>>();
    let y = usable
        .iter()
        .map(|r| r.cost.unwrap_or_default() as f64)
        .collect::<Vec<_>>();
    let n_features = x.first().map(Vec::len).unwrap_or(0);

    let trees = (0..params.n_trees.max(1))
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(i as u64));
            let sample = (0..x.len())
                .map(|_| rng.gen_range(0..x.len()))
                .collect::<Vec<_>>();
            let mut builder = TreeBuilder {
                x: &x,
                y: &y,
                params,
                n_features,
                rng,
                nodes: Vec::new(),
            };
            builder.grow(sample, 0);
            RegressionTree {
                nodes: builder.nodes,
            }
        })
        .collect::<Vec<_>>();

    Ok(CostModel {
        version: MODEL_VERSION,
        trained_at: Utc::now().to_rfc3339(),
        feature_names: schema.feature_names(),
        train_samples: usable.len(),
        params: params.clone(),
        trees,
    })
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a ForestParams,
    n_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
}

impl TreeBuilder<'_> {
    /// Grows the subtree for `samples` and returns its node index.
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let mean = samples.iter().map(|&i| self.y[i]).sum::<f64>() / samples.len().max(1) as f64;
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        let pure = samples.iter().all(|&i| (self.y[i] - mean).abs() < 1e-12);
        if depth >= self.params.max_depth
            || samples.len() < self.params.min_samples_split.max(2)
            || pure
        {
            return idx;
        }
        let Some(best) = self.best_split(&samples) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[i][best.feature] <= best.threshold);
        let left_idx = self.grow(left, depth + 1);
        let right_idx = self.grow(right, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_idx,
            right: right_idx,
        };
        idx
    }

    fn best_split(&mut self, samples: &[usize]) -> Option<BestSplit> {
        let k = ((self.n_features as f64 * self.params.max_features).ceil() as usize)
            .clamp(1, self.n_features.max(1));
        let mut features = (0..self.n_features).collect::<Vec<_>>();
        features.shuffle(&mut self.rng);
        features.truncate(k);

        let min_leaf = self.params.min_samples_leaf.max(1);
        let total_sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = samples.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let n = samples.len();

        let mut best: Option<BestSplit> = None;
        let mut order = samples.to_vec();
        for feature in features {
            order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 0..n - 1 {
                let yi = self.y[order[pos]];
                left_sum += yi;
                left_sq += yi * yi;

                let here = self.x[order[pos]][feature];
                let next = self.x[order[pos + 1]][feature];
                let left_n = pos + 1;
                let right_n = n - left_n;
                if here == next || left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / left_n as f64)
                    + (right_sq - right_sum * right_sum / right_n as f64);
                if best.as_ref().is_none_or(|b| sse < b.sse) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        sse,
                    });
                }
            }
        }
        best
    }
}

/// Predicts a cost for every row. The table must follow the model's schema.
pub fn predict(
    model: &CostModel,
    schema: &HeroSchema,
    rows: &[FeatureRow],
) -> Result<Vec<Prediction>, PipelineError> {
    model.check_schema(schema)?;
    check_row_widths(schema, rows)?;
    Ok(rows
        .iter()
        .map(|row| Prediction {
            player_id: row.player_id.clone(),
            season: row.season.clone(),
            predicted_cost: model.predict_vector(&row.feature_vector()),
            mmr: row.mmr,
            role_comfort: row.role_comfort,
        })
        .collect())
}

/// Scores the model against labelled rows; unlabelled rows are ignored.
pub fn evaluate(
    model: &CostModel,
    schema: &HeroSchema,
    rows: &[FeatureRow],
) -> Result<RegressionMetrics, PipelineError> {
    model.check_schema(schema)?;
    check_row_widths(schema, rows)?;
    Ok(score_labelled(rows, |x| model.predict_vector(x)))
}

fn score_labelled(rows: &[FeatureRow], predict: impl Fn(&[f64]) -> f64) -> RegressionMetrics {
    let labelled = rows.iter().filter(|r| r.cost.is_some()).collect::<Vec<_>>();
    let predicted = labelled
        .iter()
        .map(|r| predict(&r.feature_vector()))
        .collect::<Vec<_>>();
    let actual = labelled
        .iter()
        .map(|r| r.cost.unwrap_or_default() as f64)
        .collect::<Vec<_>>();
    regression_metrics(&predicted, &actual)
}

const BASELINE_ITERS: usize = 2_000;
const BASELINE_L2: f64 = 1e-3;

/// Ridge regression on standardized features. The forest's holdout score is
/// reported next to this one.
#[derive(Debug, Clone)]
pub struct LinearBaseline {
    means: Vec<f64>,
    stds: Vec<f64>,
    intercept: f64,
    coeffs: Vec<f64>,
}

impl LinearBaseline {
    /// Fits by full-batch gradient descent with a decaying step.
    pub fn fit(rows: &[FeatureRow], schema: &HeroSchema) -> Result<Self, PipelineError> {
        check_row_widths(schema, rows)?;
        let usable = rows.iter().filter(|r| is_trainable(r)).collect::<Vec<_>>();
        if usable.len() < 2 {
            return Err(PipelineError::InsufficientData {
                available: usable.len(),
                required: 2,
            });
        }
        let x = usable.iter().map(|r| r.feature_vector()).collect::<Vec<_>>();
        let y = usable
            .iter()
            .map(|r| r.cost.unwrap_or_default() as f64)
            .collect::<Vec<_>>();
        let n_features = schema.feature_names().len();
        let (means, stds) = feature_norm_stats(&x, n_features);
        let z = x
            .iter()
            .map(|v| {
                v.iter()
                    .zip(means.iter().zip(&stds))
                    .map(|(xj, (m, s))| standardized(*xj, *m, *s))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        // Standardized columns are centered, so the mean target is the
        // least-squares intercept.
        let n = y.len() as f64;
        let intercept = y.iter().sum::<f64>() / n;
        // The largest Hessian eigenvalue is at most the trace, one per
        // non-constant column.
        let active = stds.iter().filter(|s| **s > 1e-6).count().max(1);
        let lr_start = 1.0 / active as f64;

        let mut coeffs = vec![0.0; n_features];
        let mut grad = vec![0.0; n_features];
        for iter in 0..BASELINE_ITERS {
            grad.iter_mut().for_each(|g| *g = 0.0);
            for (zi, yi) in z.iter().zip(&y) {
                let err = intercept + dot(&coeffs, zi) - yi;
                for (g, zij) in grad.iter_mut().zip(zi) {
                    *g += err * zij;
                }
            }
            let lr = lr_start / (1.0 + iter as f64 * 0.003);
            for (c, g) in coeffs.iter_mut().zip(&grad) {
                *c -= lr * (g / n + BASELINE_L2 * *c);
            }
        }

        Ok(Self {
            means,
            stds,
            intercept,
            coeffs,
        })
    }

    pub fn predict_vector(&self, x: &[f64]) -> f64 {
        let dotted: f64 = x
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .zip(&self.coeffs)
            .map(|((xj, (m, s)), c)| c * standardized(*xj, *m, *s))
            .sum();
        self.intercept + dotted
    }

    pub fn evaluate(
        &self,
        schema: &HeroSchema,
        rows: &[FeatureRow],
    ) -> Result<RegressionMetrics, PipelineError> {
        let expected = schema.feature_names().len();
        if expected != self.coeffs.len() {
            return Err(PipelineError::FeatureSchemaMismatch {
                expected: self.coeffs.len(),
                found: expected,
            });
        }
        check_row_widths(schema, rows)?;
        Ok(score_labelled(rows, |x| self.predict_vector(x)))
    }
}

fn feature_norm_stats(x: &[Vec<f64>], n_features: usize) -> (Vec<f64>, Vec<f64>) {
    let n = x.len().max(1) as f64;
    let mut means = vec![0.0; n_features];
    for row in x {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v;
        }
    }
    means.iter_mut().for_each(|m| *m /= n);
    let mut stds = vec![0.0; n_features];
    for row in x {
        for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
            *s += (v - m).powi(2);
        }
    }
    stds.iter_mut().for_each(|s| *s = (*s / n).sqrt());
    (means, stds)
}

fn standardized(x: f64, mean: f64, std: f64) -> f64 {
    if std <= 1e-6 { 0.0 } else { (x - mean) / std }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn regression_metrics(predicted: &[f64], actual: &[f64]) -> RegressionMetrics {
    let n = predicted.len().min(actual.len());
    if n == 0 {
        return RegressionMetrics {
            samples: 0,
            mae: 0.0,
            mse: 0.0,
            rmse: 0.0,
            r_squared: 0.0,
        };
    }
    let pairs = predicted.iter().zip(actual).take(n);
    let mut abs_sum = 0.0;
    let mut ss_res = 0.0;
    for (p, a) in pairs {
        abs_sum += (p - a).abs();
        ss_res += (p - a).powi(2);
    }
    let mean_actual = actual[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean_actual).powi(2)).sum();

    let mse = ss_res / n as f64;
    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    RegressionMetrics {
        samples: n,
        mae: abs_sum / n as f64,
        mse,
        rmse: mse.sqrt(),
        r_squared,
    }
}

/// Shuffles `rows` deterministically and splits off `test_fraction` of them.
pub fn train_test_split(
    rows: &[FeatureRow],
    test_fraction: f64,
    seed: u64,
) -> (Vec<FeatureRow>, Vec<FeatureRow>) {
    let mut shuffled = rows.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);
    let test_n = ((rows.len() as f64) * test_fraction.clamp(0.0, 1.0)).round() as usize;
    let test = shuffled.split_off(rows.len() - test_n.min(rows.len()));
    (shuffled, test)
}

pub fn save_model(path: &Path, model: &CostModel) -> Result<()> {
    let json = serde_json::to_vec(model).context("serialize cost model")?;
    write_atomically(path, &json)
}

pub fn load_model(path: &Path) -> Result<CostModel> {
    let raw = fs::read_to_string(path).with_context(|| format!("open {}", path.display()))?;
    let model: CostModel = serde_json::from_str(&raw).context("decode cost model")?;
    if model.version != MODEL_VERSION {
        return Err(anyhow::anyhow!(
            "model version {} is not supported (expected {MODEL_VERSION})",
            model.version
        ));
    }
    Ok(model)
}

#[derive(Debug, Serialize)]
struct PredictionCsvRow<'a> {
    player_id: &'a str,
    season: &'a str,
    predicted_cost: f64,
    mmr: u32,
    p1: u8,
    p2: u8,
    p3: u8,
    p4: u8,
    p5: u8,
}

pub fn write_predictions(path: &Path, predictions: &[Prediction]) -> Result<()> {
    let rows = predictions
        .iter()
        .map(|p| PredictionCsvRow {
            player_id: &p.player_id,
            season: &p.season,
            predicted_cost: (p.predicted_cost * 100.0).round() / 100.0,
            mmr: p.mmr,
            p1: p.role_comfort[0],
            p2: p.role_comfort[1],
            p3: p.role_comfort[2],
            p4: p.role_comfort[3],
            p5: p.role_comfort[4],
        })
        .collect::<Vec<_>>();
    write_serialized_csv(path, &rows)
}

#[cfg(test)]
mod tests {
    use super::regression_metrics;

    #[test]
    fn perfect_predictions_score_perfectly() {
        let actual = [120.0, 80.0, 45.0, 210.0];
        let m = regression_metrics(&actual, &actual);
        assert_eq!(m.samples, 4);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.r_squared, 1.0);
    }

    #[test]
    fn metrics_follow_textbook_formulas() {
        let actual = [1.0, 2.0, 3.0];
        let predicted = [2.0, 2.0, 2.0];
        let m = regression_metrics(&predicted, &actual);
        assert!((m.mae - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.mse - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.rmse - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!(m.r_squared.abs() < 1e-12);
    }

    #[test]
    fn constant_target_with_errors_has_zero_r_squared() {
        let m = regression_metrics(&[1.0, 3.0], &[2.0, 2.0]);
        assert_eq!(m.r_squared, 0.0);
        assert_eq!(m.mae, 1.0);
    }
}
