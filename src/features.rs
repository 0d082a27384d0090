use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::error::PipelineError;
use crate::prep::StagedRow;
use crate::sheets::{ROLE_COUNT, SeasonBudget};
use crate::table_io::write_atomically;

/// Player-level numeric columns, in the order they appear in feature
/// vectors and on disk (before the per-hero block).
pub const BASE_FEATURE_NAMES: [&str; 19] = [
    "mmr",
    "p1",
    "p2",
    "p3",
    "p4",
    "p5",
    "budget_count",
    "budget_mean",
    "budget_std",
    "budget_min",
    "budget_max",
    "budget_sum",
    "stratz_match_count",
    "stratz_winrate",
    "stratz_imp",
    "stratz_behavior_score",
    "stratz_rank",
    "total_games_played",
    "total_winrate",
];

/// Ordered set of hero ids shared by the training and prediction tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeroSchema {
    hero_ids: Vec<u32>,
}

impl HeroSchema {
    /// Union of every hero id seen in any of `tables`, ascending.
    pub fn from_tables(tables: &[&[StagedRow]]) -> Result<Self, PipelineError> {
        let ids = tables
            .iter()
            .flat_map(|rows| rows.iter())
            .flat_map(|row| row.heroes.iter().map(|h| h.hero_id))
            .collect::<BTreeSet<_>>();
        Self::from_ids(ids)
    }

    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Result<Self, PipelineError> {
        let hero_ids = ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        if hero_ids.is_empty() {
            return Err(PipelineError::EmptyFeatureUniverse);
        }
        Ok(Self { hero_ids })
    }

    pub fn hero_ids(&self) -> &[u32] {
        &self.hero_ids
    }

    pub fn len(&self) -> usize {
        self.hero_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hero_ids.is_empty()
    }

    /// Full model input column list: base columns, then
    /// `{hero}_games`, `{hero}_winrate` per hero.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = BASE_FEATURE_NAMES
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>();
        for id in &self.hero_ids {
            names.push(format!("{id}_games"));
            names.push(format!("{id}_winrate"));
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub player_id: String,
    pub season: String,
    pub mmr: u32,
    pub role_comfort: [u8; ROLE_COUNT],
    pub budget: SeasonBudget,
    pub stratz: StratzFeatures,
    pub total_games_played: u64,
    pub total_winrate: f64,
    /// Parallel to the schema's hero ids.
    pub hero_games: Vec<u32>,
    pub hero_winrates: Vec<f64>,
    pub cost: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StratzFeatures {
    pub match_count: f64,
    pub winrate: f64,
    pub imp: f64,
    pub behavior_score: f64,
    pub rank: f64,
}

impl FeatureRow {
    pub fn feature_vector(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(BASE_FEATURE_NAMES.len() + self.hero_games.len() * 2);
        out.push(self.mmr as f64);
        out.extend(self.role_comfort.iter().map(|c| *c as f64));
        out.extend([
            self.budget.count as f64,
            self.budget.mean,
            self.budget.std,
            self.budget.min,
            self.budget.max,
            self.budget.sum,
            self.stratz.match_count,
            self.stratz.winrate,
            self.stratz.imp,
            self.stratz.behavior_score,
            self.stratz.rank,
            self.total_games_played as f64,
            self.total_winrate,
        ]);
        for (games, winrate) in self.hero_games.iter().zip(&self.hero_winrates) {
            out.push(*games as f64);
            out.push(*winrate);
        }
        out
    }
}

/// Turns staged rows into dense feature rows laid out by `schema`.
///
/// Heroes a player never touched are zero-filled; heroes the player has
/// that are missing from the schema are ignored for the per-hero block but
/// still count towards the totals.
pub fn engineer_features(rows: &[StagedRow], schema: &HeroSchema) -> Vec<FeatureRow> {
    let slot_of = schema
        .hero_ids()
        .iter()
        .enumerate()
        .map(|(idx, id)| (*id, idx))
        .collect::<HashMap<_, _>>();

    rows.iter()
        .map(|row| {
            let mut hero_games = vec![0u32; schema.len()];
            let mut hero_winrates = vec![0.0f64; schema.len()];
            let mut total_games = 0u64;
            let mut total_wins = 0u64;
            for hero in &row.heroes {
                total_games += hero.games as u64;
                total_wins += hero.wins.min(hero.games) as u64;
                if let Some(&slot) = slot_of.get(&hero.hero_id) {
                    hero_games[slot] = hero.games;
                    hero_winrates[slot] = hero.winrate();
                }
            }
            let total_winrate = if total_games > 0 {
                total_wins as f64 / total_games as f64
            } else {
                0.0
            };

            let stratz = row
                .performance
                .as_ref()
                .map(|p| StratzFeatures {
                    match_count: p.match_count as f64,
                    winrate: p.winrate(),
                    imp: p.imp.unwrap_or(0.0),
                    behavior_score: p.behavior_score.unwrap_or(0) as f64,
                    rank: p.rank.unwrap_or(0) as f64,
                })
                .unwrap_or_default();

            FeatureRow {
                player_id: row.record.player_id.clone(),
                season: row.record.season.clone(),
                mmr: row.record.mmr,
                role_comfort: row.record.role_comfort,
                budget: row.budget,
                stratz,
                total_games_played: total_games,
                total_winrate,
                hero_games,
                hero_winrates,
                cost: row.record.cost,
            }
        })
        .collect()
}

/// A feature table together with the schema its hero block follows.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub schema: HeroSchema,
    pub rows: Vec<FeatureRow>,
}

pub fn write_feature_table(path: &Path, schema: &HeroSchema, rows: &[FeatureRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    let mut header = vec!["player_id".to_string(), "season".to_string()];
    header.extend(schema.feature_names());
    header.push("cost".to_string());
    wtr.write_record(&header).context("write feature header")?;

    for row in rows {
        if row.hero_games.len() != schema.len() {
            return Err(anyhow!(
                "row {} has {} hero columns, schema has {}",
                row.player_id,
                row.hero_games.len(),
                schema.len()
            ));
        }
        let mut record = vec![row.player_id.clone(), row.season.clone()];
        record.extend(row.feature_vector().iter().map(|v| format_number(*v)));
        record.push(row.cost.map(|c| c.to_string()).unwrap_or_default());
        wtr.write_record(&record)
            .with_context(|| format!("write feature row {}", row.player_id))?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|err| anyhow!("flush feature table: {err}"))?;
    write_atomically(path, &bytes)
}

pub fn read_feature_table(path: &Path) -> Result<FeatureTable> {
    let raw = fs::read(path).with_context(|| format!("open {}", path.display()))?;
    parse_feature_table(&raw).with_context(|| format!("parse {}", path.display()))
}

pub fn parse_feature_table(raw: &[u8]) -> Result<FeatureTable> {
    let mut rdr = csv::Reader::from_reader(raw);
    let header = rdr.headers().context("read feature header")?.clone();
    let names = header.iter().collect::<Vec<_>>();

    let base_end = 2 + BASE_FEATURE_NAMES.len();
    if names.len() < base_end + 1
        || names[0] != "player_id"
        || names[1] != "season"
        || names[names.len() - 1] != "cost"
        || names[2..base_end] != BASE_FEATURE_NAMES[..]
    {
        return Err(anyhow!("unexpected feature table header"));
    }

    let hero_block = &names[base_end..names.len() - 1];
    if hero_block.len() % 2 != 0 {
        return Err(anyhow!("hero columns must come in games/winrate pairs"));
    }
    let mut hero_ids = Vec::with_capacity(hero_block.len() / 2);
    for pair in hero_block.chunks(2) {
        let games_id = pair[0].strip_suffix("_games");
        let winrate_id = pair[1].strip_suffix("_winrate");
        let (Some(g), Some(w)) = (games_id, winrate_id) else {
            return Err(anyhow!("bad hero column pair {:?}", pair));
        };
        if g != w {
            return Err(anyhow!("hero column pair mismatch {:?}", pair));
        }
        hero_ids.push(g.parse::<u32>().with_context(|| format!("hero id {g:?}"))?);
    }
    let schema = HeroSchema::from_ids(hero_ids.iter().copied())?;
    if schema.hero_ids() != hero_ids.as_slice() {
        return Err(anyhow!("hero columns are not in ascending order"));
    }

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.context("read feature row")?;
        let num = |idx: usize| -> Result<f64> {
            let cell = record.get(idx).unwrap_or("");
            cell.trim()
                .parse::<f64>()
                .with_context(|| format!("column {} value {cell:?}", names[idx]))
        };
        let player_id = record.get(0).unwrap_or("").to_string();
        let season = record.get(1).unwrap_or("").to_string();

        let mut role_comfort = [0u8; ROLE_COUNT];
        for (i, slot) in role_comfort.iter_mut().enumerate() {
            *slot = num(3 + i)? as u8;
        }
        let budget = SeasonBudget {
            count: num(8)? as u32,
            mean: num(9)?,
            std: num(10)?,
            min: num(11)?,
            max: num(12)?,
            sum: num(13)?,
        };
        let stratz = StratzFeatures {
            match_count: num(14)?,
            winrate: num(15)?,
            imp: num(16)?,
            behavior_score: num(17)?,
            rank: num(18)?,
        };

        let mut hero_games = Vec::with_capacity(hero_ids.len());
        let mut hero_winrates = Vec::with_capacity(hero_ids.len());
        for i in 0..hero_ids.len() {
            hero_games.push(num(base_end + 2 * i)? as u32);
            hero_winrates.push(num(base_end + 2 * i + 1)?);
        }

        let cost_cell = record.get(names.len() - 1).unwrap_or("").trim();
        let cost = if cost_cell.is_empty() {
            None
        } else {
            Some(
                cost_cell
                    .parse::<f64>()
                    .with_context(|| format!("cost {cost_cell:?}"))? as u32,
            )
        };

        rows.push(FeatureRow {
            player_id,
            season,
            mmr: num(2)? as u32,
            role_comfort,
            budget,
            stratz,
            total_games_played: num(19)? as u64,
            total_winrate: num(20)?,
            hero_games,
            hero_winrates,
            cost,
        });
    }

    Ok(FeatureTable { schema, rows })
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::{BASE_FEATURE_NAMES, HeroSchema, format_number};
    use crate::error::PipelineError;
    use crate::prep::StagedRow;

    #[test]
    fn schema_is_sorted_and_deduplicated() {
        let schema = HeroSchema::from_ids([14, 2, 14, 1]).unwrap();
        assert_eq!(schema.hero_ids(), &[1, 2, 14]);
        let names = schema.feature_names();
        assert_eq!(names.len(), BASE_FEATURE_NAMES.len() + 6);
        assert_eq!(&names[BASE_FEATURE_NAMES.len()..][..2], &["1_games", "1_winrate"]);
    }

    #[test]
    fn empty_universe_is_fatal() {
        assert_eq!(
            HeroSchema::from_ids(Vec::new()).unwrap_err(),
            PipelineError::EmptyFeatureUniverse
        );
        let none: &[StagedRow] = &[];
        assert_eq!(
            HeroSchema::from_tables(&[none, none]).unwrap_err(),
            PipelineError::EmptyFeatureUniverse
        );
    }

    #[test]
    fn integers_are_written_without_fraction() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(0.6), "0.6");
    }
}
