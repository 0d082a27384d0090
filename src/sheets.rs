use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;
use crate::player_id::normalize_player_id;

pub const ROLE_COUNT: usize = 5;

/// One drafted player as exported from a season's draft sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub player_id: String,
    pub mmr: u32,
    pub role_comfort: [u8; ROLE_COUNT],
    pub cost: Option<u32>,
    pub season: String,
}

#[derive(Debug, Clone, Default)]
pub struct DraftSheet {
    pub records: Vec<PlayerRecord>,
    pub rejected: Vec<PipelineError>,
}

/// Summary of the captains' auction money for one season.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SeasonBudget {
    pub count: u32,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl SeasonBudget {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let mean = sum / n;
        // Sample standard deviation, matching the usual spreadsheet summary.
        let std = if values.len() > 1 {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Self {
            count: values.len() as u32,
            mean,
            std,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            sum,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptainSheet {
    pub budget: SeasonBudget,
    pub rejected: Vec<PipelineError>,
}

/// The pair of exports belonging to one season.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonFiles {
    pub season: String,
    pub draft: Option<PathBuf>,
    pub captains: Option<PathBuf>,
}

pub fn read_draft_sheet(path: &Path, season: &str) -> Result<DraftSheet> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    parse_draft_sheet(file, &path.display().to_string(), season)
}

struct DraftColumns {
    identifier: usize,
    mmr: usize,
    comfort: [usize; ROLE_COUNT],
    cost: Option<usize>,
}

impl DraftColumns {
    fn locate(headers: &csv::StringRecord, source_name: &str) -> Result<Self, PipelineError> {
        let normalized = headers.iter().map(normalize_header).collect::<Vec<_>>();
        let find = |aliases: &[&str]| {
            normalized
                .iter()
                .position(|h| aliases.iter().any(|a| h.as_str() == *a))
        };
        let missing = |column: &str| PipelineError::MissingColumn {
            source_name: source_name.to_string(),
            column: column.to_string(),
        };

        let identifier = find(&["dotabuff link", "dotabuff", "player_id", "player id", "url", "id"])
            .ok_or_else(|| missing("Dotabuff Link"))?;
        let mmr = find(&["mmr"]).ok_or_else(|| missing("MMR"))?;
        let mut comfort = [0usize; ROLE_COUNT];
        for (idx, slot) in comfort.iter_mut().enumerate() {
            let pos = idx + 1;
            let aliases = [
                format!("comfort (pos {pos})"),
                format!("comfort pos {pos}"),
                format!("pos {pos}"),
                format!("p{pos}"),
            ];
            let alias_refs = aliases.iter().map(String::as_str).collect::<Vec<_>>();
            *slot = find(&alias_refs).ok_or_else(|| missing(&format!("Comfort (Pos {pos})")))?;
        }
        let cost = find(&["cost"]);

        Ok(Self {
            identifier,
            mmr,
            comfort,
            cost,
        })
    }
}

/// Parses a draft sheet export. Bad rows land in `rejected`; only a missing
/// required column fails the whole sheet.
pub fn parse_draft_sheet<R: Read>(reader: R, source_name: &str, season: &str) -> Result<DraftSheet> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr
        .headers()
        .with_context(|| format!("read headers of {source_name}"))?
        .clone();
    let columns = DraftColumns::locate(&headers, source_name)?;

    let mut sheet = DraftSheet::default();
    let mut seen = HashSet::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("read {source_name}"))?;
        let row = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        match parse_draft_row(&record, &columns, row, season) {
            Ok(player) => {
                if !seen.insert(player.player_id.clone()) {
                    sheet.rejected.push(PipelineError::malformed(
                        row,
                        Some(&player.player_id),
                        "duplicate player id in season",
                    ));
                    continue;
                }
                sheet.records.push(player);
            }
            Err(err) => sheet.rejected.push(err),
        }
    }
    Ok(sheet)
}

fn parse_draft_row(
    record: &csv::StringRecord,
    columns: &DraftColumns,
    row: usize,
    season: &str,
) -> Result<PlayerRecord, PipelineError> {
    let cell = |idx: usize| record.get(idx).unwrap_or("");

    let player_id = normalize_player_id(cell(columns.identifier))?;
    let id = Some(player_id.as_str());

    let raw_mmr = cell(columns.mmr);
    let mmr = parse_whole_number(raw_mmr)
        .ok_or_else(|| PipelineError::malformed(row, id, format!("non-numeric MMR {raw_mmr:?}")))?;

    let mut role_comfort = [0u8; ROLE_COUNT];
    for (pos, (slot, col)) in role_comfort.iter_mut().zip(columns.comfort).enumerate() {
        let raw = cell(col);
        let value = parse_whole_number(raw).ok_or_else(|| {
            PipelineError::malformed(
                row,
                id,
                format!("non-numeric comfort {raw:?} for position {}", pos + 1),
            )
        })?;
        if !(1..=5).contains(&value) {
            return Err(PipelineError::malformed(
                row,
                id,
                format!("comfort value {value} outside 1-5 for position {}", pos + 1),
            ));
        }
        *slot = value as u8;
    }

    let cost = match columns.cost.map(cell).filter(|raw| !raw.is_empty()) {
        None => None,
        Some(raw) => Some(
            parse_whole_number(raw)
                .ok_or_else(|| PipelineError::malformed(row, id, format!("non-numeric cost {raw:?}")))?,
        ),
    };

    Ok(PlayerRecord {
        player_id,
        mmr,
        role_comfort,
        cost,
        season: season.to_string(),
    })
}

pub fn read_captain_sheet(path: &Path) -> Result<CaptainSheet> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    parse_captain_sheet(file, &path.display().to_string())
}

/// Captain exports come in two layouts: `Name, Dotabuff, MMR, Money, Left`
/// and the same with an extra `Fake Money` column before the real one.
pub fn parse_captain_sheet<R: Read>(reader: R, source_name: &str) -> Result<CaptainSheet> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let width = rdr
        .headers()
        .with_context(|| format!("read headers of {source_name}"))?
        .len();
    let money_idx = match width {
        5 => 3,
        6 => 4,
        _ => {
            return Err(PipelineError::MissingColumn {
                source_name: source_name.to_string(),
                column: format!("Total_Money (expected 5 or 6 columns, found {width})"),
            }
            .into());
        }
    };

    let mut values = Vec::new();
    let mut rejected = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("read {source_name}"))?;
        let row = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);
        let raw = record.get(money_idx).unwrap_or("");
        if raw.is_empty() {
            continue;
        }
        match parse_money(raw) {
            Some(value) => values.push(value),
            None => rejected.push(PipelineError::malformed(
                row,
                None,
                format!("non-numeric captain money {raw:?}"),
            )),
        }
    }

    Ok(CaptainSheet {
        budget: SeasonBudget::from_values(&values),
        rejected,
    })
}

/// Groups `<Season> ... - Draft.csv` and `<Season> ... - Captains.csv`
/// exports found in `dir` by season.
pub fn discover_season_files(dir: &Path) -> Result<Vec<SeasonFiles>> {
    let entries = fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))?;
    let mut by_season: BTreeMap<String, SeasonFiles> = BTreeMap::new();

    for entry in entries {
        let path = entry.with_context(|| format!("list {}", dir.display()))?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(season) = stem.split_whitespace().next() else {
            continue;
        };
        let kind = stem
            .rsplit(" - ")
            .next()
            .map(|k| k.trim().to_ascii_lowercase())
            .unwrap_or_default();

        let slot = by_season
            .entry(season.to_string())
            .or_insert_with(|| SeasonFiles {
                season: season.to_string(),
                draft: None,
                captains: None,
            });
        match kind.as_str() {
            "draft" => slot.draft = Some(path.clone()),
            "captains" => slot.captains = Some(path.clone()),
            _ => warn!(file = %path.display(), "unrecognised sheet name, skipping"),
        }
    }

    let mut out = Vec::with_capacity(by_season.len());
    for (_, files) in by_season {
        match (&files.draft, &files.captains) {
            (None, None) => continue,
            (Some(_), None) => {
                warn!(season = %files.season, "draft sheet has no captains sheet; budget columns will be zero")
            }
            (None, Some(_)) => {
                warn!(season = %files.season, "captains sheet has no draft sheet; season skipped");
                continue;
            }
            _ => {}
        }
        out.push(files);
    }
    Ok(out)
}

fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(':')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn parse_whole_number(raw: &str) -> Option<u32> {
    let cleaned = raw.trim().replace([',', '_'], "");
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(value) = cleaned.parse::<u32>() {
        return Some(value);
    }
    // Spreadsheet tools like to export integers as `5000.0`.
    let value = cleaned.parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Some(value as u32)
    } else {
        None
    }
}

fn parse_money(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_start_matches('$').replace(',', "");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
