use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rd2l_cost_model::features::{HeroSchema, engineer_features};
use rd2l_cost_model::model::{ForestParams, train};
use rd2l_cost_model::opendota::{HeroStat, parse_player_heroes_json};
use rd2l_cost_model::player_id::normalize_player_id;
use rd2l_cost_model::prep::{StagedRow, StatsStatus};
use rd2l_cost_model::sheets::{PlayerRecord, SeasonBudget};
use rd2l_cost_model::stratz::parse_stratz_players_json;

fn synthetic_rows(players: u32, heroes_per_player: u32) -> Vec<StagedRow> {
    (0..players)
        .map(|i| {
            let heroes = (0..heroes_per_player)
                .map(|h| {
                    let games = (i * 7 + h * 13) % 60;
                    HeroStat {
                        hero_id: 1 + (i + h * 5) % 124,
                        games,
                        wins: games / 2,
                        last_played: 1_700_000_000,
                    }
                })
                .collect::<Vec<_>>();
            let mut seen = std::collections::HashSet::new();
            let heroes = heroes
                .into_iter()
                .filter(|h| seen.insert(h.hero_id))
                .collect();
            let mmr = 2000 + (i % 60) * 100;
            StagedRow {
                record: PlayerRecord {
                    player_id: (100_000 + i).to_string(),
                    mmr,
                    role_comfort: [1 + (i % 5) as u8, 3, 3, 3, 5 - (i % 5) as u8],
                    cost: Some(mmr / 40),
                    season: format!("S{}", 20 + i % 10),
                },
                budget: SeasonBudget::from_values(&[1000.0, 1200.0, 1400.0]),
                stats_status: StatsStatus::Fetched,
                heroes,
                performance: None,
            }
        })
        .collect()
}

fn bench_feature_engineering(c: &mut Criterion) {
    let rows = synthetic_rows(600, 40);
    c.bench_function("feature_engineering", |b| {
        b.iter(|| {
            let schema = HeroSchema::from_tables(&[black_box(rows.as_slice())]).unwrap();
            let features = engineer_features(&rows, &schema);
            black_box(features.len());
        })
    });
}

fn bench_forest_training(c: &mut Criterion) {
    let rows = synthetic_rows(300, 20);
    let schema = HeroSchema::from_tables(&[rows.as_slice()]).unwrap();
    let features = engineer_features(&rows, &schema);
    let params = ForestParams {
        n_trees: 20,
        max_depth: 8,
        ..ForestParams::default()
    };
    let mut group = c.benchmark_group("forest");
    group.sample_size(10);
    group.bench_function("train_20_trees", |b| {
        b.iter(|| {
            let model = train(black_box(&features), &schema, &params).unwrap();
            black_box(model.train_samples);
        })
    });
    group.finish();
}

fn bench_player_id_normalize(c: &mut Criterion) {
    c.bench_function("player_id_normalize", |b| {
        b.iter(|| {
            let id =
                normalize_player_id(black_box("https://www.dotabuff.com/players/162015739/"))
                    .unwrap();
            black_box(id);
        })
    });
}

fn bench_opendota_heroes_parse(c: &mut Criterion) {
    c.bench_function("opendota_heroes_parse", |b| {
        b.iter(|| {
            let heroes = parse_player_heroes_json(black_box(OPENDOTA_HEROES_JSON)).unwrap();
            black_box(heroes.len());
        })
    });
}

fn bench_stratz_players_parse(c: &mut Criterion) {
    c.bench_function("stratz_players_parse", |b| {
        b.iter(|| {
            let players = parse_stratz_players_json(black_box(STRATZ_PLAYERS_JSON)).unwrap();
            black_box(players.len());
        })
    });
}

criterion_group!(
    perf,
    bench_feature_engineering,
    bench_forest_training,
    bench_player_id_normalize,
    bench_opendota_heroes_parse,
    bench_stratz_players_parse
);
criterion_main!(perf);

static OPENDOTA_HEROES_JSON: &str = include_str!("../tests/fixtures/opendota_heroes.json");
static STRATZ_PLAYERS_JSON: &str = include_str!("../tests/fixtures/stratz_players.json");
