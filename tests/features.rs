use rd2l_cost_model::features::{
    BASE_FEATURE_NAMES, HeroSchema, engineer_features, read_feature_table, write_feature_table,
};
use rd2l_cost_model::opendota::HeroStat;
use rd2l_cost_model::prep::{StagedRow, StatsStatus};
use rd2l_cost_model::sheets::{PlayerRecord, SeasonBudget};
use rd2l_cost_model::stratz::PerformanceSummary;

fn hero(hero_id: u32, games: u32, wins: u32) -> HeroStat {
    HeroStat {
        hero_id,
        games,
        wins,
        last_played: 1_700_000_000,
    }
}

fn staged(player_id: &str, season: &str, cost: Option<u32>, heroes: Vec<HeroStat>) -> StagedRow {
    let stats_status = if heroes.is_empty() {
        StatsStatus::Empty
    } else {
        StatsStatus::Fetched
    };
    StagedRow {
        record: PlayerRecord {
            player_id: player_id.to_string(),
            mmr: 4000,
            role_comfort: [5, 4, 3, 2, 1],
            cost,
            season: season.to_string(),
        },
        budget: SeasonBudget::from_values(&[1000.0, 1200.0, 1400.0]),
        stats_status,
        heroes,
        performance: None,
    }
}

fn column(names: &[String], name: &str) -> usize {
    names
        .iter()
        .position(|n| n == name)
        .unwrap_or_else(|| panic!("missing column {name}"))
}

#[test]
fn hero_columns_follow_the_schema() {
    let training = vec![staged("1", "S30", Some(100), vec![hero(1, 10, 6)])];
    let prediction = vec![staged("2", "S31", None, vec![hero(2, 3, 1)])];
    let schema = HeroSchema::from_tables(&[training.as_slice(), prediction.as_slice()]).unwrap();
    assert_eq!(schema.hero_ids(), &[1, 2]);

    let rows = engineer_features(&training, &schema);
    let names = schema.feature_names();
    let v = rows[0].feature_vector();
    assert_eq!(v.len(), names.len());
    assert_eq!(v[column(&names, "1_games")], 10.0);
    assert!((v[column(&names, "1_winrate")] - 0.6).abs() < 1e-12);
    assert_eq!(v[column(&names, "2_games")], 0.0);
    assert_eq!(v[column(&names, "2_winrate")], 0.0);
    assert_eq!(rows[0].total_games_played, 10);
    assert!((rows[0].total_winrate - 0.6).abs() < 1e-12);
}

#[test]
fn both_tables_share_one_column_layout() {
    let training = vec![
        staged("1", "S29", Some(100), vec![hero(1, 10, 6), hero(74, 3, 3)]),
        staged("2", "S29", Some(40), vec![hero(5, 1, 0)]),
    ];
    let prediction = vec![staged("3", "S31", None, vec![hero(120, 7, 2)])];
    let schema = HeroSchema::from_tables(&[training.as_slice(), prediction.as_slice()]).unwrap();

    let train_rows = engineer_features(&training, &schema);
    let predict_rows = engineer_features(&prediction, &schema);
    let width = BASE_FEATURE_NAMES.len() + 2 * schema.len();
    assert!(train_rows.iter().all(|r| r.feature_vector().len() == width));
    assert!(predict_rows.iter().all(|r| r.feature_vector().len() == width));
    assert_eq!(schema.hero_ids(), &[1, 5, 74, 120]);
}

#[test]
fn player_without_stats_keeps_a_zero_row() {
    let rows = vec![
        staged("1", "S30", Some(100), vec![hero(1, 10, 6)]),
        staged("2", "S30", Some(20), Vec::new()),
    ];
    let schema = HeroSchema::from_tables(&[rows.as_slice()]).unwrap();
    let features = engineer_features(&rows, &schema);
    assert_eq!(features.len(), 2);

    let empty = &features[1];
    assert_eq!(empty.player_id, "2");
    assert_eq!(empty.total_games_played, 0);
    assert_eq!(empty.total_winrate, 0.0);
    assert!(empty.hero_games.iter().all(|g| *g == 0));
    assert!(empty.hero_winrates.iter().all(|w| *w == 0.0));
    assert_eq!(empty.mmr, 4000);
    assert_eq!(empty.cost, Some(20));
}

#[test]
fn stratz_columns_are_zero_without_performance() {
    let mut with_perf = staged("123", "S30", Some(90), vec![hero(1, 4, 2)]);
    with_perf.performance = Some(PerformanceSummary {
        steam_account_id: 123,
        match_count: 200,
        win_count: 110,
        behavior_score: Some(9500),
        imp: Some(4.5),
        rank: Some(60),
    });
    let rows = vec![with_perf, staged("456", "S30", Some(30), vec![hero(1, 2, 1)])];
    let schema = HeroSchema::from_tables(&[rows.as_slice()]).unwrap();
    let features = engineer_features(&rows, &schema);

    assert_eq!(features[0].stratz.match_count, 200.0);
    assert!((features[0].stratz.winrate - 0.55).abs() < 1e-12);
    assert_eq!(features[0].stratz.rank, 60.0);
    assert_eq!(features[1].stratz, Default::default());
}

#[test]
fn feature_table_reads_back_identically() {
    let rows = vec![
        staged("1", "S30", Some(100), vec![hero(1, 10, 6), hero(14, 3, 1)]),
        staged("2", "S30", None, Vec::new()),
    ];
    let schema = HeroSchema::from_tables(&[rows.as_slice()]).unwrap();
    let features = engineer_features(&rows, &schema);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("training_features.csv");
    write_feature_table(&path, &schema, &features).unwrap();
    let table = read_feature_table(&path).unwrap();

    assert_eq!(table.schema, schema);
    assert_eq!(table.rows.len(), features.len());
    for (read, written) in table.rows.iter().zip(&features) {
        assert_eq!(read.player_id, written.player_id);
        assert_eq!(read.cost, written.cost);
        assert_eq!(read.feature_vector(), written.feature_vector());
    }
}
