use std::fs;
use std::path::PathBuf;

use rd2l_cost_model::fetch::embedded_server_error;
use rd2l_cost_model::opendota::parse_player_heroes_json;
use rd2l_cost_model::stratz::parse_stratz_players_json;

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

#[test]
fn parses_opendota_heroes_fixture() {
    let raw = read_fixture("opendota_heroes.json");
    let heroes = parse_player_heroes_json(&raw).expect("fixture should parse");
    assert_eq!(heroes.len(), 3);
    assert_eq!(
        heroes.iter().map(|h| h.hero_id).collect::<Vec<_>>(),
        vec![1, 2, 74]
    );
    assert_eq!(heroes[0].games, 10);
    assert_eq!(heroes[0].wins, 6);
    assert!((heroes[0].winrate() - 0.6).abs() < 1e-12);
    assert_eq!(heroes[1].winrate(), 0.0);
    assert_eq!(heroes[2].last_played, 1_699_990_000);
}

#[test]
fn opendota_empty_and_null_are_empty() {
    assert!(parse_player_heroes_json("[]").expect("empty array").is_empty());
    assert!(parse_player_heroes_json("null").expect("null").is_empty());
}

#[test]
fn opendota_error_body_is_not_a_hero_list() {
    let raw = r#"{"error":"Internal Server Error"}"#;
    assert!(parse_player_heroes_json(raw).is_err());
    assert_eq!(
        embedded_server_error(raw).as_deref(),
        Some("Internal Server Error")
    );
}

#[test]
fn parses_stratz_players_fixture() {
    let raw = read_fixture("stratz_players.json");
    let players = parse_stratz_players_json(&raw).expect("fixture should parse");
    assert_eq!(players.len(), 2);

    let first = &players[0];
    assert_eq!(first.steam_account_id, 123456789);
    assert_eq!(first.match_count, 1520);
    assert_eq!(first.behavior_score, Some(10000));
    assert_eq!(first.imp, Some(12.5));
    assert_eq!(first.rank, Some(75));

    let second = &players[1];
    assert_eq!(second.steam_account_id, 987654321);
    assert!((second.winrate() - 0.45).abs() < 1e-12);
    assert_eq!(second.imp, None);
    assert_eq!(second.behavior_score, None);
}
