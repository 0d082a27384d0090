use std::fs;
use std::path::PathBuf;

use rd2l_cost_model::error::PipelineError;
use rd2l_cost_model::sheets::{
    discover_season_files, parse_captain_sheet, parse_draft_sheet, read_captain_sheet,
    read_draft_sheet,
};

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path
}

#[test]
fn draft_fixture_keeps_valid_rows_in_sheet_order() {
    let sheet = read_draft_sheet(&fixture_path("draft_sheet.csv"), "S30").expect("sheet parses");
    let ids = sheet
        .records
        .iter()
        .map(|r| r.player_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["123456789", "987654321", "444555666"]);

    let alpha = &sheet.records[0];
    assert_eq!(alpha.mmr, 5000);
    assert_eq!(alpha.role_comfort, [5, 4, 3, 2, 1]);
    assert_eq!(alpha.cost, Some(120));
    assert_eq!(alpha.season, "S30");

    let bravo = &sheet.records[1];
    assert_eq!(bravo.mmr, 4200);
    assert_eq!(bravo.cost, None);
}

#[test]
fn draft_fixture_reports_each_bad_row() {
    let sheet = read_draft_sheet(&fixture_path("draft_sheet.csv"), "S30").expect("sheet parses");
    assert_eq!(sheet.rejected.len(), 4);

    assert!(matches!(
        &sheet.rejected[0],
        PipelineError::MalformedRow { row: 4, player_id: Some(id), reason }
            if id == "111222333" && reason.contains("outside 1-5")
    ));
    assert!(matches!(
        &sheet.rejected[1],
        PipelineError::InvalidIdentifierFormat { input } if input == "not a link"
    ));
    assert!(matches!(
        &sheet.rejected[2],
        PipelineError::MalformedRow { row: 6, reason, .. } if reason.contains("duplicate")
    ));
    assert!(matches!(
        &sheet.rejected[3],
        PipelineError::MalformedRow { player_id: Some(id), reason, .. }
            if id == "555666777" && reason.contains("MMR")
    ));
    assert!(sheet.rejected.iter().all(PipelineError::is_row_level));
}

#[test]
fn url_identifier_becomes_player_record() {
    let raw = "Dotabuff Link,MMR,P1,P2,P3,P4,P5,Cost\n\
               https://www.dotabuff.com/players/162015739,4500,5,4,3,2,1,120\n";
    let sheet = parse_draft_sheet(raw.as_bytes(), "inline", "S31").expect("sheet parses");
    assert!(sheet.rejected.is_empty());
    assert_eq!(sheet.records.len(), 1);
    let record = &sheet.records[0];
    assert_eq!(record.player_id, "162015739");
    assert_eq!(record.mmr, 4500);
    assert_eq!(record.role_comfort, [5, 4, 3, 2, 1]);
    assert_eq!(record.cost, Some(120));
}

#[test]
fn missing_mmr_column_fails_the_sheet() {
    let raw = "Dotabuff Link,P1,P2,P3,P4,P5\n162015739,5,4,3,2,1\n";
    let err = parse_draft_sheet(raw.as_bytes(), "inline", "S31").unwrap_err();
    let typed = err
        .downcast_ref::<PipelineError>()
        .expect("missing column is a pipeline error");
    assert!(matches!(
        typed,
        PipelineError::MissingColumn { column, .. } if column == "MMR"
    ));
}

#[test]
fn captain_fixture_summarises_money_column() {
    let sheet = read_captain_sheet(&fixture_path("captains_sheet.csv")).expect("sheet parses");
    let b = sheet.budget;
    assert_eq!(b.count, 3);
    assert!((b.mean - 1200.0).abs() < 1e-9);
    assert!((b.std - 200.0).abs() < 1e-9);
    assert_eq!(b.min, 1000.0);
    assert_eq!(b.max, 1400.0);
    assert_eq!(b.sum, 3600.0);
    assert_eq!(sheet.rejected.len(), 1);
}

#[test]
fn five_column_captain_layout_reads_fourth_column() {
    let raw = "Name,Dotabuff,MMR,Total_Money,Left\nA,1,5000,900,0\nB,2,5100,1100,0\n";
    let sheet = parse_captain_sheet(raw.as_bytes(), "inline").expect("sheet parses");
    assert_eq!(sheet.budget.count, 2);
    assert_eq!(sheet.budget.mean, 1000.0);
}

#[test]
fn unexpected_captain_layout_is_missing_column() {
    let raw = "Name,Money\nA,900\n";
    let err = parse_captain_sheet(raw.as_bytes(), "inline").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingColumn { .. })
    ));
}

#[test]
fn season_files_are_paired_by_leading_token() {
    let dir = tempfile::tempdir().unwrap();
    for name in [
        "S29 RD2L Sunday - Draft.csv",
        "S29 RD2L Sunday - Captains.csv",
        "S30 RD2L Sunday - Draft.csv",
        "S31 RD2L Sunday - Captains.csv",
        "notes.txt",
    ] {
        fs::write(dir.path().join(name), "x\n").unwrap();
    }

    let seasons = discover_season_files(dir.path()).expect("listing succeeds");
    let keys = seasons.iter().map(|s| s.season.as_str()).collect::<Vec<_>>();
    assert_eq!(keys, vec!["S29", "S30"]);
    assert!(seasons[0].captains.is_some());
    assert!(seasons[1].captains.is_none());
}
