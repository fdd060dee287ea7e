pub mod odds;
pub mod results;
pub mod stats;
pub mod table;
pub mod teams;

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::Warehouse;
use crate::error::PipelineError;
use table::CsvTable;

/// Row counts written by one ingestion pass.
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub ticks: usize,
    pub team_stats: usize,
    pub results: usize,
    pub schedule: usize,
}

/// Vendor files in `dir` whose name starts with one of `prefixes` and ends
/// with one of `extensions`, sorted by name.
pub fn vendor_files(dir: &Path, prefixes: &[&str], extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            prefixes.iter().any(|pre| name.starts_with(pre))
                && extensions.iter().any(|ext| name.ends_with(ext))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn require_files(
    dir: &Path,
    what: &str,
    prefixes: &[&str],
    extensions: &[&str],
    schema: &str,
) -> Result<Vec<PathBuf>> {
    let files = vendor_files(dir, prefixes, extensions)?;
    if files.is_empty() {
        let pattern = format!("{}* ({})", prefixes.join("*|"), extensions.join("|"));
        return Err(PipelineError::missing(format!("{what} files {pattern}"), dir, schema).into());
    }
    Ok(files)
}

fn read_tables(files: &[PathBuf]) -> Result<Vec<CsvTable>> {
    files.iter().map(|f| CsvTable::read(f)).collect()
}

/// Ingest every vendor file under `raw_dir` into the warehouse.
pub fn run(raw_dir: &Path, wh: &mut Warehouse) -> Result<IngestSummary> {
    let odds_files = require_files(raw_dir, "odds", &["odds"], &[".csv", ".json"], odds::ODDS_SCHEMA)?;
    let odds = odds::load_odds(&odds_files)?;
    if odds.ticks.is_empty() {
        return Err(PipelineError::missing("moneyline ticks", raw_dir, odds::ODDS_SCHEMA).into());
    }
    let n_ticks = wh.replace_ticks(&odds.ticks)?;
    info!("[ingest] ticks: {} of {} rows from {} file(s)", n_ticks, odds.rows_read, odds_files.len());

    let stats_files = require_files(
        raw_dir,
        "team stats",
        &["team_stats", "box_scores"],
        &[".csv"],
        stats::STATS_SCHEMA,
    )?;
    let mut team_stats = Vec::new();
    for table in read_tables(&stats_files)? {
        team_stats.extend(stats::parse_stats_table(&table)?);
    }
    team_stats.sort_by(|a, b| a.team_id.cmp(&b.team_id).then(a.season.cmp(&b.season)));
    team_stats.dedup_by(|a, b| a.team_id == b.team_id && a.season == b.season);
    let n_stats = wh.replace_team_stats(&team_stats)?;
    info!("[ingest] team_stats: {} team-seasons", n_stats);

    let results_files = require_files(raw_dir, "results", &["results"], &[".csv"], results::RESULTS_SCHEMA)?;
    let mut game_results = Vec::new();
    for table in read_tables(&results_files)? {
        game_results.extend(results::parse_results(&table)?);
    }
    game_results.sort_by(|a, b| a.game_id.cmp(&b.game_id));
    game_results.dedup_by(|a, b| a.game_id == b.game_id);
    let n_results = wh.replace_results(&game_results)?;
    info!("[ingest] results: {} games", n_results);

    let schedule_files = require_files(raw_dir, "schedule", &["schedule"], &[".csv"], results::SCHEDULE_SCHEMA)?;
    let mut schedule = Vec::new();
    for table in read_tables(&schedule_files)? {
        schedule.extend(results::parse_schedule(&table)?);
    }
    schedule.sort_by(|a, b| a.game_id.cmp(&b.game_id));
    schedule.dedup_by(|a, b| a.game_id == b.game_id);
    let n_schedule = wh.replace_schedule(&schedule)?;
    info!("[ingest] schedule: {} games", n_schedule);

    Ok(IngestSummary {
        ticks: n_ticks,
        team_stats: n_stats,
        results: n_results,
        schedule: n_schedule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("edge-engine-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_odds_files_name_the_directory_and_schema() {
        let dir = scratch_dir("ingest-empty");
        let mut wh = Warehouse::open_in_memory().unwrap();
        let err = run(&dir, &mut wh).unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::MissingData { .. }));
        assert!(err.to_string().contains("price_decimal"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn ingests_all_tables() {
        let dir = scratch_dir("ingest-full");
        std::fs::write(
            dir.join("odds_a.csv"),
            "ts_utc,game_id,book,runner,price_decimal\n\
             2024-01-05T18:00:00Z,G1,pin,HOME,1.8\n\
             2024-01-05T18:00:00Z,G1,pin,AWAY,2.1\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("box_scores.csv"),
            "season,home_team_id,away_team_id,pts_home,pts_away\n2024,A,B,100,90\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("results.csv"),
            "game_id,final_home_score,final_away_score\nG1,100,90\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("schedule.csv"),
            "game_id,season,start_time_utc,home_team,away_team\nG1,2024,2024-01-05T19:00:00Z,A,B\n",
        )
        .unwrap();

        let mut wh = Warehouse::open_in_memory().unwrap();
        let summary = run(&dir, &mut wh).unwrap();
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.team_stats, 2);
        assert_eq!(summary.results, 1);
        assert_eq!(summary.schedule, 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
