use tracing::warn;

use super::table::CsvTable;
use super::teams::normalize_name;
use crate::db::models::{GameResult, Runner, ScheduledGame};
use crate::error::PipelineError;

pub const RESULTS_SCHEMA: &str = "game_id, final_home_score, final_away_score, [winner]";
pub const SCHEDULE_SCHEMA: &str = "game_id, season, start_time_utc, home_team, away_team";

/// Parse final scores. A missing winner is derived from the score; tied
/// games have no winner and are skipped.
pub fn parse_results(table: &CsvTable) -> Result<Vec<GameResult>, PipelineError> {
    let mut out = Vec::with_capacity(table.len());
    for row in table.rows() {
        let game_id = row.require(&["game_id"])?.to_string();
        let home = row.require_f64(&["final_home_score", "home_score"])? as i32;
        let away = row.require_f64(&["final_away_score", "away_score"])? as i32;
        let winner = match row.get(&["winner"]) {
            Some(w) => Runner::parse(w)
                .ok_or_else(|| row.malformed(format!("winner must be HOME or AWAY, got '{w}'")))?,
            None if home > away => Runner::Home,
            None if away > home => Runner::Away,
            None => {
                warn!("{}:{}: game {} tied {}-{}, no winner", table.file(), row.line(), game_id, home, away);
                continue;
            }
        };
        out.push(GameResult {
            game_id,
            final_home_score: home,
            final_away_score: away,
            winner,
        });
    }
    Ok(out)
}

pub fn parse_schedule(table: &CsvTable) -> Result<Vec<ScheduledGame>, PipelineError> {
    table
        .rows()
        .map(|row| {
            Ok(ScheduledGame {
                game_id: row.require(&["game_id"])?.to_string(),
                season: row.require(&["season"])?.to_string(),
                start_time: row.timestamp(&["start_time_utc", "start_time", "commence_time"])?,
                home_team: normalize_name(row.require(&["home_team", "home_team_id"])?),
                away_team: normalize_name(row.require(&["away_team", "away_team_id"])?),
            })
        })
        .collect()
}
