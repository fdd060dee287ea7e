//! Team performance: either canonical per-team rows or per-game box scores
//! aggregated to (team, season).

use std::collections::BTreeMap;

use super::table::CsvTable;
use super::teams::normalize_name;
use crate::db::models::TeamStats;
use crate::error::PipelineError;

pub const STATS_SCHEMA: &str = "team_id, season, margin, fg_diff, home_win \
    | season, home_team_id, away_team_id, pts_home, pts_away, fg_pct_home, fg_pct_away, [home_win]";

/// One completed game's box-score line.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxScore {
    pub season: String,
    pub home_team: String,
    pub away_team: String,
    pub pts_home: f64,
    pub pts_away: f64,
    pub fg_pct_home: f64,
    pub fg_pct_away: f64,
    pub home_win: bool,
}

pub fn is_canonical(table: &CsvTable) -> bool {
    table.has("team_id") && table.has("margin")
}

pub fn parse_team_stats(table: &CsvTable) -> Result<Vec<TeamStats>, PipelineError> {
    table
        .rows()
        .map(|row| {
            let games = row.f64(&["games", "gp"])?.unwrap_or(1.0);
            Ok(TeamStats {
                team_id: normalize_name(row.require(&["team_id", "team_name"])?),
                season: row.require(&["season"])?.to_string(),
                games: games.max(0.0) as u32,
                margin: row.require_f64(&["margin", "plus_minus"])?,
                fg_diff: row.f64(&["fg_diff"])?.unwrap_or(0.0),
                home_win: row.f64(&["home_win"])?.unwrap_or(0.0),
            })
        })
        .collect()
}

pub fn parse_box_scores(table: &CsvTable) -> Result<Vec<BoxScore>, PipelineError> {
    table
        .rows()
        .map(|row| {
            let pts_home = row.require_f64(&["pts_home"])?;
            let pts_away = row.require_f64(&["pts_away"])?;
            let home_win = match row.f64(&["home_win", "home_team_wins"])? {
                Some(v) => v > 0.5,
                None => pts_home > pts_away,
            };
            Ok(BoxScore {
                season: row.require(&["season", "season_id"])?.to_string(),
                home_team: normalize_name(row.require(&["home_team_id", "team_id_home", "home_team"])?),
                away_team: normalize_name(row.require(&["away_team_id", "team_id_away", "away_team"])?),
                pts_home,
                pts_away,
                fg_pct_home: row.f64(&["fg_pct_home"])?.unwrap_or(0.0),
                fg_pct_away: row.f64(&["fg_pct_away"])?.unwrap_or(0.0),
                home_win,
            })
        })
        .collect()
}

#[derive(Default)]
struct Accum {
    games: u32,
    margin_sum: f64,
    fg_sum: f64,
    home_games: u32,
    home_wins: u32,
}

/// Fold box scores into one row per (team, season), each stat from that
/// team's own perspective.
pub fn aggregate_box_scores(scores: &[BoxScore]) -> Vec<TeamStats> {
    let mut acc: BTreeMap<(String, String), Accum> = BTreeMap::new();
    for g in scores {
        let margin = g.pts_home - g.pts_away;
        let fg = g.fg_pct_home - g.fg_pct_away;

        let home = acc.entry((g.home_team.clone(), g.season.clone())).or_default();
        home.games += 1;
        home.margin_sum += margin;
        home.fg_sum += fg;
        home.home_games += 1;
        if g.home_win {
            home.home_wins += 1;
        }

        let away = acc.entry((g.away_team.clone(), g.season.clone())).or_default();
        away.games += 1;
        away.margin_sum -= margin;
        away.fg_sum -= fg;
    }

    acc.into_iter()
        .map(|((team_id, season), a)| TeamStats {
            team_id,
            season,
            games: a.games,
            margin: a.margin_sum / a.games as f64,
            fg_diff: a.fg_sum / a.games as f64,
            home_win: if a.home_games > 0 {
                a.home_wins as f64 / a.home_games as f64
            } else {
                0.0
            },
        })
        .collect()
}

/// Parse one stats file in whichever layout it uses.
pub fn parse_stats_table(table: &CsvTable) -> Result<Vec<TeamStats>, PipelineError> {
    if is_canonical(table) {
        parse_team_stats(table)
    } else {
        Ok(aggregate_box_scores(&parse_box_scores(table)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn box_scores_aggregate_per_team_perspective() {
        let table = CsvTable::parse(
            "box_scores.csv",
            "season,home_team_id,away_team_id,pts_home,pts_away,fg_pct_home,fg_pct_away\n\
             2024,Boston Celtics,LA Lakers,110,100,0.50,0.45\n\
             2024,Los Angeles Lakers,Boston Celtics,105,99,0.48,0.44\n",
        );
        let stats = parse_stats_table(&table).unwrap();
        assert_eq!(stats.len(), 2);

        let bos = stats.iter().find(|s| s.team_id == "Boston Celtics").unwrap();
        assert_eq!(bos.games, 2);
        assert_relative_eq!(bos.margin, (10.0 - 6.0) / 2.0);
        assert_relative_eq!(bos.fg_diff, (0.05 - 0.04) / 2.0, epsilon = 1e-12);
        assert_relative_eq!(bos.home_win, 1.0);

        let lal = stats.iter().find(|s| s.team_id == "Los Angeles Lakers").unwrap();
        assert_relative_eq!(lal.margin, (-10.0 + 6.0) / 2.0);
        assert_relative_eq!(lal.home_win, 1.0);
    }

    #[test]
    fn canonical_rows_pass_through() {
        let table = CsvTable::parse(
            "team_stats.csv",
            "team_id,season,margin,fg_diff,home_win\nNY Knicks,2024,3.5,0.02,0.6\n",
        );
        let stats = parse_stats_table(&table).unwrap();
        assert_eq!(stats[0].team_id, "New York Knicks");
        assert_eq!(stats[0].games, 1);
        assert_relative_eq!(stats[0].margin, 3.5);
    }
}
