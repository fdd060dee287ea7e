//! Tick → feature-snapshot aggregation.
//!
//! Ticks are bucketed into fixed windows per game. Inside a window the most
//! recent quote per (book, runner) stands for that book, and both sides must
//! be quoted for the market-structure features (vig, ratio) to exist. Team
//! strength comes from the season stats of the scheduled home/away teams.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::db::models::{FeatureSnapshot, Runner, ScheduledGame, TeamStats, Tick};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy)]
pub struct FeatureConfig {
    /// Width of the aggregation window in seconds
    pub window_secs: i64,
    /// Windows whose overround reaches this are treated as bad quotes
    pub max_vig_spread: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            window_secs: 60,
            max_vig_spread: 0.3,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.window_secs <= 0 {
            return Err(PipelineError::invalid_config("window_secs must be positive"));
        }
        if !(self.max_vig_spread.is_finite() && self.max_vig_spread > 0.0) {
            return Err(PipelineError::invalid_config("max_vig_spread must be positive"));
        }
        Ok(())
    }
}

/// Snapshots plus everything that was dropped on the way.
#[derive(Debug, Default)]
pub struct FeatureBuild {
    pub snapshots: Vec<FeatureSnapshot>,
    pub windows: usize,
    pub one_sided_windows: usize,
    pub rejected_windows: usize,
    pub games_without_schedule: Vec<String>,
    pub games_without_stats: Vec<String>,
}

/// Latest quote per book for one runner inside a window.
#[derive(Default)]
struct SideQuotes {
    by_book: BTreeMap<String, (DateTime<Utc>, f64)>,
}

impl SideQuotes {
    fn push(&mut self, tick: &Tick) {
        let entry = self
            .by_book
            .entry(tick.book.clone())
            .or_insert((tick.timestamp, tick.decimal_price));
        if tick.timestamp >= entry.0 {
            *entry = (tick.timestamp, tick.decimal_price);
        }
    }

    fn implied_prob_mean(&self) -> Option<f64> {
        if self.by_book.is_empty() {
            return None;
        }
        let sum: f64 = self.by_book.values().map(|(_, p)| 1.0 / p).sum();
        Some(sum / self.by_book.len() as f64)
    }

    fn best_price(&self) -> Option<f64> {
        self.by_book.values().map(|(_, p)| *p).reduce(f64::max)
    }

    fn latest(&self) -> Option<DateTime<Utc>> {
        self.by_book.values().map(|(ts, _)| *ts).max()
    }
}

#[derive(Default)]
struct Window {
    home: SideQuotes,
    away: SideQuotes,
}

/// Home-minus-away season strength for a scheduled game.
fn strength_diff(game: &ScheduledGame, stats: &HashMap<(&str, &str), &TeamStats>) -> Option<(f64, f64)> {
    let home = stats.get(&(game.home_team.as_str(), game.season.as_str()))?;
    let away = stats.get(&(game.away_team.as_str(), game.season.as_str()))?;
    Some((home.margin - away.margin, home.fg_diff - away.fg_diff))
}

/// Build per-(game, runner) snapshots from canonical ticks.
///
/// Output is sorted by (game_id, runner, timestamp) and `seq` numbers rows
/// in that order.
pub fn build_features(
    ticks: &[Tick],
    schedule: &[ScheduledGame],
    team_stats: &[TeamStats],
    cfg: &FeatureConfig,
) -> FeatureBuild {
    let games: HashMap<&str, &ScheduledGame> = schedule.iter().map(|g| (g.game_id.as_str(), g)).collect();
    let stats: HashMap<(&str, &str), &TeamStats> = team_stats
        .iter()
        .map(|s| ((s.team_id.as_str(), s.season.as_str()), s))
        .collect();

    let mut windows: BTreeMap<(&str, i64), Window> = BTreeMap::new();
    for t in ticks {
        let bucket = t.timestamp.timestamp().div_euclid(cfg.window_secs);
        let w = windows.entry((t.game_id.as_str(), bucket)).or_default();
        match t.runner {
            Runner::Home => w.home.push(t),
            Runner::Away => w.away.push(t),
        }
    }

    let mut out = FeatureBuild {
        windows: windows.len(),
        ..Default::default()
    };
    let mut last_skipped: Option<&str> = None;

    for ((game_id, _), w) in &windows {
        let Some(game) = games.get(game_id) else {
            if last_skipped != Some(*game_id) {
                out.games_without_schedule.push(game_id.to_string());
                last_skipped = Some(*game_id);
            }
            continue;
        };
        let Some((margin, fg_diff)) = strength_diff(game, &stats) else {
            if last_skipped != Some(*game_id) {
                out.games_without_stats.push(game_id.to_string());
                last_skipped = Some(*game_id);
            }
            continue;
        };
        let (Some(home_p), Some(away_p)) = (w.home.implied_prob_mean(), w.away.implied_prob_mean()) else {
            out.one_sided_windows += 1;
            continue;
        };

        let vig_spread = home_p + away_p - 1.0;
        let in_range = |p: f64| p > 0.0 && p <= 1.0;
        if !in_range(home_p) || !in_range(away_p) || vig_spread >= cfg.max_vig_spread {
            out.rejected_windows += 1;
            continue;
        }
        let home_away_ratio = home_p / away_p - 1.0;
        let overround = home_p + away_p;
        let timestamp = match (w.home.latest(), w.away.latest()) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => continue,
        };
        let minutes_to_start = (game.start_time - timestamp).num_milliseconds() as f64 / 60_000.0;

        for runner in Runner::BOTH {
            let (side, p, sign) = match runner {
                Runner::Home => (&w.home, home_p, 1.0),
                Runner::Away => (&w.away, away_p, -1.0),
            };
            out.snapshots.push(FeatureSnapshot {
                seq: 0,
                game_id: game_id.to_string(),
                runner,
                timestamp,
                implied_prob_mean: p,
                implied_prob_vig_adj: p / overround,
                vig_spread,
                home_away_ratio,
                minutes_to_start,
                margin: sign * margin,
                fg_diff: sign * fg_diff,
                best_price: side.best_price(),
            });
        }
    }

    out.snapshots.sort_by(|a, b| {
        a.game_id
            .cmp(&b.game_id)
            .then(a.runner.as_str().cmp(b.runner.as_str()))
            .then(a.timestamp.cmp(&b.timestamp))
    });
    for (i, s) in out.snapshots.iter_mut().enumerate() {
        s.seq = i as i64;
    }

    if !out.games_without_schedule.is_empty() {
        warn!(
            "[features] skipped {} game(s) with no schedule entry: {:?}",
            out.games_without_schedule.len(),
            out.games_without_schedule
        );
    }
    if !out.games_without_stats.is_empty() {
        warn!(
            "[features] skipped {} game(s) with no team stats for their season: {:?}",
            out.games_without_stats.len(),
            out.games_without_stats
        );
    }
    info!(
        "[features] {} snapshots from {} windows ({} one-sided, {} rejected)",
        out.snapshots.len(),
        out.windows,
        out.one_sided_windows,
        out.rejected_windows
    );
    out
}
