//! Decision-snapshot labeling.
//!
//! For every (game, runner) exactly one snapshot is chosen as "what the
//! market looked like when we had to commit": the snapshot closest to, but
//! not inside, the configured pre-game offset. Anything later would leak
//! information the bettor could not have had. When a feed only starts inside
//! the offset window, the latest snapshot is used and tagged `fallback` so
//! downstream consumers can filter it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

use crate::db::models::{DecisionLabel, FeatureSnapshot, GameResult, LabelSource, Runner};
use crate::error::PipelineError;

/// Smallest `minutes_to_start` first; equal values fall back to `seq`.
fn closest_first(a: &&FeatureSnapshot, b: &&FeatureSnapshot) -> Ordering {
    a.minutes_to_start
        .total_cmp(&b.minutes_to_start)
        .then(a.seq.cmp(&b.seq))
}

/// Pick the decision snapshot among one (game, runner)'s candidates.
pub fn select_snapshot<'a>(
    candidates: &[&'a FeatureSnapshot],
    offset_minutes: f64,
) -> Option<(&'a FeatureSnapshot, LabelSource)> {
    let primary = candidates
        .iter()
        .copied()
        .filter(|s| s.minutes_to_start >= offset_minutes)
        .min_by(closest_first);
    match primary {
        Some(s) => Some((s, LabelSource::Primary)),
        None => candidates
            .iter()
            .copied()
            .min_by(closest_first)
            .map(|s| (s, LabelSource::Fallback)),
    }
}

/// Label one game: one row per runner that has snapshots.
///
/// Fails with `MissingData` when the game has no snapshots at all.
pub fn label_game(
    game_id: &str,
    snapshots: &[&FeatureSnapshot],
    winner: Runner,
    offset_minutes: f64,
) -> Result<Vec<DecisionLabel>, PipelineError> {
    if snapshots.is_empty() {
        return Err(PipelineError::missing(
            format!("feature snapshots for game {game_id}"),
            "features",
            "at least one snapshot per labeled game",
        ));
    }

    let mut by_runner: BTreeMap<&'static str, Vec<&FeatureSnapshot>> = BTreeMap::new();
    for s in snapshots {
        by_runner.entry(s.runner.as_str()).or_default().push(s);
    }

    Ok(by_runner
        .values()
        .filter_map(|candidates| select_snapshot(candidates, offset_minutes))
        .map(|(chosen, source)| DecisionLabel {
            snapshot: chosen.clone(),
            outcome: u8::from(chosen.runner == winner),
            source,
        })
        .collect())
}

/// Labels for a whole league plus the games that could not be labeled.
#[derive(Debug, Default)]
pub struct LabelRun {
    pub labels: Vec<DecisionLabel>,
    pub primary: usize,
    pub fallback: usize,
    /// Games with a result but no snapshots
    pub games_missing_snapshots: Vec<String>,
    /// Games with snapshots but no recorded result
    pub games_missing_result: Vec<String>,
}

/// Label every game that has both snapshots and a result.
///
/// Output is sorted by (game_id, runner) with no repeated pair. Fails with
/// `MissingData` when nothing could be labeled.
pub fn build_labels(
    snapshots: &[FeatureSnapshot],
    results: &[GameResult],
    offset_minutes: i64,
) -> Result<LabelRun, PipelineError> {
    let offset = offset_minutes as f64;
    let winners: HashMap<&str, Runner> = results.iter().map(|r| (r.game_id.as_str(), r.winner)).collect();

    let mut by_game: BTreeMap<&str, Vec<&FeatureSnapshot>> = BTreeMap::new();
    for s in snapshots {
        by_game.entry(s.game_id.as_str()).or_default().push(s);
    }

    let games: BTreeSet<&str> = by_game.keys().copied().chain(winners.keys().copied()).collect();
    let mut run = LabelRun::default();

    for game_id in games {
        let Some(&winner) = winners.get(game_id) else {
            run.games_missing_result.push(game_id.to_string());
            continue;
        };
        let game_snaps = by_game.get(game_id).map(Vec::as_slice).unwrap_or(&[]);
        match label_game(game_id, game_snaps, winner, offset) {
            Ok(labels) => run.labels.extend(labels),
            Err(PipelineError::MissingData { .. }) => run.games_missing_snapshots.push(game_id.to_string()),
            Err(e) => return Err(e),
        }
    }

    run.labels.sort_by(|a, b| {
        a.game_id()
            .cmp(b.game_id())
            .then(a.runner().as_str().cmp(b.runner().as_str()))
    });

    run.primary = run.labels.iter().filter(|l| l.source == LabelSource::Primary).count();
    run.fallback = run.labels.len() - run.primary;

    if !run.games_missing_snapshots.is_empty() {
        warn!(
            "[labels] {} game(s) have a result but no snapshots: {:?}",
            run.games_missing_snapshots.len(),
            run.games_missing_snapshots
        );
    }
    if !run.games_missing_result.is_empty() {
        warn!(
            "[labels] {} game(s) have snapshots but no result: {:?}",
            run.games_missing_result.len(),
            run.games_missing_result
        );
    }
    if run.labels.is_empty() {
        return Err(PipelineError::missing(
            "decision snapshots",
            "features",
            "snapshots joined to results on game_id",
        ));
    }
    info!(
        "[labels] offset={}min rows={} (primary={}, fallback={})",
        offset_minutes,
        run.labels.len(),
        run.primary,
        run.fallback
    );
    Ok(run)
}
