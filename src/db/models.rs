use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of a two-way moneyline a quote or label refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Runner {
    Home,
    Away,
}

impl Runner {
    pub const BOTH: [Runner; 2] = [Runner::Home, Runner::Away];

    pub fn as_str(&self) -> &'static str {
        match self {
            Runner::Home => "HOME",
            Runner::Away => "AWAY",
        }
    }

    /// Case-insensitive parse of "HOME" / "AWAY".
    pub fn parse(s: &str) -> Option<Runner> {
        match s.trim().to_uppercase().as_str() {
            "HOME" => Some(Runner::Home),
            "AWAY" => Some(Runner::Away),
            _ => None,
        }
    }
}

impl fmt::Display for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One market quote in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub game_id: String,
    /// Lowercased bookmaker key, e.g. "pinnacle"
    pub book: String,
    /// Market name; only "moneyline" survives ingestion
    pub market: String,
    pub runner: Runner,
    /// Decimal odds, strictly greater than 1.0
    pub decimal_price: f64,
}

/// Season-level team performance aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub team_id: String,
    pub season: String,
    pub games: u32,
    /// Mean point differential from this team's perspective
    pub margin: f64,
    /// Mean field-goal-percentage differential from this team's perspective
    pub fg_diff: f64,
    /// Share of home games won (0.0–1.0)
    pub home_win: f64,
}

/// Final score of a completed game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub game_id: String,
    pub final_home_score: i32,
    pub final_away_score: i32,
    pub winner: Runner,
}

/// Scheduled start and participants of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledGame {
    pub game_id: String,
    pub season: String,
    pub start_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
}

/// Names of the model inputs, in `FeatureSnapshot::feature_vector` order.
pub const FEATURE_NAMES: [&str; 6] = [
    "implied_prob_mean",
    "implied_prob_vig_adj",
    "vig_spread",
    "home_away_ratio",
    "margin",
    "fg_diff",
];

/// One engineered observation for a (game, runner) at an aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    /// Deterministic sequence id assigned in (game_id, runner, timestamp) order
    pub seq: i64,
    pub game_id: String,
    pub runner: Runner,
    pub timestamp: DateTime<Utc>,
    pub implied_prob_mean: f64,
    pub implied_prob_vig_adj: f64,
    pub vig_spread: f64,
    pub home_away_ratio: f64,
    /// Minutes until the scheduled start; negative once the game is underway
    pub minutes_to_start: f64,
    pub margin: f64,
    pub fg_diff: f64,
    /// Best decimal price across books in this window
    pub best_price: Option<f64>,
}

impl FeatureSnapshot {
    pub fn feature_vector(&self) -> Vec<f64> {
        vec![
            self.implied_prob_mean,
            self.implied_prob_vig_adj,
            self.vig_spread,
            self.home_away_ratio,
            self.margin,
            self.fg_diff,
        ]
    }
}

/// How a decision snapshot was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSource {
    /// Closest snapshot at or before the decision offset
    Primary,
    /// Every snapshot was inside the offset window; latest one used
    Fallback,
}

impl LabelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelSource::Primary => "primary",
            LabelSource::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<LabelSource> {
        match s {
            "primary" => Some(LabelSource::Primary),
            "fallback" => Some(LabelSource::Fallback),
            _ => None,
        }
    }
}

/// The single chosen snapshot for a (game, runner) plus its realized outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLabel {
    pub snapshot: FeatureSnapshot,
    /// 1 if `snapshot.runner` won the game, else 0
    pub outcome: u8,
    pub source: LabelSource,
}

impl DecisionLabel {
    pub fn game_id(&self) -> &str {
        &self.snapshot.game_id
    }

    pub fn runner(&self) -> Runner {
        self.snapshot.runner
    }

    pub fn won(&self) -> bool {
        self.outcome == 1
    }
}

/// A decision label after scoring and staking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub label: DecisionLabel,
    pub model_probability: f64,
    pub best_price: Option<f64>,
    /// `None` when no usable price was available
    pub expected_value: Option<f64>,
    pub stake: f64,
    pub pnl: f64,
    /// Bankroll after this row settled
    pub bankroll: f64,
}

/// Current two-way prices for one matchup at one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveQuote {
    pub home_team: String,
    pub away_team: String,
    pub book: String,
    pub home_price: f64,
    pub away_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commence_time: Option<DateTime<Utc>>,
}
