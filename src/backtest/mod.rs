pub mod kelly;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::models::{DecisionLabel, SignalRow};
use crate::error::PipelineError;

pub use kelly::{expected_value, kelly_stake};

// ── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakingConfig {
    pub ev_threshold: f64,
    pub kelly_fraction: f64,
    pub start_bankroll: f64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            ev_threshold: 0.01,
            kelly_fraction: 0.25,
            start_bankroll: 1000.0,
        }
    }
}

impl StakingConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.start_bankroll.is_finite() || self.start_bankroll <= 0.0 {
            return Err(PipelineError::invalid_config(format!(
                "start_bankroll must be a positive number, got {}",
                self.start_bankroll
            )));
        }
        if !(self.kelly_fraction > 0.0 && self.kelly_fraction <= 1.0) {
            return Err(PipelineError::invalid_config(format!(
                "kelly_fraction must be in (0, 1], got {}",
                self.kelly_fraction
            )));
        }
        if !self.ev_threshold.is_finite() {
            return Err(PipelineError::invalid_config(format!(
                "ev_threshold must be finite, got {}",
                self.ev_threshold
            )));
        }
        Ok(())
    }
}

/// Order in which scored labels are replayed against the bankroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayOrder {
    /// By decision timestamp, then (game_id, runner)
    #[default]
    Chronological,
    /// By (game_id, runner), the labeler's output order
    Label,
}

// ── Inputs and outputs ──────────────────────────────────────────────────────

/// A decision label with the model's calibrated win probability attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLabel {
    pub label: DecisionLabel,
    pub model_probability: f64,
    pub best_price: Option<f64>,
}

impl ScoredLabel {
    /// Score a label, betting at the best price seen in its decision window.
    pub fn new(label: DecisionLabel, model_probability: f64) -> Self {
        let best_price = label.snapshot.best_price;
        Self {
            label,
            model_probability,
            best_price,
        }
    }
}

pub const NO_OPPORTUNITY: &str = "NoOpportunity: no row met the EV threshold with a usable price";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub n_bets: usize,
    /// Mean EV over rows that were bet; 0 when none
    #[serde(rename = "avg_EV")]
    pub avg_ev: f64,
    pub final_bankroll: f64,
    #[serde(rename = "ROI")]
    pub roi: f64,
    pub start_bankroll: f64,
    pub n_rows: usize,
    /// Rows with a usable price (EV defined)
    pub n_priced: usize,
    pub n_wins: usize,
    /// Largest peak-to-trough bankroll decline as a fraction of the peak
    pub max_drawdown: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BacktestRun {
    pub signals: Vec<SignalRow>,
    pub summary: BacktestSummary,
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// Arrange rows in replay order. Stable, so equal keys keep input order.
pub fn order_rows(rows: &mut [ScoredLabel], order: ReplayOrder) {
    match order {
        ReplayOrder::Chronological => rows.sort_by(|a, b| {
            a.label
                .snapshot
                .timestamp
                .cmp(&b.label.snapshot.timestamp)
                .then_with(|| a.label.game_id().cmp(b.label.game_id()))
                .then_with(|| a.label.runner().as_str().cmp(b.label.runner().as_str()))
        }),
        ReplayOrder::Label => rows.sort_by(|a, b| {
            a.label
                .game_id()
                .cmp(b.label.game_id())
                .then_with(|| a.label.runner().as_str().cmp(b.label.runner().as_str()))
        }),
    }
}

#[derive(Debug, Clone, Copy)]
struct Ledger {
    bankroll: f64,
    peak: f64,
    max_drawdown: f64,
}

impl Ledger {
    fn settle(self, pnl: f64) -> Self {
        let bankroll = self.bankroll + pnl;
        let peak = self.peak.max(bankroll);
        let drawdown = if peak > 0.0 { (peak - bankroll) / peak } else { 0.0 };
        Self {
            bankroll,
            peak,
            max_drawdown: self.max_drawdown.max(drawdown),
        }
    }
}

/// Stake one row against the current bankroll. Returns (EV, stake, pnl).
fn stake_row(row: &ScoredLabel, bankroll: f64, cfg: &StakingConfig) -> (Option<f64>, f64, f64) {
    let p = row.model_probability;
    if !p.is_finite() {
        return (None, 0.0, 0.0);
    }
    let Some(price) = row.best_price else {
        return (None, 0.0, 0.0);
    };
    let Some(ev) = expected_value(p, price) else {
        return (None, 0.0, 0.0);
    };
    if ev < cfg.ev_threshold {
        return (Some(ev), 0.0, 0.0);
    }

    let stake = (kelly_stake(p, price, cfg.kelly_fraction) * bankroll).max(0.0);
    let pnl = if row.label.won() {
        stake * (price - 1.0)
    } else {
        -stake
    };
    (Some(ev), stake, pnl)
}

/// Replay scored labels in the given order, threading the bankroll through
/// each settled row.
pub fn run_backtest(
    mut rows: Vec<ScoredLabel>,
    cfg: &StakingConfig,
    order: ReplayOrder,
) -> Result<BacktestRun, PipelineError> {
    cfg.validate()?;
    if rows.is_empty() {
        return Err(PipelineError::missing(
            "scored labels",
            "labels",
            "decision labels with model probabilities",
        ));
    }
    order_rows(&mut rows, order);

    let n_rows = rows.len();
    let mut n_priced = 0usize;
    let mut n_bets = 0usize;
    let mut n_wins = 0usize;
    let mut ev_sum = 0.0;

    let start = Ledger {
        bankroll: cfg.start_bankroll,
        peak: cfg.start_bankroll,
        max_drawdown: 0.0,
    };
    let mut signals = Vec::with_capacity(n_rows);
    let ledger = rows.into_iter().fold(start, |ledger, row| {
        let (ev, stake, pnl) = stake_row(&row, ledger.bankroll, cfg);
        if ev.is_some() {
            n_priced += 1;
        }
        if stake > 0.0 {
            n_bets += 1;
            ev_sum += ev.unwrap_or(0.0);
            if row.label.won() {
                n_wins += 1;
            }
            debug!(
                "[backtest] bet {} {} p={:.3} P={:?} stake={:.2} pnl={:.2}",
                row.label.game_id(),
                row.label.runner(),
                row.model_probability,
                row.best_price,
                stake,
                pnl
            );
        }
        let next = ledger.settle(pnl);
        signals.push(SignalRow {
            label: row.label,
            model_probability: row.model_probability,
            best_price: row.best_price,
            expected_value: ev,
            stake,
            pnl,
            bankroll: next.bankroll,
        });
        next
    });

    let mut warnings = Vec::new();
    if n_bets == 0 {
        warn!("[backtest] no qualifying bets in {} rows (threshold {})", n_rows, cfg.ev_threshold);
        warnings.push(NO_OPPORTUNITY.to_string());
    }
    let unpriced = n_rows - n_priced;
    if unpriced > 0 {
        warn!("[backtest] {} row(s) had no usable price", unpriced);
    }

    let summary = BacktestSummary {
        n_bets,
        avg_ev: if n_bets > 0 { ev_sum / n_bets as f64 } else { 0.0 },
        final_bankroll: ledger.bankroll,
        roi: (ledger.bankroll - cfg.start_bankroll) / cfg.start_bankroll,
        start_bankroll: cfg.start_bankroll,
        n_rows,
        n_priced,
        n_wins,
        max_drawdown: ledger.max_drawdown,
        warnings,
    };
    info!(
        "[backtest] rows={} bets={} wins={} bankroll {:.2} -> {:.2} (ROI {:+.4}, maxDD {:.4})",
        summary.n_rows,
        summary.n_bets,
        summary.n_wins,
        summary.start_bankroll,
        summary.final_bankroll,
        summary.roi,
        summary.max_drawdown
    );
    Ok(BacktestRun { signals, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{FeatureSnapshot, LabelSource, Runner};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn row(game: &str, runner: Runner, minute: i64, p: f64, price: Option<f64>, won: bool) -> ScoredLabel {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap() + Duration::minutes(minute);
        let label = DecisionLabel {
            snapshot: FeatureSnapshot {
                seq: 0,
                game_id: game.into(),
                runner,
                timestamp: ts,
                implied_prob_mean: 0.5,
                implied_prob_vig_adj: 0.5,
                vig_spread: 0.03,
                home_away_ratio: 0.0,
                minutes_to_start: 30.0,
                margin: 0.0,
                fg_diff: 0.0,
                best_price: price,
            },
            outcome: u8::from(won),
            source: LabelSource::Primary,
        };
        ScoredLabel::new(label, p)
    }

    #[test]
    fn single_winning_bet_scenario() {
        let rows = vec![row("g1", Runner::Home, 0, 0.55, Some(2.0), true)];
        let run = run_backtest(rows, &StakingConfig::default(), ReplayOrder::Chronological).unwrap();
        let s = &run.signals[0];
        assert_relative_eq!(s.expected_value.unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(s.stake, 25.0, epsilon = 1e-9);
        assert_relative_eq!(s.pnl, 25.0, epsilon = 1e-9);
        assert_relative_eq!(s.bankroll, 1025.0, epsilon = 1e-9);
        assert_eq!(run.summary.n_bets, 1);
        assert_relative_eq!(run.summary.roi, 0.025, epsilon = 1e-12);
        assert_relative_eq!(run.summary.avg_ev, 0.1, epsilon = 1e-12);
        assert!(run.summary.warnings.is_empty());
    }

    #[test]
    fn bankroll_is_continuous_and_stakes_non_negative() {
        let rows = vec![
            row("g1", Runner::Home, 0, 0.60, Some(2.1), false),
            row("g1", Runner::Away, 0, 0.40, Some(1.9), true),
            row("g2", Runner::Home, 5, 0.70, Some(1.8), true),
            row("g2", Runner::Away, 5, 0.30, None, false),
            row("g3", Runner::Home, 9, 0.52, Some(2.3), false),
            row("g3", Runner::Away, 9, 0.48, Some(1.0), true),
        ];
        let cfg = StakingConfig::default();
        let run = run_backtest(rows, &cfg, ReplayOrder::Chronological).unwrap();

        let mut prev = cfg.start_bankroll;
        for s in &run.signals {
            assert!(s.stake >= 0.0);
            assert_relative_eq!(s.bankroll, prev + s.pnl, epsilon = 1e-9);
            match (s.best_price, s.expected_value) {
                (Some(p), Some(ev)) if p > 1.0 && ev >= cfg.ev_threshold => {}
                _ => assert_eq!(s.stake, 0.0),
            }
            prev = s.bankroll;
        }
        assert_relative_eq!(run.summary.final_bankroll, prev);
        assert_eq!(
            run.summary.roi,
            (run.summary.final_bankroll - cfg.start_bankroll) / cfg.start_bankroll
        );
        assert_eq!(run.summary.n_priced, 4);
        assert!(run.summary.max_drawdown > 0.0);
    }

    #[test]
    fn negative_kelly_and_missing_price_never_bet() {
        let rows = vec![
            row("g1", Runner::Home, 0, 0.3, Some(1.5), true),
            row("g2", Runner::Home, 1, 0.9, None, true),
        ];
        let run = run_backtest(rows, &StakingConfig::default(), ReplayOrder::Chronological).unwrap();
        assert!(run.signals.iter().all(|s| s.stake == 0.0 && s.pnl == 0.0));
        assert_eq!(run.signals[1].expected_value, None);
        assert_eq!(run.summary.n_bets, 0);
        assert_eq!(run.summary.avg_ev, 0.0);
        assert_eq!(run.summary.warnings, vec![NO_OPPORTUNITY.to_string()]);
        assert_relative_eq!(run.summary.final_bankroll, 1000.0);
    }

    #[test]
    fn chronological_order_sorts_by_timestamp_then_game() {
        let rows = vec![
            row("a", Runner::Home, 10, 0.5, Some(2.0), true),
            row("b", Runner::Home, 0, 0.5, Some(2.0), true),
            row("a", Runner::Away, 0, 0.5, Some(2.0), false),
        ];
        let run = run_backtest(rows.clone(), &StakingConfig::default(), ReplayOrder::Chronological).unwrap();
        let keys: Vec<_> = run.signals.iter().map(|s| (s.label.game_id(), s.label.runner())).collect();
        assert_eq!(keys, vec![("a", Runner::Away), ("b", Runner::Home), ("a", Runner::Home)]);

        let run = run_backtest(rows, &StakingConfig::default(), ReplayOrder::Label).unwrap();
        let keys: Vec<_> = run.signals.iter().map(|s| (s.label.game_id(), s.label.runner())).collect();
        assert_eq!(keys, vec![("a", Runner::Away), ("a", Runner::Home), ("b", Runner::Home)]);
    }

    #[test]
    fn identical_inputs_give_identical_json() {
        let rows = vec![
            row("g1", Runner::Home, 0, 0.62, Some(1.9), true),
            row("g2", Runner::Away, 3, 0.45, Some(2.6), false),
        ];
        let cfg = StakingConfig::default();
        let a = run_backtest(rows.clone(), &cfg, ReplayOrder::Chronological).unwrap();
        let b = run_backtest(rows, &cfg, ReplayOrder::Chronological).unwrap();
        assert_eq!(
            serde_json::to_string(&a.summary).unwrap(),
            serde_json::to_string(&b.summary).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&a.signals).unwrap(),
            serde_json::to_string(&b.signals).unwrap()
        );
    }

    #[test]
    fn summary_uses_report_key_names() {
        let rows = vec![row("g1", Runner::Home, 0, 0.55, Some(2.0), true)];
        let run = run_backtest(rows, &StakingConfig::default(), ReplayOrder::Chronological).unwrap();
        let v = serde_json::to_value(&run.summary).unwrap();
        for key in ["n_bets", "avg_EV", "final_bankroll", "ROI", "start_bankroll"] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let rows = vec![row("g1", Runner::Home, 0, 0.55, Some(2.0), true)];
        for cfg in [
            StakingConfig { start_bankroll: 0.0, ..Default::default() },
            StakingConfig { kelly_fraction: 1.5, ..Default::default() },
            StakingConfig { kelly_fraction: 0.0, ..Default::default() },
            StakingConfig { ev_threshold: f64::NAN, ..Default::default() },
        ] {
            assert!(matches!(
                run_backtest(rows.clone(), &cfg, ReplayOrder::Label),
                Err(PipelineError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn empty_input_is_missing_data() {
        assert!(matches!(
            run_backtest(Vec::new(), &StakingConfig::default(), ReplayOrder::Label),
            Err(PipelineError::MissingData { .. })
        ));
    }
}
