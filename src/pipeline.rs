//! Stage runners: each reads its inputs from the league warehouse (or vendor
//! files), writes its outputs back, and returns what it produced.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::backtest::{self, BacktestSummary};
use crate::config::{BacktestArgs, Config, TrainArgs};
use crate::db::models::LabelSource;
use crate::db::{export, Warehouse};
use crate::error::PipelineError;
use crate::features::{self, FeatureBuild};
use crate::ingest::{self, IngestSummary};
use crate::labeling::{self, LabelRun};
use crate::model::train::{self, TrainConfig, TrainReport};
use crate::model::{self, artifacts};
use crate::odds_api::{self, OddsApiClient};
use crate::predict::{self, MatchupScore, Opportunity, StatsIndex};
use crate::synth::{self, SynthConfig, SynthSummary};

fn open_warehouse(cfg: &Config) -> Result<Warehouse> {
    Warehouse::open(&cfg.warehouse_path())
}

fn write_report<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Report -> {}", path.display());
    Ok(())
}

pub fn synth(cfg: &Config, games: usize, seed: u64) -> Result<SynthSummary> {
    let synth_cfg = SynthConfig {
        games,
        seed,
        ..Default::default()
    };
    synth::write_vendor_files(&cfg.raw_dir(), &synth_cfg)
}

pub fn ingest(cfg: &Config) -> Result<IngestSummary> {
    let mut wh = open_warehouse(cfg)?;
    ingest::run(&cfg.raw_dir(), &mut wh)
}

pub fn features(cfg: &Config) -> Result<FeatureBuild> {
    let mut wh = open_warehouse(cfg)?;
    let ticks = wh.load_ticks()?;
    if ticks.is_empty() {
        return Err(PipelineError::missing("ticks table", wh.path(), "run `ingest` first").into());
    }
    let schedule = wh.load_schedule()?;
    let team_stats = wh.load_team_stats()?;

    let build = features::build_features(&ticks, &schedule, &team_stats, &cfg.features());
    if build.snapshots.is_empty() {
        return Err(PipelineError::missing(
            "feature snapshots",
            wh.path(),
            "two-sided windows for scheduled games with team stats",
        )
        .into());
    }
    wh.replace_features(&build.snapshots)?;
    Ok(build)
}

pub fn labels(cfg: &Config) -> Result<LabelRun> {
    let mut wh = open_warehouse(cfg)?;
    let snapshots = wh.load_features()?;
    if snapshots.is_empty() {
        return Err(PipelineError::missing("features table", wh.path(), "run `features` first").into());
    }
    let results = wh.load_results()?;
    let run = labeling::build_labels(&snapshots, &results, cfg.decision_offset_minutes)?;
    wh.replace_labels(&run.labels)?;
    export::write_labels_csv(&cfg.labels_csv(), &run.labels)?;
    Ok(run)
}

pub fn train(cfg: &Config, args: &TrainArgs) -> Result<TrainReport> {
    let wh = open_warehouse(cfg)?;
    let labels = wh.load_labels()?;
    if labels.is_empty() {
        return Err(PipelineError::missing("labels table", wh.path(), "run `labels` first").into());
    }
    let train_cfg = TrainConfig {
        folds: args.folds,
        seed: args.seed,
        calibration: args.calibration,
        ..Default::default()
    };
    let outcome = train::train(&labels, &train_cfg)?;
    artifacts::save(&cfg.artifacts_path(), &outcome.model, &outcome.calibrator)?;
    write_report(&cfg.reports_path().join("train.json"), &outcome.report)?;
    Ok(outcome.report)
}

pub fn backtest(cfg: &Config, args: &BacktestArgs) -> Result<BacktestSummary> {
    let mut wh = open_warehouse(cfg)?;
    let mut labels = wh.load_labels()?;
    if args.primary_only {
        let before = labels.len();
        labels.retain(|l| l.source == LabelSource::Primary);
        info!("[backtest] primary-only: kept {} of {} labels", labels.len(), before);
    }
    let predictor = artifacts::load(&cfg.artifacts_path())?;
    let scored = model::score_labels(&predictor, labels);

    let run = backtest::run_backtest(scored, &cfg.staking(), args.order)?;
    wh.replace_signals(&run.signals)?;
    export::write_signals_csv(&cfg.signals_csv(), &run.signals)?;
    write_report(&cfg.reports_path().join("backtest.json"), &run.summary)?;
    Ok(run.summary)
}

/// Every offline stage in order.
pub fn run_all(cfg: &Config, train_args: &TrainArgs, bt_args: &BacktestArgs) -> Result<BacktestSummary> {
    let ingested = ingest(cfg)?;
    info!(
        "[run] ingested ticks={} stats={} results={} schedule={}",
        ingested.ticks, ingested.team_stats, ingested.results, ingested.schedule
    );
    let build = features(cfg)?;
    info!("[run] {} feature snapshots", build.snapshots.len());
    let labeled = labels(cfg)?;
    info!("[run] {} labels ({} fallback)", labeled.labels.len(), labeled.fallback);
    let report = train(cfg, train_args)?;
    info!("[run] CV brier {:.4}", report.mean_brier);
    backtest(cfg, bt_args)
}

pub async fn fetch_odds(cfg: &Config) -> Result<usize> {
    let api_key = cfg
        .odds_api_key
        .clone()
        .ok_or_else(|| PipelineError::invalid_config("ODDS_API_KEY is required for fetch-odds"))?;
    let sport = odds_api::sport_key(&cfg.league)
        .ok_or_else(|| PipelineError::invalid_config(format!("no odds feed sport for league {}", cfg.league)))?;
    let client = OddsApiClient::new(&cfg.odds_api_url, api_key)?;
    let quotes = odds_api::fetch_with_retry(&client, sport).await?;
    if quotes.is_empty() {
        warn!("No {} matchups currently quoted", cfg.league);
    }
    odds_api::save_quotes(&cfg.live_odds_path(), &quotes)?;
    Ok(quotes.len())
}

pub fn predict(cfg: &Config, top: usize, stake: f64) -> Result<Vec<Opportunity>> {
    let wh = open_warehouse(cfg)?;
    let stats = wh.load_team_stats()?;
    let index = StatsIndex::new(&stats);
    let quotes = odds_api::load_quotes(&cfg.live_odds_path())?;
    let predictor = artifacts::load(&cfg.artifacts_path())?;
    Ok(predict::rank_opportunities(&predictor, &index, &quotes, stake, top))
}

pub fn predict_game(cfg: &Config, home: &str, away: &str, home_price: f64, away_price: f64) -> Result<MatchupScore> {
    let wh = open_warehouse(cfg)?;
    let stats = wh.load_team_stats()?;
    let index = StatsIndex::new(&stats);
    let predictor = artifacts::load(&cfg.artifacts_path())?;
    Ok(predict::score_matchup(&predictor, &index, home, away, home_price, away_price)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::ReplayOrder;
    use crate::config::Command;
    use clap::Parser;
    use std::path::PathBuf;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("edge-engine-pipeline-{tag}-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    fn config(root: &Path) -> Config {
        let dir = |d: &str| root.join(d).display().to_string();
        Config::try_parse_from([
            "edge-engine".to_string(),
            "--league".into(),
            "NBA".into(),
            "--vendors-dir".into(),
            dir("vendors"),
            "--warehouse-dir".into(),
            dir("warehouse"),
            "--artifacts-dir".into(),
            dir("artifacts"),
            "--reports-dir".into(),
            dir("reports"),
            "run".into(),
        ])
        .unwrap()
    }

    fn run_args(cfg: &Config) -> (TrainArgs, BacktestArgs) {
        match &cfg.command {
            Command::Run { train, backtest } => (train.clone(), backtest.clone()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn end_to_end_on_synthetic_league() {
        let root = scratch("e2e");
        let cfg = config(&root);
        cfg.validate().unwrap();
        let (train_args, bt_args) = run_args(&cfg);
        assert_eq!(bt_args.order, ReplayOrder::Chronological);

        synth(&cfg, 40, 7).unwrap();
        let summary = run_all(&cfg, &train_args, &bt_args).unwrap();
        assert_eq!(summary.n_rows, 80);
        assert_eq!(summary.start_bankroll, 1000.0);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(cfg.reports_path().join("backtest.json")).unwrap()).unwrap();
        for key in ["n_bets", "avg_EV", "final_bankroll", "ROI", "start_bankroll"] {
            assert!(report.get(key).is_some(), "backtest.json lacks {key}");
        }
        assert!(cfg.reports_path().join("train.json").is_file());
        assert!(cfg.labels_csv().is_file());
        assert!(cfg.signals_csv().is_file());

        let wh = Warehouse::open(&cfg.warehouse_path()).unwrap();
        let labels = wh.load_labels().unwrap();
        assert!(labels
            .iter()
            .all(|l| l.snapshot.minutes_to_start >= 30.0 || l.source == LabelSource::Fallback));
        assert!(labels.iter().any(|l| l.source == LabelSource::Fallback));

        let signals = wh.load_signals().unwrap();
        let mut prev = summary.start_bankroll;
        for s in &signals {
            assert!((s.bankroll - (prev + s.pnl)).abs() < 1e-9);
            prev = s.bankroll;
        }

        // a second backtest over the same warehouse is byte-identical
        let first = std::fs::read_to_string(cfg.signals_csv()).unwrap();
        backtest(&cfg, &bt_args).unwrap();
        assert_eq!(first, std::fs::read_to_string(cfg.signals_csv()).unwrap());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn primary_only_keeps_fallback_rows_out_of_signals() {
        let root = scratch("primary-only");
        let cfg = config(&root);
        let (train_args, _) = run_args(&cfg);
        let bt_args = BacktestArgs {
            order: ReplayOrder::Chronological,
            primary_only: true,
        };
        synth(&cfg, 40, 7).unwrap();
        let summary = run_all(&cfg, &train_args, &bt_args).unwrap();

        let wh = Warehouse::open(&cfg.warehouse_path()).unwrap();
        let labels = wh.load_labels().unwrap();
        let primary = labels.iter().filter(|l| l.source == LabelSource::Primary).count();
        assert!(primary < labels.len());

        let signals = wh.load_signals().unwrap();
        assert_eq!(signals.len(), primary);
        assert_eq!(summary.n_rows, primary);
        assert!(signals.iter().all(|s| s.label.source == LabelSource::Primary));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn backtest_without_artifacts_is_missing_data() {
        let root = scratch("no-artifacts");
        let cfg = config(&root);
        let (_, bt_args) = run_args(&cfg);
        let err = backtest(&cfg, &bt_args).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::MissingData { .. })));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn predict_game_uses_saved_artifacts() {
        let root = scratch("predict-game");
        let cfg = config(&root);
        let (train_args, bt_args) = run_args(&cfg);
        synth(&cfg, 30, 7).unwrap();
        run_all(&cfg, &train_args, &bt_args).unwrap();

        let score = predict_game(&cfg, "Boston Celtics", "Miami Heat", 1.9, 2.0).unwrap();
        assert!((0.0..=1.0).contains(&score.home.model_probability));
        assert!((0.0..=1.0).contains(&score.away.model_probability));
        std::fs::remove_dir_all(&root).ok();
    }
}
