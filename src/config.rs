use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::backtest::{ReplayOrder, StakingConfig};
use crate::error::PipelineError;
use crate::features::FeatureConfig;
use crate::model::calibration::CalibrationMethod;
use crate::odds_api::DEFAULT_API_URL;

/// Sports-betting edge engine: ingest odds, label decision snapshots, train a
/// calibrated win model and backtest fractional-Kelly staking.
#[derive(Parser, Debug, Clone)]
#[command(name = "edge-engine", version, about)]
pub struct Config {
    /// League partition key (NBA, NFL, ...)
    #[arg(long, env = "LEAGUE", default_value = "NBA", global = true)]
    pub league: String,

    /// Root of vendor drops; files are read from <dir>/<league>/raw
    #[arg(long, env = "VENDORS_DIR", default_value = "data/vendors", global = true)]
    pub vendors_dir: PathBuf,

    /// Warehouse root; one SQLite file and CSV exports per league
    #[arg(long, env = "WAREHOUSE_DIR", default_value = "data/warehouse", global = true)]
    pub warehouse_dir: PathBuf,

    /// Model artifact root
    #[arg(long, env = "ARTIFACTS_DIR", default_value = "artifacts", global = true)]
    pub artifacts_dir: PathBuf,

    /// JSON report root
    #[arg(long, env = "REPORTS_DIR", default_value = "reports", global = true)]
    pub reports_dir: PathBuf,

    /// Minimum expected value per unit staked to place a bet
    #[arg(long, env = "EV_THRESHOLD", default_value = "0.01", global = true)]
    pub ev_threshold: f64,

    /// Fractional Kelly multiplier, in (0, 1]
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.25", global = true)]
    pub kelly_fraction: f64,

    /// Decisions are taken at least this many minutes before the start
    #[arg(long, env = "DECISION_OFFSET_MINUTES", default_value = "30", global = true)]
    pub decision_offset_minutes: i64,

    /// Backtest starting bankroll
    #[arg(long, env = "START_BANKROLL", default_value = "1000", global = true)]
    pub start_bankroll: f64,

    /// Feature aggregation window in seconds
    #[arg(long = "window-secs", env = "FEATURE_WINDOW_SECS", default_value = "60", global = true)]
    pub window_secs: i64,

    /// Windows whose overround reaches this are dropped
    #[arg(long, env = "MAX_VIG_SPREAD", default_value = "0.3", global = true)]
    pub max_vig_spread: f64,

    /// API key for the live odds feed
    #[arg(long, env = "ODDS_API_KEY", global = true, hide_env_values = true)]
    pub odds_api_key: Option<String>,

    /// Live odds feed base URL
    #[arg(long, env = "ODDS_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub odds_api_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Cross-validation folds
    #[arg(long, default_value_t = 3)]
    pub folds: usize,

    /// Seed for fold assignment
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = CalibrationMethod::Isotonic)]
    pub calibration: CalibrationMethod,
}

#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    /// Replay order for the bankroll
    #[arg(long, value_enum, default_value_t = ReplayOrder::Chronological)]
    pub order: ReplayOrder,

    /// Skip labels whose snapshot came from the fallback rule
    #[arg(long)]
    pub primary_only: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Write deterministic toy vendor files
    Synth {
        #[arg(long, default_value_t = 60)]
        games: usize,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// Load vendor files into the warehouse
    Ingest,
    /// Aggregate ticks into feature snapshots
    Features,
    /// Pick one decision snapshot per (game, runner) and attach the outcome
    Labels,
    /// Fit and calibrate the win model
    Train(TrainArgs),
    /// Replay scored labels through fractional-Kelly staking
    Backtest(BacktestArgs),
    /// Ingest, features, labels, train and backtest in one go
    Run {
        #[command(flatten)]
        train: TrainArgs,
        #[command(flatten)]
        backtest: BacktestArgs,
    },
    /// Download current moneyline prices
    FetchOdds,
    /// Rank live opportunities by expected value
    Predict {
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Stake used for the dollar EV column
        #[arg(long, default_value_t = 100.0)]
        stake: f64,
    },
    /// Score one matchup at explicit decimal prices
    PredictGame {
        #[arg(long)]
        home_team: String,
        #[arg(long)]
        away_team: String,
        #[arg(long)]
        home_price: f64,
        #[arg(long)]
        away_price: f64,
    },
}

impl Config {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.league.trim().is_empty() || !self.league.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PipelineError::invalid_config(format!(
                "league must be a non-empty alphanumeric code, got '{}'",
                self.league
            )));
        }
        if self.decision_offset_minutes < 0 {
            return Err(PipelineError::invalid_config(format!(
                "decision_offset_minutes must be non-negative, got {}",
                self.decision_offset_minutes
            )));
        }
        self.staking().validate()?;
        self.features().validate()?;
        match &self.command {
            Command::Synth { games: 0, .. } => {
                return Err(PipelineError::invalid_config("synth needs at least one game"));
            }
            Command::Train(t) | Command::Run { train: t, .. } if t.folds < 2 => {
                return Err(PipelineError::invalid_config(format!("folds must be at least 2, got {}", t.folds)));
            }
            Command::PredictGame { home_price, away_price, .. } if *home_price <= 1.0 || *away_price <= 1.0 => {
                return Err(PipelineError::invalid_config("decimal prices must exceed 1.0"));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn staking(&self) -> StakingConfig {
        StakingConfig {
            ev_threshold: self.ev_threshold,
            kelly_fraction: self.kelly_fraction,
            start_bankroll: self.start_bankroll,
        }
    }

    pub fn features(&self) -> FeatureConfig {
        FeatureConfig {
            window_secs: self.window_secs,
            max_vig_spread: self.max_vig_spread,
        }
    }

    // ── Paths ───────────────────────────────────────────────────────────────

    pub fn raw_dir(&self) -> PathBuf {
        self.vendors_dir.join(&self.league).join("raw")
    }

    fn league_warehouse(&self) -> PathBuf {
        self.warehouse_dir.join(&self.league)
    }

    pub fn warehouse_path(&self) -> PathBuf {
        self.league_warehouse().join("warehouse.sqlite")
    }

    pub fn labels_csv(&self) -> PathBuf {
        self.league_warehouse().join("labels.csv")
    }

    pub fn signals_csv(&self) -> PathBuf {
        self.league_warehouse().join("signals.csv")
    }

    pub fn live_odds_path(&self) -> PathBuf {
        self.league_warehouse().join("live_odds.json")
    }

    pub fn artifacts_path(&self) -> PathBuf {
        self.artifacts_dir.join(&self.league)
    }

    pub fn reports_path(&self) -> PathBuf {
        self.reports_dir.join(&self.league)
    }
}
