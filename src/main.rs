use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

mod backtest;
mod config;
mod db;
mod error;
mod features;
mod ingest;
mod labeling;
mod model;
mod odds_api;
mod pipeline;
mod predict;
mod synth;

use config::{Command, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;
    info!(
        "League {} | offset {}min | EV >= {} | Kelly x{} | bankroll {:.2}",
        config.league,
        config.decision_offset_minutes,
        config.ev_threshold,
        config.kelly_fraction,
        config.start_bankroll
    );

    match &config.command {
        Command::Synth { games, seed } => {
            let s = pipeline::synth(&config, *games, *seed)?;
            info!("Synthesized {} games / {} ticks in {}", s.games, s.ticks, config.raw_dir().display());
        }
        Command::Ingest => {
            let s = pipeline::ingest(&config)?;
            info!(
                "Ingested ticks={} team_stats={} results={} schedule={} -> {}",
                s.ticks,
                s.team_stats,
                s.results,
                s.schedule,
                config.warehouse_path().display()
            );
        }
        Command::Features => {
            let b = pipeline::features(&config)?;
            info!("{} feature snapshots from {} windows", b.snapshots.len(), b.windows);
        }
        Command::Labels => {
            let run = pipeline::labels(&config)?;
            info!(
                "{} labels (primary={}, fallback={}) -> {}",
                run.labels.len(),
                run.primary,
                run.fallback,
                config.labels_csv().display()
            );
        }
        Command::Train(args) => {
            let report = pipeline::train(&config, args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Backtest(args) => {
            let summary = pipeline::backtest(&config, args)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Run { train, backtest } => {
            let summary = pipeline::run_all(&config, train, backtest)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::FetchOdds => {
            let n = pipeline::fetch_odds(&config).await?;
            info!("Saved {} quotes -> {}", n, config.live_odds_path().display());
        }
        Command::Predict { top, stake } => {
            let ops = pipeline::predict(&config, *top, *stake)?;
            if ops.is_empty() {
                warn!("No matchups could be scored");
            } else {
                println!("{}", predict::render_opportunities(&ops));
            }
        }
        Command::PredictGame {
            home_team,
            away_team,
            home_price,
            away_price,
        } => {
            let score = pipeline::predict_game(&config, home_team, away_team, *home_price, *away_price)?;
            println!("{}", predict::render_matchup(&score));
        }
    }

    Ok(())
}
