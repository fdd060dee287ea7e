//! Deterministic toy vendor data for demos and end-to-end tests.
//!
//! Writes `odds.csv`, `team_stats.csv`, `results.csv` and `schedule.csv` in
//! the vendor layouts that ingestion reads. Prices follow a hidden team
//! strength so the trained model has something to find.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

const TEAMS: [&str; 8] = [
    "Boston Celtics",
    "Denver Nuggets",
    "Golden State Warriors",
    "Los Angeles Lakers",
    "Miami Heat",
    "Milwaukee Bucks",
    "New York Knicks",
    "Phoenix Suns",
];
const BOOKS: [&str; 3] = ["draftkings", "fanduel", "pinnacle"];
const SEASON: &str = "2024";

#[derive(Debug, Clone, Copy)]
pub struct SynthConfig {
    pub games: usize,
    pub seed: u64,
    /// Every n-th game only has quotes inside the last 25 minutes
    pub late_feed_every: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            games: 60,
            seed: 7,
            late_feed_every: 7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthSummary {
    pub games: usize,
    pub ticks: usize,
    pub late_feed_games: usize,
}

struct Game {
    id: String,
    start: DateTime<Utc>,
    home: usize,
    away: usize,
    p_home: f64,
    late_feed: bool,
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Write a full set of vendor files into `dir`.
pub fn write_vendor_files(dir: &Path, cfg: &SynthConfig) -> Result<SynthSummary> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let strength: Vec<f64> = TEAMS.iter().map(|_| rng.gen_range(-8.0..8.0)).collect();
    let first_tip = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).single().context("invalid base date")?;

    let games: Vec<Game> = (0..cfg.games)
        .map(|i| {
            let home = rng.gen_range(0..TEAMS.len());
            let mut away = rng.gen_range(0..TEAMS.len() - 1);
            if away >= home {
                away += 1;
            }
            let p_home = logistic((strength[home] - strength[away]) / 6.0 + 0.15);
            Game {
                id: format!("G{:04}", i + 1),
                start: first_tip + Duration::hours(6 * i as i64),
                home,
                away,
                p_home,
                late_feed: cfg.late_feed_every > 0 && (i + 1) % cfg.late_feed_every == 0,
            }
        })
        .collect();

    let mut summary = SynthSummary {
        games: games.len(),
        ..Default::default()
    };

    let mut odds = create(&dir.join("odds.csv"))?;
    writeln!(odds, "ts_utc,game_id,book,market,runner,price_decimal")?;
    for g in &games {
        let first = if g.late_feed { -25 } else { -180 };
        if g.late_feed {
            summary.late_feed_games += 1;
        }
        let mut p = g.p_home;
        for minute in (first..=20).step_by(5) {
            p = (p + rng.gen_range(-0.01..0.01)).clamp(0.05, 0.95);
            let ts = (g.start + Duration::minutes(minute)).format("%Y-%m-%dT%H:%M:%SZ");
            for book in BOOKS {
                let vig = 1.0 + rng.gen_range(0.02..0.05);
                let home_price = (1.0 / (p * vig)).max(1.01);
                let away_price = (1.0 / ((1.0 - p) * vig)).max(1.01);
                writeln!(odds, "{ts},{},{book},moneyline,HOME,{home_price:.3}", g.id)?;
                writeln!(odds, "{ts},{},{book},moneyline,AWAY,{away_price:.3}", g.id)?;
                summary.ticks += 2;
            }
        }
    }
    odds.flush()?;

    let mut stats = create(&dir.join("team_stats.csv"))?;
    writeln!(stats, "team_id,season,games,margin,fg_diff,home_win")?;
    for (team, s) in TEAMS.iter().zip(&strength) {
        let margin = s + rng.gen_range(-1.0..1.0);
        let fg_diff = s / 200.0 + rng.gen_range(-0.005..0.005);
        let home_win = logistic(s / 6.0 + 0.15);
        writeln!(stats, "{team},{SEASON},82,{margin:.3},{fg_diff:.4},{home_win:.3}")?;
    }
    stats.flush()?;

    let mut schedule = create(&dir.join("schedule.csv"))?;
    let mut results = create(&dir.join("results.csv"))?;
    writeln!(schedule, "game_id,season,start_time_utc,home_team,away_team")?;
    writeln!(results, "game_id,final_home_score,final_away_score")?;
    for g in &games {
        writeln!(
            schedule,
            "{},{SEASON},{},{},{}",
            g.id,
            g.start.format("%Y-%m-%dT%H:%M:%SZ"),
            TEAMS[g.home],
            TEAMS[g.away]
        )?;
        let home_won = rng.gen::<f64>() < g.p_home;
        let loser = rng.gen_range(88..112);
        let winner = loser + rng.gen_range(1..18);
        let (h, a) = if home_won { (winner, loser) } else { (loser, winner) };
        writeln!(results, "{},{h},{a}", g.id)?;
    }
    schedule.flush()?;
    results.flush()?;

    info!(
        "[synth] {} games, {} ticks ({} late-feed games) -> {}",
        summary.games,
        summary.ticks,
        summary.late_feed_games,
        dir.display()
    );
    Ok(summary)
}
