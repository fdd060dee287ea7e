use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row, Statement};
use std::path::{Path, PathBuf};

pub mod export;
pub mod models;
use models::*;

/// Per-league SQLite warehouse holding every canonical and derived table.
///
/// Each `replace_*` call rewrites its table inside one transaction, so a
/// stage re-run never mixes rows from two runs.
pub struct Warehouse {
    conn: Connection,
    path: PathBuf,
}

impl Warehouse {
    /// Open (or create) the warehouse at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open warehouse {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let wh = Warehouse {
            conn,
            path: path.to_path_buf(),
        };
        wh.run_migrations()?;
        Ok(wh)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let wh = Warehouse {
            conn,
            path: PathBuf::from(":memory:"),
        };
        wh.run_migrations()?;
        Ok(wh)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replace_rows<T, F>(&mut self, table: &str, insert_sql: &str, rows: &[T], mut insert: F) -> Result<usize>
    where
        F: FnMut(&mut Statement<'_>, &T) -> rusqlite::Result<usize>,
    {
        let tx = self.conn.transaction()?;
        tx.execute(&format!("DELETE FROM {table}"), [])?;
        {
            let mut stmt = tx.prepare(insert_sql)?;
            for row in rows {
                insert(&mut stmt, row)
                    .with_context(|| format!("Failed to insert into {table}"))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    // ── Ticks ─────────────────────────────────────────────────────────────────

    pub fn replace_ticks(&mut self, ticks: &[Tick]) -> Result<usize> {
        self.replace_rows(
            "ticks",
            "INSERT INTO ticks (ts_utc, game_id, book, market, runner, price_decimal)
             VALUES (?1,?2,?3,?4,?5,?6)",
            ticks,
            |stmt, t| {
                stmt.execute(params![
                    t.timestamp,
                    t.game_id,
                    t.book,
                    t.market,
                    t.runner.as_str(),
                    t.decimal_price,
                ])
            },
        )
    }

    pub fn load_ticks(&self) -> Result<Vec<Tick>> {
        let mut stmt = self.conn.prepare(
            "SELECT ts_utc, game_id, book, market, runner, price_decimal
             FROM ticks ORDER BY game_id, ts_utc, book, runner",
        )?;
        let ticks = stmt
            .query_map([], |row| {
                Ok(Tick {
                    timestamp: row.get(0)?,
                    game_id: row.get(1)?,
                    book: row.get(2)?,
                    market: row.get(3)?,
                    runner: runner_at(row, 4)?,
                    decimal_price: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ticks)
    }

    // ── Team stats ────────────────────────────────────────────────────────────

    pub fn replace_team_stats(&mut self, stats: &[TeamStats]) -> Result<usize> {
        self.replace_rows(
            "team_stats",
            "INSERT INTO team_stats (team_id, season, games, margin, fg_diff, home_win)
             VALUES (?1,?2,?3,?4,?5,?6)",
            stats,
            |stmt, s| {
                stmt.execute(params![s.team_id, s.season, s.games, s.margin, s.fg_diff, s.home_win])
            },
        )
    }

    pub fn load_team_stats(&self) -> Result<Vec<TeamStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT team_id, season, games, margin, fg_diff, home_win
             FROM team_stats ORDER BY team_id, season",
        )?;
        let stats = stmt
            .query_map([], |row| {
                Ok(TeamStats {
                    team_id: row.get(0)?,
                    season: row.get(1)?,
                    games: row.get(2)?,
                    margin: row.get(3)?,
                    fg_diff: row.get(4)?,
                    home_win: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    // ── Results & schedule ────────────────────────────────────────────────────

    pub fn replace_results(&mut self, results: &[GameResult]) -> Result<usize> {
        self.replace_rows(
            "results",
            "INSERT INTO results (game_id, final_home_score, final_away_score, winner)
             VALUES (?1,?2,?3,?4)",
            results,
            |stmt, r| {
                stmt.execute(params![
                    r.game_id,
                    r.final_home_score,
                    r.final_away_score,
                    r.winner.as_str(),
                ])
            },
        )
    }

    pub fn load_results(&self) -> Result<Vec<GameResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT game_id, final_home_score, final_away_score, winner
             FROM results ORDER BY game_id",
        )?;
        let results = stmt
            .query_map([], |row| {
                Ok(GameResult {
                    game_id: row.get(0)?,
                    final_home_score: row.get(1)?,
                    final_away_score: row.get(2)?,
                    winner: runner_at(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    pub fn replace_schedule(&mut self, games: &[ScheduledGame]) -> Result<usize> {
        self.replace_rows(
            "schedule",
            "INSERT INTO schedule (game_id, season, start_time_utc, home_team, away_team)
             VALUES (?1,?2,?3,?4,?5)",
            games,
            |stmt, g| {
                stmt.execute(params![g.game_id, g.season, g.start_time, g.home_team, g.away_team])
            },
        )
    }

    pub fn load_schedule(&self) -> Result<Vec<ScheduledGame>> {
        let mut stmt = self.conn.prepare(
            "SELECT game_id, season, start_time_utc, home_team, away_team
             FROM schedule ORDER BY start_time_utc, game_id",
        )?;
        let games = stmt
            .query_map([], |row| {
                Ok(ScheduledGame {
                    game_id: row.get(0)?,
                    season: row.get(1)?,
                    start_time: row.get(2)?,
                    home_team: row.get(3)?,
                    away_team: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }

    // ── Features & labels ─────────────────────────────────────────────────────

    pub fn replace_features(&mut self, snapshots: &[FeatureSnapshot]) -> Result<usize> {
        self.replace_rows(
            "features",
            "INSERT INTO features (seq, game_id, runner, ts_utc, implied_prob_mean,
                                   implied_prob_vig_adj, vig_spread, home_away_ratio,
                                   minutes_to_start, margin, fg_diff, best_price)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            snapshots,
            |stmt, s| {
                stmt.execute(params![
                    s.seq,
                    s.game_id,
                    s.runner.as_str(),
                    s.timestamp,
                    s.implied_prob_mean,
                    s.implied_prob_vig_adj,
                    s.vig_spread,
                    s.home_away_ratio,
                    s.minutes_to_start,
                    s.margin,
                    s.fg_diff,
                    s.best_price,
                ])
            },
        )
    }

    pub fn load_features(&self) -> Result<Vec<FeatureSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SNAPSHOT_COLS} FROM features ORDER BY seq"))?;
        let snapshots = stmt
            .query_map([], |row| map_snapshot(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    pub fn replace_labels(&mut self, labels: &[DecisionLabel]) -> Result<usize> {
        self.replace_rows(
            "labels",
            "INSERT INTO labels (seq, game_id, runner, ts_utc, implied_prob_mean,
                                 implied_prob_vig_adj, vig_spread, home_away_ratio,
                                 minutes_to_start, margin, fg_diff, best_price,
                                 outcome, source)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            labels,
            |stmt, l| {
                let s = &l.snapshot;
                stmt.execute(params![
                    s.seq,
                    s.game_id,
                    s.runner.as_str(),
                    s.timestamp,
                    s.implied_prob_mean,
                    s.implied_prob_vig_adj,
                    s.vig_spread,
                    s.home_away_ratio,
                    s.minutes_to_start,
                    s.margin,
                    s.fg_diff,
                    s.best_price,
                    l.outcome,
                    l.source.as_str(),
                ])
            },
        )
    }

    pub fn load_labels(&self) -> Result<Vec<DecisionLabel>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLS}, outcome, source FROM labels ORDER BY game_id, runner"
        ))?;
        let labels = stmt
            .query_map([], |row| map_label(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    // ── Signals ───────────────────────────────────────────────────────────────

    /// Replace the signal table; `row_idx` preserves replay order.
    pub fn replace_signals(&mut self, signals: &[SignalRow]) -> Result<usize> {
        let indexed: Vec<(i64, &SignalRow)> = signals
            .iter()
            .enumerate()
            .map(|(i, s)| (i as i64, s))
            .collect();
        self.replace_rows(
            "signals",
            "INSERT INTO signals (row_idx, seq, game_id, runner, ts_utc, implied_prob_mean,
                                  implied_prob_vig_adj, vig_spread, home_away_ratio,
                                  minutes_to_start, margin, fg_diff, best_price,
                                  outcome, source, model_probability, signal_price,
                                  expected_value, stake, pnl, bankroll)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
            &indexed,
            |stmt, (idx, sig)| {
                let s = &sig.label.snapshot;
                stmt.execute(params![
                    idx,
                    s.seq,
                    s.game_id,
                    s.runner.as_str(),
                    s.timestamp,
                    s.implied_prob_mean,
                    s.implied_prob_vig_adj,
                    s.vig_spread,
                    s.home_away_ratio,
                    s.minutes_to_start,
                    s.margin,
                    s.fg_diff,
                    s.best_price,
                    sig.label.outcome,
                    sig.label.source.as_str(),
                    sig.model_probability,
                    sig.best_price,
                    sig.expected_value,
                    sig.stake,
                    sig.pnl,
                    sig.bankroll,
                ])
            },
        )
    }
}

#[cfg(test)]
impl Warehouse {
    pub fn load_signals(&self) -> Result<Vec<SignalRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLS}, outcome, source, model_probability, signal_price,
                    expected_value, stake, pnl, bankroll
             FROM signals ORDER BY row_idx"
        ))?;
        let signals = stmt
            .query_map([], |row| {
                Ok(SignalRow {
                    label: map_label(row)?,
                    model_probability: row.get(14)?,
                    best_price: row.get(15)?,
                    expected_value: row.get(16)?,
                    stake: row.get(17)?,
                    pnl: row.get(18)?,
                    bankroll: row.get(19)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(signals)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const SNAPSHOT_COLS: &str = "seq, game_id, runner, ts_utc, implied_prob_mean, implied_prob_vig_adj,
    vig_spread, home_away_ratio, minutes_to_start, margin, fg_diff, best_price";

fn runner_at(row: &Row, idx: usize) -> rusqlite::Result<Runner> {
    let raw: String = row.get(idx)?;
    Runner::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown runner '{raw}'").into(),
        )
    })
}

fn map_snapshot(row: &Row) -> rusqlite::Result<FeatureSnapshot> {
    Ok(FeatureSnapshot {
        seq: row.get(0)?,
        game_id: row.get(1)?,
        runner: runner_at(row, 2)?,
        timestamp: row.get(3)?,
        implied_prob_mean: row.get(4)?,
        implied_prob_vig_adj: row.get(5)?,
        vig_spread: row.get(6)?,
        home_away_ratio: row.get(7)?,
        minutes_to_start: row.get(8)?,
        margin: row.get(9)?,
        fg_diff: row.get(10)?,
        best_price: row.get(11)?,
    })
}

fn map_label(row: &Row) -> rusqlite::Result<DecisionLabel> {
    let source: String = row.get(13)?;
    Ok(DecisionLabel {
        snapshot: map_snapshot(row)?,
        outcome: row.get(12)?,
        source: LabelSource::parse(&source).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                13,
                rusqlite::types::Type::Text,
                format!("unknown label source '{source}'").into(),
            )
        })?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ticks (
    ts_utc        TEXT NOT NULL,
    game_id       TEXT NOT NULL,
    book          TEXT NOT NULL,
    market        TEXT NOT NULL,
    runner        TEXT NOT NULL,
    price_decimal REAL NOT NULL CHECK (price_decimal > 1.0),
    PRIMARY KEY (ts_utc, game_id, book, runner)
);

CREATE TABLE IF NOT EXISTS team_stats (
    team_id  TEXT    NOT NULL,
    season   TEXT    NOT NULL,
    games    INTEGER NOT NULL,
    margin   REAL    NOT NULL,
    fg_diff  REAL    NOT NULL,
    home_win REAL    NOT NULL,
    PRIMARY KEY (team_id, season)
);

CREATE TABLE IF NOT EXISTS results (
    game_id          TEXT    PRIMARY KEY,
    final_home_score INTEGER NOT NULL,
    final_away_score INTEGER NOT NULL,
    winner           TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS schedule (
    game_id        TEXT PRIMARY KEY,
    season         TEXT NOT NULL,
    start_time_utc TEXT NOT NULL,
    home_team      TEXT NOT NULL,
    away_team      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS features (
    seq                  INTEGER PRIMARY KEY,
    game_id              TEXT NOT NULL,
    runner               TEXT NOT NULL,
    ts_utc               TEXT NOT NULL,
    implied_prob_mean    REAL NOT NULL,
    implied_prob_vig_adj REAL NOT NULL,
    vig_spread           REAL NOT NULL,
    home_away_ratio      REAL NOT NULL,
    minutes_to_start     REAL NOT NULL,
    margin               REAL NOT NULL,
    fg_diff              REAL NOT NULL,
    best_price           REAL
);

CREATE TABLE IF NOT EXISTS labels (
    seq                  INTEGER NOT NULL,
    game_id              TEXT NOT NULL,
    runner               TEXT NOT NULL,
    ts_utc               TEXT NOT NULL,
    implied_prob_mean    REAL NOT NULL,
    implied_prob_vig_adj REAL NOT NULL,
    vig_spread           REAL NOT NULL,
    home_away_ratio      REAL NOT NULL,
    minutes_to_start     REAL NOT NULL,
    margin               REAL NOT NULL,
    fg_diff              REAL NOT NULL,
    best_price           REAL,
    outcome              INTEGER NOT NULL,
    source               TEXT NOT NULL,
    PRIMARY KEY (game_id, runner)
);

CREATE TABLE IF NOT EXISTS signals (
    row_idx              INTEGER PRIMARY KEY,
    seq                  INTEGER NOT NULL,
    game_id              TEXT NOT NULL,
    runner               TEXT NOT NULL,
    ts_utc               TEXT NOT NULL,
    implied_prob_mean    REAL NOT NULL,
    implied_prob_vig_adj REAL NOT NULL,
    vig_spread           REAL NOT NULL,
    home_away_ratio      REAL NOT NULL,
    minutes_to_start     REAL NOT NULL,
    margin               REAL NOT NULL,
    fg_diff              REAL NOT NULL,
    best_price           REAL,
    outcome              INTEGER NOT NULL,
    source               TEXT NOT NULL,
    model_probability    REAL NOT NULL,
    signal_price         REAL,
    expected_value       REAL,
    stake                REAL NOT NULL,
    pnl                  REAL NOT NULL,
    bankroll             REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_features_game ON features(game_id, runner);
CREATE INDEX IF NOT EXISTS idx_signals_game ON signals(game_id);
"#;
