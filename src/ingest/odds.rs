//! Vendor odds files → canonical moneyline ticks.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use super::table::{parse_timestamp, CsvTable};
use crate::db::models::{Runner, Tick};
use crate::error::PipelineError;

pub const ODDS_SCHEMA: &str =
    "ts_utc|timestamp, game_id, book, [market], runner (HOME|AWAY), price_decimal|price_american";

const MONEYLINE: &str = "moneyline";

/// One vendor odds record before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOdds {
    pub timestamp: DateTime<Utc>,
    pub game_id: String,
    pub book: String,
    pub market: Option<String>,
    pub runner: String,
    pub price_decimal: Option<f64>,
    pub price_american: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct JsonOddsRecord {
    #[serde(alias = "timestamp")]
    ts_utc: serde_json::Value,
    game_id: serde_json::Value,
    book: String,
    #[serde(default)]
    market: Option<String>,
    runner: String,
    #[serde(default)]
    price_decimal: Option<f64>,
    #[serde(default)]
    price_american: Option<f64>,
}

/// Ticks plus the counts of everything dropped on the way.
#[derive(Debug, Default)]
pub struct OddsIngest {
    pub ticks: Vec<Tick>,
    pub rows_read: usize,
    pub dropped_market: usize,
    pub dropped_runner: usize,
    pub dropped_price: usize,
    pub duplicates: usize,
}

/// Convert American odds to decimal odds.
///
/// +150 → 2.5, −200 → 1.5.
pub fn american_to_decimal(american: f64) -> f64 {
    if american >= 0.0 {
        1.0 + american / 100.0
    } else {
        1.0 + 100.0 / (-american)
    }
}

pub fn parse_odds_csv(table: &CsvTable) -> Result<Vec<RawOdds>, PipelineError> {
    table
        .rows()
        .map(|row| {
            Ok(RawOdds {
                timestamp: row.timestamp(&["ts_utc", "timestamp", "ts"])?,
                game_id: row.require(&["game_id"])?.to_string(),
                book: row.require(&["book", "bookmaker"])?.to_string(),
                market: row.get(&["market"]).map(str::to_string),
                runner: row.require(&["runner"])?.to_string(),
                price_decimal: row.f64(&["price_decimal", "decimal_price", "odds"])?,
                price_american: row.f64(&["price_american", "american_price"])?,
            })
        })
        .collect()
}

fn json_scalar(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn parse_odds_json(file: &str, text: &str) -> Result<Vec<RawOdds>, PipelineError> {
    let records: Vec<JsonOddsRecord> =
        serde_json::from_str(text).map_err(|e| PipelineError::MalformedRow {
            file: file.to_string(),
            line: e.line(),
            reason: e.to_string(),
        })?;
    records
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let raw_ts = json_scalar(&r.ts_utc);
            let timestamp = parse_timestamp(&raw_ts).ok_or_else(|| PipelineError::MalformedRow {
                file: file.to_string(),
                line: i + 1,
                reason: format!("unparseable timestamp '{raw_ts}'"),
            })?;
            Ok(RawOdds {
                timestamp,
                game_id: json_scalar(&r.game_id),
                book: r.book,
                market: r.market,
                runner: r.runner,
                price_decimal: r.price_decimal,
                price_american: r.price_american,
            })
        })
        .collect()
}

/// Validate, filter, de-duplicate and sort raw odds into canonical ticks.
///
/// Output order is (game_id, timestamp, book, runner); the first record wins
/// on a duplicate (timestamp, game_id, book, runner) key.
pub fn normalize_ticks(raw: Vec<RawOdds>) -> OddsIngest {
    let mut out = OddsIngest {
        rows_read: raw.len(),
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for r in raw {
        let market = r
            .market
            .as_deref()
            .map(|m| m.trim().to_lowercase())
            .unwrap_or_else(|| MONEYLINE.to_string());
        if market != MONEYLINE {
            out.dropped_market += 1;
            continue;
        }
        let Some(runner) = Runner::parse(&r.runner) else {
            out.dropped_runner += 1;
            continue;
        };
        let price = r
            .price_decimal
            .or_else(|| r.price_american.map(american_to_decimal));
        let decimal_price = match price {
            Some(p) if p.is_finite() && p > 1.0 => p,
            _ => {
                out.dropped_price += 1;
                continue;
            }
        };
        let tick = Tick {
            timestamp: r.timestamp,
            game_id: r.game_id.trim().to_string(),
            book: r.book.trim().to_lowercase(),
            market,
            runner,
            decimal_price,
        };
        let key = (tick.timestamp, tick.game_id.clone(), tick.book.clone(), runner);
        if !seen.insert(key) {
            out.duplicates += 1;
            continue;
        }
        out.ticks.push(tick);
    }

    out.ticks.sort_by(|a, b| {
        a.game_id
            .cmp(&b.game_id)
            .then(a.timestamp.cmp(&b.timestamp))
            .then(a.book.cmp(&b.book))
            .then(a.runner.as_str().cmp(b.runner.as_str()))
    });
    out
}

/// Load every odds file found, then normalize the union.
pub fn load_odds(files: &[std::path::PathBuf]) -> Result<OddsIngest> {
    let mut raw = Vec::new();
    for path in files {
        let records = read_odds_file(path)?;
        debug!("{}: {} odds records", path.display(), records.len());
        raw.extend(records);
    }
    let ingest = normalize_ticks(raw);
    let dropped = ingest.dropped_market + ingest.dropped_runner + ingest.dropped_price;
    if dropped > 0 || ingest.duplicates > 0 {
        warn!(
            "Odds: dropped {} rows (market={}, runner={}, price<=1={}), {} duplicates",
            dropped, ingest.dropped_market, ingest.dropped_runner, ingest.dropped_price, ingest.duplicates
        );
    }
    Ok(ingest)
}

fn read_odds_file(path: &Path) -> Result<Vec<RawOdds>> {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(parse_odds_json(&file, &text)?)
    } else {
        let table = CsvTable::read(path)?;
        Ok(parse_odds_csv(&table)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CSV: &str = "\
ts_utc,game_id,book,market,runner,price_decimal,price_american
2024-01-05T18:00:00Z,G2,Pinnacle,moneyline,home,1.80,
2024-01-05T18:00:00Z,G2,Pinnacle,moneyline,AWAY,,+110
2024-01-05T17:00:00Z,G1,DraftKings,,HOME,2.05,
2024-01-05T17:00:00Z,G1,draftkings,moneyline,HOME,2.10,
2024-01-05T17:00:00Z,G1,draftkings,spread,AWAY,1.91,
2024-01-05T17:00:00Z,G1,draftkings,moneyline,DRAW,3.40,
2024-01-05T17:00:00Z,G1,fanduel,moneyline,AWAY,1.00,
";

    #[test]
    fn american_conversion() {
        assert_relative_eq!(american_to_decimal(150.0), 2.5, epsilon = 1e-12);
        assert_relative_eq!(american_to_decimal(-200.0), 1.5, epsilon = 1e-12);
        assert_relative_eq!(american_to_decimal(100.0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn normalizes_filters_and_sorts() {
        let table = CsvTable::parse("odds.csv", CSV);
        let ingest = normalize_ticks(parse_odds_csv(&table).unwrap());

        assert_eq!(ingest.rows_read, 7);
        assert_eq!(ingest.dropped_market, 1);
        assert_eq!(ingest.dropped_runner, 1);
        assert_eq!(ingest.dropped_price, 1);
        assert_eq!(ingest.duplicates, 1);

        let keys: Vec<_> = ingest
            .ticks
            .iter()
            .map(|t| (t.game_id.as_str(), t.book.as_str(), t.runner))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("G1", "draftkings", Runner::Home),
                ("G2", "pinnacle", Runner::Away),
                ("G2", "pinnacle", Runner::Home),
            ]
        );
        // first record wins on duplicate key
        assert_relative_eq!(ingest.ticks[0].decimal_price, 2.05);
        assert_relative_eq!(ingest.ticks[1].decimal_price, 2.1, epsilon = 1e-12);
        assert!(ingest.ticks.iter().all(|t| t.decimal_price > 1.0 && t.market == "moneyline"));
    }

    #[test]
    fn json_records_accept_timestamp_alias_and_numeric_ids() {
        let text = r#"[
            {"timestamp": "2024-01-05T17:00:00Z", "game_id": 401, "book": "FanDuel",
             "runner": "HOME", "price_american": -150}
        ]"#;
        let raw = parse_odds_json("odds.json", text).unwrap();
        assert_eq!(raw[0].game_id, "401");
        let ingest = normalize_ticks(raw);
        assert_eq!(ingest.ticks.len(), 1);
        assert_eq!(ingest.ticks[0].book, "fanduel");
        assert_relative_eq!(ingest.ticks[0].decimal_price, 1.0 + 100.0 / 150.0, epsilon = 1e-12);
    }

    #[test]
    fn bad_timestamp_is_a_malformed_row() {
        let table = CsvTable::parse("odds.csv", "ts_utc,game_id,book,runner,price_decimal\nsoon,G1,pin,HOME,2.0\n");
        match parse_odds_csv(&table) {
            Err(PipelineError::MalformedRow { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedRow, got {other:?}"),
        }
    }
}
