//! Flat CSV exports of the label and signal tables.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use super::models::{DecisionLabel, FeatureSnapshot, SignalRow};

const SNAPSHOT_HEADER: &str = "decision_ts,seq,game_id,runner,implied_prob_mean,implied_prob_vig_adj,vig_spread,home_away_ratio,minutes_to_start,margin,fg_diff,best_price";

fn opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Quote a text cell when it would otherwise split the row.
fn text(v: &str) -> Cow<'_, str> {
    if v.contains(&[',', '"', '\n', '\r'][..]) {
        Cow::Owned(format!("\"{}\"", v.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(v)
    }
}

fn snapshot_fields(s: &FeatureSnapshot) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{}",
        s.timestamp.to_rfc3339(),
        s.seq,
        text(&s.game_id),
        s.runner,
        s.implied_prob_mean,
        s.implied_prob_vig_adj,
        s.vig_spread,
        s.home_away_ratio,
        s.minutes_to_start,
        s.margin,
        s.fg_diff,
        opt(s.best_price),
    )
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

pub fn write_labels_csv(path: &Path, labels: &[DecisionLabel]) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "{SNAPSHOT_HEADER},y,source")?;
    for l in labels {
        writeln!(w, "{},{},{}", snapshot_fields(&l.snapshot), l.outcome, l.source.as_str())?;
    }
    w.flush()?;
    info!("Wrote {} ({} rows)", path.display(), labels.len());
    Ok(())
}

pub fn write_signals_csv(path: &Path, signals: &[SignalRow]) -> Result<()> {
    let mut w = create(path)?;
    writeln!(
        w,
        "{SNAPSHOT_HEADER},y,source,p_hat,P,EV,stake,pnl,bankroll"
    )?;
    for s in signals {
        writeln!(
            w,
            "{},{},{},{},{},{},{},{},{}",
            snapshot_fields(&s.label.snapshot),
            s.label.outcome,
            s.label.source.as_str(),
            s.model_probability,
            opt(s.best_price),
            opt(s.expected_value),
            s.stake,
            s.pnl,
            s.bankroll,
        )?;
    }
    w.flush()?;
    info!("Wrote {} ({} rows)", path.display(), signals.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{LabelSource, Runner};
    use crate::ingest::table::CsvTable;
    use chrono::{TimeZone, Utc};

    fn sample_label() -> DecisionLabel {
        DecisionLabel {
            snapshot: FeatureSnapshot {
                seq: 4,
                game_id: "G9".into(),
                runner: Runner::Home,
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                implied_prob_mean: 0.5,
                implied_prob_vig_adj: 0.48,
                vig_spread: 0.04,
                home_away_ratio: 0.0,
                minutes_to_start: 45.0,
                margin: 1.0,
                fg_diff: 0.0,
                best_price: None,
            },
            outcome: 1,
            source: LabelSource::Primary,
        }
    }

    #[test]
    fn labels_csv_has_header_and_one_line_per_label() {
        let label = sample_label();
        let path = std::env::temp_dir().join(format!("edge-engine-labels-{}.csv", std::process::id()));
        write_labels_csv(&path, &[label]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",y,source"));
        assert!(lines[1].contains(",G9,HOME,"));
        assert!(lines[1].ends_with(",,1,primary"));
    }

    #[test]
    fn text_cells_with_separators_are_quoted() {
        assert_eq!(text("G9"), "G9");
        assert_eq!(text("G,9"), "\"G,9\"");
        assert_eq!(text("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn quoted_game_ids_keep_columns_aligned() {
        let mut label = sample_label();
        label.snapshot.game_id = "G,9 \"OT\"".into();
        let path = std::env::temp_dir().join(format!("edge-engine-quoted-{}.csv", std::process::id()));
        write_labels_csv(&path, &[label]).unwrap();
        let table = CsvTable::read(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let row = table.rows().next().unwrap();
        assert_eq!(row.get(&["game_id"]), Some("G,9 \"OT\""));
        assert_eq!(row.get(&["runner"]), Some("HOME"));
        assert_eq!(row.get(&["source"]), Some("primary"));
    }
}
