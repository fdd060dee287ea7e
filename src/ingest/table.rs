//! Minimal header-indexed CSV reader used by every vendor loader.
//!
//! Headers are matched case-insensitively; blank cells read as missing.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;

use crate::error::PipelineError;

pub struct CsvTable {
    file: String,
    columns: HashMap<String, usize>,
    rows: Vec<(usize, Vec<String>)>,
}

impl CsvTable {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::parse(&file, &text))
    }

    pub fn parse(file: &str, text: &str) -> Self {
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let columns = lines
            .next()
            .map(|(_, header)| {
                split_line(header)
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| (name.trim().trim_start_matches('\u{feff}').to_lowercase(), i))
                    .collect()
            })
            .unwrap_or_default();
        let rows = lines.map(|(i, l)| (i + 1, split_line(l))).collect();
        CsvTable {
            file: file.to_string(),
            columns,
            rows,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn has(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = CsvRow<'_>> {
        self.rows.iter().map(move |(line, fields)| CsvRow {
            table: self,
            line: *line,
            fields,
        })
    }
}

pub struct CsvRow<'a> {
    table: &'a CsvTable,
    line: usize,
    fields: &'a [String],
}

impl<'a> CsvRow<'a> {
    pub fn line(&self) -> usize {
        self.line
    }

    /// First non-blank value among the given column aliases.
    pub fn get(&self, names: &[&str]) -> Option<&'a str> {
        names.iter().find_map(|name| {
            let idx = *self.table.columns.get(*name)?;
            let v = self.fields.get(idx)?.trim();
            (!v.is_empty()).then_some(v)
        })
    }

    pub fn require(&self, names: &[&str]) -> Result<&'a str, PipelineError> {
        self.get(names)
            .ok_or_else(|| self.malformed(format!("missing value for '{}'", names[0])))
    }

    pub fn f64(&self, names: &[&str]) -> Result<Option<f64>, PipelineError> {
        match self.get(names) {
            None => Ok(None),
            Some(v) => v
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.malformed(format!("'{}' is not a number: {v}", names[0]))),
        }
    }

    pub fn require_f64(&self, names: &[&str]) -> Result<f64, PipelineError> {
        self.f64(names)?
            .ok_or_else(|| self.malformed(format!("missing value for '{}'", names[0])))
    }

    pub fn timestamp(&self, names: &[&str]) -> Result<DateTime<Utc>, PipelineError> {
        let raw = self.require(names)?;
        parse_timestamp(raw).ok_or_else(|| self.malformed(format!("unparseable timestamp '{raw}'")))
    }

    pub fn malformed(&self, reason: String) -> PipelineError {
        PipelineError::MalformedRow {
            file: self.table.file.clone(),
            line: self.line,
            reason,
        }
    }
}

fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    fields.push(cur);
    fields
}

/// Parse unix seconds/millis, RFC 3339, or common naive UTC layouts.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = s.parse::<i64>() {
        if ts > 1_000_000_000_000 {
            return Utc.timestamp_millis_opt(ts).single();
        } else {
            return Utc.timestamp_opt(ts, 0).single();
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_by_header_alias_and_skips_blank_lines() {
        let t = CsvTable::parse(
            "odds.csv",
            "TS_UTC,Game_ID,book\n2024-01-01T00:00:00Z,G1,Pinnacle\n\n2024-01-01 00:05:00,G2,\n",
        );
        assert_eq!(t.len(), 2);
        let rows: Vec<_> = t.rows().collect();
        assert_eq!(rows[0].get(&["timestamp", "ts_utc"]), Some("2024-01-01T00:00:00Z"));
        assert_eq!(rows[1].get(&["book"]), None);
        assert_eq!(rows[1].line(), 4);
    }

    #[test]
    fn quoted_fields_may_contain_commas() {
        assert_eq!(
            split_line(r#"G1,"Portland, OR","say ""hi""""#),
            vec!["G1", "Portland, OR", r#"say "hi""#]
        );
    }

    #[test]
    fn malformed_number_reports_file_and_line() {
        let t = CsvTable::parse("results.csv", "game_id,final_home_score\nG1,abc\n");
        let row = t.rows().next().unwrap();
        let err = row.require_f64(&["final_home_score"]).unwrap_err();
        assert_eq!(err.to_string(), "results.csv:2: 'final_home_score' is not a number: abc");
    }

    #[test]
    fn timestamp_formats() {
        let a = parse_timestamp("2024-01-05T19:30:00Z").unwrap();
        let b = parse_timestamp("2024-01-05 19:30:00").unwrap();
        let c = parse_timestamp(&a.timestamp().to_string()).unwrap();
        let d = parse_timestamp(&a.timestamp_millis().to_string()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, d);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
