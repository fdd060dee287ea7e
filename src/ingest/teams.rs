//! Team-name normalization shared by ingestion and live prediction.

use strsim::normalized_levenshtein;

/// Vendor spellings mapped onto the canonical franchise name.
const TEAM_ALIASES: &[(&str, &str)] = &[
    ("LA Clippers", "Los Angeles Clippers"),
    ("L.A. Clippers", "Los Angeles Clippers"),
    ("LA Lakers", "Los Angeles Lakers"),
    ("L.A. Lakers", "Los Angeles Lakers"),
    ("NY Knicks", "New York Knicks"),
    ("GS Warriors", "Golden State Warriors"),
    ("Golden St Warriors", "Golden State Warriors"),
    ("OKC Thunder", "Oklahoma City Thunder"),
    ("SA Spurs", "San Antonio Spurs"),
    ("NO Pelicans", "New Orleans Pelicans"),
    ("Philadelphia Sixers", "Philadelphia 76ers"),
    ("Portland Blazers", "Portland Trail Blazers"),
    ("Minnesota Wolves", "Minnesota Timberwolves"),
    ("NY Giants", "New York Giants"),
    ("NY Jets", "New York Jets"),
    ("LA Rams", "Los Angeles Rams"),
    ("LA Chargers", "Los Angeles Chargers"),
    ("KC Chiefs", "Kansas City Chiefs"),
    ("SF 49ers", "San Francisco 49ers"),
    ("TB Buccaneers", "Tampa Bay Buccaneers"),
    ("GB Packers", "Green Bay Packers"),
    ("NE Patriots", "New England Patriots"),
];

/// Minimum similarity for a fuzzy match to be accepted.
pub const FUZZY_CUTOFF: f64 = 0.6;

/// Map a vendor team name to its canonical form; unknown names pass through
/// with surrounding whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    let cleaned = name.split_whitespace().collect::<Vec<_>>().join(" ");
    TEAM_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(&cleaned))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(cleaned)
}

/// Closest known name to `name`, if any clears `cutoff`.
pub fn best_match<'a>(name: &str, known: &'a [String], cutoff: f64) -> Option<&'a str> {
    let target = normalize_name(name).to_lowercase();
    known
        .iter()
        .map(|k| (k, normalized_levenshtein(&target, &k.to_lowercase())))
        .filter(|(_, score)| *score >= cutoff)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(k, _)| k.as_str())
}
