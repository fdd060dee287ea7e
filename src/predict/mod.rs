//! Pre-game value screening against live prices.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tabled::{Table, Tabled};
use tracing::{debug, info, warn};

use crate::backtest::kelly::{edge, expected_value};
use crate::db::models::{LiveQuote, Runner, TeamStats};
use crate::error::PipelineError;
use crate::ingest::teams::{best_match, normalize_name, FUZZY_CUTOFF};
use crate::model::Predictor;

/// American moneyline for a fair probability, rounded to the dollar.
///
/// 0.75 → -300, 0.40 → +150. `None` outside (0, 1).
pub fn prob_to_moneyline(prob: f64) -> Option<f64> {
    if !(prob > 0.0 && prob < 1.0) {
        return None;
    }
    let odds = if prob >= 0.5 {
        -100.0 * prob / (1.0 - prob)
    } else {
        100.0 * (1.0 - prob) / prob
    };
    Some(odds.round())
}

// ── Team lookup ─────────────────────────────────────────────────────────────

/// Latest-season stats per team, with fuzzy lookup for feed spellings.
pub struct StatsIndex<'a> {
    by_team: HashMap<String, &'a TeamStats>,
    names: Vec<String>,
}

impl<'a> StatsIndex<'a> {
    pub fn new(stats: &'a [TeamStats]) -> Self {
        let mut by_team: HashMap<String, &'a TeamStats> = HashMap::new();
        for s in stats {
            let slot = by_team.entry(s.team_id.clone()).or_insert(s);
            if s.season > slot.season {
                *slot = s;
            }
        }
        let mut names: Vec<String> = by_team.keys().cloned().collect();
        names.sort();
        Self { by_team, names }
    }

    pub fn lookup(&self, team: &str) -> Option<&'a TeamStats> {
        let canonical = normalize_name(team);
        if let Some(s) = self.by_team.get(&canonical) {
            return Some(*s);
        }
        let matched = best_match(&canonical, &self.names, FUZZY_CUTOFF)?;
        debug!("Fuzzy-matched '{}' -> '{}'", team, matched);
        self.by_team.get(matched).copied()
    }
}

// ── Scoring ─────────────────────────────────────────────────────────────────

/// Model view of one side of a matchup at a given price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideScore {
    pub runner: Runner,
    pub team: String,
    pub price: f64,
    pub model_probability: f64,
    pub implied_probability: f64,
    pub expected_value: f64,
    pub edge: f64,
    pub fair_price: f64,
    pub fair_moneyline: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchupScore {
    pub home: SideScore,
    pub away: SideScore,
}

impl MatchupScore {
    /// The side with the larger positive EV, if either has one.
    pub fn recommendation(&self) -> Option<&SideScore> {
        [&self.home, &self.away]
            .into_iter()
            .filter(|s| s.expected_value > 0.0)
            .max_by(|a, b| a.expected_value.total_cmp(&b.expected_value))
    }
}

/// Feature vectors for (home, away) from a two-way price and the home-minus-
/// away strength differences, laid out like the trained feature table.
pub fn matchup_features(home_price: f64, away_price: f64, margin_diff: f64, fg_diff: f64) -> Option<(Vec<f64>, Vec<f64>)> {
    if home_price <= 1.0 || away_price <= 1.0 {
        return None;
    }
    let p_home = 1.0 / home_price;
    let p_away = 1.0 / away_price;
    let overround = p_home + p_away;
    let vig = overround - 1.0;
    let ratio = p_home / p_away - 1.0;
    Some((
        vec![p_home, p_home / overround, vig, ratio, margin_diff, fg_diff],
        vec![p_away, p_away / overround, vig, ratio, -margin_diff, -fg_diff],
    ))
}

fn side_score(runner: Runner, team: &str, price: f64, p: f64) -> SideScore {
    SideScore {
        runner,
        team: team.to_string(),
        price,
        model_probability: p,
        implied_probability: 1.0 / price,
        expected_value: expected_value(p, price).unwrap_or(f64::NEG_INFINITY),
        edge: edge(p, price),
        fair_price: if p > 0.0 { 1.0 / p } else { f64::INFINITY },
        fair_moneyline: prob_to_moneyline(p),
    }
}

/// Score one matchup at explicit decimal prices.
pub fn score_matchup(
    predictor: &Predictor,
    stats: &StatsIndex<'_>,
    home_team: &str,
    away_team: &str,
    home_price: f64,
    away_price: f64,
) -> Result<MatchupScore, PipelineError> {
    let home = stats
        .lookup(home_team)
        .ok_or_else(|| PipelineError::missing(format!("team stats for '{home_team}'"), "team_stats", "team_id, season, margin, fg_diff"))?;
    let away = stats
        .lookup(away_team)
        .ok_or_else(|| PipelineError::missing(format!("team stats for '{away_team}'"), "team_stats", "team_id, season, margin, fg_diff"))?;
    let (home_x, away_x) = matchup_features(home_price, away_price, home.margin - away.margin, home.fg_diff - away.fg_diff)
        .ok_or_else(|| PipelineError::invalid_config(format!("decimal prices must exceed 1.0, got {home_price} / {away_price}")))?;

    Ok(MatchupScore {
        home: side_score(Runner::Home, home_team, home_price, predictor.probability(&home_x)),
        away: side_score(Runner::Away, away_team, away_price, predictor.probability(&away_x)),
    })
}

// ── Live screen ─────────────────────────────────────────────────────────────

/// Best price per side across books for one matchup.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPrices {
    pub home_team: String,
    pub away_team: String,
    pub home_price: f64,
    pub home_book: String,
    pub away_price: f64,
    pub away_book: String,
}

pub fn best_prices(quotes: &[LiveQuote]) -> Vec<BestPrices> {
    let mut by_game: BTreeMap<(&str, &str), BestPrices> = BTreeMap::new();
    for q in quotes {
        let entry = by_game
            .entry((q.home_team.as_str(), q.away_team.as_str()))
            .or_insert_with(|| BestPrices {
                home_team: q.home_team.clone(),
                away_team: q.away_team.clone(),
                home_price: q.home_price,
                home_book: q.book.clone(),
                away_price: q.away_price,
                away_book: q.book.clone(),
            });
        if q.home_price > entry.home_price {
            entry.home_price = q.home_price;
            entry.home_book = q.book.clone();
        }
        if q.away_price > entry.away_price {
            entry.away_price = q.away_price;
            entry.away_book = q.book.clone();
        }
    }
    by_game.into_values().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub matchup: String,
    pub book: String,
    pub side: SideScore,
    /// Expected profit in currency units for the configured stake
    pub ev_per_stake: f64,
}

/// Score every live matchup and keep the `top_n` sides by EV.
pub fn rank_opportunities(
    predictor: &Predictor,
    stats: &StatsIndex<'_>,
    quotes: &[LiveQuote],
    stake: f64,
    top_n: usize,
) -> Vec<Opportunity> {
    let mut out = Vec::new();
    for bp in best_prices(quotes) {
        let score = match score_matchup(predictor, stats, &bp.home_team, &bp.away_team, bp.home_price, bp.away_price) {
            Ok(s) => s,
            Err(e) => {
                warn!("Skipping {} vs {}: {}", bp.home_team, bp.away_team, e);
                continue;
            }
        };
        let matchup = format!("{} vs {}", bp.home_team, bp.away_team);
        for (side, book) in [(score.home, &bp.home_book), (score.away, &bp.away_book)] {
            out.push(Opportunity {
                matchup: matchup.clone(),
                book: book.clone(),
                ev_per_stake: side.expected_value * stake,
                side,
            });
        }
    }
    out.sort_by(|a, b| {
        b.side
            .expected_value
            .total_cmp(&a.side.expected_value)
            .then_with(|| a.matchup.cmp(&b.matchup))
    });
    out.truncate(top_n);
    info!("Ranked {} opportunity(ies)", out.len());
    out
}

#[derive(Tabled)]
struct OpportunityRow {
    #[tabled(rename = "Matchup")]
    matchup: String,
    #[tabled(rename = "Side")]
    side: String,
    #[tabled(rename = "Book")]
    book: String,
    #[tabled(rename = "Price")]
    price: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Implied")]
    implied: String,
    #[tabled(rename = "Edge")]
    edge: String,
    #[tabled(rename = "EV")]
    ev: String,
    #[tabled(rename = "Fair ML")]
    fair_ml: String,
}

fn moneyline_label(ml: Option<f64>) -> String {
    match ml {
        Some(v) if v > 0.0 => format!("+{v:.0}"),
        Some(v) => format!("{v:.0}"),
        None => "-".into(),
    }
}

pub fn render_opportunities(ops: &[Opportunity]) -> String {
    let rows: Vec<OpportunityRow> = ops
        .iter()
        .map(|o| OpportunityRow {
            matchup: o.matchup.clone(),
            side: format!("{} ({})", o.side.runner, o.side.team),
            book: o.book.clone(),
            price: format!("{:.2}", o.side.price),
            model: format!("{:.1}%", o.side.model_probability * 100.0),
            implied: format!("{:.1}%", o.side.implied_probability * 100.0),
            edge: format!("{:+.1}%", o.side.edge * 100.0),
            ev: format!("${:+.2}", o.ev_per_stake),
            fair_ml: moneyline_label(o.side.fair_moneyline),
        })
        .collect();
    Table::new(rows).to_string()
}

pub fn render_matchup(score: &MatchupScore) -> String {
    let mut lines = vec![format!("{} @ {}", score.away.team, score.home.team)];
    for s in [&score.home, &score.away] {
        lines.push(format!(
            "{:<4} price {:.3}  model {:.2}%  fair {:.3} ({})  EV {:+.2}%",
            s.runner.as_str(),
            s.price,
            s.model_probability * 100.0,
            s.fair_price,
            moneyline_label(s.fair_moneyline),
            s.expected_value * 100.0
        ));
    }
    match score.recommendation() {
        Some(s) => lines.push(format!(
            "Recommended: {} ({}) at {:.3}, EV {:+.2}%",
            s.runner.as_str(),
            s.team,
            s.price,
            s.expected_value * 100.0
        )),
        None => lines.push("No +EV opportunity".into()),
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProbabilityCalibrator, WinModel};
    use approx::assert_relative_eq;

    /// Probability equals the vig-adjusted implied probability plus a margin bump.
    struct MarketPlus;

    impl WinModel for MarketPlus {
        fn feature_names(&self) -> &[String] {
            &[]
        }
        fn predict(&self, x: &[f64]) -> f64 {
            (x[1] + 0.01 * x[4]).clamp(0.01, 0.99)
        }
    }

    struct Raw;

    impl ProbabilityCalibrator for Raw {
        fn calibrate(&self, raw: f64) -> f64 {
            raw
        }
    }

    fn predictor() -> Predictor {
        Predictor::new(Box::new(MarketPlus), Box::new(Raw))
    }

    fn stats() -> Vec<TeamStats> {
        let row = |team: &str, season: &str, margin: f64| TeamStats {
            team_id: team.into(),
            season: season.into(),
            games: 10,
            margin,
            fg_diff: 0.0,
            home_win: 0.5,
        };
        vec![
            row("Boston Celtics", "2023", -20.0),
            row("Boston Celtics", "2024", 8.0),
            row("Los Angeles Clippers", "2024", 2.0),
        ]
    }

    fn quote(book: &str, hp: f64, ap: f64) -> LiveQuote {
        LiveQuote {
            home_team: "Boston Celtics".into(),
            away_team: "Los Angeles Clippers".into(),
            book: book.into(),
            home_price: hp,
            away_price: ap,
            commence_time: None,
        }
    }

    #[test]
    fn moneyline_conversion() {
        assert_eq!(prob_to_moneyline(0.75), Some(-300.0));
        assert_eq!(prob_to_moneyline(0.40), Some(150.0));
        assert_eq!(prob_to_moneyline(1.0), None);
    }

    #[test]
    fn stats_index_prefers_latest_season_and_fuzzy_names() {
        let s = stats();
        let idx = StatsIndex::new(&s);
        assert_eq!(idx.lookup("Boston Celtics").unwrap().season, "2024");
        assert_eq!(idx.lookup("LA Clippers").unwrap().team_id, "Los Angeles Clippers");
        assert_eq!(idx.lookup("Boston Celtic").unwrap().team_id, "Boston Celtics");
        assert!(idx.lookup("Toronto Raptors").is_none());
    }

    #[test]
    fn best_price_per_side_across_books() {
        let bp = best_prices(&[quote("dk", 1.80, 2.10), quote("fd", 1.85, 2.05)]);
        assert_eq!(bp.len(), 1);
        assert_eq!((bp[0].home_price, bp[0].home_book.as_str()), (1.85, "fd"));
        assert_eq!((bp[0].away_price, bp[0].away_book.as_str()), (2.10, "dk"));
    }

    #[test]
    fn matchup_recommends_larger_positive_ev() {
        let s = stats();
        let idx = StatsIndex::new(&s);
        let score = score_matchup(&predictor(), &idx, "Boston Celtics", "LA Clippers", 2.0, 2.0).unwrap();
        // margin diff +6 → home 0.56, away 0.44
        assert_relative_eq!(score.home.model_probability, 0.56, epsilon = 1e-12);
        assert_relative_eq!(score.home.expected_value, 0.12, epsilon = 1e-12);
        assert!(score.away.expected_value < 0.0);
        assert_eq!(score.recommendation().unwrap().runner, Runner::Home);
        assert!(render_matchup(&score).contains("Recommended: HOME"));
    }

    #[test]
    fn no_recommendation_without_edge() {
        let s = stats();
        let idx = StatsIndex::new(&s);
        let score = score_matchup(&predictor(), &idx, "Boston Celtics", "LA Clippers", 1.5, 1.5).unwrap();
        assert!(score.recommendation().is_none());
    }

    #[test]
    fn unknown_team_is_missing_data() {
        let s = stats();
        let idx = StatsIndex::new(&s);
        let err = score_matchup(&predictor(), &idx, "Toronto Raptors", "LA Clippers", 2.0, 2.0).unwrap_err();
        assert!(matches!(err, PipelineError::MissingData { .. }));
    }

    #[test]
    fn ranking_orders_by_ev_and_truncates() {
        let s = stats();
        let idx = StatsIndex::new(&s);
        let ops = rank_opportunities(&predictor(), &idx, &[quote("dk", 2.0, 2.0)], 100.0, 1);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].side.runner, Runner::Home);
        assert_relative_eq!(ops[0].ev_per_stake, 12.0, epsilon = 1e-9);
        assert!(render_opportunities(&ops).contains("Boston Celtics"));
    }
}
