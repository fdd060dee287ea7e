//! Live head-to-head prices from The Odds API (v4).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::db::models::LiveQuote;
use crate::error::PipelineError;
use crate::ingest::teams::normalize_name;

pub const DEFAULT_API_URL: &str = "https://api.the-odds-api.com";
pub const MAX_ATTEMPTS: u32 = 3;

/// Sport key used by the feed for a league code.
pub fn sport_key(league: &str) -> Option<&'static str> {
    match league.to_ascii_uppercase().as_str() {
        "NBA" => Some("basketball_nba"),
        "NFL" => Some("americanfootball_nfl"),
        "NHL" => Some("icehockey_nhl"),
        "MLB" => Some("baseball_mlb"),
        "NCAAB" => Some("basketball_ncaab"),
        _ => None,
    }
}

/// Anything that can return current moneyline quotes for a sport.
#[async_trait]
pub trait OddsProvider: Send + Sync {
    async fn fetch_quotes(&self, sport: &str) -> Result<Vec<LiveQuote>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

#[derive(Clone)]
pub struct OddsApiClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl OddsApiClient {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = Url::parse(base_url).with_context(|| format!("Invalid odds API url '{base_url}'"))?;
        Ok(Self { http, base_url, api_key })
    }

    fn odds_url(&self, sport: &str) -> Result<Url> {
        let mut url = self.base_url.join(&format!("/v4/sports/{sport}/odds"))?;
        url.query_pairs_mut()
            .append_pair("apiKey", &self.api_key)
            .append_pair("regions", "us")
            .append_pair("markets", "h2h")
            .append_pair("oddsFormat", "decimal");
        Ok(url)
    }
}

#[async_trait]
impl OddsProvider for OddsApiClient {
    async fn fetch_quotes(&self, sport: &str) -> Result<Vec<LiveQuote>> {
        let url = self.odds_url(sport)?;
        debug!("Fetching odds for {}", sport);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Odds API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Odds API error {}: {}", status, body);
        }
        if let Some(left) = resp.headers().get("x-requests-remaining").and_then(|v| v.to_str().ok()) {
            debug!("Odds API requests remaining: {}", left);
        }

        let raw: serde_json::Value = resp.json().await.context("Failed to parse Odds API response")?;
        parse_odds_response(&raw)
    }

    fn name(&self) -> &str {
        "the-odds-api"
    }
}

/// Flatten the feed's event list into one quote per (event, book).
pub fn parse_odds_response(raw: &serde_json::Value) -> Result<Vec<LiveQuote>> {
    let events = raw
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Odds API response is not an array"))?;

    let mut quotes = Vec::new();
    for event in events {
        let (Some(home), Some(away)) = (event["home_team"].as_str(), event["away_team"].as_str()) else {
            continue;
        };
        let commence_time = event["commence_time"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        for book in event["bookmakers"].as_array().into_iter().flatten() {
            let Some(book_key) = book["key"].as_str() else { continue };
            let h2h = book["markets"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|m| m["key"].as_str() == Some("h2h"));
            let Some(h2h) = h2h else { continue };

            let mut home_price = None;
            let mut away_price = None;
            for outcome in h2h["outcomes"].as_array().into_iter().flatten() {
                let name = outcome["name"].as_str();
                let price = outcome["price"].as_f64();
                if name == Some(home) {
                    home_price = price;
                } else if name == Some(away) {
                    away_price = price;
                }
            }
            let (Some(home_price), Some(away_price)) = (home_price, away_price) else {
                continue;
            };
            if home_price <= 1.0 || away_price <= 1.0 {
                continue;
            }
            quotes.push(LiveQuote {
                home_team: normalize_name(home),
                away_team: normalize_name(away),
                book: book_key.to_lowercase(),
                home_price,
                away_price,
                commence_time,
            });
        }
    }
    Ok(quotes)
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 500u64 * 2u64.pow(attempt);
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(base_ms + jitter_ms)
}

/// Fetch with up to `MAX_ATTEMPTS` tries and exponential backoff between them.
pub async fn fetch_with_retry(provider: &dyn OddsProvider, sport: &str) -> Result<Vec<LiveQuote>> {
    let mut attempt = 0;
    loop {
        match provider.fetch_quotes(sport).await {
            Ok(quotes) => {
                info!("[{}] {} quote(s) for {}", provider.name(), quotes.len(), sport);
                return Ok(quotes);
            }
            Err(e) if attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    "[{}] attempt {}/{} failed: {}; retrying in {}ms",
                    provider.name(),
                    attempt + 1,
                    MAX_ATTEMPTS,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("{} failed after {MAX_ATTEMPTS} attempts", provider.name()))),
        }
    }
}

pub fn save_quotes(path: &Path, quotes: &[LiveQuote]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(quotes)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Saved {} live quote(s) -> {}", quotes.len(), path.display());
    Ok(())
}

pub fn load_quotes(path: &Path) -> Result<Vec<LiveQuote>> {
    if !path.is_file() {
        return Err(PipelineError::missing("live odds", path, "quotes saved by `fetch-odds`").into());
    }
    let body = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FIXTURE: &str = r#"[
      {
        "id": "abc",
        "sport_key": "basketball_nba",
        "commence_time": "2024-01-05T00:10:00Z",
        "home_team": "LA Clippers",
        "away_team": "Boston Celtics",
        "bookmakers": [
          {
            "key": "DraftKings",
            "markets": [
              {"key": "h2h", "outcomes": [
                {"name": "Boston Celtics", "price": 1.65},
                {"name": "LA Clippers", "price": 2.3}
              ]}
            ]
          },
          {
            "key": "fanduel",
            "markets": [{"key": "spreads", "outcomes": []}]
          },
          {
            "key": "bovada",
            "markets": [{"key": "h2h", "outcomes": [{"name": "Boston Celtics", "price": 1.7}]}]
          }
        ]
      },
      {"id": "no-teams", "bookmakers": []}
    ]"#;

    #[test]
    fn parses_h2h_by_team_name() {
        let raw: serde_json::Value = serde_json::from_str(FIXTURE).unwrap();
        let quotes = parse_odds_response(&raw).unwrap();
        assert_eq!(quotes.len(), 1);
        let q = &quotes[0];
        assert_eq!(q.book, "draftkings");
        assert_eq!(q.home_team, "Los Angeles Clippers");
        assert_eq!(q.home_price, 2.3);
        assert_eq!(q.away_price, 1.65);
        assert!(q.commence_time.is_some());
    }

    #[test]
    fn non_array_response_is_an_error() {
        let raw = serde_json::json!({"message": "Invalid API key"});
        assert!(parse_odds_response(&raw).is_err());
    }

    #[test]
    fn odds_url_carries_query() {
        let client = OddsApiClient::new(DEFAULT_API_URL, "k3y".into()).unwrap();
        let url = client.odds_url("basketball_nba").unwrap();
        assert_eq!(url.path(), "/v4/sports/basketball_nba/odds");
        let q = url.query().unwrap();
        assert!(q.contains("apiKey=k3y") && q.contains("markets=h2h"));
    }

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl OddsProvider for Flaky {
        async fn fetch_quotes(&self, _sport: &str) -> Result<Vec<LiveQuote>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("boom {n}");
            }
            Ok(Vec::new())
        }
        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let p = Flaky { calls: AtomicU32::new(0), fail_first: 2 };
        assert!(fetch_with_retry(&p, "basketball_nba").await.is_ok());
        assert_eq!(p.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let p = Flaky { calls: AtomicU32::new(0), fail_first: 10 };
        assert!(fetch_with_retry(&p, "basketball_nba").await.is_err());
        assert_eq!(p.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[test]
    fn known_leagues_map_to_sport_keys() {
        assert_eq!(sport_key("nba"), Some("basketball_nba"));
        assert_eq!(sport_key("XFL"), None);
    }
}
