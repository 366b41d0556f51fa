//! Batch search driver: every search term crossed with every city, sent
//! through the capturing transport with randomized pauses between queries.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::transport::{HttpRequest, Transport};
use crate::types::{RelayError, RelayResult};

pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com/search";

/// One row of the query file. Every column is optional per row.
#[derive(Debug, Deserialize)]
struct QueryRow {
    #[serde(default)]
    search: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
}

/// A single search to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub search: String,
    pub city: String,
    /// Country code, possibly empty.
    pub country: String,
}

impl SearchQuery {
    /// Text typed into the search box.
    pub fn text(&self) -> String {
        format!("{} {}", self.search, self.city)
    }

    /// Map search URL for this query.
    pub fn url(&self, base: &str) -> RelayResult<String> {
        let text = self.text();
        let mut params = vec![("tbm", "map"), ("q", text.as_str())];
        if !self.country.is_empty() {
            params.push(("gl", self.country.as_str()));
        }
        let url = url::Url::parse_with_params(base, &params)
            .map_err(|e| RelayError::Query(format!("invalid search URL {base}: {e}")))?;
        Ok(url.to_string())
    }
}

/// Build the query list from CSV with `search,city,country` headers.
///
/// Search terms and cities are collected independently, then crossed. For a
/// city listed more than once, the first country wins. Output is sorted by
/// search term, then city.
pub fn parse_queries(reader: impl Read) -> RelayResult<Vec<SearchQuery>> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut terms = BTreeSet::new();
    let mut cities: BTreeMap<String, String> = BTreeMap::new();
    for row in csv.deserialize::<QueryRow>() {
        let row = row?;
        if !row.search.is_empty() {
            terms.insert(row.search);
        }
        if !row.city.is_empty() {
            cities.entry(row.city).or_insert(row.country);
        }
    }

    if terms.is_empty() {
        return Err(RelayError::Query("no search terms found".into()));
    }
    if cities.is_empty() {
        return Err(RelayError::Query("no cities found".into()));
    }

    Ok(terms
        .iter()
        .flat_map(|search| {
            cities.iter().map(move |(city, country)| SearchQuery {
                search: search.clone(),
                city: city.clone(),
                country: country.clone(),
            })
        })
        .collect())
}

pub fn load_queries(path: &Path) -> RelayResult<Vec<SearchQuery>> {
    let file = std::fs::File::open(path)?;
    parse_queries(file)
}

/// Uniformly random pause between consecutive searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchDelay {
    min: Duration,
    max: Duration,
}

impl SearchDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn from_secs_f64(min: f64, max: f64) -> RelayResult<Self> {
        let to_duration = |secs: f64| {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| RelayError::Query(format!("invalid delay: {secs}")))
        };
        Ok(Self::new(to_duration(min)?, to_duration(max)?))
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let mut rng = rand::thread_rng();
        rng.gen_range(self.min..=self.max)
    }
}

impl Default for SearchDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(15))
    }
}

/// Outcome of a query run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub searched: usize,
    pub failed: usize,
}

/// Sends each query through a transport, pausing between them.
pub struct QueryRunner<T> {
    transport: T,
    search_url: String,
    delay: SearchDelay,
}

impl<T: Transport> QueryRunner<T> {
    pub fn new(transport: T, search_url: impl Into<String>, delay: SearchDelay) -> Self {
        Self {
            transport,
            search_url: search_url.into(),
            delay,
        }
    }

    /// Run every query in order. A failed search is logged and skipped.
    pub async fn run(&self, queries: &[SearchQuery]) -> RelayResult<RunSummary> {
        let mut summary = RunSummary::default();

        for (i, query) in queries.iter().enumerate() {
            let url = query.url(&self.search_url)?;
            tracing::info!("[{}/{}] Searching: {}", i + 1, queries.len(), query.text());

            match self.transport.send(HttpRequest::get(url)).await {
                Ok(response) if response.is_success() => summary.searched += 1,
                Ok(response) => {
                    tracing::warn!("Search failed: HTTP {}", response.status);
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::warn!("Search failed: {e}");
                    summary.failed += 1;
                }
            }

            if i + 1 < queries.len() {
                let pause = self.delay.sample();
                tracing::debug!("Waiting {:.1}s before next search", pause.as_secs_f64());
                tokio::time::sleep(pause).await;
            }
        }

        Ok(summary)
    }
}
