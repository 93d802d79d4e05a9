//! Precedent collection from the external ruling source.
//!
//! Defines the [`RulingCollector`] trait and the HTTP implementation that
//! queries a search API scoped to the authoritative ruling domains. The
//! collector is a pure fetch-and-parse unit: it never retries (retry
//! policy belongs to the orchestrator) and never returns partial garbage —
//! a reachable source with nothing usable is a distinct error from a
//! transport failure, so the orchestrator can pick its fallback.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::CollectionError;
use crate::models::RulingDocument;

/// Fetches ruling documents for an HS code from an external source.
#[async_trait]
pub trait RulingCollector: Send + Sync {
    /// Collect qualifying rulings, deduplicated by content hash.
    ///
    /// Fails with [`CollectionError`] when the source is unreachable,
    /// times out, or returns zero qualifying results.
    async fn collect(
        &self,
        hs_code: &str,
        query_hints: Option<&str>,
    ) -> Result<Vec<RulingDocument>, CollectionError>;
}

/// One raw result from the search API, before validation.
#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<RawResult>,
}

/// Collector backed by a Tavily-compatible web search API.
pub struct HttpRulingCollector {
    client: reqwest::Client,
    config: CollectorConfig,
}

impl HttpRulingCollector {
    pub fn new(config: CollectorConfig) -> Result<Self, CollectionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| CollectionError::Transport(e.to_string()))?;
        Ok(HttpRulingCollector { client, config })
    }

    fn search_query(&self, hs_code: &str, query_hints: Option<&str>) -> String {
        match query_hints {
            Some(hints) if !hints.trim().is_empty() => {
                format!("\"HS {}\" \"{}\" classification ruling", hs_code, hints.trim())
            }
            _ => format!("\"HS {}\" classification ruling", hs_code),
        }
    }
}

#[async_trait]
impl RulingCollector for HttpRulingCollector {
    async fn collect(
        &self,
        hs_code: &str,
        query_hints: Option<&str>,
    ) -> Result<Vec<RulingDocument>, CollectionError> {
        let api_key = std::env::var(&self.config.api_key_env)
            .map_err(|_| CollectionError::MissingApiKey(self.config.api_key_env.clone()))?;

        let query = self.search_query(hs_code, query_hints);
        debug!(%query, "collecting rulings");

        let body = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "search_depth": "advanced",
            "max_results": self.config.max_results,
            "include_domains": self.config.include_domains,
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollectionError::Timeout(self.config.timeout_seconds)
                } else {
                    CollectionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectionError::Transport(format!(
                "search API returned {}",
                status
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CollectionError::InvalidResponse(e.to_string()))?;

        let documents = qualify_results(parsed.results, hs_code, &self.config.include_domains);
        if documents.is_empty() {
            return Err(CollectionError::NoResults(hs_code.to_string()));
        }

        info!(hs_code, count = documents.len(), "collected rulings");
        Ok(documents)
    }
}

/// Pages on the ruling sites that are navigation, not rulings.
const EXCLUDED_PATHS: &[&str] = &["/search", "/home", "/requirements", "/sites/default/files"];

/// Validate, scope, and deduplicate raw search results.
///
/// Results outside the authoritative domains are discarded outright, as are
/// non-ruling pages and records missing a URL or body text. Two results
/// with identical normalized body text collapse to one document.
fn qualify_results(
    results: Vec<RawResult>,
    hs_code: &str,
    include_domains: &[String],
) -> Vec<RulingDocument> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut documents = Vec::new();

    for result in results {
        if result.url.is_empty() || result.content.trim().is_empty() {
            warn!(url = %result.url, "discarding malformed result");
            continue;
        }
        if !url_in_domains(&result.url, include_domains) {
            warn!(url = %result.url, "discarding off-domain result");
            continue;
        }
        if !is_ruling_page(&result.url) {
            debug!(url = %result.url, "discarding non-ruling page");
            continue;
        }

        let title = if result.title.trim().is_empty() {
            extract_ruling_id(&result.url).unwrap_or_else(|| "(untitled ruling)".to_string())
        } else {
            result.title.trim().to_string()
        };

        let published_date = result
            .published_date
            .as_deref()
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

        let document = RulingDocument::new(
            result.url,
            hs_code.to_string(),
            title,
            result.content,
            published_date,
        );

        // Identity is the content hash, so this collapses re-fetches of
        // the same ruling text.
        if seen.insert(document.id.clone()) {
            documents.push(document);
        }
    }

    documents
}

/// Whether the URL's host is one of the authoritative ruling domains
/// (exact match or subdomain).
fn url_in_domains(url: &str, include_domains: &[String]) -> bool {
    let Some(host) = url_host(url) else {
        return false;
    };
    include_domains
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

fn url_host(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Actual ruling pages live under `/ruling/`; everything else on the site
/// is navigation or bulk files.
fn is_ruling_page(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("/ruling/") && !EXCLUDED_PATHS.iter().any(|p| lower.contains(p))
}

/// Pull the ruling number out of a ruling URL, e.g.
/// `https://rulings.cbp.gov/ruling/N256328` → `N256328`.
fn extract_ruling_id(url: &str) -> Option<String> {
    const MARKER: &[u8] = b"/ruling/";
    // The marker is matched on the original bytes; a matching window is
    // all ASCII, so the offsets below stay char boundaries even when the
    // URL contains multi-byte characters.
    let pos = url
        .as_bytes()
        .windows(MARKER.len())
        .position(|w| w.eq_ignore_ascii_case(MARKER))?;
    let tail = &url[pos + MARKER.len()..];
    let id: String = tail
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if id.chars().any(|c| c.is_ascii_digit()) {
        Some(id.to_uppercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(url: &str, title: &str, content: &str) -> RawResult {
        RawResult {
            url: url.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            published_date: None,
        }
    }

    fn cbp_domains() -> Vec<String> {
        vec!["rulings.cbp.gov".to_string()]
    }

    #[test]
    fn test_off_domain_results_discarded() {
        let results = vec![
            raw(
                "https://rulings.cbp.gov/ruling/N256328",
                "N256328",
                "Speakers classified in subheading 8518.22.00",
            ),
            raw(
                "https://example.com/ruling/N999999",
                "blog post",
                "Unofficial commentary about speakers",
            ),
        ];
        let docs = qualify_results(results, "8518.22.00", &cbp_domains());
        assert_eq!(docs.len(), 1);
        assert!(docs[0].source_url.contains("rulings.cbp.gov"));
    }

    #[test]
    fn test_non_ruling_pages_discarded() {
        let results = vec![
            raw("https://rulings.cbp.gov/search?term=8518", "search", "results page"),
            raw("https://rulings.cbp.gov/home", "home", "landing page"),
            raw(
                "https://rulings.cbp.gov/ruling/H301619",
                "HQ H301619",
                "Classification of multimedia speakers",
            ),
        ];
        let docs = qualify_results(results, "8518.22.00", &cbp_domains());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "HQ H301619");
    }

    #[test]
    fn test_dedup_by_content_hash() {
        let body = "Ruling N256328: speakers classified in 8518.22.00";
        let results = vec![
            raw("https://rulings.cbp.gov/ruling/N256328", "N256328", body),
            // Same text fetched under a different URL.
            raw("https://rulings.cbp.gov/ruling/N256328?page=1", "dup", body),
        ];
        let docs = qualify_results(results, "8518.22.00", &cbp_domains());
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_malformed_records_rejected() {
        let results = vec![
            raw("", "no url", "some text"),
            raw("https://rulings.cbp.gov/ruling/N111111", "no body", "   "),
        ];
        let docs = qualify_results(results, "8518.22.00", &cbp_domains());
        assert!(docs.is_empty());
    }

    #[test]
    fn test_ruling_id_extraction() {
        assert_eq!(
            extract_ruling_id("https://rulings.cbp.gov/ruling/N256328"),
            Some("N256328".to_string())
        );
        assert_eq!(
            extract_ruling_id("https://rulings.cbp.gov/ruling/h301619?term=x"),
            Some("H301619".to_string())
        );
        assert_eq!(extract_ruling_id("https://rulings.cbp.gov/home"), None);
    }

    #[test]
    fn test_ruling_id_extraction_survives_non_ascii_urls() {
        // "İ" lowercases to two chars, so byte offsets computed on a
        // lowercased copy would not be valid in the original string.
        assert_eq!(
            extract_ruling_id("https://rulings.cbp.gov/İ/Ruling/N256328"),
            Some("N256328".to_string())
        );
        assert_eq!(
            extract_ruling_id("https://rulings.cbp.gov/İ/ruling/é999"),
            None
        );
    }

    #[test]
    fn test_untitled_non_ascii_url_result_qualifies() {
        let results = vec![raw(
            "https://rulings.cbp.gov/İ/ruling/é999",
            "",
            "Classification of loudspeaker enclosures under 8518.22.00",
        )];
        let docs = qualify_results(results, "8518.22.00", &cbp_domains());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "(untitled ruling)");
    }

    #[test]
    fn test_untitled_result_falls_back_to_ruling_id() {
        let results = vec![raw(
            "https://rulings.cbp.gov/ruling/R04137",
            "",
            "Tariff classification of skin care preparations",
        )];
        let docs = qualify_results(results, "3304.99.50.00", &cbp_domains());
        assert_eq!(docs[0].title, "R04137");
    }

    #[test]
    fn test_url_host_parsing() {
        assert_eq!(url_host("https://rulings.cbp.gov/ruling/x"), Some("rulings.cbp.gov"));
        assert_eq!(url_host("http://rulings.cbp.gov"), Some("rulings.cbp.gov"));
        assert_eq!(url_host("ftp://rulings.cbp.gov"), None);
        assert!(!url_in_domains(
            "https://rulingscbp.gov.evil.com/ruling/N1",
            &cbp_domains()
        ));
        assert!(url_in_domains(
            "https://www.rulings.cbp.gov/ruling/N1",
            &["cbp.gov".to_string()]
        ));
    }

    #[test]
    fn test_search_query_shape() {
        let collector = HttpRulingCollector::new(crate::config::CollectorConfig::default()).unwrap();
        let q = collector.search_query("8518.22.00", Some("bluetooth speaker"));
        assert!(q.contains("HS 8518.22.00"));
        assert!(q.contains("bluetooth speaker"));
        let bare = collector.search_query("8518.22.00", None);
        assert!(bare.contains("classification ruling"));
    }
}
