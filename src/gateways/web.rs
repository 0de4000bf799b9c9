//! Web search fallback over DuckDuckGo's HTML endpoint.
//!
//! An LLM turns the query into a short search phrase, which is restricted to
//! the Red Cross site plus a few trusted sites per domain. Results come back
//! as low-confidence passages.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::conversation::types::{Domain, Passage, RetrievalRequest, RetrievalResult};
use crate::error::GatewayError;
use crate::gateways::WebFallbackGateway;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

const GATEWAY: &str = "web_fallback";

pub const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Search region sent to the engine.
const REGION: &str = "nl-nl";

/// Results kept per search.
const MAX_RESULTS: usize = 2;

const MAX_QUERY_WORDS: usize = 10;

/// Web results are never verified, so confidence is fixed.
const WEB_CONFIDENCE: f32 = 0.5;

const ALWAYS_SITE: &str = "rodekruis.nl";

static RESULT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#).unwrap()
});
static RESULT_SNIPPET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#).unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Searches the web when the knowledge index has nothing.
pub struct WebSearchFallback {
    llm: Arc<dyn LlmProvider>,
    client: reqwest::Client,
    endpoint: String,
}

impl WebSearchFallback {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            client: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Point at a different search endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn search_phrase(&self, request: &RetrievalRequest) -> Result<String, GatewayError> {
        let domains: Vec<&str> = request.domains.iter().map(|d| d.label()).collect();
        let prompt = format!(
            "Original query: {}\nLocation: {}\nDomains: {}\nLanguage: {}",
            request.query,
            request.location().unwrap_or("Netherlands"),
            domains.join(", "),
            request.language,
        );
        let llm_request = CompletionRequest::new(vec![
            ChatMessage::system(
                "Create a simple search query (maximum 10 words) in English or Dutch that will \
                 find help information. Return ONLY the search query, no explanation.",
            ),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.0)
        .with_max_tokens(64);

        let response = self
            .llm
            .complete(llm_request)
            .await
            .map_err(|e| GatewayError::from_llm(GATEWAY, e))?;

        let phrase = clean_phrase(&response.content);
        if phrase.is_empty() {
            warn!("Search phrase builder returned nothing; using the raw query");
            return Ok(clean_phrase(&request.query));
        }
        Ok(phrase)
    }

    async fn fetch(&self, query: &str) -> Result<String, GatewayError> {
        let transport = |reason: String| GatewayError::Transport {
            gateway: GATEWAY.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("kl", REGION)])
            .header(reqwest::header::USER_AGENT, "Mozilla/5.0 (compatible; aid-assist)")
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(transport(format!("search returned {status}")));
        }
        resp.text().await.map_err(|e| transport(e.to_string()))
    }
}

#[async_trait]
impl WebFallbackGateway for WebSearchFallback {
    async fn search(&self, request: &RetrievalRequest) -> Result<RetrievalResult, GatewayError> {
        let phrase = self.search_phrase(request).await?;
        let query = build_search_query(&phrase, &relevant_sites(&request.domains));
        debug!(query = %query, "Running web search");

        let html = self.fetch(&query).await?;
        let domain = request
            .domains
            .first()
            .copied()
            .unwrap_or(Domain::Other);

        let passages: Vec<Passage> = parse_results(&html)
            .into_iter()
            .take(MAX_RESULTS)
            .map(|hit| Passage {
                text: hit.text(),
                source: hit.url,
                last_updated: None,
                contact: Default::default(),
                domain,
                relevance: WEB_CONFIDENCE,
            })
            .collect();

        let completeness = passages.len() as f32 / MAX_RESULTS as f32;
        debug!(results = passages.len(), "Web search complete");
        Ok(RetrievalResult::new(passages, completeness, WEB_CONFIDENCE))
    }
}

// ── Query construction ──────────────────────────────────────────────

/// Sites a search is restricted to. The Red Cross site is always first.
pub fn relevant_sites(domains: &[Domain]) -> Vec<&'static str> {
    let mut sites = vec![ALWAYS_SITE];
    for domain in domains {
        for site in domain_sites(*domain) {
            if !sites.contains(site) {
                sites.push(site);
            }
        }
    }
    sites
}

fn domain_sites(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::FoodAndClothing => &["voedselbank.nl", "voedselbankennederland.nl"],
        Domain::Shelter => &["deregenboog.org", "opvang.nl"],
        Domain::HealthAndWellbeing => &["ggd.nl", "zorgverzekeringslijn.nl"],
        Domain::SafetyAndProtection => &["veiligthuis.nl", "blijfgroep.nl"],
        Domain::CoursesAndActivities => &["amsterdam.nl/onderwijs"],
        Domain::AsylumAndReturn => &["vluchtelingenwerk.nl", "refugeehelp.nl"],
        _ => &[],
    }
}

pub fn build_search_query(phrase: &str, sites: &[&str]) -> String {
    let restriction: Vec<String> = sites.iter().map(|s| format!("site:{s}")).collect();
    format!("{phrase} {}", restriction.join(" OR "))
}

/// Strip quotes and extra lines, cap at the word limit.
fn clean_phrase(raw: &str) -> String {
    let line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    line.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .split_whitespace()
        .take(MAX_QUERY_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Result parsing ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

impl SearchHit {
    fn text(&self) -> String {
        if self.snippet.is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.title, self.snippet)
        }
    }
}

/// A snippet belongs to the link before it, and only if it appears before
/// the next link.
fn parse_results(html: &str) -> Vec<SearchHit> {
    let links: Vec<regex::Captures<'_>> = RESULT_LINK.captures_iter(html).collect();

    links
        .iter()
        .enumerate()
        .filter_map(|(i, caps)| {
            let url = resolve_url(&caps[1])?;
            let block_start = caps.get(0).map_or(0, |m| m.end());
            let block_end = links
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(html.len(), |m| m.start());
            let snippet = RESULT_SNIPPET
                .captures(&html[block_start..block_end])
                .map(|c| clean_html(&c[1]))
                .unwrap_or_default();
            Some(SearchHit {
                title: clean_html(&caps[2]),
                url,
                snippet,
            })
        })
        .collect()
}

/// Unwrap the engine's redirect links to the target URL.
fn resolve_url(href: &str) -> Option<String> {
    let href = decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href
    };
    let url = reqwest::Url::parse(&absolute).ok()?;
    if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(target.into_owned());
    }
    Some(url.to_string())
}

fn clean_html(fragment: &str) -> String {
    let text = TAG.replace_all(fragment, "");
    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};

    const SAMPLE_HTML: &str = r#"
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rodekruis.nl%2Fhulp%2Fvoedsel&amp;rut=abc">Voedselhulp &amp; <b>kleding</b></a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Het Rode Kruis helpt met <b>voedsel</b> in Amsterdam.</a>
</div>
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="https://www.voedselbank.nl/">Voedselbank Nederland</a>
  </h2>
  <a class="result__snippet" href="https://www.voedselbank.nl/">Vind een voedselbank bij jou in de buurt.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://example.org/third">Third</a>
  <a class="result__snippet" href="https://example.org/third">Not kept.</a>
</div>
"#;

    #[test]
    fn sites_always_include_red_cross() {
        assert_eq!(relevant_sites(&[]), vec!["rodekruis.nl"]);
        assert_eq!(relevant_sites(&[Domain::Work]), vec!["rodekruis.nl"]);
        let sites = relevant_sites(&[Domain::FoodAndClothing, Domain::Shelter]);
        assert_eq!(
            sites,
            vec![
                "rodekruis.nl",
                "voedselbank.nl",
                "voedselbankennederland.nl",
                "deregenboog.org",
                "opvang.nl"
            ]
        );
    }

    #[test]
    fn query_joins_site_restrictions() {
        let query = build_search_query("voedselhulp Amsterdam", &["rodekruis.nl", "ggd.nl"]);
        assert_eq!(query, "voedselhulp Amsterdam site:rodekruis.nl OR site:ggd.nl");
    }

    #[test]
    fn phrase_is_trimmed_and_capped() {
        assert_eq!(clean_phrase("\"food bank Amsterdam\"\n\nExplanation"), "food bank Amsterdam");
        let long = "one two three four five six seven eight nine ten eleven twelve";
        assert_eq!(clean_phrase(long).split_whitespace().count(), 10);
    }

    #[test]
    fn parses_titles_snippets_and_redirects() {
        let hits = parse_results(SAMPLE_HTML);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].url, "https://www.rodekruis.nl/hulp/voedsel");
        assert_eq!(hits[0].title, "Voedselhulp & kleding");
        assert_eq!(hits[0].snippet, "Het Rode Kruis helpt met voedsel in Amsterdam.");
        assert_eq!(hits[1].url, "https://www.voedselbank.nl/");
    }

    #[test]
    fn result_without_snippet_keeps_its_own_text() {
        let html = r#"
<div class="result">
  <a rel="nofollow" class="result__a" href="https://a.example.nl/">Site A</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://b.example.nl/">Site B</a>
  <a class="result__snippet" href="https://b.example.nl/">Snippet for B</a>
</div>
"#;
        let hits = parse_results(html);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://a.example.nl/");
        assert_eq!(hits[0].snippet, "");
        assert_eq!(hits[0].text(), "Site A");
        assert_eq!(hits[1].url, "https://b.example.nl/");
        assert_eq!(hits[1].snippet, "Snippet for B");
    }

    #[test]
    fn parse_of_unrelated_html_is_empty() {
        assert!(parse_results("<html><body>No results.</body></html>").is_empty());
    }

    struct PhraseLlm;

    #[async_trait]
    impl LlmProvider for PhraseLlm {
        fn model_name(&self) -> &str {
            "mock-phrase"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "voedselhulp Amsterdam".into(),
                input_tokens: 5,
                output_tokens: 3,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    async fn serve(status: axum::http::StatusCode, body: &'static str) -> String {
        let app = axum::Router::new().route(
            "/html/",
            axum::routing::get(move || async move { (status, axum::response::Html(body)) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/html/")
    }

    fn request() -> RetrievalRequest {
        let mut entities = BTreeMap::new();
        entities.insert("location".to_string(), "Amsterdam".to_string());
        RetrievalRequest {
            query: "Where can I get food?".into(),
            domains: vec![Domain::FoodAndClothing],
            entities,
            language: "english".into(),
        }
    }

    #[tokio::test]
    async fn search_keeps_two_results_with_fixed_confidence() {
        let endpoint = serve(axum::http::StatusCode::OK, SAMPLE_HTML).await;
        let web = WebSearchFallback::new(Arc::new(PhraseLlm)).with_endpoint(endpoint);

        let result = web.search(&request()).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.completeness(), 1.0);
        assert_eq!(result.confidence(), 0.5);
        assert_eq!(result.passages()[0].source, "https://www.rodekruis.nl/hulp/voedsel");
        assert_eq!(result.passages()[0].domain, Domain::FoodAndClothing);
    }

    #[tokio::test]
    async fn search_with_no_hits_is_empty() {
        let endpoint = serve(axum::http::StatusCode::OK, "<html></html>").await;
        let web = WebSearchFallback::new(Arc::new(PhraseLlm)).with_endpoint(endpoint);
        let result = web.search(&request()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.completeness(), 0.0);
    }

    #[tokio::test]
    async fn upstream_error_is_transport_failure() {
        let endpoint = serve(axum::http::StatusCode::SERVICE_UNAVAILABLE, "down").await;
        let web = WebSearchFallback::new(Arc::new(PhraseLlm)).with_endpoint(endpoint);
        let err = web.search(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
    }
}
