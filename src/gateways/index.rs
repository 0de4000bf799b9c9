//! In-memory keyword knowledge index.
//!
//! Documents are tagged with a domain and carry source, freshness date and
//! contact metadata. Search scores each document by the fraction of query
//! terms it contains, keeps the top three, and derives completeness and
//! confidence from how many matched and how well.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::conversation::types::{Domain, Passage, RetrievalRequest, RetrievalResult};
use crate::error::{ConfigError, GatewayError};
use crate::gateways::RetrievalGateway;

/// Max passages returned per search.
pub const TOP_K: usize = 3;

/// Mean relevance that maps to full confidence.
const CONFIDENCE_NORMALISER: f32 = 0.8;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "can", "do", "for", "from", "get", "how", "i", "in",
    "is", "it", "me", "my", "of", "on", "or", "the", "there", "to", "what", "when", "where",
    "which", "who", "with", "you",
];

/// A document stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub last_updated: Option<NaiveDate>,
    #[serde(default)]
    pub contact: BTreeMap<String, String>,
    #[serde(default = "other_domain")]
    pub domain: Domain,
}

fn other_domain() -> Domain {
    Domain::Other
}

/// Append-only document store with keyword search.
#[derive(Debug, Default)]
pub struct KnowledgeIndex {
    documents: RwLock<Vec<KnowledgeDocument>>,
}

impl KnowledgeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<KnowledgeDocument>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    /// Index preloaded with a small development corpus.
    pub fn sample() -> Self {
        Self::with_documents(sample_documents())
    }

    /// Load documents from a JSON array on disk.
    pub async fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let documents: Vec<KnowledgeDocument> = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), documents = documents.len(), "Loaded knowledge corpus");
        Ok(Self::with_documents(documents))
    }

    /// Add documents. Existing documents are never modified.
    pub async fn add_documents(&self, documents: impl IntoIterator<Item = KnowledgeDocument>) {
        let mut store = self.documents.write().await;
        let before = store.len();
        store.extend(documents);
        debug!(added = store.len() - before, total = store.len(), "Documents indexed");
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    async fn search(&self, request: &RetrievalRequest) -> RetrievalResult {
        let terms = query_terms(request);
        if terms.is_empty() {
            return RetrievalResult::empty();
        }

        let store = self.documents.read().await;
        let mut scored: Vec<(f32, &KnowledgeDocument)> = store
            .iter()
            .filter(|doc| request.is_unrestricted() || request.domains.contains(&doc.domain))
            .filter_map(|doc| {
                let text = doc.text.to_lowercase();
                let matched = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (matched > 0).then(|| (matched as f32 / terms.len() as f32, doc))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(TOP_K);

        let passages: Vec<Passage> = scored
            .into_iter()
            .map(|(relevance, doc)| Passage {
                text: doc.text.clone(),
                source: doc.source.clone(),
                last_updated: doc.last_updated,
                contact: doc.contact.clone(),
                domain: doc.domain,
                relevance,
            })
            .collect();

        let (completeness, confidence) = scores(&passages);
        RetrievalResult::new(passages, completeness, confidence)
    }
}

#[async_trait]
impl RetrievalGateway for KnowledgeIndex {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult, GatewayError> {
        let result = self.search(request).await;
        debug!(
            passages = result.len(),
            completeness = result.completeness(),
            confidence = result.confidence(),
            "Index search complete"
        );
        Ok(result)
    }
}

/// Lowercased, de-duplicated search terms from the query and entity values.
fn query_terms(request: &RetrievalRequest) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let sources = std::iter::once(request.query.as_str())
        .chain(request.entities.values().map(String::as_str));
    for source in sources {
        for word in source
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
        {
            if word.len() < 2 || STOPWORDS.contains(&word.as_str()) || terms.contains(&word) {
                continue;
            }
            terms.push(word);
        }
    }
    terms
}

fn scores(passages: &[Passage]) -> (f32, f32) {
    if passages.is_empty() {
        return (0.0, 0.0);
    }
    let completeness = (passages.len() as f32 / TOP_K as f32).min(1.0);
    let mean = passages.iter().map(|p| p.relevance).sum::<f32>() / passages.len() as f32;
    let confidence = (mean / CONFIDENCE_NORMALISER).min(1.0);
    (completeness, confidence)
}

fn sample_documents() -> Vec<KnowledgeDocument> {
    fn doc(
        text: &str,
        source: &str,
        date: (i32, u32, u32),
        contact: &[(&str, &str)],
        domain: Domain,
    ) -> KnowledgeDocument {
        KnowledgeDocument {
            text: text.to_string(),
            source: source.to_string(),
            last_updated: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            contact: contact
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            domain,
        }
    }

    vec![
        doc(
            "Food assistance is available at the Red Cross office on Mainstreet in Amsterdam. \
             Open Monday-Friday 9-5.",
            "RC Food Services Guide",
            (2024, 1, 15),
            &[("email", "food@redcross.org"), ("phone", "555-0123")],
            Domain::FoodAndClothing,
        ),
        doc(
            "Emergency shelter services can be accessed 24/7 at our downtown location in Amsterdam.",
            "RC Shelter Guide",
            (2024, 1, 20),
            &[("phone", "555-0124")],
            Domain::Shelter,
        ),
        doc(
            "Financial aid applications are processed within 5-7 business days.",
            "RC Financial Aid Guide",
            (2024, 1, 10),
            &[("email", "finance@redcross.org")],
            Domain::Other,
        ),
        doc(
            "For immediate medical assistance, please call emergency services at 112.",
            "RC Emergency Guide",
            (2024, 1, 1),
            &[("phone", "112")],
            Domain::HealthAndWellbeing,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn request(query: &str, domains: Vec<Domain>) -> RetrievalRequest {
        RetrievalRequest {
            query: query.into(),
            domains,
            entities: BTreeMap::new(),
            language: "english".into(),
        }
    }

    #[test]
    fn terms_skip_stopwords_and_duplicates() {
        let mut req = request("Where can I get food in Amsterdam?", vec![]);
        req.entities.insert("location".into(), "amsterdam".into());
        assert_eq!(query_terms(&req), vec!["food", "amsterdam"]);
    }

    #[tokio::test]
    async fn domain_filter_limits_results() {
        let index = KnowledgeIndex::sample();
        let result = index
            .retrieve(&request("food assistance Amsterdam", vec![Domain::FoodAndClothing]))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.passages()[0].source, "RC Food Services Guide");
        assert!((result.completeness() - 1.0 / 3.0).abs() < 0.001);
        assert!((result.confidence() - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn other_domain_searches_everything() {
        let index = KnowledgeIndex::sample();
        let result = index
            .retrieve(&request("assistance in Amsterdam", vec![Domain::Other]))
            .await
            .unwrap();
        // food (both terms), shelter (amsterdam), medical (assistance)
        assert_eq!(result.len(), 3);
        assert_eq!(result.passages()[0].source, "RC Food Services Guide");
        assert!((result.completeness() - 1.0).abs() < 0.001);
        let relevances: Vec<f32> = result.passages().iter().map(|p| p.relevance).collect();
        assert!(relevances.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn no_match_is_empty_not_error() {
        let index = KnowledgeIndex::sample();
        let result = index
            .retrieve(&request("dentist appointment Groningen", vec![]))
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.completeness(), 0.0);
    }

    #[tokio::test]
    async fn add_documents_appends() {
        let index = KnowledgeIndex::new();
        assert!(index.is_empty().await);
        index
            .add_documents(vec![KnowledgeDocument {
                text: "Dentist consultations every Tuesday in Utrecht.".into(),
                source: "RC Health Desk".into(),
                last_updated: None,
                contact: BTreeMap::new(),
                domain: Domain::Dentist,
            }])
            .await;
        index.add_documents(sample_documents()).await;
        assert_eq!(index.len().await, 5);

        let result = index
            .retrieve(&request("dentist Utrecht", vec![Domain::Dentist]))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn loads_corpus_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"text": "Clothing handout on Saturdays.", "source": "RC Clothing",
                 "last_updated": "2024-03-01", "contact": {{"phone": "555-0199"}},
                 "domain": "food"}}]"#
        )
        .unwrap();

        let index = KnowledgeIndex::from_json_file(file.path()).await.unwrap();
        assert_eq!(index.len().await, 1);
        let result = index
            .retrieve(&request("clothing Saturdays", vec![Domain::FoodAndClothing]))
            .await
            .unwrap();
        assert_eq!(result.passages()[0].contact.get("phone").unwrap(), "555-0199");
    }

    #[tokio::test]
    async fn bad_corpus_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = KnowledgeIndex::from_json_file(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
