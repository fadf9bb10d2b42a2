//! Documents as they move through the pipeline stages.
//!
//! A search hit (`RawHit`) becomes a `Candidate` after dedup and filtering,
//! a `FetchedDoc` after retrieval, a `SummarizedDoc` after per-page
//! summarization, and finally part of a `FinalResult`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::canonical::canonical_key;

/// One search-engine result, as returned by the Search Client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHit {
    pub title: String,

    /// Absolute http(s) URL.
    pub url: String,

    pub snippet: String,

    /// The sub-query that produced this hit.
    pub origin_subquery: String,
}

/// A deduplicated, URL-filtered hit pending (or carrying) a relevance score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub hit: RawHit,

    /// Parsed form of `hit.url`.
    pub url: Url,

    /// Canonical URL string; the dedup and cache key.
    pub canonical_url: String,

    /// Index of the first sub-query that surfaced this URL.
    pub subquery_index: usize,

    /// All sub-queries that surfaced this URL, first-seen first.
    pub origin_subqueries: Vec<String>,

    /// Set exactly once by the relevance phase; 0..=5.
    pub relevance_score: u8,
}

impl Candidate {
    #[must_use]
    pub fn new(hit: RawHit, url: Url, subquery_index: usize) -> Self {
        let canonical_url = canonical_key(&url);
        let origin_subqueries = vec![hit.origin_subquery.clone()];
        Self {
            hit,
            url,
            canonical_url,
            subquery_index,
            origin_subqueries,
            relevance_score: 0,
        }
    }
}

/// Where a fetched document's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocSource {
    Network,
    Cache,
}

/// A successfully fetched and extracted page.
#[derive(Debug, Clone)]
pub struct FetchedDoc {
    pub url: String,

    /// HTTP status of the final response. Cache hits report 200.
    pub status: u16,

    /// Extracted main text, capped at `max_content_chars` characters.
    pub content_text: String,

    /// Byte length of `content_text`.
    pub byte_length: usize,

    pub source: DocSource,
}

/// A fetched document plus its per-page summary, with the provenance fields
/// that survive into serialized output.
#[derive(Debug, Clone, Serialize)]
pub struct SummarizedDoc {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub relevance: u8,
    pub summary: String,
    pub source: DocSource,

    #[serde(skip)]
    pub subquery_index: usize,

    #[serde(skip)]
    pub canonical_url: String,
}

/// The pipeline's answer: ranked sources plus one consolidated answer.
#[derive(Debug, Clone, Serialize)]
pub struct FinalResult {
    pub docs: Vec<SummarizedDoc>,
    pub final_answer: String,
}

impl FinalResult {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            docs: Vec::new(),
            final_answer: String::new(),
        }
    }
}

/// Ordering for documents in a `FinalResult`: relevance descending, then
/// first-seen sub-query index ascending, then canonical URL lexicographic.
/// Use with a stable sort.
#[must_use]
pub fn final_result_order(a: &SummarizedDoc, b: &SummarizedDoc) -> Ordering {
    b.relevance
        .cmp(&a.relevance)
        .then_with(|| a.subquery_index.cmp(&b.subquery_index))
        .then_with(|| a.canonical_url.cmp(&b.canonical_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(relevance: u8, subquery_index: usize, canonical_url: &str) -> SummarizedDoc {
        SummarizedDoc {
            title: String::new(),
            url: canonical_url.to_string(),
            snippet: String::new(),
            relevance,
            summary: "s".to_string(),
            source: DocSource::Network,
            subquery_index,
            canonical_url: canonical_url.to_string(),
        }
    }

    #[test]
    fn order_ranks_relevance_first() {
        let mut docs = vec![
            doc(3, 0, "https://a.test/1"),
            doc(5, 1, "https://a.test/2"),
            doc(4, 0, "https://a.test/3"),
        ];
        docs.sort_by(final_result_order);
        let scores: Vec<u8> = docs.iter().map(|d| d.relevance).collect();
        assert_eq!(scores, vec![5, 4, 3]);
    }

    #[test]
    fn order_breaks_ties_by_subquery_then_url() {
        let mut docs = vec![
            doc(4, 1, "https://b.test/x"),
            doc(4, 0, "https://z.test/x"),
            doc(4, 0, "https://a.test/x"),
        ];
        docs.sort_by(final_result_order);
        assert_eq!(docs[0].canonical_url, "https://a.test/x");
        assert_eq!(docs[1].canonical_url, "https://z.test/x");
        assert_eq!(docs[2].canonical_url, "https://b.test/x");
    }

    #[test]
    fn summarized_doc_serializes_stable_field_names() {
        let value = serde_json::to_value(doc(5, 2, "https://a.test/x")).unwrap();
        let obj = value.as_object().unwrap();
        for field in ["title", "url", "snippet", "relevance", "summary", "source"] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
        assert!(!obj.contains_key("subquery_index"));
        assert_eq!(obj["source"], "network");
    }

    #[test]
    fn final_result_serializes_answer_at_top_level() {
        let result = FinalResult {
            docs: vec![doc(5, 0, "https://a.test/x")],
            final_answer: "answer".to_string(),
        };
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["final_answer"], "answer");
        assert_eq!(value["docs"].as_array().unwrap().len(), 1);
    }
}
