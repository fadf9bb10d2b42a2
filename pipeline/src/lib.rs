//! The six-phase retrieval-and-synthesis pipeline.
//!
//! A run turns one query into a ranked list of summarized sources plus a
//! consolidated answer: expand → search → relevance-filter → fetch →
//! summarize → merge. Phase boundaries are barriers; inside a phase, work
//! fans out under the configured concurrency caps. Per-item failures are
//! absorbed and logged; only structural failures (and cancellation) end the
//! run.

mod error;

pub use error::{Phase, PipelineError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, de::Error as _};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use dowse_config::Config;
use dowse_prompts::PromptStore;
use dowse_providers::{LlmClient, LlmSettings, retry::RetryConfig};
use dowse_search::SearchClient;
use dowse_types::{
    Candidate, FetchedDoc, FinalResult, Query, RawHit, SummarizedDoc, canonical_key,
    final_result_order,
};
use dowse_webfetch::{ContentCache, FetchError, Fetcher, FetcherSettings, RobotsChecker, UrlFilter};

/// Timeout for the one-off robots.txt request per origin.
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);

/// Redirect hop cap for page fetches.
const MAX_REDIRECTS: u32 = 5;

/// Schema hints appended to the system message of structured calls.
const EXPAND_SCHEMA: &str = r#"{"queries": ["<search query>", ...]}"#;
const SCORE_SCHEMA: &str = r#"{"score": <integer 0-5>}"#;

/// Structured payload of the expand phase.
#[derive(Debug, Deserialize)]
struct SubQueryPayload {
    queries: Vec<String>,
}

/// Structured payload of the relevance phase. Deserialization rejects
/// out-of-range scores, so a 7 is a schema failure the client retries, not
/// a value to clamp.
#[derive(Debug)]
struct ScorePayload {
    score: u8,
}

impl<'de> Deserialize<'de> for ScorePayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            score: u64,
        }
        let raw = Raw::deserialize(deserializer)?;
        if raw.score > 5 {
            return Err(D::Error::custom(format!(
                "score must be in 0..=5, got {}",
                raw.score
            )));
        }
        Ok(Self {
            score: raw.score as u8,
        })
    }
}

/// The orchestrator. Owns the run-scoped machinery: clients, the fetcher
/// with its politeness state, and the LLM concurrency gate.
pub struct Pipeline {
    config: Config,
    prompts: PromptStore,
    llm: LlmClient,
    search: SearchClient,
    filter: UrlFilter,
    fetcher: Arc<Fetcher>,
    llm_slots: Arc<Semaphore>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate configuration and assemble the components. Fatal on invalid
    /// config or an unreadable prompt file.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        config.validate()?;

        let prompts = match &config.prompts_path {
            Some(path) => PromptStore::from_path(path)?,
            None => PromptStore::builtin(),
        };

        let llm = LlmClient::new(LlmSettings {
            base_url: config.llm_base_url().to_string(),
            api_key: config.llm_api_key().to_string(),
            model: config.llm_model().to_string(),
            temperature: config.llm_temperature(),
            timeout: config.llm_timeout(),
        });

        let search = SearchClient::new(config.search_base_url(), config.user_agent());

        let filter = UrlFilter::new(&config.disallowed_domains);
        let robots = RobotsChecker::new(config.user_agent(), ROBOTS_TIMEOUT);
        let cache = if config.cache_enabled() {
            ContentCache::new(config.cache_directory())
        } else {
            ContentCache::disabled()
        };

        let fetcher = Fetcher::new(
            FetcherSettings {
                user_agent: config.user_agent().to_string(),
                max_concurrent_fetches: config.max_concurrent_fetches(),
                per_origin_delay: config.per_domain_delay(),
                timeout: config.fetch_timeout(),
                max_redirects: MAX_REDIRECTS,
                max_content_chars: config.max_content_chars(),
            },
            filter.clone(),
            robots,
            cache,
        );

        let llm_slots = Arc::new(Semaphore::new(config.llm_max_concurrent_calls()));

        Ok(Self {
            config,
            prompts,
            llm,
            search,
            filter,
            fetcher,
            llm_slots,
        })
    }

    /// Replace the LLM retry policy. Tests use a fast one.
    #[must_use]
    pub fn with_llm_retry(mut self, retry: RetryConfig) -> Self {
        self.llm = self.llm.with_retry(retry);
        self
    }

    /// Run the full pipeline for one query.
    pub async fn run(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<FinalResult, PipelineError> {
        let subqueries = self.expand(query, cancel).await?;
        tracing::info!(count = subqueries.len(), "expanded query");

        let candidates = self.search_candidates(&subqueries, cancel).await?;
        tracing::info!(count = candidates.len(), "collected candidates");

        let scored = self.score_relevance(query, candidates, cancel).await?;
        tracing::info!(count = scored.len(), "candidates passed relevance filter");
        if scored.is_empty() {
            return Ok(FinalResult::empty());
        }

        let fetched = self.fetch_docs(scored, cancel).await?;
        tracing::info!(count = fetched.len(), "documents fetched");

        let summarized = self.summarize(query, fetched, cancel).await?;
        tracing::info!(count = summarized.len(), "documents summarized");

        self.merge(query, summarized, cancel).await
    }

    /// Phase 1: expand the query into sub-queries.
    ///
    /// `Unavailable` falls back to the query itself; `BadOutput` aborts the
    /// run, since downstream phases would be built on garbage.
    async fn expand(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PipelineError> {
        let n = self.config.num_better_queries();
        let system = self.prompts.render("system", &[])?;
        let user = self.prompts.render(
            "expand_queries",
            &[("count", n.to_string().as_str()), ("query", query.as_str())],
        )?;

        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = self.llm.complete_structured::<SubQueryPayload>(
                &system,
                &user,
                EXPAND_SCHEMA,
                self.config.llm_tokens.expand_queries,
            ) => outcome,
        };

        match outcome {
            Ok(payload) => {
                let mut queries: Vec<String> = payload
                    .queries
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .collect();
                if queries.is_empty() || queries.iter().any(String::is_empty) {
                    return Err(PipelineError::aborted(
                        Phase::Expand,
                        "sub-query list was empty or contained blank entries",
                    ));
                }
                queries.truncate(n);
                Ok(queries)
            }
            Err(dowse_providers::LlmError::Unavailable(reason)) => {
                tracing::warn!(%reason, "expand unavailable, falling back to the raw query");
                Ok(vec![query.as_str().to_string()])
            }
            Err(dowse_providers::LlmError::BadOutput(reason)) => {
                Err(PipelineError::aborted(Phase::Expand, reason))
            }
        }
    }

    /// Phase 2: concurrent searches, then dedup, filter, and cap.
    ///
    /// Dedup keeps the first-seen hit per canonical URL, stable across the
    /// sub-query iteration order, and records every originating sub-query.
    async fn search_candidates(
        &self,
        subqueries: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, PipelineError> {
        let max_per_query = self.config.max_results_per_query();

        let mut tasks = JoinSet::new();
        for (index, subquery) in subqueries.iter().enumerate() {
            let client = self.search.clone();
            let subquery = subquery.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let hits = tokio::select! {
                    () = cancel.cancelled() => Vec::new(),
                    hits = client.search(&subquery, max_per_query) => hits,
                };
                (index, hits)
            });
        }

        let mut per_subquery: Vec<Vec<RawHit>> = vec![Vec::new(); subqueries.len()];
        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, hits)) = joined {
                per_subquery[index] = hits;
            }
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for (index, hits) in per_subquery.into_iter().enumerate() {
            for hit in hits {
                let Ok(url) = Url::parse(&hit.url) else {
                    tracing::debug!(url = %hit.url, "dropping hit: unparseable url");
                    continue;
                };
                if !self.filter.is_allowed(&url) {
                    tracing::debug!(url = %hit.url, "dropping hit: disallowed domain");
                    continue;
                }

                let key = canonical_key(&url);
                match seen.get(&key) {
                    Some(&existing) => {
                        candidates[existing]
                            .origin_subqueries
                            .push(hit.origin_subquery);
                    }
                    None => {
                        seen.insert(key, candidates.len());
                        candidates.push(Candidate::new(hit, url, index));
                    }
                }
            }
        }

        candidates.truncate(self.config.total_max_results());
        Ok(candidates)
    }

    /// Phase 3: score every candidate 0..=5, bounded by the LLM gate.
    ///
    /// An individual call failure scores that candidate 0; a stuck provider
    /// must not block the run. Scores below the threshold drop out.
    async fn score_relevance(
        &self,
        query: &Query,
        mut candidates: Vec<Candidate>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, PipelineError> {
        let system = self.prompts.render("system", &[])?;
        let max_tokens = self.config.llm_tokens.relevance_score;

        let mut tasks = JoinSet::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let user = self.prompts.render(
                "relevance_score",
                &[
                    ("query", query.as_str()),
                    ("title", candidate.hit.title.as_str()),
                    ("url", candidate.hit.url.as_str()),
                    ("snippet", candidate.hit.snippet.as_str()),
                ],
            )?;
            let system = system.clone();
            let llm = self.llm.clone();
            let slots = Arc::clone(&self.llm_slots);
            let cancel = cancel.clone();
            let url = candidate.canonical_url.clone();

            tasks.spawn(async move {
                let Ok(_slot) = slots.acquire_owned().await else {
                    return (index, 0);
                };
                let score = tokio::select! {
                    () = cancel.cancelled() => 0,
                    outcome = llm.complete_structured::<ScorePayload>(
                        &system, &user, SCORE_SCHEMA, max_tokens,
                    ) => match outcome {
                        Ok(payload) => payload.score,
                        Err(e) => {
                            tracing::warn!(%url, error = %e, "relevance call failed, scoring 0");
                            0
                        }
                    },
                };
                (index, score)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, score)) = joined {
                candidates[index].relevance_score = score;
            }
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let threshold = self.config.min_relevance_score();
        candidates.retain(|c| {
            let keep = c.relevance_score >= threshold;
            if !keep {
                tracing::debug!(
                    url = %c.canonical_url,
                    score = c.relevance_score,
                    "dropping candidate below relevance threshold"
                );
            }
            keep
        });
        Ok(candidates)
    }

    /// Phase 4: fetch all surviving candidates. The fetcher's own gates
    /// enforce politeness; no extra limit here.
    async fn fetch_docs(
        &self,
        candidates: Vec<Candidate>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(Candidate, FetchedDoc)>, PipelineError> {
        let mut tasks = JoinSet::new();
        for (index, candidate) in candidates.into_iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let outcome = fetcher.fetch(&candidate.url, &cancel).await;
                (index, candidate, outcome)
            });
        }

        let mut fetched: Vec<(usize, Candidate, FetchedDoc)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((index, candidate, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(doc) => fetched.push((index, candidate, doc)),
                Err(FetchError::Cancelled) => {}
                Err(e) => {
                    tracing::warn!(
                        url = %candidate.canonical_url,
                        error = %e,
                        "dropping document: fetch failed"
                    );
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        fetched.sort_by_key(|(index, _, _)| *index);
        Ok(fetched
            .into_iter()
            .map(|(_, candidate, doc)| (candidate, doc))
            .collect())
    }

    /// Phase 5: summarize each document, bounded by the LLM gate. A failed
    /// summarization drops the document, not the run.
    async fn summarize(
        &self,
        query: &Query,
        fetched: Vec<(Candidate, FetchedDoc)>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SummarizedDoc>, PipelineError> {
        let system = self.prompts.render("system", &[])?;
        let max_tokens = self.config.llm_tokens.summarize_content;

        let mut tasks = JoinSet::new();
        for (index, (candidate, doc)) in fetched.into_iter().enumerate() {
            let user = self.prompts.render(
                "summarize_content",
                &[
                    ("query", query.as_str()),
                    ("content", doc.content_text.as_str()),
                ],
            )?;
            let system = system.clone();
            let llm = self.llm.clone();
            let slots = Arc::clone(&self.llm_slots);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let Ok(_slot) = slots.acquire_owned().await else {
                    return None;
                };
                let outcome = tokio::select! {
                    () = cancel.cancelled() => return None,
                    outcome = llm.complete_text(&system, &user, max_tokens) => outcome,
                };
                match outcome {
                    Ok(summary) => Some((
                        index,
                        SummarizedDoc {
                            title: candidate.hit.title,
                            url: candidate.canonical_url.clone(),
                            snippet: candidate.hit.snippet,
                            relevance: candidate.relevance_score,
                            summary,
                            source: doc.source,
                            subquery_index: candidate.subquery_index,
                            canonical_url: candidate.canonical_url,
                        },
                    )),
                    Err(e) => {
                        tracing::warn!(
                            url = %candidate.canonical_url,
                            error = %e,
                            "dropping document: summarization failed"
                        );
                        None
                    }
                }
            });
        }

        let mut summarized: Vec<(usize, SummarizedDoc)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(entry)) = joined {
                summarized.push(entry);
            }
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        summarized.sort_by_key(|(index, _)| *index);
        Ok(summarized.into_iter().map(|(_, doc)| doc).collect())
    }

    /// Phase 6: merge the summaries into one answer.
    ///
    /// If the merge call fails after retries, the answer falls back to the
    /// deterministic source-tagged concatenation and the run still succeeds.
    async fn merge(
        &self,
        query: &Query,
        mut docs: Vec<SummarizedDoc>,
        cancel: &CancellationToken,
    ) -> Result<FinalResult, PipelineError> {
        docs.sort_by(final_result_order);

        if docs.is_empty() {
            return Ok(FinalResult::empty());
        }

        let summaries = tagged_summaries(&docs);
        let system = self.prompts.render("system", &[])?;
        let user = self.prompts.render(
            "merge_summaries",
            &[("query", query.as_str()), ("summaries", summaries.as_str())],
        )?;

        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = self.llm.complete_text(
                &system, &user, self.config.llm_tokens.merge_summaries,
            ) => outcome,
        };

        let final_answer = match outcome {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "merge failed, answering with concatenated summaries");
                summaries
            }
        };

        Ok(FinalResult { docs, final_answer })
    }
}

/// Concatenate summaries with `== Source N ==` provenance headers. Also the
/// deterministic fallback answer when the merge call fails.
fn tagged_summaries(docs: &[SummarizedDoc]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| format!("== Source {} ==\n{}", i + 1, doc.summary))
        .collect::<Vec<_>>()
        .join("\n\n")
}
