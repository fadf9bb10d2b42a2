//! Core domain types for Dowse.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the pipeline.

mod canonical;
mod doc;

pub use canonical::{Origin, canonical_key, canonicalize, origin_of};
pub use doc::{
    Candidate, DocSource, FetchedDoc, FinalResult, RawHit, SummarizedDoc, final_result_order,
};

use thiserror::Error;

/// A query string guaranteed to be non-empty (after trimming).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

#[derive(Debug, Error)]
#[error("query must not be empty")]
pub struct EmptyQueryError;

impl Query {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyQueryError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyQueryError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
