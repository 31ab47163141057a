//! # Collaborator Seams
//!
//! Full-text indexing and search are not part of the store. A store can be
//! given an [`Indexer`], which sees every chronology after its write commits,
//! and a [`Searcher`], which answers [`Store::search`](crate::Store::search).
//!
//! Both are called from whatever thread performs the write or search, so
//! implementations use interior mutability and must be `Send + Sync`.

use crate::formats::Chronology;
use crate::types::{LexisError, Nid};

/// Receives every chronology after a committed write.
pub trait Indexer: Send + Sync {
    /// Index or re-index one entity. A failure is logged by the store and
    /// does not undo the committed write.
    fn index(&self, chronology: &Chronology) -> Result<(), LexisError>;

    /// Make everything indexed so far durable. Called by `Store::save`.
    fn commit(&self) -> Result<(), LexisError>;
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Entity that matched.
    pub nid: Nid,
    /// Matched text, as the searcher reports it.
    pub text: String,
    pub score: f32,
}

pub trait Searcher: Send + Sync {
    /// At most `max_results` hits, best first.
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, LexisError>;
}
