//! Atomic extracted facts and the nearest-neighbor index contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// An atomic statement extracted by research, with provenance and embedding.
///
/// Facts are append-only: repeated research on a topic accumulates rows,
/// never updates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: Uuid,
    pub topic: String,
    pub text: String,
    pub source_url: String,

    /// Embedding vector (fixed dimensionality, set at index creation)
    #[serde(skip)]
    pub embedding: Vec<f32>,

    pub created_at: DateTime<Utc>,
}

impl Fact {
    pub fn new(
        topic: impl Into<String>,
        text: impl Into<String>,
        source_url: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            text: text.into(),
            source_url: source_url.into(),
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// A fact returned from a nearest-neighbor lookup, with its distance
#[derive(Debug, Clone)]
pub struct RetrievedFact {
    pub id: Uuid,
    pub topic: String,
    pub text: String,
    pub source_url: String,
    pub distance: f32,
}

/// Nearest-neighbor fact store contract
#[async_trait]
pub trait FactIndex: Send + Sync {
    /// Append a fact (no deduplication)
    async fn add(&self, fact: &Fact) -> Result<()>;

    /// Return up to `k` stored facts ordered by ascending distance from
    /// `query_vector`
    async fn nearest(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedFact>>;
}

/// Brute-force in-memory index for tests
#[derive(Default)]
pub struct InMemoryFactIndex {
    facts: tokio::sync::Mutex<Vec<Fact>>,
}

impl InMemoryFactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored facts
    pub async fn len(&self) -> usize {
        self.facts.lock().await.len()
    }

    /// Snapshot of all stored facts
    pub async fn all(&self) -> Vec<Fact> {
        self.facts.lock().await.clone()
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[async_trait]
impl FactIndex for InMemoryFactIndex {
    async fn add(&self, fact: &Fact) -> Result<()> {
        if fact.embedding.is_empty() {
            return Err(Error::vector_db("Fact has no embedding"));
        }
        self.facts.lock().await.push(fact.clone());
        Ok(())
    }

    async fn nearest(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedFact>> {
        let facts = self.facts.lock().await;
        let mut scored: Vec<RetrievedFact> = facts
            .iter()
            .map(|f| RetrievedFact {
                id: f.id,
                topic: f.topic.clone(),
                text: f.text.clone(),
                source_url: f.source_url.clone(),
                distance: l2_distance(&f.embedding, query_vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }
}
