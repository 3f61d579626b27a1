//! Memory contracts for the runtime core.
//!
//! The vector store and the embedding HTTP service are external
//! collaborators; the core sees only [`Embedder`] and [`MemoryStore`].
//! [`InMemoryStore`] is the local-mode/test backend: naive cosine
//! similarity over embeddings produced by whatever [`Embedder`] it wraps.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bh_domain::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: Uuid,
    pub content: String,
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

/// Per-bot memory collection operations.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Semantic search within a bot's collection.
    async fn search(&self, bot_id: Uuid, query: &str, limit: usize) -> Result<Vec<MemoryHit>>;

    /// Ingest one memory into a bot's collection.
    async fn ingest(&self, bot_id: Uuid, content: &str) -> Result<Uuid>;

    /// Drop a bot's whole collection (bot deletion cascade).
    async fn drop_collection(&self, bot_id: Uuid) -> Result<()>;
}

/// Object storage seam for attachment bytes. The runtime only ever moves
/// URLs; the bytes live behind this provider.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store a blob under a bot's namespace; returns a retrievable URL.
    async fn store(&self, bot_id: Uuid, name: &str, bytes: Vec<u8>) -> Result<String>;

    /// Delete everything stored for a bot (deletion cascade).
    async fn drop_namespace(&self, bot_id: Uuid) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StoredMemory {
    id: Uuid,
    content: String,
    vector: Vec<f32>,
    created_at: DateTime<Utc>,
}

pub struct InMemoryStore {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<Uuid, Vec<StoredMemory>>>,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(&self, bot_id: Uuid, query: &str, limit: usize) -> Result<Vec<MemoryHit>> {
        let qv = self.embedder.embed(query).await?;
        let collections = self.collections.read().await;
        let Some(memories) = collections.get(&bot_id) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<MemoryHit> = memories
            .iter()
            .map(|m| MemoryHit {
                id: m.id,
                content: m.content.clone(),
                score: cosine(&qv, &m.vector),
                created_at: m.created_at,
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn ingest(&self, bot_id: Uuid, content: &str) -> Result<Uuid> {
        if content.trim().is_empty() {
            return Err(Error::Validation("memory content is empty".into()));
        }
        let vector = self.embedder.embed(content).await?;
        let id = Uuid::new_v4();
        self.collections
            .write()
            .await
            .entry(bot_id)
            .or_default()
            .push(StoredMemory {
                id,
                content: content.to_string(),
                vector,
                created_at: Utc::now(),
            });
        Ok(id)
    }

    async fn drop_collection(&self, bot_id: Uuid) -> Result<()> {
        self.collections.write().await.remove(&bot_id);
        Ok(())
    }
}

/// Deterministic character-histogram embedder for tests and local mode.
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; 64];
        for b in text.to_lowercase().bytes() {
            v[(b as usize) % 64] += 1.0;
        }
        Ok(v)
    }
}
