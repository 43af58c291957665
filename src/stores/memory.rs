//! In-process reference implementation of all three store traits.
//!
//! Backs the integration tests and local demos. Similarity search is an exact
//! cosine scan; fine for the corpus sizes tests use, not a production index.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::{
    ChunkFilter, ChunkRecord, Conversation, ConversationMessage, ConversationStore, MapDocument,
    MapStore, ScoredChunk, StoreError, VectorStore,
};
use crate::util::cosine_similarity;

#[derive(Default)]
pub struct MemoryStore {
    chunks: RwLock<Vec<ChunkRecord>>,
    maps: RwLock<FxHashMap<(String, String), MapDocument>>,
    conversations: RwLock<Vec<Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, StoreError> {
        let stored = chunks.len();
        self.chunks.write().extend(chunks);
        Ok(stored)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let chunks = self.chunks.read();
        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| c.user_id == filter.user_id && c.map_id == filter.map_id)
            .filter(|c| !c.embedding.is_empty())
            .map(|c| ScoredChunk {
                chunk: c.clone(),
                score: cosine_similarity(query, &c.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self, filter: &ChunkFilter) -> Result<usize, StoreError> {
        Ok(self
            .chunks
            .read()
            .iter()
            .filter(|c| c.user_id == filter.user_id && c.map_id == filter.map_id)
            .count())
    }

    async fn chunks(&self, filter: &ChunkFilter) -> Result<Vec<ChunkRecord>, StoreError> {
        Ok(self
            .chunks
            .read()
            .iter()
            .filter(|c| c.user_id == filter.user_id && c.map_id == filter.map_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MapStore for MemoryStore {
    async fn put_map(&self, doc: MapDocument) -> Result<(), StoreError> {
        self.maps
            .write()
            .insert((doc.user_id.clone(), doc.map_id.clone()), doc);
        Ok(())
    }

    async fn get_map(
        &self,
        user_id: &str,
        map_id: &str,
    ) -> Result<Option<MapDocument>, StoreError> {
        Ok(self
            .maps
            .read()
            .get(&(user_id.to_string(), map_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append_message(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
        node_label: &str,
        message: ConversationMessage,
    ) -> Result<String, StoreError> {
        let mut conversations = self.conversations.write();
        if let Some(existing) = conversations.iter_mut().find(|c| {
            !c.is_deleted && c.user_id == user_id && c.map_id == map_id && c.node_id == node_id
        }) {
            existing.messages.push(message);
            existing.node_label = node_label.to_string();
            existing.updated_at = Utc::now();
            return Ok(existing.id.clone());
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        conversations.push(Conversation {
            id: id.clone(),
            user_id: user_id.to_string(),
            map_id: map_id.to_string(),
            node_id: node_id.to_string(),
            node_label: node_label.to_string(),
            messages: vec![message],
            created_at: now,
            updated_at: now,
            is_deleted: false,
        });
        Ok(id)
    }

    async fn conversation(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .conversations
            .read()
            .iter()
            .find(|c| {
                !c.is_deleted && c.user_id == user_id && c.map_id == map_id && c.node_id == node_id
            })
            .cloned())
    }

    async fn soft_delete(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.write();
        match conversations.iter_mut().find(|c| {
            !c.is_deleted && c.user_id == user_id && c.map_id == map_id && c.node_id == node_id
        }) {
            Some(found) => {
                found.is_deleted = true;
                found.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
