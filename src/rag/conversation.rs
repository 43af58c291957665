//! Per-node conversation history: caching, context formatting, soft delete.

use std::sync::Arc;

use tracing::debug;

use crate::stores::{
    Citation, ConversationMessage, ConversationStore, MessageKind, StoreError,
};

/// An answer served from conversation history instead of a workflow run.
#[derive(Clone, Debug)]
pub struct CachedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: Option<f32>,
}

/// Thin policy layer over a [`ConversationStore`].
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    context_limit: usize,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>, context_limit: usize) -> Self {
        Self {
            store,
            context_limit,
        }
    }

    /// Exact-text cache lookup: if this question was already asked on this
    /// node, return the stored answer that followed it.
    pub async fn cached_answer(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
        question: &str,
    ) -> Result<Option<CachedAnswer>, StoreError> {
        let Some(convo) = self.store.conversation(user_id, map_id, node_id).await? else {
            return Ok(None);
        };
        let question = question.trim();
        for (index, message) in convo.messages.iter().enumerate() {
            if message.kind == MessageKind::Question && message.content.trim() == question {
                if let Some(answer) = convo.messages[index + 1..]
                    .iter()
                    .find(|m| m.kind == MessageKind::Answer)
                {
                    debug!(node_id, "conversation cache hit");
                    return Ok(Some(CachedAnswer {
                        answer: answer.content.clone(),
                        citations: answer.citations.clone(),
                        confidence: answer.confidence,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Render the most recent turns as a prompt block, or `None` when there
    /// is no history.
    pub async fn recent_context(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some(convo) = self.store.conversation(user_id, map_id, node_id).await? else {
            return Ok(None);
        };
        let start = convo.messages.len().saturating_sub(self.context_limit);
        let recent = &convo.messages[start..];
        if recent.is_empty() {
            return Ok(None);
        }
        Ok(Some(format_context(recent)))
    }

    /// Persist one question/answer exchange.
    pub async fn record_exchange(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
        node_label: &str,
        question: &str,
        answer: &str,
        citations: Vec<Citation>,
        confidence: Option<f32>,
    ) -> Result<(), StoreError> {
        self.store
            .append_message(
                user_id,
                map_id,
                node_id,
                node_label,
                ConversationMessage::question(question),
            )
            .await?;
        let mut message = ConversationMessage::answer(answer).with_citations(citations);
        if let Some(confidence) = confidence {
            message = message.with_confidence(confidence);
        }
        self.store
            .append_message(user_id, map_id, node_id, node_label, message)
            .await?;
        Ok(())
    }

    /// Soft-delete the node's conversation. Returns whether one existed.
    pub async fn delete(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<bool, StoreError> {
        self.store.soft_delete(user_id, map_id, node_id).await
    }

    pub async fn history(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<Option<crate::stores::Conversation>, StoreError> {
        self.store.conversation(user_id, map_id, node_id).await
    }
}

/// Format prior turns for inclusion in the generation prompt.
pub fn format_context(messages: &[ConversationMessage]) -> String {
    let mut parts = vec!["## Previous Conversation Context:".to_string()];
    for message in messages {
        match message.kind {
            MessageKind::Question => parts.push(format!("**User:** {}", message.content)),
            MessageKind::Answer => parts.push(format!("**Assistant:** {}", message.content)),
        }
    }
    parts.push("## Current Question:".to_string());
    parts.join("\n")
}
