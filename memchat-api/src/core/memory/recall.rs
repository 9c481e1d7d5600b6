use crate::core::config::MemoryConfig;
use crate::models::memory::{MemoryRecord, MemorySearchResponse};

use super::MemoryGateway;

/// Which recalled memories are allowed into a prompt.
#[derive(Debug, Clone, Copy)]
pub struct RecallPolicy {
    pub search_limit: usize,
    /// Records must score strictly above this.
    pub threshold: f64,
    pub max_injected: usize,
}

impl RecallPolicy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            search_limit: config.search_limit,
            threshold: config.relevance_threshold,
            max_injected: config.max_injected,
        }
    }

    /// Keeps high-relevance records in service order, capped. Records
    /// without a score never qualify.
    pub fn select(&self, response: MemorySearchResponse) -> Vec<MemoryRecord> {
        response
            .results
            .into_iter()
            .filter(|record| record.score.is_some_and(|score| score > self.threshold))
            .take(self.max_injected)
            .collect()
    }

    pub async fn recall(
        &self,
        gateway: &MemoryGateway,
        query: &str,
        user_id: &str,
    ) -> Vec<MemoryRecord> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let response = gateway.search(query, user_id, self.search_limit).await;
        self.select(response)
    }
}
