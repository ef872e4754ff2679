//! Served-request log
//!
//! A bounded ring shared by every protocol handler, newest entry first.
//! When the ring is full the oldest entry is dropped silently.

use crate::model::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One served request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
    pub method: String,
    pub path: String,
    /// Winning mock, when one matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock_id: Option<String>,
    pub status: u16,
    pub latency_ms: u64,
}

impl RequestLogEntry {
    /// Build an entry stamped now.
    pub fn new(
        protocol: Protocol,
        method: &str,
        path: &str,
        mock_id: Option<String>,
        status: u16,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            protocol: protocol.as_str().to_string(),
            method: method.to_string(),
            path: path.to_string(),
            mock_id,
            status,
            latency_ms,
        }
    }
}

/// Bounded ring of request log entries.
#[derive(Debug, Clone)]
pub struct RequestLog {
    entries: Arc<RwLock<VecDeque<RequestLogEntry>>>,
    capacity: usize,
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Arc::new(RwLock::new(VecDeque::new())), capacity: capacity.max(1) }
    }

    /// Record an entry, evicting the oldest past capacity.
    pub async fn record(&self, entry: RequestLogEntry) {
        let mut entries = self.entries.write().await;
        entries.push_front(entry);
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    /// Recent entries, newest first, optionally limited and filtered by
    /// protocol display name.
    pub async fn recent(&self, limit: Option<usize>, protocol: Option<&str>) -> Vec<RequestLogEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| protocol.is_none_or(|p| e.protocol.eq_ignore_ascii_case(p)))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Total requests seen per protocol (within the retained window).
    pub async fn counts_by_protocol(&self) -> HashMap<String, u64> {
        let entries = self.entries.read().await;
        let mut counts = HashMap::new();
        for entry in entries.iter() {
            *counts.entry(entry.protocol.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
