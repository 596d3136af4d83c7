//! Recent tick outcomes kept for the status endpoint

use super::TickOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of ticks retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct TickRecord {
    pub at: DateTime<Utc>,
    pub outcome: TickOutcome,
}

/// Bounded ring of tick records, oldest evicted first
#[derive(Debug, Clone)]
pub struct DecisionLog {
    records: Arc<RwLock<VecDeque<TickRecord>>>,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub async fn push(&self, outcome: TickOutcome) {
        let mut records = self.records.write().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(TickRecord {
            at: Utc::now(),
            outcome,
        });
    }

    /// Records oldest first
    pub async fn recent(&self) -> Vec<TickRecord> {
        self.records.read().await.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<TickRecord> {
        self.records.read().await.back().cloned()
    }
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
