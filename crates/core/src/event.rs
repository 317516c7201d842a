//! Domain event system — observers of the execution graph.
//!
//! Nodes publish events as they work; dashboards, tests and audit sinks
//! subscribe without the graph knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::agent::NodeId;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A graph node finished executing
    NodeCompleted {
        thread_id: String,
        node: NodeId,
        graph_step: u32,
        timestamp: DateTime<Utc>,
    },

    /// The model produced a response
    ResponseGenerated {
        thread_id: String,
        model: String,
        tokens_used: u32,
        /// Which truncation rung produced the request ("full", "recent_4", ...)
        rung: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        truncated: bool,
        timestamp: DateTime<Utc>,
    },

    /// A long-term memory operation completed
    MemoryAccessed {
        operation: String, // "upsert", "retrieve"
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// The graph paused for a human
    RunSuspended {
        thread_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred that the graph absorbed
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
