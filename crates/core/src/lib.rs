//! # agentgraph Core
//!
//! Domain types, capability traits, and error definitions for the agentgraph
//! execution engine. This crate has **no runtime dependencies** beyond serde,
//! tokio sync primitives and async-trait: it defines the model that every
//! other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model, tool, long-term store, session store)
//! is a trait here. Implementations live in their respective crates or in the
//! embedding application. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod plan;
pub mod memory;
pub mod session;
pub mod agent;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderCapabilities, ProviderRequest, ProviderResponse, Usage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use plan::{HistoryItem, Progress, Step, StepStatus, Task, TaskStatus, Thought, ToolCallRecord, ToolCallStatus};
pub use memory::{
    EpisodicMemoryContext, LongTermCache, LongTermStore, Memories, MemoryHit, MemoryKind,
    SemanticMemoryContext, ShortTermMemory, StmContent, StmItem,
};
pub use session::{SessionRecord, SessionStore};
pub use agent::{ExecutionMode, GraphState, NodeId, RunStatus};
pub use event::{DomainEvent, EventBus};
