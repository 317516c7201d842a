//! Long-term memory manager.
//!
//! Once a task finishes (or, in reactive mode, after a verified answer) the
//! model is asked for episodic and semantic facts, which are stamped with the
//! user, run, task and step ids and written to the long-term store.

use std::sync::Arc;

use agentgraph_config::LongTermConfig;
use agentgraph_core::agent::{GraphState, NodeId};
use agentgraph_core::event::{DomainEvent, EventBus};
use agentgraph_core::memory::{EpisodicMemoryContext, LongTermStore, SemanticMemoryContext};
use agentgraph_core::message::Message;
use agentgraph_core::plan::Progress;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::MemoryNodeUpdate;
use crate::context::accounting::TokenAccounting;
use crate::model::ModelHandle;

#[derive(Debug, Default, Deserialize)]
struct Extraction {
    #[serde(default)]
    episodic: Vec<EpisodicDraft>,
    #[serde(default)]
    semantic: Vec<SemanticDraft>,
}

#[derive(Debug, Deserialize)]
struct EpisodicDraft {
    content: String,
    #[serde(default)]
    source: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticDraft {
    fact: String,
    #[serde(default = "default_category")]
    category: String,
}

fn default_category() -> String {
    "general".into()
}

/// JSON schema for the extraction call.
pub fn extraction_schema(max_episodic: usize, max_semantic: usize) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "episodic": {
                "type": "array",
                "maxItems": max_episodic,
                "items": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string" },
                        "source": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["content"]
                }
            },
            "semantic": {
                "type": "array",
                "maxItems": max_semantic,
                "items": {
                    "type": "object",
                    "properties": {
                        "fact": { "type": "string" },
                        "category": { "type": "string" }
                    },
                    "required": ["fact", "category"]
                }
            }
        },
        "required": ["episodic", "semantic"]
    })
}

fn extraction_prompt(max_episodic: usize, max_semantic: usize) -> String {
    format!(
        "Extract long-term memories from the record below.\n\
         - episodic: up to {max_episodic} things that happened, each with the sources it came from.\n\
         - semantic: up to {max_semantic} durable facts about the user or the world, each with a short category.\n\
         Return empty lists if nothing is worth remembering."
    )
}

pub struct LtmManager {
    config: LongTermConfig,
    enabled: bool,
    max_graph_steps: u32,
    model: Option<ModelHandle>,
    store: Option<Arc<dyn LongTermStore>>,
    event_bus: Option<Arc<EventBus>>,
}

impl LtmManager {
    pub fn new(config: LongTermConfig, enabled: bool, max_graph_steps: u32) -> Self {
        Self {
            config,
            enabled,
            max_graph_steps,
            model: None,
            store: None,
            event_bus: None,
        }
    }

    pub fn with_model(mut self, model: ModelHandle) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn process(&self, state: &GraphState, accounting: &TokenAccounting) -> MemoryNodeUpdate {
        let unchanged = MemoryNodeUpdate::unchanged(NodeId::LtmManager);
        if !self.enabled {
            return unchanged;
        }
        if state.current_graph_step >= self.max_graph_steps {
            debug!("Graph budget exhausted, skipping LTM extraction");
            return unchanged;
        }
        if let Progress::Tasks(_) = &state.progress {
            match state.active_task() {
                Some(task) if state.active_task_finished() && !task.memorized => {}
                _ => return unchanged,
            }
        }
        let Some(latest) = state.memories.stm.latest() else {
            return unchanged;
        };
        let (Some(model), Some(store)) = (&self.model, &self.store) else {
            debug!("No extraction model or store configured");
            return unchanged;
        };
        if !model.supports_structured_output() {
            debug!(model = %model.model(), "Model lacks structured output, skipping LTM extraction");
            return unchanged;
        }

        let task = state.active_task();
        let (source, task_id, step_id) = match task {
            Some(task) => (
                task.format_history(),
                Some(task.id.clone()),
                task.steps
                    .last()
                    .map(|s| s.id.clone())
                    .unwrap_or_else(|| task.id.clone()),
            ),
            None => (latest.content.render(), None, latest.step_id.clone()),
        };

        let messages = vec![
            Message::system(extraction_prompt(self.config.max_episodic, self.config.max_semantic)),
            Message::user(source),
        ];
        let schema = extraction_schema(self.config.max_episodic, self.config.max_semantic);
        let extraction: Extraction = match model.invoke_structured(messages, schema, accounting).await {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(error = %e, "LTM extraction failed");
                return unchanged;
            }
        };

        let episodic: Vec<EpisodicMemoryContext> = extraction
            .episodic
            .into_iter()
            .take(self.config.max_episodic)
            .map(|e| EpisodicMemoryContext {
                user_id: state.user_id.clone(),
                run_id: state.thread_id.clone(),
                task_id: task_id.clone(),
                step_id: step_id.clone(),
                content: e.content,
                sources: e.source,
            })
            .collect();
        let semantic: Vec<SemanticMemoryContext> = extraction
            .semantic
            .into_iter()
            .take(self.config.max_semantic)
            .map(|s| SemanticMemoryContext {
                user_id: state.user_id.clone(),
                run_id: state.thread_id.clone(),
                task_id: task_id.clone(),
                step_id: step_id.clone(),
                fact: s.fact,
                category: s.category,
            })
            .collect();

        if episodic.is_empty() && semantic.is_empty() {
            debug!("Nothing worth remembering");
        } else {
            match store.upsert_memory(semantic, episodic).await {
                Ok(count) => {
                    info!(count, store = store.name(), "Stored long-term memories");
                    if let Some(bus) = &self.event_bus {
                        bus.publish(DomainEvent::MemoryAccessed {
                            operation: "upsert".into(),
                            count,
                            timestamp: Utc::now(),
                        });
                    }
                }
                Err(e) => warn!(error = %e, "Long-term upsert failed"),
            }
        }

        MemoryNodeUpdate {
            memories: None,
            last_node: NodeId::LtmManager,
            memorized_task: task_id,
        }
    }
}
