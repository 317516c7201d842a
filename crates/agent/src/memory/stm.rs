//! Short-term memory manager.
//!
//! Records each executor turn in the bounded STM buffer. Oversized tool
//! results and messages are condensed by a cheap summarization model before
//! they go in; whatever is still too large is clipped.

use agentgraph_config::ShortTermConfig;
use agentgraph_core::agent::{GraphState, NodeId};
use agentgraph_core::error::MemoryError;
use agentgraph_core::memory::{Memories, StmContent, StmItem};
use agentgraph_core::message::{Message, Role};
use agentgraph_core::plan::{HistoryItem, Progress};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::MemoryNodeUpdate;
use crate::context::accounting::TokenAccounting;
use crate::context::token::{clip_below_tokens, estimate_stm_tokens, estimate_tokens};
use crate::model::ModelHandle;

const SUMMARIZE_PROMPT: &str = "Summarize the following content for an agent's working memory. \
Keep every fact, number, identifier and error message. Reply with the summary only.";

pub struct StmManager {
    config: ShortTermConfig,
    max_graph_steps: u32,
    summarizer: Option<ModelHandle>,
}

impl StmManager {
    pub fn new(config: ShortTermConfig, max_graph_steps: u32) -> Self {
        Self {
            config,
            max_graph_steps,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, model: ModelHandle) -> Self {
        self.summarizer = Some(model);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Return `memories` with `item` appended, condensing it first if needed.
    ///
    /// The input is never modified, so a caller can keep the old value when
    /// this fails.
    pub async fn add(
        &self,
        memories: &Memories,
        mut item: StmItem,
        timestamp: DateTime<Utc>,
        accounting: &TokenAccounting,
    ) -> Result<Memories, MemoryError> {
        if item.content.has_tool_results() {
            let threshold = self.config.summarization_threshold;
            for record in item.content.tool_records_mut() {
                if estimate_tokens(&record.result) >= threshold {
                    debug!(tool = %record.name, "Condensing tool result for STM");
                    record.result = self.condense(&record.result, threshold, accounting).await?;
                }
            }
            self.fit_whole_item(&mut item.content, threshold, accounting).await?;
        } else if estimate_tokens(item.content.text()) >= self.config.max_message_tokens {
            debug!(step_id = %item.step_id, "Condensing message for STM");
            let text = self
                .condense(item.content.text(), self.config.max_message_tokens, accounting)
                .await?;
            item.content.set_text(text);
        }

        item.tokens = estimate_stm_tokens(&item.content);
        item.inserted_at = timestamp;

        let mut next = memories.clone();
        let evicted = next.stm.push(item);
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), size = next.stm.len(), "STM evicted oldest items");
        }
        Ok(next)
    }

    /// Bring a tool-bearing item as a whole under `limit` tokens.
    ///
    /// The thought text keeps at most half the budget; the rest is shared
    /// evenly between the results. Rounding leftovers are clipped off the
    /// largest result.
    async fn fit_whole_item(
        &self,
        content: &mut StmContent,
        limit: usize,
        accounting: &TokenAccounting,
    ) -> Result<(), MemoryError> {
        if estimate_stm_tokens(content) < limit {
            return Ok(());
        }
        debug!(tokens = estimate_stm_tokens(content), limit, "Condensing whole STM item");

        let text_budget = (limit / 2).max(1);
        if estimate_tokens(content.text()) >= text_budget {
            let text = self.condense(content.text(), text_budget, accounting).await?;
            content.set_text(text);
        }

        let mut bare = content.clone();
        for record in bare.tool_records_mut() {
            record.result.clear();
        }
        let count = content.tool_records().len().max(1);
        let share = limit.saturating_sub(estimate_stm_tokens(&bare) + count) / count;
        for record in content.tool_records_mut() {
            if share == 0 {
                record.result.clear();
            } else if estimate_tokens(&record.result) >= share {
                record.result = self.condense(&record.result, share, accounting).await?;
            }
        }

        loop {
            let total = estimate_stm_tokens(content);
            if total < limit {
                return Ok(());
            }
            let excess = total + 1 - limit;
            let largest = content
                .tool_records()
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.result.is_empty())
                .max_by_key(|(_, r)| r.result.len())
                .map(|(i, _)| i);
            if let Some(i) = largest {
                let record = &mut content.tool_records_mut()[i];
                let target = estimate_tokens(&record.result).saturating_sub(excess).max(1);
                record.result = clip_below_tokens(&record.result, target);
            } else if !content.text().is_empty() {
                let target = estimate_tokens(content.text()).saturating_sub(excess).max(1);
                let text = clip_below_tokens(content.text(), target);
                content.set_text(text);
            } else {
                warn!(total, limit, "Tool names alone exceed the STM threshold");
                return Ok(());
            }
        }
    }

    /// Bring `text` strictly under `limit` tokens.
    async fn condense(
        &self,
        text: &str,
        limit: usize,
        accounting: &TokenAccounting,
    ) -> Result<String, MemoryError> {
        let Some(model) = &self.summarizer else {
            return Ok(clip_below_tokens(text, limit));
        };
        let messages = vec![Message::system(SUMMARIZE_PROMPT), Message::user(text)];
        let response = model
            .invoke(messages, &[], accounting)
            .await
            .map_err(|e| MemoryError::Summarization(e.to_string()))?;
        let summary = response.message.content;
        if estimate_tokens(&summary) >= limit {
            info!(limit, "Summary still over limit, clipping");
            return Ok(clip_below_tokens(&summary, limit));
        }
        Ok(summary)
    }

    /// Node entry point: record the turn that just ran.
    pub async fn process(&self, state: &GraphState, accounting: &TokenAccounting) -> MemoryNodeUpdate {
        if !self.config.enabled || state.current_graph_step >= self.max_graph_steps {
            return MemoryNodeUpdate::unchanged(NodeId::StmManager);
        }
        let Some(item) = build_item(state) else {
            debug!(last_node = %state.last_node, "Nothing to record in STM");
            return MemoryNodeUpdate::unchanged(NodeId::StmManager);
        };

        match self.add(&state.memories, item, Utc::now(), accounting).await {
            Ok(memories) => MemoryNodeUpdate::with_memories(NodeId::StmManager, memories),
            Err(e) => {
                warn!(error = %e, "STM update failed, keeping previous memories");
                MemoryNodeUpdate::unchanged(NodeId::StmManager)
            }
        }
    }
}

/// Build the STM item for the executor turn that just ran.
///
/// Task mode snapshots the active step (after tools) or the reply (after the
/// agent). Reactive mode records the newest history item.
pub fn build_item(state: &GraphState) -> Option<StmItem> {
    let (content, step_id) = match &state.progress {
        Progress::Tasks(_) => {
            let step = state.active_step()?;
            match state.last_node {
                NodeId::Tools => (StmContent::Step(step.clone()), step.id.clone()),
                _ => {
                    let reply = state.last_assistant()?;
                    (
                        StmContent::History(HistoryItem::new(Role::Assistant, reply.content.clone())),
                        step.id.clone(),
                    )
                }
            }
        }
        Progress::History(items) => {
            let item = items.last()?;
            (StmContent::History(item.clone()), item.id.clone())
        }
    };

    if content.render().trim().is_empty() {
        return None;
    }
    let tokens = estimate_stm_tokens(&content);
    Some(StmItem {
        content,
        step_id,
        tokens,
        inserted_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SequentialMockProvider;
    use agentgraph_core::agent::ExecutionMode;
    use agentgraph_core::error::ProviderError;
    use agentgraph_core::plan::{Step, Task, ToolCallRecord, ToolCallStatus};
    use std::sync::Arc;

    fn config(max_size: usize) -> ShortTermConfig {
        ShortTermConfig {
            enabled: true,
            max_size,
            summarization_threshold: 100,
            max_message_tokens: 200,
        }
    }

    fn text_item(id: &str, text: &str) -> StmItem {
        StmItem {
            content: StmContent::History(HistoryItem::new(Role::Assistant, text)),
            step_id: id.into(),
            tokens: 0,
            inserted_at: Utc::now(),
        }
    }

    fn tool_item(id: &str, result: String) -> StmItem {
        let mut step = Step::new("look up the balance", "");
        step.tool.push(ToolCallRecord {
            name: "get_balance".into(),
            args: serde_json::json!({}),
            result,
            status: ToolCallStatus::Success,
        });
        StmItem {
            content: StmContent::Step(step),
            step_id: id.into(),
            tokens: 0,
            inserted_at: Utc::now(),
        }
    }

    fn summarizer(provider: SequentialMockProvider) -> (Arc<SequentialMockProvider>, ModelHandle) {
        let provider = Arc::new(provider);
        let handle = ModelHandle::select(provider.clone(), "cheap", 0.0);
        (provider, handle)
    }

    #[tokio::test]
    async fn fifo_eviction_keeps_last_three() {
        let manager = StmManager::new(config(3), 100);
        let accounting = TokenAccounting::new();
        let mut memories = Memories::new(3, 5);
        for i in 1..=5 {
            memories = manager
                .add(&memories, text_item(&format!("s{i}"), &format!("item {i}")), Utc::now(), &accounting)
                .await
                .unwrap();
        }
        let ids: Vec<_> = memories.stm.iter().map(|i| i.step_id.as_str()).collect();
        assert_eq!(ids, vec!["s3", "s4", "s5"]);
    }

    #[tokio::test]
    async fn large_tool_result_is_summarized() {
        let (provider, handle) = summarizer(SequentialMockProvider::single_text("balance is 100"));
        let manager = StmManager::new(config(5), 100).with_summarizer(handle);
        let accounting = TokenAccounting::new();

        let memories = manager
            .add(&Memories::new(5, 5), tool_item("s1", "x".repeat(800)), Utc::now(), &accounting)
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 1);
        let stored = memories.stm.latest().unwrap();
        assert_eq!(stored.content.tool_records()[0].result, "balance is 100");
        assert!(stored.tokens < 100);
    }

    fn multi_tool_item(id: &str, thought: &str, results: &[String]) -> StmItem {
        let mut step = Step::new(thought, "");
        for (i, result) in results.iter().enumerate() {
            step.tool.push(ToolCallRecord {
                name: format!("get_price_{i}"),
                args: serde_json::json!({}),
                result: result.clone(),
                status: ToolCallStatus::Success,
            });
        }
        StmItem {
            content: StmContent::Step(step),
            step_id: id.into(),
            tokens: 0,
            inserted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn results_just_under_threshold_still_fit_together() {
        let manager = StmManager::new(config(5), 100);
        let results = vec!["p".repeat(390), "q".repeat(390), "r".repeat(390)];
        let memories = manager
            .add(
                &Memories::new(5, 5),
                multi_tool_item("s1", "compare prices", &results),
                Utc::now(),
                &TokenAccounting::new(),
            )
            .await
            .unwrap();

        let stored = memories.stm.latest().unwrap();
        assert!(stored.tokens < 100, "stored {} tokens", stored.tokens);
        assert_eq!(stored.tokens, estimate_stm_tokens(&stored.content));
        // Every result keeps a share of the budget.
        assert!(stored.content.tool_records().iter().all(|r| !r.result.is_empty()));
    }

    #[tokio::test]
    async fn long_thought_with_tool_results_is_condensed() {
        let (provider, handle) = summarizer(SequentialMockProvider::single_text("short").repeat_last());
        let manager = StmManager::new(config(5), 100).with_summarizer(handle);
        let item = multi_tool_item("s1", &"why ".repeat(150), &["42".to_string()]);

        let memories = manager
            .add(&Memories::new(5, 5), item, Utc::now(), &TokenAccounting::new())
            .await
            .unwrap();

        let stored = memories.stm.latest().unwrap();
        assert!(stored.tokens < 100);
        assert_eq!(stored.content.text(), "short");
        assert_eq!(stored.content.tool_records()[0].result, "42");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn small_items_skip_the_summarizer() {
        let (provider, handle) = summarizer(SequentialMockProvider::new(vec![]));
        let manager = StmManager::new(config(5), 100).with_summarizer(handle);
        let memories = manager
            .add(&Memories::new(5, 5), tool_item("s1", "100".into()), Utc::now(), &TokenAccounting::new())
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 0);
        assert_eq!(memories.stm.latest().unwrap().content.tool_records()[0].result, "100");
    }

    #[tokio::test]
    async fn long_summary_is_clipped() {
        let (_, handle) = summarizer(SequentialMockProvider::single_text(&"y".repeat(2_000)));
        let manager = StmManager::new(config(5), 100).with_summarizer(handle);
        let memories = manager
            .add(&Memories::new(5, 5), text_item("s1", &"z".repeat(1_000)), Utc::now(), &TokenAccounting::new())
            .await
            .unwrap();
        let text = memories.stm.latest().unwrap().content.text().to_string();
        assert!(estimate_tokens(&text) < 200);
    }

    #[tokio::test]
    async fn without_summarizer_items_are_clipped() {
        let manager = StmManager::new(config(5), 100);
        let memories = manager
            .add(&Memories::new(5, 5), tool_item("s1", "x".repeat(800)), Utc::now(), &TokenAccounting::new())
            .await
            .unwrap();
        let result = &memories.stm.latest().unwrap().content.tool_records()[0].result;
        assert!(estimate_tokens(result) < 100);
    }

    #[tokio::test]
    async fn summarizer_failure_leaves_input_untouched() {
        let (_, handle) = summarizer(SequentialMockProvider::scripted(vec![Err(
            ProviderError::Timeout("slow".into()),
        )]));
        let manager = StmManager::new(config(5), 100).with_summarizer(handle);
        let before = Memories::new(5, 5);
        let err = manager
            .add(&before, tool_item("s1", "x".repeat(800)), Utc::now(), &TokenAccounting::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Summarization(_)));
        assert!(before.stm.is_empty());
    }

    #[tokio::test]
    async fn process_records_active_step_after_tools() {
        let manager = StmManager::new(config(5), 100);
        let mut state = GraphState::new("u1", ExecutionMode::Autonomous, Memories::new(5, 5));
        let mut task = Task::new("check", vec![Step::new("read balance", "")]);
        task.steps[0].tool.push(ToolCallRecord {
            name: "get_balance".into(),
            args: serde_json::json!({}),
            result: "100".into(),
            status: ToolCallStatus::Success,
        });
        let step_id = task.steps[0].id.clone();
        state.push_task(task);
        state.last_node = NodeId::Tools;

        let update = manager.process(&state, &TokenAccounting::new()).await;
        update.apply(&mut state);
        let item = state.memories.stm.latest().unwrap();
        assert_eq!(item.step_id, step_id);
        assert!(item.content.has_tool_results());
        assert_eq!(state.last_node, NodeId::StmManager);
    }

    #[tokio::test]
    async fn process_skips_when_budget_exhausted_or_disabled() {
        let mut state = GraphState::new("u1", ExecutionMode::Interactive, Memories::new(5, 5));
        if let Progress::History(items) = &mut state.progress {
            items.push(HistoryItem::new(Role::Assistant, "hello"));
        }
        state.current_graph_step = 100;
        let update = StmManager::new(config(5), 100).process(&state, &TokenAccounting::new()).await;
        assert!(update.is_unchanged());

        state.current_graph_step = 0;
        let disabled = StmManager::new(ShortTermConfig { enabled: false, ..config(5) }, 100);
        assert!(disabled.process(&state, &TokenAccounting::new()).await.is_unchanged());

        let enabled = StmManager::new(config(5), 100);
        assert!(!enabled.process(&state, &TokenAccounting::new()).await.is_unchanged());
    }
}
