//! Tool-calling agent loop
//!
//! The generic bounded iteration shared by the task-management and
//! skill-learner agents: LLM -> tool calls -> tool handlers -> LLM. One
//! transaction scope is opened per outer iteration and committed at the
//! iteration boundary, so long LLM calls never hold a database transaction
//! and a mid-iteration failure rolls the iteration's work back.
//!
//! Tool handlers return `Ok(String)` with a tool-result string even for
//! argument mistakes the model can recover from; `Err` is reserved for
//! unrecoverable faults and terminates the loop.

use crate::error::{EngineError, Result};
use crate::llm::{
    complete_with_timeout, ChatMessage, CompletionRequest, LlmProvider, ToolSchema,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod distill;
pub mod prompts;
pub mod skill_learner;
pub mod task;

/// The loop-terminating sentinel. Dispatched by the loop itself, never by a
/// handler.
pub const FINISH_TOOL: &str = "finish";

/// The thinking-report tool name shared by both agents.
pub const REPORT_THINKING_TOOL: &str = "report_thinking";

/// One tool available to an agent: schema plus handler over the agent's
/// context type.
#[async_trait]
pub trait ToolHandler<C: Send>: Send + Sync {
    fn schema(&self) -> ToolSchema;

    async fn handle(&self, ctx: &mut C, arguments: Value) -> Result<String>;
}

/// Name-indexed tool collection for one agent.
pub struct ToolPool<C: Send> {
    handlers: HashMap<String, Arc<dyn ToolHandler<C>>>,
    schemas: Vec<ToolSchema>,
}

impl<C: Send> ToolPool<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            schemas: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler<C>>) {
        let schema = handler.schema();
        self.handlers.insert(schema.name.clone(), handler);
        self.schemas.push(schema);
    }

    /// Expose a schema with no handler (the `finish` sentinel).
    pub fn register_schema_only(&mut self, schema: ToolSchema) {
        self.schemas.push(schema);
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.schemas.clone()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler<C>>> {
        self.handlers.get(name)
    }
}

impl<C: Send> Default for ToolPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// The `finish` sentinel schema.
pub fn finish_schema() -> ToolSchema {
    ToolSchema::new(
        FINISH_TOOL,
        "Call it when you have completed all required actions.",
        serde_json::json!({"type": "object", "properties": {}, "required": []}),
    )
}

/// Per-iteration transaction scope.
///
/// `begin` opens the scope (typically a database transaction plus a context
/// rebuilt from persistent agent state); `commit` closes it and folds
/// loop-scoped state (reported-thinking flag, pending learning task ids) back
/// into the scope owner. A scope dropped without `commit` rolls back.
#[async_trait]
pub trait AgentScope: Send {
    type Ctx: Send;

    async fn begin(&mut self) -> Result<Self::Ctx>;

    async fn commit(&mut self, ctx: Self::Ctx) -> Result<()>;
}

/// Outcome of a bounded loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Iterations that issued an LLM call
    pub iterations: usize,
    /// Whether the model ended the run itself (`finish` or no tool calls)
    pub finished: bool,
}

/// Loop parameters, shared by the concrete agents.
pub struct AgentLoop<'a, S: AgentScope> {
    pub provider: &'a dyn LlmProvider,
    pub system_prompt: &'a str,
    pub tools: &'a ToolPool<S::Ctx>,
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub llm_timeout: Duration,
}

impl<'a, S: AgentScope> AgentLoop<'a, S> {
    /// Drive the loop to completion or the iteration bound.
    pub async fn run(&self, scope: &mut S, initial_user_message: String) -> Result<LoopOutcome> {
        let mut messages = vec![ChatMessage::user(initial_user_message)];
        let schemas = self.tools.schemas();
        let mut iterations = 0;

        while iterations < self.max_iterations {
            let mut request = CompletionRequest::new(self.system_prompt);
            request.messages = messages.clone();
            request.tools = schemas.clone();
            request.max_tokens = self.max_tokens;

            let response =
                complete_with_timeout(self.provider, &request, self.llm_timeout).await?;
            iterations += 1;
            messages.push(response.to_history_message());

            if response.tool_calls.is_empty() {
                debug!(iterations, "no tool calls, stopping loop");
                return Ok(LoopOutcome {
                    iterations,
                    finished: true,
                });
            }

            let mut ctx = scope.begin().await?;
            let mut just_finish = false;
            let mut tool_results: Vec<ChatMessage> = Vec::new();
            let mut failure: Option<EngineError> = None;

            // Serial, in-order dispatch; concurrency inside a transaction is
            // not allowed.
            for call in &response.tool_calls {
                if call.name == FINISH_TOOL {
                    just_finish = true;
                    continue;
                }
                let Some(handler) = self.tools.get(&call.name) else {
                    failure = Some(EngineError::bad_request(format!(
                        "tool {} not found",
                        call.name
                    )));
                    break;
                };
                match handler.handle(&mut ctx, call.arguments.clone()).await {
                    Ok(result) => {
                        if call.name != REPORT_THINKING_TOOL {
                            info!(tool = %call.name, result = %truncate(&result, 120), "tool call");
                        }
                        tool_results.push(ChatMessage::tool_result(&call.id, result));
                    }
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "tool failed, terminating loop");
                        failure = Some(e);
                        break;
                    }
                }
            }

            match failure {
                // Dropping the ctx rolls back this iteration's work
                Some(e) => return Err(e),
                None => scope.commit(ctx).await?,
            }

            messages.extend(tool_results);
            if just_finish {
                debug!(iterations, "finish called");
                return Ok(LoopOutcome {
                    iterations,
                    finished: true,
                });
            }
        }

        Ok(LoopOutcome {
            iterations,
            finished: false,
        })
    }
}

fn truncate(s: &str, cap: usize) -> &str {
    if s.len() <= cap {
        return s;
    }
    let mut cut = cap;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use serde_json::json;

    /// Scope over a plain counter context, no database involved.
    struct CounterScope {
        committed: Vec<u32>,
    }

    struct CounterCtx {
        hits: u32,
    }

    #[async_trait]
    impl AgentScope for CounterScope {
        type Ctx = CounterCtx;

        async fn begin(&mut self) -> Result<CounterCtx> {
            Ok(CounterCtx { hits: 0 })
        }

        async fn commit(&mut self, ctx: CounterCtx) -> Result<()> {
            self.committed.push(ctx.hits);
            Ok(())
        }
    }

    struct BumpTool;

    #[async_trait]
    impl ToolHandler<CounterCtx> for BumpTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("bump", "Increment the counter", json!({"type": "object"}))
        }

        async fn handle(&self, ctx: &mut CounterCtx, _arguments: Value) -> Result<String> {
            ctx.hits += 1;
            Ok(format!("hits: {}", ctx.hits))
        }
    }

    struct FailTool;

    #[async_trait]
    impl ToolHandler<CounterCtx> for FailTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("explode", "Always fails", json!({"type": "object"}))
        }

        async fn handle(&self, _ctx: &mut CounterCtx, _arguments: Value) -> Result<String> {
            Err(EngineError::retryable("boom"))
        }
    }

    fn pool() -> ToolPool<CounterCtx> {
        let mut pool = ToolPool::new();
        pool.register(Arc::new(BumpTool));
        pool.register(Arc::new(FailTool));
        pool.register_schema_only(finish_schema());
        pool
    }

    fn agent_loop<'a>(
        provider: &'a MockProvider,
        tools: &'a ToolPool<CounterCtx>,
        max_iterations: usize,
    ) -> AgentLoop<'a, CounterScope> {
        AgentLoop {
            provider,
            system_prompt: "test agent",
            tools,
            max_iterations,
            max_tokens: 256,
            llm_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_finish_ends_loop_after_serial_dispatch() {
        let provider = MockProvider::with_script(vec![MockProvider::tool_call_response(vec![
            ("c1", "bump", json!({})),
            ("c2", "bump", json!({})),
            ("c3", "finish", json!({})),
        ])]);
        let tools = pool();
        let mut scope = CounterScope {
            committed: Vec::new(),
        };

        let outcome = agent_loop(&provider, &tools, 5)
            .run(&mut scope, "go".into())
            .await
            .unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.iterations, 1);
        // Both bumps ran in one scope, committed once
        assert_eq!(scope.committed, vec![2]);
    }

    #[tokio::test]
    async fn test_no_tool_calls_ends_loop() {
        let provider = MockProvider::with_script(vec![MockProvider::text_response("all done")]);
        let tools = pool();
        let mut scope = CounterScope {
            committed: Vec::new(),
        };

        let outcome = agent_loop(&provider, &tools, 5)
            .run(&mut scope, "go".into())
            .await
            .unwrap();
        assert!(outcome.finished);
        assert!(scope.committed.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_bound() {
        // Every call returns another tool call; the loop must stop at the cap
        let provider = MockProvider::with_script(vec![
            MockProvider::tool_call_response(vec![("c1", "bump", json!({}))]),
            MockProvider::tool_call_response(vec![("c2", "bump", json!({}))]),
            MockProvider::tool_call_response(vec![("c3", "bump", json!({}))]),
        ]);
        let tools = pool();
        let mut scope = CounterScope {
            committed: Vec::new(),
        };

        let outcome = agent_loop(&provider, &tools, 2)
            .run(&mut scope, "go".into())
            .await
            .unwrap();
        assert!(!outcome.finished);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(scope.committed, vec![1, 1]);
    }

    #[tokio::test]
    async fn test_hard_tool_failure_terminates_without_commit() {
        let provider = MockProvider::with_script(vec![MockProvider::tool_call_response(vec![
            ("c1", "bump", json!({})),
            ("c2", "explode", json!({})),
        ])]);
        let tools = pool();
        let mut scope = CounterScope {
            committed: Vec::new(),
        };

        let err = agent_loop(&provider, &tools, 5)
            .run(&mut scope, "go".into())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(scope.committed.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_terminates_loop() {
        let provider = MockProvider::with_script(vec![MockProvider::tool_call_response(vec![(
            "c1",
            "no_such_tool",
            json!({}),
        )])]);
        let tools = pool();
        let mut scope = CounterScope {
            committed: Vec::new(),
        };

        let err = agent_loop(&provider, &tools, 5)
            .run(&mut scope, "go".into())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no_such_tool"));
    }
}
