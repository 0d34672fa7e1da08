//! The `agent` atomic executor: a streaming model chat with tool-call
//! dispatch. Grounded on `langgraph-core::llm::ChatModel` — the same
//! philosophy: "an orchestration framework, not an
//! LLM client library": the core crate defines the trait, callers plug
//! in their provider. [`ChatDriver`] plays that role here; this module
//! never talks to a real model endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::executor::tool::ToolHandler;
use crate::executor::Executor;
use crate::model::{ExecutionError, ExecutionMetadata, ExecutionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

/// One unit of a streamed chat response.
#[derive(Debug, Clone)]
pub enum ChatChunk {
    Thinking(String),
    Content(String),
    ToolCall { name: String, arguments: Value },
}

/// A driver-level failure, carrying enough to classify recoverability per
/// the same recoverable-status rule (`status >= 500 or status == 429 => recoverable`).
#[derive(Debug, Clone)]
pub struct ChatDriverError {
    pub message: String,
    pub status: Option<u16>,
}

impl ChatDriverError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self.status, Some(s) if s >= 500 || s == 429)
    }
}

/// The pluggable model transport. A real implementation streams from a
/// provider SDK; [`crate::testing`] supplies a scripted stub for tests.
#[async_trait]
pub trait ChatDriver: Send + Sync {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        context: &ExecutionContext,
    ) -> Result<BoxStream<'static, Result<ChatChunk, ChatDriverError>>, ChatDriverError>;
}

/// Wraps an `mpsc::Receiver` of chunks as the boxed stream [`ChatDriver::stream`]
/// expects, the same way `orchestrator::executor::streaming` turns a task's
/// update channel into a `Stream` for its callers via
/// `tokio_stream::wrappers::ReceiverStream`. A real provider implementation
/// spawns a task that pushes chunks onto `tx` as the SDK's own stream yields
/// them and returns `rx` wrapped through this function.
pub fn stream_from_channel(
    rx: tokio::sync::mpsc::Receiver<Result<ChatChunk, ChatDriverError>>,
) -> BoxStream<'static, Result<ChatChunk, ChatDriverError>> {
    tokio_stream::wrappers::ReceiverStream::new(rx).boxed()
}

pub struct AgentExecutor {
    id: String,
    system_prompt: Option<String>,
    history_variable: Option<String>,
    tools: HashMap<String, std::sync::Arc<dyn ToolHandler>>,
    driver: std::sync::Arc<dyn ChatDriver>,
}

impl AgentExecutor {
    pub fn new(id: impl Into<String>, driver: std::sync::Arc<dyn ChatDriver>) -> Self {
        Self {
            id: id.into(),
            system_prompt: None,
            history_variable: None,
            tools: HashMap::new(),
            driver,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_history_variable(mut self, name: impl Into<String>) -> Self {
        self.history_variable = Some(name.into());
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, handler: std::sync::Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(name.into(), handler);
        self
    }

    fn build_messages(&self, input: &Value, context: &ExecutionContext) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        if let Some(history_var) = &self.history_variable {
            if let Some(Value::Array(turns)) = context.variables().get(history_var) {
                for turn in turns {
                    if let Some(text) = turn.as_str() {
                        messages.push(ChatMessage::user(text.to_string()));
                    }
                }
            }
        }
        let input_text = match input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        messages.push(ChatMessage::user(input_text));
        messages
    }
}

#[async_trait]
impl Executor for AgentExecutor {
    async fn execute(&self, input: Value, context: &ExecutionContext) -> crate::Result<ExecutionResult> {
        context.check_cancelled()?;
        let start = chrono::Utc::now();
        let messages = self.build_messages(&input, context);

        let mut stream = match self.driver.stream(messages, context).await {
            Ok(stream) => stream,
            Err(err) => {
                return Ok(ExecutionResult::failed(
                    Value::Null,
                    vec![ExecutionError::new("DRIVER_ERROR", err.message, err.is_recoverable())],
                )
                .with_metadata(metadata(&self.id, start)));
            }
        };

        let mut content = String::new();
        let mut tool_calls = Vec::new();

        while let Some(chunk) = stream.next().await {
            context.check_cancelled()?;
            match chunk {
                Ok(ChatChunk::Thinking(delta)) => context.emit_thinking(&delta),
                Ok(ChatChunk::Content(delta)) => {
                    content.push_str(&delta);
                    context.emit_content(&delta);
                }
                Ok(ChatChunk::ToolCall { name, arguments }) => {
                    context.emitter().emit(
                        crate::event::EventType::StreamToolCall,
                        serde_json::json!({ "toolName": name, "status": "running", "args": arguments }),
                        context.node_id().map(|s| s.to_string()),
                    );
                    let outcome = match self.tools.get(&name) {
                        Some(handler) => handler.call(arguments.clone(), context).await,
                        None => Err(crate::KernelError::General(format!("no tool registered for '{name}'"))),
                    };
                    match outcome {
                        Ok(result) => {
                            context.emitter().emit(
                                crate::event::EventType::StreamToolCall,
                                serde_json::json!({ "toolName": name, "status": "success", "result": result }),
                                context.node_id().map(|s| s.to_string()),
                            );
                            tool_calls.push(serde_json::json!({ "name": name, "args": arguments, "result": result }));
                        }
                        Err(crate::KernelError::Cancelled) => return Err(crate::KernelError::Cancelled),
                        Err(err) => {
                            context.emitter().emit(
                                crate::event::EventType::StreamToolCall,
                                serde_json::json!({ "toolName": name, "status": "failed", "error": err.to_string() }),
                                context.node_id().map(|s| s.to_string()),
                            );
                            tool_calls.push(serde_json::json!({ "name": name, "args": arguments, "error": err.to_string() }));
                        }
                    }
                }
                Err(err) => {
                    return Ok(ExecutionResult::failed(
                        Value::Null,
                        vec![ExecutionError::new("DRIVER_ERROR", err.message, err.is_recoverable())],
                    )
                    .with_metadata(metadata(&self.id, start)));
                }
            }
        }

        let mut result = ExecutionResult::success(Value::String(content));
        if !tool_calls.is_empty() {
            let mut extra = HashMap::new();
            extra.insert("toolCalls".to_string(), Value::Array(tool_calls));
            let mut meta = metadata(&self.id, start);
            meta.extra = extra;
            result = result.with_metadata(meta);
        } else {
            result = result.with_metadata(metadata(&self.id, start));
        }
        Ok(result)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

fn metadata(executor_id: &str, start: chrono::DateTime<chrono::Utc>) -> ExecutionMetadata {
    let end = chrono::Utc::now();
    ExecutionMetadata {
        executor_id: Some(executor_id.to_string()),
        executor_type: Some("agent".to_string()),
        start_time: Some(start),
        end_time: Some(end),
        duration_ms: Some((end - start).num_milliseconds().max(0) as u64),
        retry_count: 0,
        extra: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tool::FnToolHandler;
    use serde_json::json;

    struct ScriptedDriver(Vec<ChatChunk>);

    #[async_trait]
    impl ChatDriver for ScriptedDriver {
        async fn stream(
            &self,
            _messages: Vec<ChatMessage>,
            _context: &ExecutionContext,
        ) -> Result<BoxStream<'static, Result<ChatChunk, ChatDriverError>>, ChatDriverError> {
            let chunks: Vec<_> = self.0.clone().into_iter().map(Ok).collect();
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    struct ChannelDriver(Vec<ChatChunk>);

    #[async_trait]
    impl ChatDriver for ChannelDriver {
        async fn stream(
            &self,
            _messages: Vec<ChatMessage>,
            _context: &ExecutionContext,
        ) -> Result<BoxStream<'static, Result<ChatChunk, ChatDriverError>>, ChatDriverError> {
            let (tx, rx) = tokio::sync::mpsc::channel(8);
            let chunks = self.0.clone();
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
            });
            Ok(stream_from_channel(rx))
        }
    }

    fn ctx() -> ExecutionContext {
        let bus = crate::event::EventBus::new();
        let emitter = bus.create_scope("e1");
        ExecutionContext::root("e1", crate::context::CancellationToken::new(), emitter)
    }

    #[tokio::test]
    async fn accumulates_content_deltas() {
        let driver = std::sync::Arc::new(ScriptedDriver(vec![
            ChatChunk::Thinking("hmm".into()),
            ChatChunk::Content("hel".into()),
            ChatChunk::Content("lo".into()),
        ]));
        let agent = AgentExecutor::new("a1", driver);
        let result = agent.execute(json!("hi"), &ctx()).await.unwrap();
        assert_eq!(result.output, json!("hello"));
    }

    #[tokio::test]
    async fn channel_backed_driver_accumulates_content_deltas() {
        let driver = std::sync::Arc::new(ChannelDriver(vec![
            ChatChunk::Content("he".into()),
            ChatChunk::Content("y".into()),
        ]));
        let agent = AgentExecutor::new("a1", driver);
        let result = agent.execute(json!("hi"), &ctx()).await.unwrap();
        assert_eq!(result.output, json!("hey"));
    }

    #[tokio::test]
    async fn dispatches_registered_tool_calls() {
        let driver = std::sync::Arc::new(ScriptedDriver(vec![ChatChunk::ToolCall {
            name: "lookup".into(),
            arguments: json!({"q": "x"}),
        }]));
        let handler = std::sync::Arc::new(FnToolHandler(|args: Value| async move { Ok(json!({"echo": args})) }));
        let agent = AgentExecutor::new("a1", driver).with_tool("lookup", handler);
        let result = agent.execute(json!("hi"), &ctx()).await.unwrap();
        let calls = result.metadata.unwrap().extra.remove("toolCalls").unwrap();
        assert_eq!(calls[0]["result"], json!({"echo": {"q": "x"}}));
    }

    #[tokio::test]
    async fn driver_error_status_drives_recoverability() {
        struct FailingDriver;
        #[async_trait]
        impl ChatDriver for FailingDriver {
            async fn stream(
                &self,
                _messages: Vec<ChatMessage>,
                _context: &ExecutionContext,
            ) -> Result<BoxStream<'static, Result<ChatChunk, ChatDriverError>>, ChatDriverError> {
                Err(ChatDriverError { message: "rate limited".into(), status: Some(429) })
            }
        }
        let agent = AgentExecutor::new("a1", std::sync::Arc::new(FailingDriver));
        let result = agent.execute(json!("hi"), &ctx()).await.unwrap();
        assert_eq!(result.status, crate::model::ExecutionStatus::Failed);
        assert!(result.is_recoverable());
    }
}
