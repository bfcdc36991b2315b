//! The conversation orchestrator: one buyer message in, one assistant
//! answer out, with tool calls executed in between.
//!
//! A turn never returns an error. Model failures, unparseable tool calls,
//! and missing configuration all become assistant-visible text, because the
//! buyer is mid-conversation and a 500 would strand the session.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use scout_core::domain::session::{ChatMessage, MessageRole, ToolInvocation};

use crate::llm::{ChunkSink, LlmClient, ToolDefinition, TurnMessage};
use crate::parser::{self, ParseError};
use crate::tools::{inject_session_id, ToolRegistry};

const TURN_MAX_TOKENS: u32 = 2000;
const SUMMARY_MAX_TOKENS: u32 = 1500;
const HISTORY_WINDOW: usize = 10;

const SYSTEM_PROMPT: &str = "You are SupplyScout, an autonomous procurement agent. \
You help buyers source industrial parts from suppliers the company has bought from before.\n\n\
Your workflow:\n\
1. Use find_suppliers to locate suppliers with purchase history for the requested part. \
Use search_parts_catalog first when the part is unclear.\n\
2. Contact suppliers for current quotes. When contacting two or more suppliers, always use \
send_bulk_procurement_request so their replies are tracked together; use send_supplier_email \
only for a single supplier.\n\
3. Supplier replies arrive asynchronously, often hours or days later. After sending outreach, \
tell the buyer you will report back as quotes come in. Never invent prices.\n\
4. Use get_supplier_responses to review quotes received so far and recommend the best option.\n\
5. Use place_order only after the buyer explicitly confirms supplier, quantity, and price.\n\n\
Be concise and concrete. Quote prices exactly as suppliers stated them.";

const PREVIEW_MESSAGE: &str = "I'm running in preview mode because no language model is \
configured. Set an LLM API key (or point me at a local Ollama instance) and I can search \
suppliers, send quote requests, and track replies for you.";

const MODEL_FAILURE_MESSAGE: &str = "I hit a problem talking to the language model and \
couldn't finish that request. Please try again in a moment.";

const REPHRASE_MESSAGE: &str = "I tried to use one of my tools but garbled the request. \
Could you rephrase what you need and I'll try again?";

const SUMMARY_PROMPT: &str = "Summarize the tool results above for the buyer in plain \
language. Mention concrete supplier names and prices where present, and say what happens \
next. Do not call any more tools.";

/// Everything a completed turn produced, for the caller to persist.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// The assistant's final answer for this turn.
    pub content: String,
    /// Tool calls executed during the turn, with their results.
    pub tool_calls: Vec<ToolInvocation>,
    /// True when no model is configured and the answer is canned.
    pub preview: bool,
}

pub struct ChatOrchestrator {
    llm: Option<Arc<dyn LlmClient>>,
    tools: Arc<ToolRegistry>,
}

impl ChatOrchestrator {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, tools }
    }

    pub fn is_preview(&self) -> bool {
        self.llm.is_none()
    }

    /// Run one turn. `history` is the transcript BEFORE `user_message`; the
    /// caller appends the user message to storage separately.
    pub async fn run_turn(
        &self,
        session_id: Uuid,
        model: &str,
        history: &[ChatMessage],
        user_message: &str,
        on_chunk: Option<ChunkSink<'_>>,
    ) -> TurnOutcome {
        let Some(llm) = self.llm.clone() else {
            flush(on_chunk, PREVIEW_MESSAGE);
            return TurnOutcome {
                content: PREVIEW_MESSAGE.to_string(),
                tool_calls: Vec::new(),
                preview: true,
            };
        };

        if llm.supports_native_tools() {
            self.run_native_turn(llm, session_id, model, history, user_message, on_chunk).await
        } else {
            self.run_prompted_turn(llm, session_id, model, history, user_message, on_chunk).await
        }
    }

    async fn run_native_turn(
        &self,
        llm: Arc<dyn LlmClient>,
        session_id: Uuid,
        model: &str,
        history: &[ChatMessage],
        user_message: &str,
        on_chunk: Option<ChunkSink<'_>>,
    ) -> TurnOutcome {
        let mut context = build_context(SYSTEM_PROMPT.to_string(), history, user_message);
        let definitions = self.tools.definitions();

        let outcome =
            match llm.complete(model, &context, &definitions, TURN_MAX_TOKENS).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(error = %err, "turn completion failed");
                    flush(on_chunk, MODEL_FAILURE_MESSAGE);
                    return TurnOutcome {
                        content: MODEL_FAILURE_MESSAGE.to_string(),
                        ..TurnOutcome::default()
                    };
                }
            };

        if outcome.tool_calls.is_empty() {
            flush(on_chunk, &outcome.content);
            return TurnOutcome { content: outcome.content, ..TurnOutcome::default() };
        }

        let mut invocations = Vec::with_capacity(outcome.tool_calls.len());
        for call in outcome.tool_calls {
            let arguments = inject_session_id(&call.name, call.arguments, session_id);
            tracing::info!(tool = %call.name, "executing tool call");
            let result = self.tools.execute(&call.name, arguments.clone()).await;

            context.push(TurnMessage::assistant(render_call_markup(&call.name, &arguments)));
            context.push(TurnMessage::user(format!(
                "Tool \"{}\" returned: {result}",
                call.name
            )));
            invocations.push(ToolInvocation {
                id: call.id,
                name: call.name,
                arguments,
                result: Some(result),
            });
        }

        let content = self.summarize(llm, model, context, &invocations, on_chunk).await;
        TurnOutcome { content, tool_calls: invocations, preview: false }
    }

    async fn run_prompted_turn(
        &self,
        llm: Arc<dyn LlmClient>,
        session_id: Uuid,
        model: &str,
        history: &[ChatMessage],
        user_message: &str,
        on_chunk: Option<ChunkSink<'_>>,
    ) -> TurnOutcome {
        let system = format!(
            "{SYSTEM_PROMPT}\n\n{}",
            prompted_tool_appendix(&self.tools.definitions())
        );
        let mut context = build_context(system, history, user_message);

        let outcome = match llm.complete(model, &context, &[], TURN_MAX_TOKENS).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "turn completion failed");
                flush(on_chunk, MODEL_FAILURE_MESSAGE);
                return TurnOutcome {
                    content: MODEL_FAILURE_MESSAGE.to_string(),
                    ..TurnOutcome::default()
                };
            }
        };

        let call = match parser::extract_tool_call(&outcome.content) {
            Ok(call) => call,
            Err(ParseError::NotFound) => {
                flush(on_chunk, &outcome.content);
                return TurnOutcome { content: outcome.content, ..TurnOutcome::default() };
            }
            Err(err) => {
                tracing::warn!(error = %err, raw = %outcome.content, "unparseable tool call");
                flush(on_chunk, REPHRASE_MESSAGE);
                return TurnOutcome {
                    content: REPHRASE_MESSAGE.to_string(),
                    ..TurnOutcome::default()
                };
            }
        };

        let arguments = inject_session_id(&call.name, call.arguments, session_id);
        tracing::info!(tool = %call.name, "executing prompted tool call");
        let result = self.tools.execute(&call.name, arguments.clone()).await;

        context.push(TurnMessage::assistant(render_call_markup(&call.name, &arguments)));
        context.push(TurnMessage::user(format!("Tool \"{}\" returned: {result}", call.name)));

        let invocations = vec![ToolInvocation {
            id: Uuid::new_v4().to_string(),
            name: call.name,
            arguments,
            result: Some(result),
        }];

        let content = self.summarize(llm, model, context, &invocations, on_chunk).await;
        TurnOutcome { content, tool_calls: invocations, preview: false }
    }

    async fn summarize(
        &self,
        llm: Arc<dyn LlmClient>,
        model: &str,
        mut context: Vec<TurnMessage>,
        invocations: &[ToolInvocation],
        on_chunk: Option<ChunkSink<'_>>,
    ) -> String {
        context.push(TurnMessage::user(SUMMARY_PROMPT));

        let summary = match on_chunk {
            Some(sink) => llm.complete_stream(model, &context, SUMMARY_MAX_TOKENS, sink).await,
            None => llm
                .complete(model, &context, &[], SUMMARY_MAX_TOKENS)
                .await
                .map(|outcome| outcome.content),
        };

        match summary {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => fallback_summary(invocations),
            Err(err) => {
                tracing::warn!(error = %err, "summary completion failed, using fallback");
                let fallback = fallback_summary(invocations);
                flush(on_chunk, &fallback);
                fallback
            }
        }
    }
}

fn flush(on_chunk: Option<ChunkSink<'_>>, content: &str) {
    if let Some(sink) = on_chunk {
        sink(content);
    }
}

fn render_call_markup(name: &str, arguments: &Value) -> String {
    format!(
        "<tool_call>{}</tool_call>",
        serde_json::json!({ "name": name, "arguments": arguments })
    )
}

/// Flatten recent transcript into model messages. Tool results are replayed
/// as user messages so both providers see them the same way.
fn build_context(
    system: String,
    history: &[ChatMessage],
    user_message: &str,
) -> Vec<TurnMessage> {
    let mut context = vec![TurnMessage { role: "system".to_string(), content: system }];

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    for message in &history[start..] {
        match message.role {
            MessageRole::User | MessageRole::System => {
                context.push(TurnMessage {
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                });
            }
            MessageRole::Assistant => {
                let mut content = message.content.clone();
                for call in &message.tool_calls {
                    content.push('\n');
                    content.push_str(&render_call_markup(&call.name, &call.arguments));
                }
                context.push(TurnMessage::assistant(content));
            }
            MessageRole::Tool => {
                context.push(TurnMessage::user(format!("Tool result: {}", message.content)));
            }
        }
    }

    context.push(TurnMessage::user(user_message));
    context
}

fn prompted_tool_appendix(definitions: &[ToolDefinition]) -> String {
    let mut appendix = String::from(
        "You can call tools. To call one, answer with EXACTLY this markup and nothing else:\n\
         <tool_call>{\"name\": \"tool_name\", \"arguments\": {...}}</tool_call>\n\n\
         Available tools:\n",
    );
    for definition in definitions {
        appendix.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            definition.name, definition.description, definition.parameters
        ));
    }
    appendix
}

fn fallback_summary(invocations: &[ToolInvocation]) -> String {
    let mut summary = String::from("Here is what I found:\n");
    for invocation in invocations {
        let rendered = invocation
            .result
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "(no result)".to_string());
        summary.push_str(&format!("- {}: {rendered}\n", invocation.name));
    }
    summary
}
