//! The graph executor: one guarded, bounded traversal per conversational turn.
//!
//! Each loop iteration runs the coordinator, checks the hop and
//! consecutive-route guards, interprets the routing call and, for plugin
//! decisions, runs the plugin agent and its tools before returning to the
//! coordinator. Every path ends in the finalizer (directly, via suspend) or
//! in the error handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::prompts::PromptAssembler;
use super::routing::{self, RoutingDecision};
use super::settings::{ExecutorSettings, PromptOverrides};
use super::state::{ConversationState, PluginContext, SuspendReason, TurnStatus};
use super::template::{route_name, GraphTemplate, COORDINATOR, ERROR_HANDLER, FINALIZER, SUSPEND};
use super::GraphError;
use crate::backend::{CompletionRequest, CompletionResponse, Message, ModelClient, ModelError, ToolCall};
use crate::plugin::{AgentDecision, PluginBundle};
use crate::stream::{EventSink, TurnEvent, TurnEventStream};

/// Models bound to the executor's own nodes.
#[derive(Clone)]
pub struct NodeModels {
    pub coordinator: Arc<dyn ModelClient>,
    pub suspend: Arc<dyn ModelClient>,
    pub finalizer: Arc<dyn ModelClient>,
}

impl NodeModels {
    /// Use one model for every node.
    pub fn uniform(model: Arc<dyn ModelClient>) -> Self {
        Self {
            coordinator: model.clone(),
            suspend: model.clone(),
            finalizer: model,
        }
    }
}

/// Result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// User-facing terminal response
    pub response: String,
    /// Final state, suitable for checkpointing
    pub state: ConversationState,
    pub duration: Duration,
}

impl TurnOutcome {
    pub fn status(&self) -> &TurnStatus {
        &self.state.status
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.state.status, TurnStatus::Suspended { .. })
    }
}

/// How the routing loop ended.
enum Exit {
    Finalize,
    Suspend(SuspendReason),
    Fail(GraphError),
}

/// A ready-to-run conversation state machine for one instance.
pub struct GraphExecutor {
    template: Arc<GraphTemplate>,
    models: NodeModels,
    plugins: HashMap<String, Arc<PluginBundle>>,
    settings: ExecutorSettings,
    prompts: PromptOverrides,
}

impl GraphExecutor {
    /// Assemble an executor; every template route must have exactly one bundle.
    pub fn new(
        template: Arc<GraphTemplate>,
        models: NodeModels,
        bundles: Vec<Arc<PluginBundle>>,
        settings: ExecutorSettings,
    ) -> Result<Self, GraphError> {
        let mut plugins = HashMap::new();
        for bundle in bundles {
            let name = route_name(bundle.route_name());
            let route = template.route(&name).ok_or_else(|| {
                GraphError::InvalidGraph(format!(
                    "bundle {} has no route in template {}",
                    bundle.plugin_ref,
                    template.key()
                ))
            })?;
            if route.plugin_ref != bundle.plugin_ref {
                return Err(GraphError::InvalidGraph(format!(
                    "route '{}' expects {} but bundle is {}",
                    name, route.plugin_ref, bundle.plugin_ref
                )));
            }
            plugins.insert(name, bundle);
        }

        if let Some(missing) = template.routes().find(|r| !plugins.contains_key(&r.route_name)) {
            return Err(GraphError::InvalidGraph(format!(
                "no bundle bound for route '{}'",
                missing.route_name
            )));
        }

        Ok(Self {
            template,
            models,
            plugins,
            settings,
            prompts: PromptOverrides::default(),
        })
    }

    /// Replace coordinator or terminal prompts.
    pub fn with_prompts(mut self, prompts: PromptOverrides) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn template(&self) -> &GraphTemplate {
        &self.template
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Bound plugin bundles.
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<PluginBundle>> {
        self.plugins.values()
    }

    /// Run a turn without streaming.
    pub async fn invoke(&self, state: ConversationState) -> TurnOutcome {
        self.run_turn(state, &EventSink::disabled()).await
    }

    /// Run a turn on a spawned task, streaming its events.
    pub fn stream_turn(
        self: Arc<Self>,
        state: ConversationState,
        buffer: usize,
    ) -> (TurnEventStream, JoinHandle<TurnOutcome>) {
        let (sink, stream) = TurnEventStream::channel(buffer);
        let handle = tokio::spawn(async move { self.run_turn(state, &sink).await });
        (stream, handle)
    }

    /// Run one turn to a terminal response.
    pub async fn run_turn(&self, mut state: ConversationState, events: &EventSink) -> TurnOutcome {
        let started = Instant::now();

        // Counters are per turn
        state.agent_hops = 0;
        state.steps = 0;
        state.plugin_context = PluginContext::default();
        state.status = TurnStatus::Running;

        let exit = self.route_loop(&mut state, events).await;

        let (response, author) = match exit {
            Exit::Finalize => match self.finalize(&mut state, None, events).await {
                Ok(text) => {
                    state.status = TurnStatus::Finalized;
                    (text, FINALIZER)
                }
                Err(err) => (self.fail(&mut state, err, events).await, ERROR_HANDLER),
            },
            Exit::Suspend(reason) => {
                info!(
                    conversation_id = %state.conversation_id,
                    hops = state.agent_hops,
                    steps = state.steps,
                    reason = %reason,
                    "Guard tripped, suspending turn"
                );
                let draft = self.suspend(&mut state, &reason, events).await;
                let text = match self.finalize(&mut state, Some(&draft), events).await {
                    Ok(text) => text,
                    Err(_) => draft,
                };
                state.status = TurnStatus::Suspended { reason };
                (text, FINALIZER)
            }
            Exit::Fail(err) => (self.fail(&mut state, err, events).await, ERROR_HANDLER),
        };

        state.push(Message::assistant(response.clone()).named(author));

        let duration = started.elapsed();
        debug!(
            conversation_id = %state.conversation_id,
            hops = state.agent_hops,
            steps = state.steps,
            duration_ms = duration.as_millis() as u64,
            "Turn completed"
        );

        TurnOutcome {
            response,
            state,
            duration,
        }
    }

    async fn route_loop(&self, state: &mut ConversationState, events: &EventSink) -> Exit {
        loop {
            if let Err(reason) = self.enter(state) {
                return Exit::Suspend(reason);
            }

            let call = match self.coordinator(state, events).await {
                Ok(call) => call,
                Err(err) => return Exit::Fail(err),
            };

            if let Some(reason) = routing::check_guards(state, &self.settings) {
                answer_route(state, call.as_ref(), &format!("Declined: {}", reason));
                return Exit::Suspend(reason);
            }

            // Control tools
            if let Err(reason) = self.enter(state) {
                answer_route(state, call.as_ref(), &format!("Declined: {}", reason));
                return Exit::Suspend(reason);
            }

            let decision = match routing::interpret(call.as_ref(), &self.template) {
                Ok(decision) => decision,
                Err(err) => {
                    warn!(
                        conversation_id = %state.conversation_id,
                        error = %err,
                        "Unrecognized routing decision, finalizing"
                    );
                    answer_route(state, call.as_ref(), &format!("error: {}", err));
                    state.plugin_context.reset();
                    return Exit::Finalize;
                }
            };

            routing::apply(state, &decision);

            match decision {
                RoutingDecision::Finalize => {
                    answer_route(state, call.as_ref(), "Finalizing.");
                    return Exit::Finalize;
                }
                RoutingDecision::Plugin(route) => {
                    answer_route(state, call.as_ref(), &format!("Routing to {}.", route));
                    if let Err(reason) = self.run_plugin(&route, state, events).await {
                        return Exit::Suspend(reason);
                    }
                }
            }
        }
    }

    /// Count a node execution against the step limit.
    fn enter(&self, state: &mut ConversationState) -> Result<(), SuspendReason> {
        let limit = self.settings.effective_step_limit();
        if state.steps >= limit {
            return Err(SuspendReason::StepLimit {
                steps: state.steps,
                limit,
            });
        }
        state.steps += 1;
        Ok(())
    }

    async fn coordinator(
        &self,
        state: &mut ConversationState,
        events: &EventSink,
    ) -> Result<Option<ToolCall>, GraphError> {
        events.agent_start(COORDINATOR).await;

        let request = CompletionRequest::from_messages(state.messages.clone())
            .with_system(PromptAssembler::coordinator(
                &self.template,
                self.prompts.coordinator.as_deref(),
            ))
            .with_tools(self.template.coordinator_tools().to_vec());

        let timeout = self.settings.timeouts.coordinator();
        let outcome = match call_model(&self.models.coordinator, request, timeout).await {
            Ok(response) => {
                state.usage.add(response.usage);
                let mut calls = response.tool_calls.into_iter();
                let first = calls.next();
                let ignored = calls.count();
                if ignored > 0 {
                    debug!(ignored, "Coordinator returned extra routing calls, using the first");
                }
                if let Some(call) = &first {
                    state.push(
                        Message::assistant(response.content)
                            .named(COORDINATOR)
                            .with_tool_calls(vec![call.clone()]),
                    );
                }
                Ok(first)
            }
            Err(err) if err.is_timeout() => {
                warn!(
                    conversation_id = %state.conversation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Coordinator timed out, finalizing"
                );
                Ok(None)
            }
            Err(err) => {
                events.error(COORDINATOR, err.to_string()).await;
                Err(GraphError::Provider {
                    node: COORDINATOR.to_string(),
                    source: err,
                })
            }
        };

        events.agent_end(COORDINATOR).await;
        outcome
    }

    async fn run_plugin(
        &self,
        route: &str,
        state: &mut ConversationState,
        events: &EventSink,
    ) -> Result<(), SuspendReason> {
        let (Some(bundle), Some(spec)) = (self.plugins.get(route), self.template.route(route)) else {
            // new() guarantees a bundle per route
            warn!(route = %route, "No bundle bound for route");
            return Ok(());
        };
        let agent_node = spec.agent_node();
        let tools_node = spec.tools_node();

        self.enter(state)?;
        events.agent_start(&agent_node).await;

        let timeout = self.settings.timeouts.plugin_agent();
        let tool_calls = match tokio::time::timeout(timeout, bundle.agent.decide(&state.messages)).await {
            Ok(Ok(AgentDecision::Return { message })) => {
                state.push(message);
                Vec::new()
            }
            Ok(Ok(AgentDecision::Continue { message, tool_calls })) => {
                state.push(message);
                tool_calls
            }
            Ok(Err(err)) => {
                warn!(route = %route, error = %err, "Plugin agent failed");
                events.error(&agent_node, err.to_string()).await;
                state.push(
                    Message::assistant(format!("The {} agent could not complete its work: {}", route, err))
                        .named(route),
                );
                Vec::new()
            }
            Err(_) => {
                warn!(route = %route, timeout_ms = timeout.as_millis() as u64, "Plugin agent timed out");
                state.push(
                    Message::assistant(format!("The {} agent did not respond in time.", route)).named(route),
                );
                Vec::new()
            }
        };

        events.agent_end(&agent_node).await;

        if tool_calls.is_empty() {
            return Ok(());
        }

        if let Err(reason) = self.enter(state) {
            for call in &tool_calls {
                state.push(Message::tool_result(call, "error: not executed, step limit reached"));
            }
            return Err(reason);
        }

        let tool_timeout = self.settings.timeouts.tool();
        for call in &tool_calls {
            events
                .emit(TurnEvent::ToolStart {
                    node: tools_node.clone(),
                    tool: call.name.clone(),
                })
                .await;

            let (content, ok) = match tokio::time::timeout(tool_timeout, bundle.agent.invoke_tool(call)).await {
                Ok(Ok(output)) => (output, true),
                Ok(Err(err)) => (format!("error: {}", err), false),
                Err(_) => (format!("error: tool timed out after {:?}", tool_timeout), false),
            };
            if !ok {
                debug!(route = %route, tool = %call.name, "Tool call failed");
            }
            state.push(Message::tool_result(call, content));

            events
                .emit(TurnEvent::ToolEnd {
                    node: tools_node.clone(),
                    tool: call.name.clone(),
                    ok,
                })
                .await;
        }

        Ok(())
    }

    async fn suspend(
        &self,
        state: &mut ConversationState,
        reason: &SuspendReason,
        events: &EventSink,
    ) -> String {
        events.agent_start(SUSPEND).await;

        let suggestions = self.suggestions(state);
        let request = CompletionRequest::from_messages(state.messages.clone()).with_system(
            PromptAssembler::suspend(reason, state.tone, &suggestions, self.prompts.suspend.as_deref()),
        );

        let fallback = || {
            self.settings
                .fallbacks
                .suspend
                .replace("{reason}", &reason.to_string())
        };

        let draft = match call_model(&self.models.suspend, request, self.settings.timeouts.suspend()).await {
            Ok(response) if !response.content.trim().is_empty() => {
                state.usage.add(response.usage);
                response.content
            }
            Ok(_) => fallback(),
            Err(err) => {
                warn!(error = %err, "Suspend node fell back to cached response");
                fallback()
            }
        };

        events.agent_end(SUSPEND).await;
        draft
    }

    async fn finalize(
        &self,
        state: &mut ConversationState,
        suspend_draft: Option<&str>,
        events: &EventSink,
    ) -> Result<String, GraphError> {
        events.agent_start(FINALIZER).await;

        let suggestions = self.suggestions(state);
        let request = CompletionRequest::from_messages(state.messages.clone()).with_system(
            PromptAssembler::finalizer(
                state.tone,
                &suggestions,
                suspend_draft,
                self.prompts.finalizer.as_deref(),
            ),
        );

        let cached = || {
            suspend_draft
                .map(str::to_string)
                .unwrap_or_else(|| self.settings.fallbacks.finalizer.clone())
        };

        let result = match call_model(&self.models.finalizer, request, self.settings.timeouts.finalizer()).await {
            Ok(response) => {
                state.usage.add(response.usage);
                if response.content.trim().is_empty() {
                    Ok(cached())
                } else {
                    Ok(response.content)
                }
            }
            Err(err) if err.is_timeout() => {
                warn!(conversation_id = %state.conversation_id, "Finalizer timed out, using cached response");
                Ok(cached())
            }
            Err(err) => match suspend_draft {
                Some(draft) => {
                    warn!(error = %err, "Finalizer failed, returning suspend notice as-is");
                    Ok(draft.to_string())
                }
                None => {
                    events.error(FINALIZER, err.to_string()).await;
                    Err(GraphError::Provider {
                        node: FINALIZER.to_string(),
                        source: err,
                    })
                }
            },
        };

        if let Ok(text) = &result {
            events
                .emit(TurnEvent::Message {
                    node: FINALIZER.to_string(),
                    content: text.clone(),
                })
                .await;
        }
        events.agent_end(FINALIZER).await;
        result
    }

    async fn fail(&self, state: &mut ConversationState, error: GraphError, events: &EventSink) -> String {
        warn!(
            conversation_id = %state.conversation_id,
            error = %error,
            "Turn failed"
        );
        state.status = TurnStatus::Failed {
            error: error.to_string(),
        };

        let text = if self.settings.error_handler {
            events.agent_start(ERROR_HANDLER).await;
            let request = CompletionRequest::from_messages(state.messages.clone())
                .with_system(PromptAssembler::error_handler(&error.to_string(), state.tone));
            match call_model(&self.models.finalizer, request, self.settings.timeouts.finalizer()).await {
                Ok(response) if !response.content.trim().is_empty() => response.content,
                _ => self.settings.fallbacks.error.clone(),
            }
        } else {
            self.settings.fallbacks.error.clone()
        };

        events
            .emit(TurnEvent::Message {
                node: ERROR_HANDLER.to_string(),
                content: text.clone(),
            })
            .await;
        if self.settings.error_handler {
            events.agent_end(ERROR_HANDLER).await;
        }
        text
    }

    /// Response suggestions of plugins used in this turn.
    fn suggestions(&self, state: &ConversationState) -> Vec<String> {
        state
            .plugin_context
            .plugins_used()
            .into_iter()
            .filter_map(|name| self.template.route(name))
            .filter_map(|route| route.response_suggestion.clone())
            .collect()
    }
}

/// Answer the coordinator's routing call so the history stays well formed.
fn answer_route(state: &mut ConversationState, call: Option<&ToolCall>, content: &str) {
    if let Some(call) = call {
        state.push(Message::tool_result(call, content));
    }
}

async fn call_model(
    model: &Arc<dyn ModelClient>,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<CompletionResponse, ModelError> {
    match tokio::time::timeout(timeout, model.invoke(request)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout(timeout)),
    }
}
