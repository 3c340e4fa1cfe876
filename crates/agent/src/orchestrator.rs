//! The orchestrator: routes between the reasoning engine and capabilities.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use datarouter_config::{AppConfig, DEFAULT_SYSTEM_PROMPT};
use datarouter_core::capability::{CapabilityRegistry, CapabilityRequest};
use datarouter_core::engine::{EngineRequest, ReasoningEngine};
use datarouter_core::error::{ConversationError, EngineError};
use datarouter_core::event::{DomainEvent, EventBus, InteractionOutcome};
use datarouter_core::invoker::CapabilityInvoker;
use datarouter_core::message::{Conversation, Message, Role};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why an interaction ended without an answer.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No final answer after {max_iterations} engine calls")]
    NonConvergence { max_iterations: u32 },

    #[error("Unrecoverable engine error: {0}")]
    UnrecoverableEngine(#[from] EngineError),

    #[error("Interaction cancelled after {engine_calls} engine calls")]
    Cancelled { engine_calls: u32 },

    #[error("Invalid conversation: {0}")]
    InvalidConversation(#[from] ConversationError),
}

impl OrchestratorError {
    fn outcome(&self) -> InteractionOutcome {
        match self {
            Self::NonConvergence { .. } => InteractionOutcome::NonConvergence,
            Self::UnrecoverableEngine(_) | Self::InvalidConversation(_) => {
                InteractionOutcome::EngineError
            }
            Self::Cancelled { .. } => InteractionOutcome::Cancelled,
        }
    }
}

/// What an interaction starts from.
#[derive(Debug, Clone)]
pub enum InitialQuery {
    /// A single user message
    Text(String),
    /// An ordered list of messages, appended as given
    Messages(Vec<Message>),
}

impl From<&str> for InitialQuery {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for InitialQuery {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<Message>> for InitialQuery {
    fn from(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }
}

/// Loop states. `Dispatching` carries the batch still to run and `Done`
/// the final answer.
enum State {
    AwaitingModel,
    Dispatching(Vec<CapabilityRequest>),
    Done(String),
}

/// Drives one interaction to a final answer.
///
/// Each turn sends the full conversation and the registry's capability
/// specs to the engine. A response without requests is the answer;
/// otherwise every request is dispatched in the order emitted, its result
/// appended, and the engine is asked again. Capability failures are fed
/// back as data. Engine failures end the interaction.
pub struct Orchestrator {
    engine: Arc<dyn ReasoningEngine>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    invoker: CapabilityInvoker,
    system_prompt: String,
    max_iterations: u32,
    event_bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        model: impl Into<String>,
        registry: Arc<CapabilityRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            engine,
            model: model.into(),
            temperature: 0.1,
            max_tokens: None,
            invoker: CapabilityInvoker::new(registry),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: 10,
            event_bus,
        }
    }

    /// Build an orchestrator with the model, sampling, prompt and iteration
    /// cap taken from `config`.
    pub fn from_config(
        engine: Arc<dyn ReasoningEngine>,
        registry: Arc<CapabilityRegistry>,
        event_bus: Arc<EventBus>,
        config: &AppConfig,
    ) -> Self {
        Self::new(engine, &config.default_model, registry, event_bus)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_system_prompt(&config.orchestrator.system_prompt)
            .with_max_iterations(config.orchestrator.max_iterations)
    }

    /// Set the maximum number of engine calls per interaction.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        self.invoker.registry()
    }

    /// Run one interaction to its final answer.
    pub async fn run_interaction(
        &self,
        query: impl Into<InitialQuery>,
    ) -> Result<String, OrchestratorError> {
        self.run_cancellable(query, &CancellationToken::new()).await
    }

    /// Like [`Orchestrator::run_interaction`], stopping before the next
    /// engine call once `cancel` fires.
    pub async fn run_cancellable(
        &self,
        query: impl Into<InitialQuery>,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let mut conversation = self.start(query)?;
        self.drive(&mut conversation, cancel).await
    }

    /// Open a conversation for `query`.
    ///
    /// The system prompt is appended first unless the query already carries
    /// a system message.
    pub fn start(&self, query: impl Into<InitialQuery>) -> Result<Conversation, OrchestratorError> {
        let messages = match query.into() {
            InitialQuery::Text(text) => vec![Message::user(text)],
            InitialQuery::Messages(messages) => messages,
        };

        let mut conversation = Conversation::new();
        if !messages.iter().any(|m| m.role == Role::System) {
            conversation.ensure_system_prompt(&self.system_prompt);
        }
        for message in messages {
            conversation.append(message)?;
        }
        Ok(conversation)
    }

    /// Run the loop on a caller-owned conversation until the engine answers.
    ///
    /// The conversation only grows. On error it holds everything appended
    /// up to the failure.
    pub async fn drive(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let conversation_id = conversation.id().to_string();
        info!(
            conversation_id = %conversation_id,
            messages = conversation.len(),
            "Starting interaction"
        );
        self.event_bus.publish(DomainEvent::InteractionStarted {
            conversation_id: conversation_id.clone(),
            timestamp: Utc::now(),
        });

        let mut engine_calls = 0;
        let result = self
            .run_states(conversation, cancel, &mut engine_calls)
            .await;

        let outcome = match &result {
            Ok(_) => InteractionOutcome::Answered,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    engine_calls,
                    error = %e,
                    "Interaction failed"
                );
                e.outcome()
            }
        };
        self.event_bus.publish(DomainEvent::InteractionFinished {
            conversation_id,
            engine_calls,
            outcome,
            timestamp: Utc::now(),
        });

        result
    }

    async fn run_states(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
        engine_calls: &mut u32,
    ) -> Result<String, OrchestratorError> {
        let capabilities = self.invoker.registry().specs();
        let mut state = State::AwaitingModel;

        loop {
            state = match state {
                State::AwaitingModel => {
                    if cancel.is_cancelled() {
                        return Err(OrchestratorError::Cancelled {
                            engine_calls: *engine_calls,
                        });
                    }
                    if *engine_calls >= self.max_iterations {
                        return Err(OrchestratorError::NonConvergence {
                            max_iterations: self.max_iterations,
                        });
                    }
                    *engine_calls += 1;

                    debug!(
                        conversation_id = %conversation.id(),
                        iteration = *engine_calls,
                        "Calling reasoning engine"
                    );

                    let request = EngineRequest {
                        model: self.model.clone(),
                        messages: conversation.snapshot(),
                        capabilities: capabilities.clone(),
                        temperature: self.temperature,
                        max_tokens: self.max_tokens,
                    };
                    let response = self.engine.complete(request).await?;

                    self.event_bus.publish(DomainEvent::EngineResponded {
                        conversation_id: conversation.id().to_string(),
                        iteration: *engine_calls,
                        requests: response.requests.len(),
                        tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
                        timestamp: Utc::now(),
                    });

                    // A response that breaks the log's id invariants is the
                    // engine's fault, not the caller's
                    conversation
                        .append(response.to_message())
                        .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;

                    if response.is_final() {
                        State::Done(response.text().to_string())
                    } else {
                        State::Dispatching(response.requests)
                    }
                }

                State::Dispatching(requests) if *engine_calls >= self.max_iterations => {
                    // No engine call is left to read the results, so nothing runs.
                    // Each request still gets an answer to keep the log well-formed.
                    warn!(
                        conversation_id = %conversation.id(),
                        skipped = requests.len(),
                        "Iteration cap reached, not dispatching the last batch"
                    );
                    for request in &requests {
                        conversation.append(Message::capability_failure(
                            &request.id,
                            format!(
                                "NonConvergence: {} was not run, the limit of {} engine calls \
                                 was reached",
                                request.name, self.max_iterations
                            ),
                        ))?;
                    }
                    return Err(OrchestratorError::NonConvergence {
                        max_iterations: self.max_iterations,
                    });
                }

                State::Dispatching(requests) => {
                    debug!(count = requests.len(), "Dispatching capability requests");
                    for request in &requests {
                        let start = Instant::now();
                        let result = self.invoker.dispatch(request).await;
                        let duration_ms = start.elapsed().as_millis() as u64;

                        if !result.is_success() {
                            warn!(
                                capability = %request.name,
                                call_id = %request.id,
                                output = %result.text(),
                                "Capability call failed"
                            );
                        }
                        self.event_bus.publish(DomainEvent::CapabilityInvoked {
                            conversation_id: conversation.id().to_string(),
                            capability: request.name.clone(),
                            call_id: request.id.clone(),
                            success: result.is_success(),
                            duration_ms,
                            timestamp: Utc::now(),
                        });

                        conversation.append(result.into_message(&request.id))?;
                    }
                    State::AwaitingModel
                }

                State::Done(answer) => {
                    info!(
                        conversation_id = %conversation.id(),
                        engine_calls = *engine_calls,
                        "Interaction answered"
                    );
                    return Ok(answer);
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        Broken, Doubler, ScriptedEngine, answer, make_request, requesting,
    };
    use datarouter_core::capability::Capability;
    use serde_json::json;

    fn registry() -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();
        registry.add(Arc::new(Doubler)).unwrap();
        registry.add(Arc::new(Broken)).unwrap();
        Arc::new(registry)
    }

    fn orchestrator(engine: Arc<ScriptedEngine>) -> Orchestrator {
        Orchestrator::new(engine, "test-model", registry(), Arc::new(EventBus::default()))
    }

    /// Drive a fresh conversation for `query`, returning it for inspection.
    async fn run(
        orchestrator: &Orchestrator,
        query: &str,
    ) -> (Result<String, OrchestratorError>, Conversation) {
        let mut conversation = orchestrator.start(query).unwrap();
        let result = orchestrator
            .drive(&mut conversation, &CancellationToken::new())
            .await;
        (result, conversation)
    }

    #[tokio::test]
    async fn plain_answer_after_one_engine_call() {
        let engine = Arc::new(ScriptedEngine::replies(vec![answer("42 stores")]));
        let orchestrator = orchestrator(engine.clone());

        let result = orchestrator.run_interaction("How many stores?").await.unwrap();
        assert_eq!(result, "42 stores");
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn engine_sees_snapshot_and_capabilities() {
        let engine = Arc::new(ScriptedEngine::replies(vec![answer("ok")]));
        let orchestrator = orchestrator(engine.clone())
            .with_temperature(0.5)
            .with_max_tokens(64)
            .with_system_prompt("Be brief.");

        orchestrator.run_interaction("hi").await.unwrap();

        let request = engine.request(0);
        assert_eq!(request.model, "test-model");
        assert_eq!(request.temperature, 0.5);
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "Be brief.");
        assert_eq!(request.messages[1].content, "hi");
        let names: Vec<_> = request.capabilities.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["double", "broken"]);
    }

    #[tokio::test]
    async fn empty_answer_is_a_valid_terminal_answer() {
        let engine = Arc::new(ScriptedEngine::replies(vec![requesting(vec![])]));
        let result = orchestrator(engine).run_interaction("hi").await.unwrap();
        assert_eq!(result, "");
    }

    #[tokio::test]
    async fn capability_result_is_fed_back() {
        let engine = Arc::new(ScriptedEngine::replies(vec![
            requesting(vec![make_request("call_1", "double", json!({"n": 21}))]),
            answer("The answer is 42"),
        ]));
        let orchestrator = orchestrator(engine.clone());
        let (result, conversation) = run(&orchestrator, "double 21").await;

        assert_eq!(result.unwrap(), "The answer is 42");
        assert_eq!(engine.call_count(), 2);

        // system, user, assistant(requests), result, assistant(answer)
        let messages = conversation.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[3].role, Role::CapabilityResult);
        assert_eq!(messages[3].call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[3].content, "42");
        assert!(!messages[3].is_failure);

        // The second engine call saw the result
        assert_eq!(engine.request(1).messages.len(), 4);
    }

    #[tokio::test]
    async fn results_follow_request_order() {
        let engine = Arc::new(ScriptedEngine::replies(vec![
            requesting(vec![
                make_request("call_b", "double", json!({"n": 2})),
                make_request("call_a", "double", json!({"n": 1})),
            ]),
            answer("done"),
        ]));
        let (result, conversation) = run(&orchestrator(engine), "go").await;
        result.unwrap();

        let results: Vec<(&str, &str)> = conversation
            .messages()
            .iter()
            .filter(|m| m.role == Role::CapabilityResult)
            .map(|m| (m.call_id.as_deref().unwrap(), m.content.as_str()))
            .collect();
        assert_eq!(results, vec![("call_b", "4"), ("call_a", "2")]);
    }

    #[tokio::test]
    async fn unknown_capability_is_fed_back_and_loop_continues() {
        let engine = Arc::new(ScriptedEngine::replies(vec![
            requesting(vec![make_request("call_1", "forecast", json!({}))]),
            answer("I cannot forecast"),
        ]));
        let (result, conversation) = run(&orchestrator(engine.clone()), "forecast").await;

        assert_eq!(result.unwrap(), "I cannot forecast");
        assert_eq!(engine.call_count(), 2);
        let failure = &conversation.messages()[3];
        assert!(failure.is_failure);
        assert!(failure.content.starts_with("UnknownCapability"));
    }

    #[tokio::test]
    async fn invalid_arguments_and_execution_failures_are_data() {
        let mut malformed = make_request("call_1", "double", json!({}));
        malformed.arguments = "{not json".into();
        let engine = Arc::new(ScriptedEngine::replies(vec![
            requesting(vec![
                malformed,
                make_request("call_2", "double", json!({"n": "two"})),
                make_request("call_3", "broken", json!({})),
            ]),
            answer("recovered"),
        ]));
        let (result, conversation) = run(&orchestrator(engine), "go").await;
        assert_eq!(result.unwrap(), "recovered");

        let failures: Vec<&str> = conversation
            .messages()
            .iter()
            .filter(|m| m.is_failure)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(failures.len(), 3);
        assert!(failures[0].starts_with("InvalidArguments"));
        assert!(failures[1].starts_with("InvalidArguments"));
        assert!(failures[2].starts_with("CapabilityExecutionFailure"));
    }

    #[tokio::test]
    async fn never_converging_engine_hits_the_cap() {
        let engine = Arc::new(ScriptedEngine::looping("double"));
        let orchestrator = orchestrator(engine.clone()).with_max_iterations(4);
        let (result, conversation) = run(&orchestrator, "loop").await;

        match result.unwrap_err() {
            OrchestratorError::NonConvergence { max_iterations } => assert_eq!(max_iterations, 4),
            other => panic!("Expected NonConvergence, got: {other:?}"),
        }
        assert_eq!(engine.call_count(), 4);
        // system + user + 4 × (assistant + result)
        assert_eq!(conversation.len(), 10);
    }

    #[tokio::test]
    async fn batch_from_the_last_allowed_call_is_not_run() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let engine = Arc::new(ScriptedEngine::looping("double"));
        let orchestrator =
            Orchestrator::new(engine.clone(), "m", registry(), bus).with_max_iterations(3);
        let (result, conversation) = run(&orchestrator, "loop").await;

        assert!(matches!(
            result,
            Err(OrchestratorError::NonConvergence { max_iterations: 3 })
        ));
        assert_eq!(engine.call_count(), 3);

        let mut invoked = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(*event, DomainEvent::CapabilityInvoked { .. }) {
                invoked += 1;
            }
        }
        assert_eq!(invoked, 2);

        // The unrun request is still answered, so the log stays paired
        let last = conversation.last().unwrap();
        assert_eq!(last.role, Role::CapabilityResult);
        assert!(last.is_failure);
        assert!(last.content.starts_with("NonConvergence: double was not run"));
        assert!(conversation.pending_calls().is_empty());
    }

    #[tokio::test]
    async fn answer_on_the_last_allowed_call_succeeds() {
        let engine = Arc::new(ScriptedEngine::replies(vec![
            requesting(vec![make_request("call_1", "double", json!({"n": 1}))]),
            answer("just in time"),
        ]));
        let orchestrator = orchestrator(engine).with_max_iterations(2);
        assert_eq!(orchestrator.run_interaction("go").await.unwrap(), "just in time");
    }

    #[tokio::test]
    async fn engine_failure_is_unrecoverable() {
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(requesting(vec![make_request("call_1", "double", json!({"n": 1}))])),
            Err(EngineError::Network("connection reset".into())),
        ]));
        let (result, conversation) = run(&orchestrator(engine.clone()), "go").await;

        match result.unwrap_err() {
            OrchestratorError::UnrecoverableEngine(EngineError::Network(_)) => {}
            other => panic!("Expected UnrecoverableEngine, got: {other:?}"),
        }
        // Not retried
        assert_eq!(engine.call_count(), 2);
        // Everything up to the failure is kept
        assert_eq!(conversation.len(), 4);
    }

    #[tokio::test]
    async fn duplicate_request_ids_are_a_malformed_response() {
        let engine = Arc::new(ScriptedEngine::replies(vec![requesting(vec![
            make_request("same", "double", json!({"n": 1})),
            make_request("same", "double", json!({"n": 2})),
        ])]));
        let (result, conversation) = run(&orchestrator(engine), "go").await;

        assert!(matches!(
            result.unwrap_err(),
            OrchestratorError::UnrecoverableEngine(EngineError::MalformedResponse(_))
        ));
        assert_eq!(conversation.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_engine_call() {
        let engine = Arc::new(ScriptedEngine::looping("double"));
        let orchestrator = orchestrator(engine.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        match orchestrator.run_cancellable("go", &cancel).await.unwrap_err() {
            OrchestratorError::Cancelled { engine_calls } => assert_eq!(engine_calls, 0),
            other => panic!("Expected Cancelled, got: {other:?}"),
        }
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_interaction_finishes_the_batch() {
        struct CancelOnRun(CancellationToken);

        #[async_trait::async_trait]
        impl Capability for CancelOnRun {
            fn spec(&self) -> datarouter_core::capability::CapabilitySpec {
                datarouter_core::capability::CapabilitySpec::new(
                    "stop",
                    "Cancels the interaction",
                    Default::default(),
                )
            }

            async fn execute(
                &self,
                _arguments: datarouter_core::capability::Arguments,
            ) -> Result<String, datarouter_core::error::CapabilityError> {
                self.0.cancel();
                Ok("stopping".into())
            }
        }

        let cancel = CancellationToken::new();
        let mut registry = CapabilityRegistry::new();
        registry.add(Arc::new(CancelOnRun(cancel.clone()))).unwrap();
        registry.add(Arc::new(Doubler)).unwrap();

        let engine = Arc::new(ScriptedEngine::replies(vec![requesting(vec![
            make_request("call_1", "stop", json!({})),
            make_request("call_2", "double", json!({"n": 5})),
        ])]));
        let orchestrator = Orchestrator::new(
            engine.clone(),
            "m",
            Arc::new(registry),
            Arc::new(EventBus::default()),
        );

        let mut conversation = orchestrator.start("go").unwrap();
        let err = orchestrator.drive(&mut conversation, &cancel).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Cancelled { engine_calls: 1 }));
        assert_eq!(engine.call_count(), 1);
        // Both requests in the batch were still answered
        assert_eq!(conversation.last().unwrap().content, "10");
        assert!(conversation.pending_calls().is_empty());
    }

    #[tokio::test]
    async fn conversation_grows_monotonically_and_results_pair_with_requests() {
        let engine = Arc::new(ScriptedEngine::replies(vec![
            requesting(vec![
                make_request("call_1", "double", json!({"n": 1})),
                make_request("call_2", "missing", json!({})),
            ]),
            requesting(vec![make_request("call_3", "broken", json!({}))]),
            answer("done"),
        ]));
        let orchestrator = orchestrator(engine.clone());
        let (result, conversation) = run(&orchestrator, "go").await;
        result.unwrap();

        // Every engine call saw a strict extension of the previous snapshot
        let mut previous: Vec<Message> = Vec::new();
        for i in 0..engine.call_count() {
            let snapshot = engine.request(i).messages;
            assert!(snapshot.len() > previous.len());
            assert_eq!(&snapshot[..previous.len()], &previous[..]);
            previous = snapshot;
        }
        assert_eq!(&conversation.messages()[..previous.len()], &previous[..]);

        // Each result references exactly one earlier request
        for (idx, message) in conversation.messages().iter().enumerate() {
            let Some(call_id) = &message.call_id else { continue };
            let matching = conversation.messages()[..idx]
                .iter()
                .flat_map(|m| &m.requests)
                .filter(|r| &r.id == call_id)
                .count();
            assert_eq!(matching, 1, "result {call_id} must pair with one request");
        }
    }

    #[tokio::test]
    async fn caller_supplied_system_message_is_kept() {
        let engine = Arc::new(ScriptedEngine::replies(vec![answer("ok")]));
        let orchestrator = orchestrator(engine.clone());
        orchestrator
            .run_interaction(vec![Message::system("Custom"), Message::user("hi")])
            .await
            .unwrap();

        let messages = engine.request(0).messages;
        let systems: Vec<_> = messages.iter().filter(|m| m.role == Role::System).collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].content, "Custom");
    }

    #[test]
    fn invalid_initial_messages_are_rejected() {
        let engine = Arc::new(ScriptedEngine::replies(vec![]));
        let err = orchestrator(engine)
            .start(vec![Message::capability_result("ghost", "data")])
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConversation(_)));
    }

    #[tokio::test]
    async fn multi_turn_conversation_reuses_the_log() {
        let engine = Arc::new(ScriptedEngine::replies(vec![answer("first"), answer("second")]));
        let orchestrator = orchestrator(engine.clone());
        let cancel = CancellationToken::new();

        let mut conversation = orchestrator.start("one").unwrap();
        orchestrator.drive(&mut conversation, &cancel).await.unwrap();
        conversation.append(Message::user("two")).unwrap();
        let second = orchestrator.drive(&mut conversation, &cancel).await.unwrap();

        assert_eq!(second, "second");
        assert_eq!(engine.request(1).messages.len(), 4);
        let systems = conversation
            .messages()
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        assert_eq!(systems, 1);
    }

    #[tokio::test]
    async fn events_trace_the_interaction() {
        let engine = Arc::new(ScriptedEngine::replies(vec![
            requesting(vec![make_request("call_1", "double", json!({"n": 3}))]),
            answer("6"),
        ]));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let orchestrator = Orchestrator::new(engine, "m", registry(), bus);

        orchestrator.run_interaction("triple-ish").await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 5);
        assert!(matches!(*events[0], DomainEvent::InteractionStarted { .. }));
        assert!(matches!(
            *events[1],
            DomainEvent::EngineResponded { iteration: 1, requests: 1, tokens_used: 15, .. }
        ));
        match &*events[2] {
            DomainEvent::CapabilityInvoked { capability, call_id, success, .. } => {
                assert_eq!(capability, "double");
                assert_eq!(call_id, "call_1");
                assert!(success);
            }
            other => panic!("Expected CapabilityInvoked, got: {other:?}"),
        }
        assert!(matches!(
            *events[4],
            DomainEvent::InteractionFinished {
                engine_calls: 2,
                outcome: InteractionOutcome::Answered,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn non_convergence_outcome_is_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let orchestrator =
            Orchestrator::new(Arc::new(ScriptedEngine::looping("double")), "m", registry(), bus)
                .with_max_iterations(1);

        orchestrator.run_interaction("go").await.unwrap_err();

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last.as_deref(),
            Some(DomainEvent::InteractionFinished {
                outcome: InteractionOutcome::NonConvergence,
                engine_calls: 1,
                ..
            })
        ));
    }

    #[test]
    fn from_config_applies_settings() {
        let mut config = AppConfig::default();
        config.orchestrator.max_iterations = 3;
        config.default_model = "configured-model".into();
        let orchestrator = Orchestrator::from_config(
            Arc::new(ScriptedEngine::replies(vec![])),
            registry(),
            Arc::new(EventBus::default()),
            &config,
        );
        assert_eq!(orchestrator.max_iterations(), 3);
        assert_eq!(orchestrator.model, "configured-model");
        assert_eq!(orchestrator.registry().len(), 2);
    }
}
