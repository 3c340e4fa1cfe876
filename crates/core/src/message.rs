//! Message and Conversation domain types.
//!
//! A [`Conversation`] is the append-only log of one interaction: the user's
//! query, the engine's turns (with any capability requests they carry) and
//! the capability results fed back to it. Messages are never edited, removed
//! or reordered once appended, so an interaction can be replayed and audited.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::CapabilityRequest;
use crate::error::ConversationError;

/// Unique identifier for a conversation (one interaction).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instructions for the reasoning engine
    System,
    /// The end user
    User,
    /// The reasoning engine
    Assistant,
    /// Output of a capability call, fed back to the engine
    CapabilityResult,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Capability requests emitted by the engine (assistant messages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<CapabilityRequest>,

    /// For capability results: the request this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    /// For capability results: whether the payload describes a failure
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_failure: bool,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            requests: Vec::new(),
            call_id: None,
            is_failure: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message with no capability requests.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create an assistant message carrying capability requests.
    pub fn assistant_with_requests(
        content: impl Into<String>,
        requests: Vec<CapabilityRequest>,
    ) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.requests = requests;
        msg
    }

    /// Create a successful capability result message.
    pub fn capability_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::CapabilityResult, content);
        msg.call_id = Some(call_id.into());
        msg
    }

    /// Create a failed capability result message.
    pub fn capability_failure(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::capability_result(call_id, content);
        msg.is_failure = true;
        msg
    }
}

/// The append-only message log of one interaction.
///
/// Invariants enforced by [`Conversation::append`]:
/// - every capability request id is non-empty and unique within the log;
/// - every capability result answers a request that appears earlier in the
///   log, and each request is answered at most once.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    id: ConversationId,

    messages: Vec<Message>,

    created_at: DateTime<Utc>,

    updated_at: DateTime<Utc>,

    #[serde(skip)]
    requested: HashSet<String>,

    #[serde(skip)]
    answered: HashSet<String>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::with_id(ConversationId::new())
    }

    /// Create a new empty conversation with a caller-chosen id.
    pub fn with_id(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            requested: HashSet::new(),
            answered: HashSet::new(),
        }
    }

    /// Rebuild a conversation from a persisted message sequence,
    /// re-checking every invariant along the way.
    pub fn replay(
        id: ConversationId,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<Self, ConversationError> {
        let mut conversation = Self::with_id(id);
        for message in messages {
            conversation.append(message)?;
        }
        Ok(conversation)
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Append one message at the end of the log.
    ///
    /// The log is left untouched when the message is rejected.
    pub fn append(&mut self, message: Message) -> Result<(), ConversationError> {
        match message.role {
            Role::Assistant => {
                let mut seen = HashSet::new();
                for request in &message.requests {
                    if request.id.is_empty() {
                        return Err(ConversationError::EmptyRequestId);
                    }
                    if self.requested.contains(&request.id) || !seen.insert(request.id.as_str()) {
                        return Err(ConversationError::DuplicateRequestId {
                            call_id: request.id.clone(),
                        });
                    }
                }
                self.requested
                    .extend(message.requests.iter().map(|r| r.id.clone()));
            }
            Role::CapabilityResult => {
                let call_id = message.call_id.clone().unwrap_or_default();
                if !self.requested.contains(&call_id) {
                    return Err(ConversationError::OrphanResult { call_id });
                }
                if self.answered.contains(&call_id) {
                    return Err(ConversationError::DuplicateResult { call_id });
                }
                self.answered.insert(call_id);
            }
            Role::System | Role::User => {}
        }

        self.updated_at = Utc::now();
        self.messages.push(message);
        Ok(())
    }

    /// Append a system message carrying `text` unless the log already has one.
    ///
    /// Returns whether a message was appended. Idempotent: repeated calls never
    /// add a second system message.
    pub fn ensure_system_prompt(&mut self, text: impl Into<String>) -> bool {
        if self.has_system_prompt() {
            return false;
        }
        self.updated_at = Utc::now();
        self.messages.push(Message::system(text));
        true
    }

    pub fn has_system_prompt(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::System)
    }

    /// The full ordered message sequence, owned, for handing to the engine.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Borrow the ordered message sequence.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Request ids that do not have a result yet.
    pub fn pending_calls(&self) -> Vec<&str> {
        self.messages
            .iter()
            .flat_map(|m| m.requests.iter())
            .filter(|r| !self.answered.contains(&r.id))
            .map(|r| r.id.as_str())
            .collect()
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() / 4).sum()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
