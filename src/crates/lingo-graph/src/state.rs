//! Conversation state carried between workflow nodes
//!
//! [`ConversationState`] is the live object nodes read. Nodes never mutate it
//! directly; they return a [`StateUpdate`] which the engine folds in with two
//! reducers:
//!
//! - `messages` **appends** (the conversation only grows)
//! - every other field **overwrites**
//!
//! The folded state is what gets serialized into a checkpoint payload, so the
//! JSON shape here is the persisted shape. Unknown top-level fields (per-agent
//! payloads such as `exercise_data`) survive round trips through
//! [`ConversationState::agent_data`].

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Field name of the append-only message list
pub const MESSAGES: &str = "messages";

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// What the learner is asking for.
///
/// A closed set: classifiers that cannot decide return [`Intent::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Conversation,
    Grammar,
    Pronunciation,
    Exercise,
    Vocabulary,
    Translation,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Intent::Conversation,
        Intent::Grammar,
        Intent::Pronunciation,
        Intent::Exercise,
        Intent::Vocabulary,
        Intent::Translation,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Conversation => "conversation",
            Intent::Grammar => "grammar",
            Intent::Pronunciation => "pronunciation",
            Intent::Exercise => "exercise",
            Intent::Vocabulary => "vocabulary",
            Intent::Translation => "translation",
            Intent::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        Intent::ALL
            .into_iter()
            .find(|intent| intent.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GraphError::Validation(format!("unknown intent '{s}'")))
    }
}

/// Snapshot-able state of one conversation thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_agent: Option<String>,

    /// Per-agent payloads, stored as top-level fields
    #[serde(flatten)]
    pub agent_data: Map<String, Value>,
}

impl ConversationState {
    /// State holding a single user message
    pub fn from_user(content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(content)],
            ..Self::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Most recent message authored by the user
    pub fn latest_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Fold caller input into resumed state.
    ///
    /// Input messages are appended after the stored history; any identity or
    /// routing field the caller sets replaces the stored one.
    pub fn merge_input(&mut self, input: ConversationState) {
        self.messages.extend(input.messages);
        if input.conversation_id.is_some() {
            self.conversation_id = input.conversation_id;
        }
        if input.user_id.is_some() {
            self.user_id = input.user_id;
        }
        if input.intent.is_some() {
            self.intent = input.intent;
        }
        if input.current_agent.is_some() {
            self.current_agent = input.current_agent;
        }
        self.agent_data.extend(input.agent_data);
    }

    /// Apply a node's update, returning the folded state
    pub fn apply(&self, update: &StateUpdate) -> Result<Self> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(GraphError::Validation(format!(
                    "state serialized to non-object {other}"
                )))
            }
        };

        for (channel, value) in update.iter() {
            if channel == MESSAGES {
                let current = fields
                    .entry(MESSAGES)
                    .or_insert_with(|| Value::Array(Vec::new()));
                append(current, value)?;
            } else {
                fields.insert(channel.to_string(), value.clone());
            }
        }

        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_payload(payload: Value) -> Result<Self> {
        Ok(serde_json::from_value(payload)?)
    }
}

fn append(current: &mut Value, update: &Value) -> Result<()> {
    let Value::Array(items) = current else {
        return Err(GraphError::Validation(
            "messages must be an array".to_string(),
        ));
    };
    match update {
        Value::Array(more) => items.extend(more.iter().cloned()),
        single => items.push(single.clone()),
    }
    Ok(())
}

/// Ordered field updates produced by one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    fields: Vec<(String, Value)>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a field (or append, for `messages`)
    pub fn set(mut self, channel: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.fields
            .push((channel.into(), serde_json::to_value(value)?));
        Ok(self)
    }

    pub fn push_message(mut self, message: Message) -> Result<Self> {
        self.fields
            .push((MESSAGES.to_string(), serde_json::to_value(message)?));
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_round_trips_lowercase() {
        for intent in Intent::ALL {
            let value = serde_json::to_value(intent).unwrap();
            assert_eq!(value, json!(intent.as_str()));
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
        }
        assert!("smalltalk".parse::<Intent>().is_err());
    }

    #[test]
    fn test_agent_data_is_flattened() {
        let payload = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "intent": "exercise",
            "current_agent": "tutor",
            "exercise_data": {"kind": "fill_blank"}
        });
        let state = ConversationState::from_payload(payload.clone()).unwrap();
        assert_eq!(state.intent, Some(Intent::Exercise));
        assert_eq!(state.agent_data["exercise_data"]["kind"], "fill_blank");
        assert_eq!(state.to_payload().unwrap(), payload);
    }

    #[test]
    fn test_apply_appends_messages_and_overwrites_fields() {
        let state = ConversationState::from_user("hello");
        let update = StateUpdate::new()
            .set("intent", Intent::Conversation)
            .unwrap()
            .push_message(Message::assistant("Hi there!"))
            .unwrap()
            .set("lesson", json!({"level": 2}))
            .unwrap();

        let next = state.apply(&update).unwrap();
        assert_eq!(next.messages.len(), 2);
        assert_eq!(next.messages[1], Message::assistant("Hi there!"));
        assert_eq!(next.intent, Some(Intent::Conversation));
        assert_eq!(next.agent_data["lesson"], json!({"level": 2}));
        // the input is left alone
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_merge_input_keeps_history() {
        let mut stored = ConversationState::from_user("Give me a grammar exercise")
            .with_user_id("u1");
        stored.intent = Some(Intent::Exercise);

        stored.merge_input(ConversationState::from_user("another one"));
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.user_id.as_deref(), Some("u1"));
        assert_eq!(stored.intent, Some(Intent::Exercise));
        assert_eq!(
            stored.latest_user_message().map(|m| m.content.as_str()),
            Some("another one")
        );
    }
}
