//! Intent routing
//!
//! The router is the workflow's entry node. It classifies the most recent
//! user message with an [`IntentClassifier`] and writes `intent` plus
//! `current_agent`. Earlier messages are never read; the only other input is
//! the intent already stored on the thread, which the default
//! [`KeywordClassifier`] reuses when the message is a bare follow-up such as
//! "another one".
//!
//! The router has no side effects and does not persist on its own: its two
//! fields ride along as pending writes on the handler's checkpoint.

use crate::error::{GraphError, Result};
use crate::node::Node;
use crate::state::{ConversationState, Intent, StateUpdate};
use regex::Regex;
use std::sync::Arc;

pub const ROUTER_NODE: &str = "router";

/// Maps one user message to an intent.
///
/// `previous` is the intent of the last turn on this thread, so follow-ups
/// such as "another one" can stay on topic.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, message: &str, previous: Option<Intent>) -> Intent;
}

/// A case-insensitive pattern that selects an intent
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub intent: Intent,
    pattern: Regex,
}

impl KeywordRule {
    pub fn new(intent: Intent, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
            GraphError::Validation(format!("invalid pattern for {intent}: {e}"))
        })?;
        Ok(Self { intent, pattern })
    }

    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }
}

/// First-match keyword classifier.
///
/// Rules are checked in order, so "grammar exercise" lands on
/// [`Intent::Exercise`] because the exercise rule comes first.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
    follow_up: Regex,
}

impl KeywordClassifier {
    pub fn new() -> Result<Self> {
        let rules = vec![
            KeywordRule::new(Intent::Exercise, r"\b(exercises?|quiz|practi[cs]e|drill|test me)\b")?,
            KeywordRule::new(Intent::Translation, r"\b(translat\w*|how do (you|i) say)\b")?,
            KeywordRule::new(Intent::Grammar, r"\b(grammar|tenses?|conjugat\w*|is (this|it) correct)\b")?,
            KeywordRule::new(Intent::Pronunciation, r"\b(pronounc\w*|accent|sounds?)\b")?,
            KeywordRule::new(Intent::Vocabulary, r"\b(vocabulary|words?|meaning|synonyms?|define)\b")?,
            KeywordRule::new(Intent::Conversation, r"\b(hello|hi|hey|chat|talk|how are you)\b")?,
        ];
        Self::with_rules(rules)
    }

    pub fn with_rules(rules: Vec<KeywordRule>) -> Result<Self> {
        let follow_up = Regex::new(r"(?i)^\s*(another( one)?|one more|more|again|next)\b")
            .map_err(|e| GraphError::Validation(e.to_string()))?;
        Ok(Self { rules, follow_up })
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, message: &str, previous: Option<Intent>) -> Intent {
        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(message)) {
            return rule.intent;
        }
        match previous {
            Some(intent) if self.follow_up.is_match(message) => intent,
            _ => Intent::Unknown,
        }
    }
}

/// Entry node writing `intent` and `current_agent`
pub struct RouterNode {
    classifier: Arc<dyn IntentClassifier>,
    handler: String,
}

impl RouterNode {
    /// Route every intent to `handler`
    pub fn new(classifier: Arc<dyn IntentClassifier>, handler: impl Into<String>) -> Self {
        Self {
            classifier,
            handler: handler.into(),
        }
    }
}

impl Node for RouterNode {
    fn name(&self) -> &str {
        ROUTER_NODE
    }

    fn persists(&self) -> bool {
        false
    }

    fn run(&self, state: &ConversationState) -> Result<StateUpdate> {
        let message = state
            .latest_user_message()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let intent = self.classifier.classify(message, state.intent);
        tracing::debug!(%intent, handler = %self.handler, "routed message");

        StateUpdate::new()
            .set("intent", intent)?
            .set("current_agent", &self.handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str) -> Intent {
        KeywordClassifier::new().unwrap().classify(message, None)
    }

    #[test]
    fn test_keyword_intents() {
        assert_eq!(classify("Give me a grammar exercise"), Intent::Exercise);
        assert_eq!(classify("Is this correct: I goed home"), Intent::Grammar);
        assert_eq!(classify("How do you say 'cat' in French?"), Intent::Translation);
        assert_eq!(classify("How do I pronounce 'thought'?"), Intent::Pronunciation);
        assert_eq!(classify("What does the word 'serendipity' mean?"), Intent::Vocabulary);
        assert_eq!(classify("Hello!"), Intent::Conversation);
        assert_eq!(classify("qwerty"), Intent::Unknown);
    }

    #[test]
    fn test_follow_up_keeps_previous_intent() {
        let classifier = KeywordClassifier::new().unwrap();
        assert_eq!(
            classifier.classify("another one", Some(Intent::Exercise)),
            Intent::Exercise
        );
        assert_eq!(classifier.classify("another one", None), Intent::Unknown);
        // an explicit keyword wins over the follow-up
        assert_eq!(
            classifier.classify("another word please", Some(Intent::Exercise)),
            Intent::Vocabulary
        );
    }

    #[test]
    fn test_router_update() {
        let router = RouterNode::new(Arc::new(KeywordClassifier::new().unwrap()), "tutor");
        assert!(!router.persists());

        let state = ConversationState::from_user("Give me a grammar exercise");
        let next = state.apply(&router.run(&state).unwrap()).unwrap();
        assert_eq!(next.intent, Some(Intent::Exercise));
        assert_eq!(next.current_agent.as_deref(), Some("tutor"));
        assert_eq!(next.messages, state.messages);
    }

    #[test]
    fn test_custom_rules() {
        let classifier = KeywordClassifier::with_rules(vec![
            KeywordRule::new(Intent::Grammar, "subjunctive").unwrap(),
        ])
        .unwrap();
        assert_eq!(classifier.classify("The SUBJUNCTIVE mood", None), Intent::Grammar);
        assert!(KeywordRule::new(Intent::Grammar, "(").is_err());
    }
}
