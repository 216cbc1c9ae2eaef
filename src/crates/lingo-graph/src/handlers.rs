//! The tutor handler and its skills
//!
//! Every intent routes to one [`TutorNode`]. The node picks the first
//! [`Skill`] that handles the routed intent and returns that skill's update,
//! which always includes one assistant message.

use crate::error::{GraphError, Result};
use crate::node::Node;
use crate::state::{ConversationState, Intent, Message, StateUpdate};
use serde::{Deserialize, Serialize};

pub const TUTOR_NODE: &str = "tutor";

/// Field holding the most recent generated exercise
pub const EXERCISE_DATA: &str = "exercise_data";

pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, intent: Intent) -> bool;

    fn respond(&self, state: &ConversationState, message: &str) -> Result<StateUpdate>;
}

/// Fixed reply for one intent
#[derive(Debug, Clone)]
pub struct TemplateSkill {
    name: &'static str,
    intent: Intent,
    template: &'static str,
}

impl TemplateSkill {
    /// `template` may contain `{message}`, replaced with the user's text
    pub const fn new(name: &'static str, intent: Intent, template: &'static str) -> Self {
        Self {
            name,
            intent,
            template,
        }
    }
}

impl Skill for TemplateSkill {
    fn name(&self) -> &'static str {
        self.name
    }

    fn handles(&self, intent: Intent) -> bool {
        intent == self.intent
    }

    fn respond(&self, _state: &ConversationState, message: &str) -> Result<StateUpdate> {
        let reply = self.template.replace("{message}", message);
        StateUpdate::new().push_message(Message::assistant(reply))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub number: u32,
    pub kind: String,
    pub prompt: String,
    pub answer: String,
}

const EXERCISE_BANK: &[(&str, &str)] = &[
    ("She ___ (go) to school every day.", "goes"),
    ("They ___ (be) at home yesterday.", "were"),
    ("I have ___ (eat) breakfast already.", "eaten"),
    ("If it ___ (rain), we will stay inside.", "rains"),
    ("He ___ (not / like) coffee.", "doesn't like"),
];

/// Hands out fill-in-the-blank exercises, continuing the numbering stored in
/// `exercise_data` so a resumed thread gets the next one.
#[derive(Debug, Clone, Default)]
pub struct ExerciseSkill;

impl ExerciseSkill {
    fn previous(state: &ConversationState) -> Result<Option<Exercise>> {
        state
            .agent_data
            .get(EXERCISE_DATA)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(GraphError::from)
    }
}

impl Skill for ExerciseSkill {
    fn name(&self) -> &'static str {
        "exercise-generation"
    }

    fn handles(&self, intent: Intent) -> bool {
        intent == Intent::Exercise
    }

    fn respond(&self, state: &ConversationState, _message: &str) -> Result<StateUpdate> {
        let number = match Self::previous(state)? {
            Some(e) => e.number.checked_add(1).ok_or_else(|| {
                GraphError::node(
                    TUTOR_NODE,
                    format!("exercise number {} cannot advance", e.number),
                )
            })?,
            None => 1,
        };
        let slot = (number as usize).saturating_sub(1) % EXERCISE_BANK.len();
        let (prompt, answer) = EXERCISE_BANK[slot];
        let exercise = Exercise {
            number,
            kind: "fill_in_the_blank".to_string(),
            prompt: prompt.to_string(),
            answer: answer.to_string(),
        };

        StateUpdate::new()
            .push_message(Message::assistant(format!(
                "Exercise {number}: fill in the blank. {prompt}"
            )))?
            .set(EXERCISE_DATA, exercise)
    }
}

fn default_skills() -> Vec<Box<dyn Skill>> {
    vec![
        Box::new(ExerciseSkill),
        Box::new(TemplateSkill::new(
            "grammar-check",
            Intent::Grammar,
            "Let's look at the grammar of \"{message}\" together.",
        )),
        Box::new(TemplateSkill::new(
            "pronunciation-coach",
            Intent::Pronunciation,
            "Say it slowly and stress each syllable: \"{message}\".",
        )),
        Box::new(TemplateSkill::new(
            "vocabulary-builder",
            Intent::Vocabulary,
            "Here is a new word to go with \"{message}\".",
        )),
        Box::new(TemplateSkill::new(
            "translator",
            Intent::Translation,
            "Let's translate \"{message}\" step by step.",
        )),
        Box::new(TemplateSkill::new(
            "conversation-partner",
            Intent::Conversation,
            "Happy to chat! You said: \"{message}\".",
        )),
    ]
}

const FALLBACK_REPLY: &str =
    "I can help with grammar, pronunciation, vocabulary, translation or exercises. What would you like?";

/// Single handler node dispatching on `intent`
pub struct TutorNode {
    skills: Vec<Box<dyn Skill>>,
}

impl TutorNode {
    pub fn new() -> Self {
        Self {
            skills: default_skills(),
        }
    }

    pub fn with_skills(skills: Vec<Box<dyn Skill>>) -> Self {
        Self { skills }
    }

    pub fn skill_for(&self, intent: Intent) -> Option<&dyn Skill> {
        self.skills
            .iter()
            .find(|skill| skill.handles(intent))
            .map(|skill| skill.as_ref())
    }
}

impl Default for TutorNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for TutorNode {
    fn name(&self) -> &str {
        TUTOR_NODE
    }

    fn run(&self, state: &ConversationState) -> Result<StateUpdate> {
        let message = state
            .latest_user_message()
            .map(|m| m.content.as_str())
            .ok_or_else(|| GraphError::node(TUTOR_NODE, "no user message to answer"))?;
        let intent = state.intent.unwrap_or(Intent::Unknown);

        match self.skill_for(intent) {
            Some(skill) => {
                tracing::debug!(skill = skill.name(), %intent, "tutor skill selected");
                skill.respond(state, message)
            }
            None => StateUpdate::new().push_message(Message::assistant(FALLBACK_REPLY)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;

    fn routed(message: &str, intent: Intent) -> ConversationState {
        let mut state = ConversationState::from_user(message);
        state.intent = Some(intent);
        state
    }

    #[test]
    fn test_every_intent_gets_a_reply() {
        let tutor = TutorNode::new();
        for intent in Intent::ALL {
            let state = routed("hello", intent);
            let next = state.apply(&tutor.run(&state).unwrap()).unwrap();
            assert_eq!(next.messages.len(), 2, "{intent}");
            assert_eq!(next.messages[1].role, Role::Assistant);
        }
        assert!(tutor.skill_for(Intent::Unknown).is_none());
    }

    #[test]
    fn test_exercise_numbering_continues() {
        let tutor = TutorNode::new();
        let state = routed("Give me a grammar exercise", Intent::Exercise);
        let first = state.apply(&tutor.run(&state).unwrap()).unwrap();
        let exercise: Exercise =
            serde_json::from_value(first.agent_data[EXERCISE_DATA].clone()).unwrap();
        assert_eq!(exercise.number, 1);
        assert_eq!(exercise.answer, "goes");

        let mut again = first.clone();
        again.merge_input(ConversationState::from_user("another one"));
        let second = again.apply(&tutor.run(&again).unwrap()).unwrap();
        assert_eq!(second.agent_data[EXERCISE_DATA]["number"], 2);
        assert!(second.messages.last().unwrap().content.starts_with("Exercise 2"));
    }

    #[test]
    fn test_exercise_number_overflow_is_node_error() {
        let tutor = TutorNode::new();
        let mut state = routed("another one", Intent::Exercise);
        state.agent_data.insert(
            EXERCISE_DATA.to_string(),
            serde_json::json!({
                "number": u32::MAX,
                "kind": "fill_in_the_blank",
                "prompt": "",
                "answer": "",
            }),
        );
        match tutor.run(&state) {
            Err(GraphError::NodeExecution { node, reason }) => {
                assert_eq!(node, TUTOR_NODE);
                assert!(reason.contains("cannot advance"), "{reason}");
            }
            other => panic!("expected node error, got {other:?}"),
        }

        // a stored zero still maps onto the bank
        state.agent_data.insert(
            EXERCISE_DATA.to_string(),
            serde_json::json!({
                "number": 0,
                "kind": "fill_in_the_blank",
                "prompt": "",
                "answer": "",
            }),
        );
        let next = state.apply(&tutor.run(&state).unwrap()).unwrap();
        assert_eq!(next.agent_data[EXERCISE_DATA]["number"], 1);
    }

    #[test]
    fn test_missing_user_message_fails() {
        let tutor = TutorNode::new();
        let err = tutor.run(&ConversationState::default()).unwrap_err();
        assert!(matches!(err, GraphError::NodeExecution { .. }));
    }

    #[test]
    fn test_custom_skill_set() {
        let tutor = TutorNode::with_skills(vec![Box::new(TemplateSkill::new(
            "echo",
            Intent::Unknown,
            "echo: {message}",
        ))]);
        let state = routed("qwerty", Intent::Unknown);
        let next = state.apply(&tutor.run(&state).unwrap()).unwrap();
        assert_eq!(next.messages[1].content, "echo: qwerty");
    }
}
