//! `/v1/skills` — a small static registry of canned system prompts, each
//! invocable against any loaded model via the ordinary generation path.
//!
//! Out of scope for the orchestration core (§1 names "the developer CLI"
//! and request parsing as boundary collaborators only); implemented here
//! only far enough to make the HTTP surface in the external-interfaces
//! section functional end-to-end.

use lmx_types::{ChatMessage, ChatRole};

#[derive(Debug, Clone, Copy)]
pub struct Skill {
    pub name: &'static str,
    pub description: &'static str,
    system_prompt: &'static str,
}

pub const SKILLS: &[Skill] = &[
    Skill {
        name: "summarize",
        description: "Summarize the given text in a few sentences.",
        system_prompt: "You are a concise summarization assistant. Summarize the user's input in at most three sentences.",
    },
    Skill {
        name: "classify",
        description: "Classify the given text against a short label set.",
        system_prompt: "You are a text classifier. Given the user's input and the candidate labels it provides, respond with exactly one matching label and nothing else.",
    },
    Skill {
        name: "extract-entities",
        description: "Extract named entities from the given text as a JSON array.",
        system_prompt: "You extract named entities from text. Respond with a JSON array of strings and nothing else.",
    },
];

pub fn find(name: &str) -> Option<&'static Skill> {
    SKILLS.iter().find(|s| s.name == name)
}

impl Skill {
    /// Build the message list for one invocation: the skill's system
    /// prompt followed by the caller-supplied input as a single user turn.
    pub fn build_messages(&self, input: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: ChatRole::System,
                content: self.system_prompt.to_string(),
            },
            ChatMessage {
                role: ChatRole::User,
                content: input.to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_locates_a_known_skill() {
        assert!(find("summarize").is_some());
        assert!(find("does-not-exist").is_none());
    }

    #[test]
    fn build_messages_puts_system_prompt_first() {
        let skill = find("classify").unwrap();
        let messages = skill.build_messages("labels: a, b. text: hello");
        assert!(matches!(messages[0].role, ChatRole::System));
        assert!(matches!(messages[1].role, ChatRole::User));
    }
}
