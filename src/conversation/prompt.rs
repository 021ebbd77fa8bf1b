//! Prompt assembly for a conversation turn and for the affect-explanation
//! side-completion.

use crate::llm::ChatMessage;
use crate::store::types::{Agent, StoredMessage};

const EXPLAIN_QUESTION: &str = "What do you understand from these about the emotions expressed \
     by the user? What behavioral qualities should be displayed while responding to this user \
     to improve their mental state?";

/// User content rewritten to carry the averaged affect state into the model.
pub fn affect_rewrite(valence: f64, arousal: f64, content: &str) -> String {
    format!(
        "The valence of the user is {valence} and the arousal is {arousal} \
         while user replies to you {content}"
    )
}

/// The question posed to the model when logging why an affect-aware reply
/// looked the way it did.
pub fn explain_question(valence: f64, arousal: f64) -> String {
    format!("The valence of the user is {valence} and the arousal is {arousal}. {EXPLAIN_QUESTION}")
}

/// system starter, full history, before-user wrapper, user message,
/// after-user wrapper, empty assistant slot for the model to fill.
pub fn turn_prompt(agent: &Agent, history: &[StoredMessage], user_content: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 5);
    messages.push(ChatMessage::new("system", &agent.system_starter_prompt));
    messages.extend(
        history
            .iter()
            .map(|m| ChatMessage::new(m.role.as_str(), &m.content)),
    );
    messages.push(ChatMessage::new(
        "system",
        &agent.before_user_sentence_prompt,
    ));
    messages.push(ChatMessage::new("user", user_content));
    messages.push(ChatMessage::new("system", &agent.after_user_sentence_prompt));
    messages.push(ChatMessage::new("assistant", ""));
    messages
}

/// Same shape as `turn_prompt` but with blank system wrappers; the condition
/// prompts must not color the explanation.
pub fn explain_prompt(history: &[StoredMessage], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 5);
    messages.push(ChatMessage::new("system", ""));
    messages.extend(
        history
            .iter()
            .map(|m| ChatMessage::new(m.role.as_str(), &m.content)),
    );
    messages.push(ChatMessage::new("system", ""));
    messages.push(ChatMessage::new("user", question));
    messages.push(ChatMessage::new("system", ""));
    messages.push(ChatMessage::new("assistant", ""));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::agent;
    use crate::store::types::Role;

    fn history_message(role: Role, content: &str, number: u32) -> StoredMessage {
        StoredMessage {
            id: format!("m{number}"),
            conversation_id: "c1".to_string(),
            role,
            content: content.to_string(),
            message_number: number,
            valence: 0.0,
            arousal: 0.0,
            pitch: 0.0,
            loudness: 0.0,
            snr: 0.0,
            time_delay: None,
            user_annotation: 0,
            created_at: String::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn turn_prompt_brackets_history_with_condition_prompts() {
        let agent = agent("cond");
        let history = vec![
            history_message(Role::Assistant, "Hi there", 1),
            history_message(Role::User, "Hello", 2),
        ];
        let prompt = turn_prompt(&agent, &history, "I feel fine");

        assert_eq!(prompt.len(), 7);
        assert_eq!(prompt[0].role, "system");
        assert_eq!(prompt[0].content, agent.system_starter_prompt);
        assert_eq!(prompt[1].content, "Hi there");
        assert_eq!(prompt[2].content, "Hello");
        assert_eq!(prompt[3].content, agent.before_user_sentence_prompt);
        assert_eq!(prompt[4].role, "user");
        assert_eq!(prompt[4].content, "I feel fine");
        assert_eq!(prompt[5].content, agent.after_user_sentence_prompt);
        assert_eq!(prompt[6].role, "assistant");
        assert!(prompt[6].content.is_empty());
    }

    #[test]
    fn affect_rewrite_embeds_both_values() {
        let rewritten = affect_rewrite(0.5, -0.25, "hello");
        assert!(rewritten.contains("valence of the user is 0.5"));
        assert!(rewritten.contains("arousal is -0.25"));
        assert!(rewritten.ends_with("hello"));
    }

    #[test]
    fn explain_prompt_uses_blank_system_slots() {
        let question = explain_question(0.1, 0.2);
        let prompt = explain_prompt(&[], &question);
        assert_eq!(prompt.len(), 5);
        assert!(prompt[0].content.is_empty());
        assert_eq!(prompt[2].content, question);
        assert!(question.contains("behavioral qualities"));
    }
}
