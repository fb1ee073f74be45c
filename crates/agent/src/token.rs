//! Token estimation utilities.
//!
//! A character-class heuristic, tuned for mixed Chinese/English dialogue:
//! wide (non-ASCII) characters cost one token per 1.5 characters, Latin
//! letters and whitespace one token per 4. Digits and punctuation are not
//! counted.

use agentrelay_core::message::{Message, Role};

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    let mut wide = 0usize;
    let mut latin = 0usize;
    for c in text.chars() {
        if !c.is_ascii() {
            wide += 1;
        } else if c.is_ascii_alphabetic() || c.is_ascii_whitespace() {
            latin += 1;
        }
    }
    // ceil(wide / 1.5) == ceil(2 * wide / 3)
    (wide * 2).div_ceil(3) + latin.div_ceil(4)
}

/// Estimate tokens for a single message, tool-call payloads included.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|tc| estimate_tokens(&tc.name) + estimate_tokens(&tc.arguments))
        .sum();
    estimate_tokens(&message.content) + calls
}

/// Estimate tokens for the non-system part of a message list.
pub fn estimate_dialogue_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(estimate_message_tokens)
        .sum()
}
