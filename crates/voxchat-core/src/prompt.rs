//! Flattens a conversation into a single completion prompt.

use crate::types::{Role, Turn};

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

/// Build the text-engine prompt for the current turn.
///
/// The system prompt comes first, then each history turn on its own
/// `Role: content` line, then the new user message and an open
/// `Assistant:` line for the engine to complete. Empty history turns are
/// skipped.
pub fn build_prompt(system: &str, history: &[Turn], message: &str) -> String {
    let mut prompt = String::new();

    let system = system.trim();
    if !system.is_empty() {
        prompt.push_str(system);
        prompt.push_str("\n\n");
    }

    for turn in history {
        let content = turn.content.trim();
        if content.is_empty() {
            continue;
        }
        prompt.push_str(label(turn.role));
        prompt.push_str(": ");
        prompt.push_str(content);
        prompt.push('\n');
    }

    prompt.push_str("User: ");
    prompt.push_str(message.trim());
    prompt.push_str("\nAssistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_history() {
        let p = build_prompt("Be brief.", &[], "What is 2 plus 2?");
        assert_eq!(p, "Be brief.\n\nUser: What is 2 plus 2?\nAssistant:");
    }

    #[test]
    fn history_in_order() {
        let history = vec![
            Turn::user("Hello! What's your name?"),
            Turn::assistant("Call me Assistant."),
        ];
        let p = build_prompt("", &history, "Tell me a fact.");
        assert_eq!(
            p,
            "User: Hello! What's your name?\nAssistant: Call me Assistant.\nUser: Tell me a fact.\nAssistant:"
        );
    }

    #[test]
    fn skips_blank_turns_and_trims() {
        let history = vec![Turn::user("   "), Turn::assistant("  ok  ")];
        let p = build_prompt("  sys  ", &history, "  hi ");
        assert_eq!(p, "sys\n\nAssistant: ok\nUser: hi\nAssistant:");
    }
}
