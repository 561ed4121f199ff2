//! Augmented prompt assembly.

use super::history::Entry;

/// Builds the prompt sent to the model.
///
/// ```text
/// <preamble>
///
/// Conversation so far:
/// User: ...
/// Assistant: ...
///
/// Knowledge Base Context:
/// <chunk>
///
/// <chunk>
///
/// User: <question>
/// Assistant:
/// ```
pub fn build_prompt(preamble: &str, history: &[Entry], context: &[String], question: &str) -> String {
    let history_block = history
        .iter()
        .map(Entry::to_string)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\nConversation so far:\n{history_block}\n\nKnowledge Base Context:\n{}\n\nUser: {question}\nAssistant:",
        preamble.trim_end(),
        context.join("\n\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::history::Role;

    #[test]
    fn test_prompt_layout() {
        let history = vec![
            Entry::new(Role::User, "Who wrote it?"),
            Entry::new(Role::Assistant, "Ada."),
        ];
        let context = vec!["first chunk".to_string(), "second chunk".to_string()];

        let prompt = build_prompt("You are a helpful assistant.", &history, &context, "When?");

        assert_eq!(
            prompt,
            "You are a helpful assistant.\n\n\
             Conversation so far:\nUser: Who wrote it?\nAssistant: Ada.\n\n\
             Knowledge Base Context:\nfirst chunk\n\nsecond chunk\n\n\
             User: When?\nAssistant:"
        );
    }

    #[test]
    fn test_prompt_without_history_or_context() {
        let prompt = build_prompt("Preamble", &[], &[], "Hi");
        assert!(prompt.contains("Conversation so far:\n\n"));
        assert!(prompt.ends_with("Knowledge Base Context:\n\n\nUser: Hi\nAssistant:"));
    }
}
