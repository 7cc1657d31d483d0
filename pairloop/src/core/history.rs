//! Append-only conversation log owned by a generator.

use crate::core::types::ConversationTurn;

/// Ordered, append-only sequence of turns.
///
/// The first entry is always the system prompt set at construction. Turns
/// are never pruned or rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::System {
                content: system_prompt.into(),
                source: "system".to_string(),
            }],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>, source: impl Into<String>) {
        self.turns.push(ConversationTurn::User {
            content: content.into(),
            source: source.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, source: impl Into<String>) {
        self.turns.push(ConversationTurn::Assistant {
            content: content.into(),
            source: source.into(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn system_prompt(&self) -> &str {
        self.turns[0].content()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always false: the system prompt is present from construction.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_system_prompt() {
        let history = ConversationHistory::new("be terse");
        assert_eq!(history.len(), 1);
        assert_eq!(history.system_prompt(), "be terse");
        assert!(matches!(history.turns()[0], ConversationTurn::System { .. }));
    }

    #[test]
    fn appends_in_order() {
        let mut history = ConversationHistory::new("sys");
        history.push_user("task", "user");
        history.push_assistant("```r\n1\n```", "generator");
        history.push_user("Success:\n[1] 1\n", "executor");

        let sources: Vec<&str> = history.turns().iter().map(ConversationTurn::source).collect();
        assert_eq!(sources, vec!["system", "user", "generator", "executor"]);
        assert_eq!(history.last().map(ConversationTurn::content), Some("Success:\n[1] 1\n"));
        assert_eq!(history.system_prompt(), "sys");
    }
}
