use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Append-only while clarifying; cleared entirely on exit or reset.
/// The type itself does not force strict user/assistant alternation;
/// the dialogue controller serializes input while a request is in
/// flight, which is what keeps turns ordered in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTranscript {
    turns: Vec<Turn>,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            text: text.into(),
        });
    }

    /// The backend's follow-up questions land as one assistant turn,
    /// bullet-joined, not one turn per question.
    pub fn push_assistant_questions(&mut self, questions: &[String]) {
        let text = questions
            .iter()
            .map(|question| format!("• {}", question.trim()))
            .collect::<Vec<String>>()
            .join("\n");
        self.turns.push(Turn {
            role: Role::Assistant,
            text,
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            text: text.into(),
        });
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> &[Turn] {
        self.turns.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatTranscript, Role};

    #[test]
    fn questions_collapse_into_one_bulleted_turn() {
        let mut transcript = ChatTranscript::new();
        transcript.push_assistant_questions(&[
            "Where is the leak?".to_string(),
            "How long has it been dripping? ".to_string(),
        ]);
        assert_eq!(transcript.turns().len(), 1);
        let turn = &transcript.turns()[0];
        assert_eq!(turn.role, Role::Assistant);
        assert_eq!(
            turn.text,
            "• Where is the leak?\n• How long has it been dripping?"
        );
    }

    #[test]
    fn turns_keep_append_order() {
        let mut transcript = ChatTranscript::new();
        transcript.push_user("the tap drips");
        transcript.push_assistant_questions(&["Which tap?".to_string()]);
        transcript.push_user("kitchen");
        let roles: Vec<Role> = transcript.turns().iter().map(|turn| turn.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn clear_empties_everything() {
        let mut transcript = ChatTranscript::new();
        transcript.push_user("hello");
        transcript.clear();
        assert!(transcript.is_empty());
    }
}
