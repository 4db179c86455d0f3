//! Conversation history of one session.

use std::fmt;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an assistant turn ended early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interruption {
    /// The user cancelled the generation.
    Cancelled,
    /// The generation failed; holds the user-facing error text.
    Failed(String),
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interruption::Cancelled => f.write_str("[cancelled]"),
            Interruption::Failed(message) => write!(f, "[error: {}]", message),
        }
    }
}

/// One message of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Position in the transcript, increasing from 0.
    pub ordinal: u64,
    /// Set when the turn was cut short; `content` holds what was received.
    pub interruption: Option<Interruption>,
}

impl Turn {
    pub fn is_interrupted(&self) -> bool {
        self.interruption.is_some()
    }
}

/// Ordered, append-only list of sealed turns plus at most one assistant
/// turn still being generated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
    provisional: Option<Turn>,
    next_ordinal: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sealed turns in order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The assistant turn currently being streamed, if any.
    pub fn provisional(&self) -> Option<&Turn> {
        self.provisional.as_ref()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.provisional.is_none()
    }

    /// Append a sealed turn.
    pub fn push(&mut self, role: Role, content: impl Into<String>) -> &Turn {
        debug_assert!(
            self.provisional.is_none(),
            "turn appended while a response is in flight"
        );
        let turn = Turn {
            role,
            content: content.into(),
            ordinal: self.take_ordinal(),
            interruption: None,
        };
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    /// Extend the provisional assistant turn, opening it if needed.
    pub(crate) fn extend_provisional(&mut self, delta: &str) {
        if self.provisional.is_none() {
            let ordinal = self.take_ordinal();
            self.provisional = Some(Turn {
                role: Role::Assistant,
                content: String::new(),
                ordinal,
                interruption: None,
            });
        }
        if let Some(turn) = self.provisional.as_mut() {
            turn.content.push_str(delta);
        }
    }

    /// Seal the provisional turn as a finished answer. An answer with no
    /// text still produces an (empty) assistant turn.
    pub(crate) fn complete(&mut self) -> Turn {
        let turn = match self.provisional.take() {
            Some(turn) => turn,
            None => Turn {
                role: Role::Assistant,
                content: String::new(),
                ordinal: self.take_ordinal(),
                interruption: None,
            },
        };
        self.turns.push(turn.clone());
        turn
    }

    /// Seal the provisional turn with an interruption marker. Returns `None`
    /// (and appends nothing) when no text had arrived.
    pub(crate) fn interrupt(&mut self, interruption: Interruption) -> Option<Turn> {
        let mut turn = self.provisional.take()?;
        if turn.content.is_empty() {
            return None;
        }
        turn.interruption = Some(interruption);
        self.turns.push(turn.clone());
        Some(turn)
    }

    /// Drop every turn.
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    fn take_ordinal(&mut self) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }
}
