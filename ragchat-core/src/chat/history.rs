use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("User"),
            Role::Assistant => f.write_str("Assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub role: Role,
    pub text: String,
}

impl Entry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into() }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.text)
    }
}

/// Ordered conversation log.
///
/// Unbounded unless a cap is given, in which case the oldest entries are
/// dropped first.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<Entry>,
    max_entries: Option<usize>,
}

impl History {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
        }
    }

    /// Records one question and its answer together.
    pub fn push_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.entries.push(Entry::new(Role::User, question));
        self.entries.push(Entry::new(Role::Assistant, answer));

        if let Some(max) = self.max_entries {
            let excess = self.entries.len().saturating_sub(max);
            self.entries.drain(..excess);
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[Entry] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
