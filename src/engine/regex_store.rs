use regex::Regex;

use super::error::CompileError;

/// Interns regex patterns compiled out of a guideline document so that two
/// `LIKE`/`REGEXP_LIKE` expressions sharing a pattern share one compiled
/// `Regex` (§4.A: "Regex patterns shared across the document are interned
/// in a global regex store"). Scoped to one document rather than a
/// process-wide singleton: a guideline reload builds a fresh store and
/// atomically swaps it in with the rest of the compiled document.
#[derive(Debug, Default)]
pub struct RegexStore {
    patterns: Vec<Regex>,
}

impl RegexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `pattern` (always compiled case-insensitive, per §4.A's
    /// "ECMAScript regex" `LIKE` lowering) and returns its index, reusing
    /// an existing entry when the literal pattern text already exists.
    pub fn intern(&mut self, pattern: &str) -> Result<usize, CompileError> {
        if let Some(idx) = self.patterns.iter().position(|r| r.as_str() == pattern) {
            return Ok(idx);
        }
        let regex = Regex::new(&format!("(?i){pattern}"))
            .map_err(|e| CompileError::InvalidRegex(e.to_string()))?;
        self.patterns.push(regex);
        Ok(self.patterns.len() - 1)
    }

    pub fn get(&self, idx: usize) -> &Regex {
        &self.patterns[idx]
    }
}
