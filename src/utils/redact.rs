//! Secret masking for console output, display strings and error messages.

/// Fixed mask substituted for every secret value.
pub const MASK: &str = "******";

/// Carries every secret value in scope for one command execution.
///
/// Redaction happens at each external sink (console line, display string,
/// error message) through [`Redactor::apply`]; already-built values are
/// never mutated after the fact.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret value. Empty values are ignored — masking them
    /// would corrupt every rendered string.
    pub fn register(&mut self, secret: impl Into<String>) {
        let secret = secret.into();
        if !secret.is_empty() && !self.secrets.contains(&secret) {
            self.secrets.push(secret);
        }
    }

    /// A copy of this redactor with additional secrets registered.
    pub fn extended(&self, extra: &[String]) -> Self {
        let mut out = self.clone();
        for secret in extra {
            out.register(secret.clone());
        }
        out
    }

    /// Replace every registered secret with the fixed mask.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            out = out.replace(secret.as_str(), MASK);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
