//! Per-connection resumption token tracking.

/// Latest continuity token observed on one connection.
///
/// Written only by the downstream forwarder. Nothing is kept once the
/// connection ends; the client persists the token it was sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumptionState {
    token: Option<String>,
    updates: u64,
}

impl ResumptionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a token, replacing any earlier one. Returns `false` when the
    /// token is unchanged.
    pub fn observe(&mut self, token: impl Into<String>) -> bool {
        let token = token.into();
        if self.token.as_deref() == Some(token.as_str()) {
            return false;
        }
        self.token = Some(token);
        self.updates += 1;
        true
    }

    pub fn current_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// How many distinct tokens have been observed.
    pub fn updates(&self) -> u64 {
        self.updates
    }
}
