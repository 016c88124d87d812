use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// A credential or manual login attempt starts.
    Begin,
    Succeeded,
    Failed,
    /// A check of a session that was believed valid.
    Revalidated { valid: bool },
}

impl AuthState {
    /// Applies `event`; events that make no sense in the current state leave it unchanged.
    pub fn apply(self, event: AuthEvent) -> AuthState {
        use AuthEvent::*;
        use AuthState::*;
        let next = match (self, event) {
            (Unauthenticated | Expired | Authenticated, Begin) => Authenticating,
            (Authenticating, Succeeded) => Authenticated,
            (Authenticating, Failed) => Unauthenticated,
            (Authenticated, Revalidated { valid: false }) => Expired,
            (Unauthenticated | Expired | Authenticated, Revalidated { valid: true }) => Authenticated,
            (state, _) => state,
        };
        if next == self {
            tracing::trace!(state = ?self, event = ?event, "auth state unchanged");
        } else {
            tracing::debug!(from = ?self, to = ?next, "auth state transition");
        }
        next
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }
}
