use crate::state::room::PlayerId;

/// Facts about the caller supplied by the session layer. Trusted as given.
pub trait Identity: Send + Sync {
    /// Stable player identifier, when known.
    fn current_player_id(&self) -> Option<PlayerId>;
    /// Name to show to the other players.
    fn current_display_name(&self) -> String;
    /// Whether the session layer considers the caller signed in.
    fn is_signed_in(&self) -> bool;
}

/// Identity fixed at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity {
    player_id: Option<PlayerId>,
    display_name: String,
}

impl StaticIdentity {
    /// A signed-in player.
    pub fn signed_in(player_id: PlayerId, display_name: impl Into<String>) -> Self {
        Self {
            player_id: Some(player_id),
            display_name: display_name.into(),
        }
    }

    /// A caller without a session; every intent is refused.
    pub fn anonymous() -> Self {
        Self {
            player_id: None,
            display_name: String::new(),
        }
    }
}

impl Identity for StaticIdentity {
    fn current_player_id(&self) -> Option<PlayerId> {
        self.player_id.clone()
    }

    fn current_display_name(&self) -> String {
        self.display_name.clone()
    }

    fn is_signed_in(&self) -> bool {
        self.player_id.is_some()
    }
}
