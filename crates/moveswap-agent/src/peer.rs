//! Matchmaking collaborators: lobby membership and the peer link

/// Something the peer told us during an online session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// The peer locked in and wants to exchange payloads
    SyncIntent,
    /// Payloads were exchanged in both directions
    SyncComplete,
}

/// Read-only view of the current lobby
pub trait LobbyService: Send + Sync {
    /// Our index among the lobby members
    fn self_member(&self) -> Option<usize>;

    /// Index of the first member that is not us
    fn opponent_member(&self) -> Option<usize>;

    /// Display names of the members, in lobby order
    fn members(&self) -> Vec<String>;
}

/// Events from the peer, drained by the run loop
pub trait PeerLink: Send + Sync {
    fn poll_events(&self) -> Vec<PeerEvent>;
}

/// Used when no matchmaking service is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLobby;

impl LobbyService for NoLobby {
    fn self_member(&self) -> Option<usize> {
        None
    }

    fn opponent_member(&self) -> Option<usize> {
        None
    }

    fn members(&self) -> Vec<String> {
        Vec::new()
    }
}

impl PeerLink for NoLobby {
    fn poll_events(&self) -> Vec<PeerEvent> {
        Vec::new()
    }
}
