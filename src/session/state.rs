//! Session lifecycle state.

use crate::transport::LinkState;

/// Observable state of a [`Session`](super::Session).
///
/// ```text
/// Idle → AwaitingOpen → Ready → Discovering → Connecting → Connected
///                                    ▲             │
///                                    └─ rejected ──┘
/// any state ── transport failure or disconnect ──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed; transport not opened yet.
    Idle,
    /// Handshake with the gateway in flight.
    AwaitingOpen,
    /// Transport open, nothing requested yet.
    Ready,
    /// A discover call has been issued.
    Discovering,
    /// A connect call is outstanding.
    Connecting,
    /// Connect succeeded.
    Connected,
    /// Terminal. A new session is required to retry.
    Closed,
}

impl SessionState {
    /// Returns `true` for [`SessionState::Closed`].
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Protocol progress, tracked independently of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Ready,
    Discovering,
    Connecting,
    Connected,
}

impl SessionState {
    /// Combines link state and protocol phase.
    ///
    /// The phase only shows once the link is open; calls issued earlier
    /// are still held by the connection.
    pub(crate) const fn derive(link: LinkState, phase: Phase) -> Self {
        match link {
            LinkState::Idle => Self::Idle,
            LinkState::Opening => Self::AwaitingOpen,
            LinkState::Closed(_) => Self::Closed,
            LinkState::Open => match phase {
                Phase::Ready => Self::Ready,
                Phase::Discovering => Self::Discovering,
                Phase::Connecting => Self::Connecting,
                Phase::Connected => Self::Connected,
            },
        }
    }
}
