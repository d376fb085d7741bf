//! Forwarding of chat text between paired sessions.

use crate::{message::ServerFrame, registry::Registry, session::SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// `frame` should be queued for `to`.
    Deliver { to: SessionId, frame: ServerFrame },
    /// Sender has no peer; the text goes nowhere.
    NotPaired,
    /// Peer vanished between pairing and this message; the text is dropped.
    PeerGone,
}

/// Works out where `text` from `sender` goes, tagged as `<sender>:<text>`.
///
/// Nothing is queued or retried here: if the peer is gone the message is lost.
pub fn relay_chat(registry: &Registry, sender: SessionId, text: &str) -> RelayOutcome {
    let Some(session) = registry.get(sender) else {
        return RelayOutcome::NotPaired;
    };
    let Some(peer_id) = session.peer() else {
        return RelayOutcome::NotPaired;
    };
    if registry.get(peer_id).is_none() {
        return RelayOutcome::PeerGone;
    }

    RelayOutcome::Deliver {
        to: peer_id,
        frame: ServerFrame::Chat {
            from: session.display_name().to_string(),
            text: text.to_string(),
        },
    }
}
