//! Resolves `CONNECT:<name>` requests into peer links.

use std::fmt;

use crate::{registry::Registry, session::SessionId};

/// Why a pairing request was turned down. `Display` is the text sent back to
/// the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingError {
    InvalidUser,
    InvalidOperation,
    UserBusy,
}

impl fmt::Display for PairingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PairingError::InvalidUser => "Invalid User.",
            PairingError::InvalidOperation => "Invalid Operation.",
            PairingError::UserBusy => "User is busy.",
        };
        f.write_str(text)
    }
}

impl std::error::Error for PairingError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcome {
    Established { peer: SessionId },
    Rejected(PairingError),
    /// The requester is already paired; nothing is sent back.
    Ignored,
}

/// Tries to pair `requester` with the first registered session named `target`.
///
/// Checks run in a fixed order: unknown target, self-target, busy target, busy
/// requester. On success both sessions are linked in one step. Telling either
/// side about the result is left to the caller.
pub fn request_pairing(
    registry: &mut Registry,
    requester: SessionId,
    target: &str,
) -> PairingOutcome {
    let outcome = evaluate(registry, requester, target);

    if let PairingOutcome::Established { peer } = outcome {
        if registry.link(requester, peer).is_err() {
            // evaluate() only returns Established for two idle sessions
            return PairingOutcome::Rejected(PairingError::UserBusy);
        }
    }

    outcome
}

fn evaluate(registry: &Registry, requester: SessionId, target: &str) -> PairingOutcome {
    let Some(peer) = registry.lookup_by_name(target) else {
        return PairingOutcome::Rejected(PairingError::InvalidUser);
    };
    if peer == requester {
        return PairingOutcome::Rejected(PairingError::InvalidOperation);
    }
    if registry.get(peer).is_some_and(|session| session.peer().is_some()) {
        return PairingOutcome::Rejected(PairingError::UserBusy);
    }
    match registry.get(requester) {
        Some(session) if session.is_idle() => PairingOutcome::Established { peer },
        _ => PairingOutcome::Ignored,
    }
}
