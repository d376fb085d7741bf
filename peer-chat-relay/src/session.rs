//! Per-connection session record and its lifecycle.
//!
//! A session starts `Unregistered` when the connection is accepted, becomes
//! `Idle` once a username is accepted, moves to `Paired` while linked to a
//! peer, and ends in `Closing`. The peer handle lives inside the `Paired`
//! variant, so a session can never claim a peer without being paired.

use std::{fmt, net::SocketAddr};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::message::ServerFrame;

/// Generation-checked handle into the session arena.
///
/// The index names a slot; the generation changes every time the slot is
/// reclaimed, so a handle held past its session's lifetime never resolves to
/// whoever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Idle,
    Paired(SessionId),
    Closing,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Unregistered => "unregistered",
            SessionState::Idle => "idle",
            SessionState::Paired(_) => "paired",
            SessionState::Closing => "closing",
        }
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SessionState,
    pub action: &'static str,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} a session that is {}", self.action, self.from.name())
    }
}

impl std::error::Error for TransitionError {}

/// Frames a connection may have queued before it counts as stalled.
pub const OUTBOUND_CAPACITY: usize = 128;

/// Outbound half of a connection: frames pushed here are written to the socket
/// by the connection task, in order.
pub type Outbound = mpsc::Sender<ServerFrame>;

pub fn outbound_channel() -> (Outbound, mpsc::Receiver<ServerFrame>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The client has stopped draining its queue.
    Backlogged,
    /// The connection task has already gone away.
    Disconnected,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Backlogged => f.write_str("outbound queue is full"),
            DeliveryError::Disconnected => f.write_str("connection is gone"),
        }
    }
}

impl std::error::Error for DeliveryError {}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    addr: Option<SocketAddr>,
    username: Option<String>,
    state: SessionState,
    registered_seq: u64,
    outbound: Outbound,
}

impl Session {
    pub(crate) fn new(id: SessionId, addr: Option<SocketAddr>, outbound: Outbound) -> Self {
        Self {
            id,
            addr,
            username: None,
            state: SessionState::Unregistered,
            registered_seq: 0,
            outbound,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Username for log lines; unregistered sessions show as `-`.
    pub fn display_name(&self) -> &str {
        self.username().unwrap_or("-")
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> Option<SessionId> {
        match self.state {
            SessionState::Paired(peer) => Some(peer),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    pub(crate) fn registered_seq(&self) -> u64 {
        self.registered_seq
    }

    /// Queues a frame for this connection without waiting.
    pub fn send(&self, frame: ServerFrame) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Backlogged,
            TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }

    pub(crate) fn register(&mut self, username: String, seq: u64) -> Result<(), TransitionError> {
        match self.state {
            SessionState::Unregistered => {
                self.username = Some(username);
                self.registered_seq = seq;
                self.state = SessionState::Idle;
                Ok(())
            }
            from => Err(TransitionError {
                from,
                action: "register",
            }),
        }
    }

    pub(crate) fn pair(&mut self, peer: SessionId) -> Result<(), TransitionError> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Paired(peer);
                Ok(())
            }
            from => Err(TransitionError { from, action: "pair" }),
        }
    }

    pub(crate) fn unpair(&mut self) -> Result<SessionId, TransitionError> {
        match self.state {
            SessionState::Paired(peer) => {
                self.state = SessionState::Idle;
                Ok(peer)
            }
            from => Err(TransitionError {
                from,
                action: "unpair",
            }),
        }
    }

    /// Moves the session to its terminal state, returning the peer it was
    /// paired with, if any.
    pub(crate) fn close(&mut self) -> Option<SessionId> {
        let peer = self.peer();
        self.state = SessionState::Closing;
        peer
    }
}
