//! Applies connection events to the registry.
//!
//! The hub is the only owner of the [`Registry`]. The server loop hands it one
//! event at a time, so every registration, pairing, relay and teardown runs to
//! completion before the next event is looked at.
//!
//! Frames are queued with `try_send`. A connection whose queue is full has
//! stopped reading; it is dropped once the current event is done, and its peer
//! is told `bye`.

use std::{fmt, net::SocketAddr};

use tracing::{debug, info, warn};

use crate::{
    command::ClientCommand,
    connection::ConnectionEvent,
    message::ServerFrame,
    pairing::{self, PairingOutcome},
    registry::{Registry, RegistryFull},
    relay::{self, RelayOutcome},
    server::ServerConfig,
    session::{DeliveryError, Outbound, SessionId},
};

/// Why a username was refused. `Display` is the re-prompt sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    InvalidLength { max: usize },
    Taken { username: String },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::InvalidLength { max } => {
                write!(f, "Username must be between 1 and {max} bytes. Try again.")
            }
            RegistrationError::Taken { username } => {
                write!(f, "Username {username} is already taken. Try again.")
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

pub struct Hub {
    registry: Registry,
    config: ServerConfig,
    backlogged: Vec<SessionId>,
}

impl Hub {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: Registry::with_capacity(config.capacity),
            config,
            backlogged: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates a session for a new connection.
    pub fn accept(
        &mut self,
        addr: Option<SocketAddr>,
        outbound: Outbound,
    ) -> Result<SessionId, RegistryFull> {
        let id = self.registry.insert(addr, outbound)?;
        debug!(session = %id, ?addr, "connection accepted");
        Ok(id)
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Frame { id, text } => self.handle_frame(id, &text),
            ConnectionEvent::Closed { id } => self.close_session(id, "disconnected"),
        }
    }

    /// Processes one complete inbound frame from `id`.
    pub fn handle_frame(&mut self, id: SessionId, frame: &str) {
        self.dispatch(id, frame);
        self.drop_backlogged();
    }

    /// Tears a session down: the peer (if any) gets `bye` and returns to idle,
    /// then the slot is reclaimed. Dropping the session drops its outbound
    /// channel, which makes the connection task flush and close the socket.
    pub fn close_session(&mut self, id: SessionId, reason: &'static str) {
        self.teardown(id, reason);
        self.drop_backlogged();
    }

    /// Operator shutdown: every session is dropped without notification.
    pub fn shutdown(&mut self) {
        self.backlogged.clear();
        let dropped = self.registry.clear();
        info!(sessions = dropped, "closed all client connections");
    }

    fn dispatch(&mut self, id: SessionId, frame: &str) {
        let Some(session) = self.registry.get(id) else {
            debug!(session = %id, "frame from a session that is already gone");
            return;
        };
        let registered = session.username().is_some();

        let Some(command) = ClientCommand::parse(frame, registered) else {
            return;
        };

        match command {
            ClientCommand::Register { username } => self.register(id, username),
            ClientCommand::Farewell => self.teardown(id, "farewell"),
            ClientCommand::List | ClientCommand::Connect { .. } if !registered => {
                debug!(session = %id, "ignoring command before registration");
            }
            ClientCommand::List => self.send_active_users(id),
            ClientCommand::Connect { target } => self.connect(id, target),
            ClientCommand::Chat { text } => self.chat(id, text),
        }
    }

    fn register(&mut self, id: SessionId, requested: &str) {
        let username = requested.trim();
        if let Err(reason) = self.validate_username(username) {
            debug!(session = %id, %reason, "username rejected");
            self.send(id, ServerFrame::RegistrationRejected(reason));
            return;
        }

        if let Err(err) = self.registry.register_username(id, username.to_string()) {
            debug!(session = %id, error = %err, "registration failed");
            return;
        }

        let addr = self.registry.get(id).and_then(|session| session.addr());
        info!(session = %id, ?addr, username, "client registered");
        self.send(
            id,
            ServerFrame::Welcome {
                username: username.to_string(),
            },
        );
        self.send_active_users(id);
    }

    fn validate_username(&self, username: &str) -> Result<(), RegistrationError> {
        let max = self.config.max_username_len;
        if username.is_empty() || username.len() > max {
            return Err(RegistrationError::InvalidLength { max });
        }
        if !self.config.allow_duplicate_usernames && self.registry.contains_username(username) {
            return Err(RegistrationError::Taken {
                username: username.to_string(),
            });
        }
        Ok(())
    }

    fn send_active_users(&mut self, id: SessionId) {
        let usernames = self.registry.idle_usernames_except(id);
        self.send(id, ServerFrame::ActiveUsers { usernames });
    }

    /// Targets are trimmed the same way usernames are at registration.
    fn connect(&mut self, id: SessionId, target: &str) {
        let target = target.trim();
        match pairing::request_pairing(&mut self.registry, id, target) {
            PairingOutcome::Established { peer } => {
                let requester_name = self.name_of(id).to_string();
                let peer_name = self.name_of(peer).to_string();
                info!(requester = %requester_name, peer = %peer_name, "sessions paired");
                self.send(id, ServerFrame::Connected { peer: peer_name });
                self.send(
                    peer,
                    ServerFrame::Connected {
                        peer: requester_name,
                    },
                );
            }
            PairingOutcome::Rejected(reason) => {
                debug!(
                    requester = self.name_of(id),
                    target_name = target,
                    %reason,
                    "pairing rejected"
                );
                self.send(id, ServerFrame::PairingRejected(reason));
            }
            PairingOutcome::Ignored => {
                debug!(
                    requester = self.name_of(id),
                    target_name = target,
                    "pairing ignored; requester already paired"
                );
            }
        }
    }

    fn chat(&mut self, id: SessionId, text: &str) {
        match relay::relay_chat(&self.registry, id, text) {
            RelayOutcome::Deliver { to, frame } => self.send(to, frame),
            RelayOutcome::NotPaired => {
                debug!(sender = self.name_of(id), "dropping chat text from unpaired session");
            }
            RelayOutcome::PeerGone => {
                debug!(sender = self.name_of(id), "dropping chat text; peer is gone");
            }
        }
    }

    fn teardown(&mut self, id: SessionId, reason: &'static str) {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };

        let peer = session.close();
        if let Some(peer_id) = peer {
            let released = self
                .registry
                .get_mut(peer_id)
                .is_some_and(|peer| peer.unpair().is_ok());
            if released {
                self.send(peer_id, ServerFrame::Farewell);
                info!(username = self.name_of(peer_id), "peer left; session idle again");
            }
        }

        if let Some(session) = self.registry.remove(id) {
            info!(
                session = %id,
                username = session.display_name(),
                reason,
                "client left"
            );
        }
    }

    /// Tears down every session whose queue overflowed. A teardown can itself
    /// overflow a peer's queue, so this runs until nothing is left.
    fn drop_backlogged(&mut self) {
        while let Some(id) = self.backlogged.pop() {
            self.teardown(id, "stopped reading");
        }
    }

    fn send(&mut self, id: SessionId, frame: ServerFrame) {
        let Some(session) = self.registry.get(id) else {
            return;
        };
        match session.send(frame) {
            Ok(()) => {}
            Err(DeliveryError::Backlogged) => {
                warn!(
                    session = %id,
                    username = session.display_name(),
                    "outbound queue full; dropping connection"
                );
                self.backlogged.push(id);
            }
            Err(DeliveryError::Disconnected) => {
                debug!(session = %id, "connection gone before frame could be queued");
            }
        }
    }

    fn name_of(&self, id: SessionId) -> &str {
        self.registry
            .get(id)
            .map(|session| session.display_name())
            .unwrap_or("-")
    }
}
