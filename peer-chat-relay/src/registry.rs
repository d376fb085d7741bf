//! Fixed-capacity arena of live sessions.
//!
//! The registry is owned by the event loop and never shared: every method
//! takes `&self` or `&mut self` on the single owner, so there is nothing to
//! lock. Sessions are addressed by [`SessionId`] handles whose generation is
//! bumped whenever a slot is reclaimed.

use std::{fmt, net::SocketAddr};

use crate::session::{Outbound, Session, SessionId, SessionState, TransitionError};

/// Default number of simultaneous sessions.
pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull {
    pub capacity: usize,
}

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry is full ({} sessions)", self.capacity)
    }
}

impl std::error::Error for RegistryFull {}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    session: Option<Session>,
}

#[derive(Debug)]
pub struct Registry {
    slots: Vec<Slot>,
    capacity: usize,
    live: usize,
    next_seq: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Registry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            live: 0,
            next_seq: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Creates an `Unregistered` session for a freshly accepted connection.
    pub fn insert(
        &mut self,
        addr: Option<SocketAddr>,
        outbound: Outbound,
    ) -> Result<SessionId, RegistryFull> {
        if self.live >= self.capacity {
            return Err(RegistryFull {
                capacity: self.capacity,
            });
        }

        let index = match self.slots.iter().position(|slot| slot.session.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[index];
        let id = SessionId {
            index: index as u32,
            generation: slot.generation,
        };
        slot.session = Some(Session::new(id, addr, outbound));
        self.live += 1;
        Ok(id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_ref())
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_mut())
    }

    /// Reclaims the slot. The removed session (and with it the connection's
    /// outbound channel) is handed back to the caller.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let session = slot.session.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.live -= 1;
        Some(session)
    }

    /// Drops every session at once.
    pub fn clear(&mut self) -> usize {
        let removed = self.live;
        for slot in &mut self.slots {
            if slot.session.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.live = 0;
        removed
    }

    /// Registered sessions, earliest registration first.
    pub fn registered(&self) -> impl Iterator<Item = &Session> {
        let mut sessions: Vec<&Session> = self
            .slots
            .iter()
            .filter_map(|slot| slot.session.as_ref())
            .filter(|session| session.username().is_some())
            .collect();
        sessions.sort_by_key(|session| session.registered_seq());
        sessions.into_iter()
    }

    /// First registered session whose username equals `name` exactly.
    pub fn lookup_by_name(&self, name: &str) -> Option<SessionId> {
        self.registered()
            .find(|session| session.username() == Some(name))
            .map(Session::id)
    }

    pub fn contains_username(&self, name: &str) -> bool {
        self.lookup_by_name(name).is_some()
    }

    /// Usernames of idle sessions other than `requester`.
    pub fn idle_usernames_except(&self, requester: SessionId) -> Vec<String> {
        self.registered()
            .filter(|session| session.id() != requester && session.is_idle())
            .filter_map(|session| session.username().map(str::to_string))
            .collect()
    }

    pub fn register_username(
        &mut self,
        id: SessionId,
        username: String,
    ) -> Result<(), TransitionError> {
        let seq = self.next_seq;
        let Some(session) = self.get_mut(id) else {
            return Err(TransitionError {
                from: SessionState::Closing,
                action: "register",
            });
        };
        session.register(username, seq)?;
        self.next_seq += 1;
        Ok(())
    }

    /// Links two idle sessions to each other. Both sides are checked before
    /// either is touched, so a failed link leaves both sessions unchanged.
    pub fn link(&mut self, a: SessionId, b: SessionId) -> Result<(), TransitionError> {
        if a == b {
            return Err(TransitionError {
                from: SessionState::Idle,
                action: "self-pair",
            });
        }
        for id in [a, b] {
            match self.get(id) {
                Some(session) if session.is_idle() => {}
                Some(session) => {
                    return Err(TransitionError {
                        from: session.state(),
                        action: "pair",
                    });
                }
                None => {
                    return Err(TransitionError {
                        from: SessionState::Closing,
                        action: "pair",
                    });
                }
            }
        }

        if let Some(session) = self.get_mut(a) {
            session.pair(b)?;
        }
        if let Some(session) = self.get_mut(b) {
            session.pair(a)?;
        }
        Ok(())
    }
}
