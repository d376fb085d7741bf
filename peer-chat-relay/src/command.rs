//! Classification of inbound client frames.
//!
//! Parsing is pure: it looks at one frame (already stripped of its line
//! terminator) plus whether the sender has registered, and says what the frame
//! means. Acting on it is the hub's job.

use crate::message::FAREWELL;

const LIST_PREFIX: &str = "LIST";
const CONNECT_PREFIX: &str = "CONNECT:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand<'a> {
    /// `LIST...`: ask for the idle users.
    List,
    /// `CONNECT:<name>`: ask to be paired with `<name>`.
    Connect { target: &'a str },
    /// Exactly `bye`.
    Farewell,
    /// Any other frame from an unregistered sender.
    Register { username: &'a str },
    /// Any other frame from a registered sender.
    Chat { text: &'a str },
}

impl<'a> ClientCommand<'a> {
    /// Returns `None` for an empty frame, which is a no-op.
    pub fn parse(frame: &'a str, registered: bool) -> Option<Self> {
        if frame.is_empty() {
            return None;
        }

        let command = if frame.starts_with(LIST_PREFIX) {
            ClientCommand::List
        } else if let Some(target) = frame.strip_prefix(CONNECT_PREFIX) {
            ClientCommand::Connect { target }
        } else if frame == FAREWELL {
            ClientCommand::Farewell
        } else if registered {
            ClientCommand::Chat { text: frame }
        } else {
            ClientCommand::Register { username: frame }
        };

        Some(command)
    }
}
