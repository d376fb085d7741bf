//! Peer-to-peer text chat relay.
//!
//! One server process accepts many TCP clients, lets each register a username,
//! pairs two idle clients on request, and relays lines between the pair until
//! either side says `bye` or disconnects. The protocol is plain
//! newline-delimited text, so `nc` works as a client too.
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`server`] owns the listener and the event loop; the loop is the single
//!   owner of all session state.
//! - [`connection`] runs one I/O task per socket, talking to the loop only
//!   through channels.
//! - [`hub`] applies each inbound frame to the session state: registration,
//!   listing, pairing, relaying and teardown.
//! - [`registry`] is the generation-checked arena of [`session::Session`]s.
//! - [`session`] holds the per-connection state machine.
//! - [`command`] classifies inbound frames; [`pairing`] and [`relay`] implement
//!   the two operations that touch more than one session.
//! - [`message`] provides the framing helpers and the server's wire texts.
//! - [`client`] is the interactive terminal client.

pub mod cli;
pub mod client;
pub mod command;
pub mod connection;
pub mod hub;
pub mod message;
pub mod pairing;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
