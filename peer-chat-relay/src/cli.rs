use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Args, Parser, Subcommand};

use crate::{
    registry::DEFAULT_CAPACITY,
    server::{DEFAULT_MAX_USERNAME_LEN, ServerConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server. Type a line on stdin or press Ctrl-C to stop it.
    Server(ServerArgs),
    /// Connect to a relay server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Interface address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Maximum number of simultaneous client connections.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// Longest accepted username, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_USERNAME_LEN)]
    pub max_username_len: usize,

    /// Let several clients register the same username.
    #[arg(long)]
    pub allow_duplicate_usernames: bool,
}

impl ServerArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            capacity: self.capacity,
            max_username_len: self.max_username_len,
            allow_duplicate_usernames: self.allow_duplicate_usernames,
            ..ServerConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host name or address of the relay server.
    pub host: String,

    /// Port of the relay server.
    pub port: u16,

    /// Username to register with. Prompted for when omitted.
    #[arg(long)]
    pub username: Option<String>,
}
