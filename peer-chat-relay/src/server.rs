use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{mpsc, oneshot},
};
use tracing::{info, warn};

use crate::{
    connection::{ConnectionEvent, reject_connection, serve_connection},
    hub::Hub,
    registry::DEFAULT_CAPACITY,
    session::outbound_channel,
};

/// Default upper bound on username length, in bytes.
pub const DEFAULT_MAX_USERNAME_LEN: usize = 16;

/// How long a single socket write may stall before the connection is dropped.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Events the connection tasks may have queued for the loop at once. Readers
/// wait for room, so a flooding client slows down instead of growing the queue.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Maximum number of simultaneous connections.
    pub capacity: usize,
    pub max_username_len: usize,
    /// Accept a username that is already in use. Pairing requests then resolve
    /// to whoever registered the name first.
    pub allow_duplicate_usernames: bool,
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
            allow_duplicate_usernames: false,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self::with_config(listener, ServerConfig::default())
    }

    pub fn with_config(listener: TcpListener, config: ServerConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the event loop until `shutdown` resolves.
    ///
    /// The loop owns the [`Hub`] (and through it the registry) outright. It
    /// waits on three sources at once: the shutdown trigger, the listener, and
    /// the events channel fed by every connection task. Each wake-up handles
    /// exactly one unit of work before waiting again.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, config } = self;
        let write_timeout = config.write_timeout;
        let mut hub = Hub::new(config);
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    hub.shutdown();
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &mut hub, &events_tx, write_timeout);
                }
                Some(event) = events_rx.recv() => {
                    hub.handle_event(event);
                }
            }
        }

        info!("server shutting down");
        Ok(())
    }

    /// Runs until the operator presses Ctrl-C or types a line on stdin.
    pub async fn run_until_operator_stop(self) -> Result<()> {
        self.run_until(operator_stop()).await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    hub: &mut Hub,
    events: &mpsc::Sender<ConnectionEvent>,
    write_timeout: Duration,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, hub, events, write_timeout),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(
    stream: TcpStream,
    peer: SocketAddr,
    hub: &mut Hub,
    events: &mpsc::Sender<ConnectionEvent>,
    write_timeout: Duration,
) {
    let (outbound_tx, outbound_rx) = outbound_channel();
    match hub.accept(Some(peer), outbound_tx) {
        Ok(id) => {
            info!(peer = %peer, session = %id, "handling client");
            tokio::spawn(serve_connection(
                id,
                stream,
                events.clone(),
                outbound_rx,
                write_timeout,
            ));
        }
        Err(full) => {
            warn!(peer = %peer, error = %full, "rejecting connection");
            tokio::spawn(reject_connection(stream));
        }
    }
}

/// Resolves on Ctrl-C or on the first line read from stdin. Stdin EOF is not a
/// stop request, so a server started with a closed stdin keeps running.
async fn operator_stop() {
    let (line_tx, line_rx) = oneshot::channel();
    // A plain thread rather than tokio's stdin: its blocking read cannot be
    // cancelled and would hold up runtime shutdown.
    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(read) if read > 0) {
            let _ = line_tx.send(());
        }
    });

    let stdin_line = async {
        if line_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received"),
            Err(err) => {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        }
    };

    select! {
        _ = interrupt => {}
        _ = stdin_line => info!("operator requested shutdown"),
    }
}
