//! Per-connection I/O task.
//!
//! Each accepted socket gets one task that turns inbound bytes into frames for
//! the hub and writes the hub's outbound frames back to the socket. The task
//! never touches the registry; it only talks to the event loop over channels.

use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, warn};

use crate::{
    message::{FrameReader, ServerFrame, write_frame},
    session::SessionId,
};

/// What a connection task reports to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Frame { id: SessionId, text: String },
    /// The client went away, or its socket failed.
    Closed { id: SessionId },
}

/// Drives one client connection until either side ends it.
///
/// When the hub drops the session's outbound sender, the frames already queued
/// are written, the socket is shut down and no `Closed` event is sent (the hub
/// already knows). When the client closes or the socket fails, `Closed` is
/// reported so the hub can release the peer. A write that has not completed
/// within `write_timeout` counts as a socket failure.
pub async fn serve_connection<S>(
    id: SessionId,
    stream: S,
    events: mpsc::Sender<ConnectionEvent>,
    mut outbound: mpsc::Receiver<ServerFrame>,
    write_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut frames = FrameReader::new(BufReader::new(reader));

    let closed_by_server = loop {
        select! {
            frame = frames.next_frame() => match frame {
                Ok(Some(text)) => {
                    if events.send(ConnectionEvent::Frame { id, text }).await.is_err() {
                        break true;
                    }
                }
                Ok(None) => break false,
                Err(err) => {
                    debug!(session = %id, error = ?err, "read failed");
                    break false;
                }
            },
            outgoing = outbound.recv() => match outgoing {
                Some(frame) => {
                    if !deliver(id, &mut writer, &frame, write_timeout).await {
                        break false;
                    }
                }
                None => break true,
            },
        }
    };

    if closed_by_server {
        if let Err(err) = writer.shutdown().await {
            debug!(session = %id, error = ?err, "failed to shut down socket cleanly");
        }
    } else {
        let _ = events.send(ConnectionEvent::Closed { id }).await;
    }
}

async fn deliver<W>(id: SessionId, writer: &mut W, frame: &ServerFrame, limit: Duration) -> bool
where
    W: AsyncWrite + Unpin,
{
    match timeout(limit, write_frame(writer, frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(session = %id, error = ?err, "failed to deliver frame; closing connection");
            false
        }
        Err(_) => {
            warn!(session = %id, "client stopped reading; closing connection");
            false
        }
    }
}

/// Tells a client the server is at capacity, then hangs up.
pub async fn reject_connection<S>(mut stream: S)
where
    S: AsyncWrite + Unpin,
{
    if let Err(err) = write_frame(&mut stream, &ServerFrame::ServerFull).await {
        debug!(error = ?err, "failed to send capacity notice");
    }
    let _ = stream.shutdown().await;
}
