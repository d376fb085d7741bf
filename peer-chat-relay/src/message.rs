use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{hub::RegistrationError, pairing::PairingError};

/// Longest frame handed to the protocol layer. Longer lines arrive as several
/// frames of at most this many bytes.
pub const MAX_FRAME_LEN: usize = 1024;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Everything the server ever says to a client. `Display` yields the exact
/// wire text, without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Welcome { username: String },
    ActiveUsers { usernames: Vec<String> },
    Connected { peer: String },
    PairingRejected(PairingError),
    RegistrationRejected(RegistrationError),
    Chat { from: String, text: String },
    Farewell,
    ServerFull,
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFrame::Welcome { username } => write!(f, "Welcome to the chat relay, {username}"),
            ServerFrame::ActiveUsers { usernames } if usernames.is_empty() => {
                f.write_str("No other users are active now.")
            }
            ServerFrame::ActiveUsers { usernames } => {
                f.write_str("Active Users are:")?;
                for name in usernames {
                    write!(f, "\n{name}")?;
                }
                Ok(())
            }
            ServerFrame::Connected { peer } => write!(f, "You are connected to {peer}"),
            ServerFrame::PairingRejected(reason) => write!(f, "{reason}"),
            ServerFrame::RegistrationRejected(reason) => write!(f, "{reason}"),
            ServerFrame::Chat { from, text } => write!(f, "{from}:{text}"),
            ServerFrame::Farewell => f.write_str(FAREWELL),
            ServerFrame::ServerFull => f.write_str("Server is full. Try again later."),
        }
    }
}

/// Farewell token, in both directions.
pub const FAREWELL: &str = "bye";

/// Newline-delimited frame reader.
///
/// Partially read bytes stay in the internal buffer, so `next_frame` can be
/// raced in `select!` and resumed later without losing input.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// Returns the next frame with its line terminator stripped, or `None` once
    /// the peer has closed the stream and every buffered byte was delivered.
    pub async fn next_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            let limit = MAX_FRAME_LEN.saturating_sub(self.buf.len()) as u64;
            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;

            if read == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            let complete = self.buf.last() == Some(&b'\n') || self.buf.len() >= MAX_FRAME_LEN;
            if complete || read == 0 {
                return Ok(Some(self.take_frame()));
            }
        }
    }

    fn take_frame(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&bytes)
            .trim_end_matches(LINE_ENDINGS)
            .to_string()
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One write per frame so a peer never observes half a line followed by another frame.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_frame<W>(writer: &mut W, frame: &ServerFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_line(writer, &frame.to_string()).await
}
