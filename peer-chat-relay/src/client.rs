//! Terminal client.
//!
//! Two flows run side by side: a stdin thread that turns typed lines into
//! channel messages, and the session loop that owns the socket and multiplexes
//! server frames with those lines. The session loop is the only code that ever
//! reads from or writes to the socket; when it finishes it drops the input
//! receiver, which is the one and only shutdown signal the stdin flow sees.

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
    sync::mpsc,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{FAREWELL, FrameReader, write_line},
    server::DEFAULT_MAX_USERNAME_LEN,
};

const INPUT_BUFFER: usize = 16;

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;
    info!("connected to {}:{}", args.host, args.port);

    let mut input = spawn_stdin_reader();
    let mut stdout = tokio::io::stdout();

    let username = match args.username {
        Some(username) => {
            validate_username(&username)?;
            username
        }
        None => prompt_username(&mut input, &mut stdout).await?,
    };

    run_session(stream, &username, input, stdout).await
}

/// Reads stdin on a plain thread and forwards each line. The thread stops at
/// EOF or as soon as the session loop has dropped the receiver.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (line_tx, line_rx) = mpsc::channel(INPUT_BUFFER);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        loop {
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = ?err, "failed to read stdin");
                    break;
                }
            }
        }
    });
    line_rx
}

fn validate_username(username: &str) -> Result<()> {
    let trimmed = username.trim();
    if trimmed.is_empty() || trimmed.len() > DEFAULT_MAX_USERNAME_LEN {
        bail!("username must be between 1 and {DEFAULT_MAX_USERNAME_LEN} bytes");
    }
    Ok(())
}

async fn prompt_username<W>(input: &mut mpsc::Receiver<String>, output: &mut W) -> Result<String>
where
    W: AsyncWrite + Unpin,
{
    loop {
        write_line(output, "Username:").await?;
        let Some(line) = input.recv().await else {
            bail!("stdin closed before a username was entered");
        };
        match validate_username(&line) {
            Ok(()) => return Ok(line.trim().to_string()),
            Err(err) => write_line(output, &format!("*** {err}. Try again.")).await?,
        }
    }
}

/// Registers `username` and chats until the user says `bye`, stdin closes or
/// the server hangs up.
pub async fn run_session<S, W>(
    stream: S,
    username: &str,
    mut input: mpsc::Receiver<String>,
    mut output: W,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
    W: AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut frames = FrameReader::new(BufReader::new(reader));

    write_line(&mut writer, username)
        .await
        .context("failed to send username")?;

    loop {
        select! {
            frame = frames.next_frame() => {
                if !handle_server_frame(frame?, &mut output).await? {
                    break;
                }
            }
            line = input.recv() => {
                let Some(line) = line else {
                    break;
                };
                if !handle_input_line(&line, &mut writer, &mut output).await? {
                    break;
                }
            }
        }
    }

    drop(input);
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
    Ok(())
}

async fn handle_server_frame<W>(frame: Option<String>, output: &mut W) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    match frame {
        Some(line) if line == FAREWELL => {
            write_line(output, "*** your peer left the chat").await?;
            Ok(true)
        }
        Some(line) => {
            write_line(output, &line).await?;
            Ok(true)
        }
        None => {
            write_line(output, "*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_input_line<W, O>(line: &str, writer: &mut W, output: &mut O) -> Result<bool>
where
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    if line.is_empty() {
        return Ok(true);
    }

    write_line(writer, line).await.context("failed to send line")?;

    if line == FAREWELL {
        write_line(output, "*** leaving chat").await?;
        return Ok(false);
    }
    Ok(true)
}
