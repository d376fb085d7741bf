use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("peer_chat_relay");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let port = read_server_port(&mut server_stdout).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    // Alice is alone when she arrives.
    let mut alice = spawn_client(&binary, "alice", port).await?;
    let alice_alone = read_line_expect(&mut alice.stdout, "waiting for alice user list").await?;
    assert_eq!(alice_alone, "No other users are active now.");

    // Bob sees Alice in the list of idle users.
    let mut bob = spawn_client(&binary, "bob", port).await?;
    let bob_list_header = read_line_expect(&mut bob.stdout, "waiting for bob user list").await?;
    assert_eq!(bob_list_header, "Active Users are:");
    let bob_list_entry = read_line_expect(&mut bob.stdout, "waiting for bob list entry").await?;
    assert_eq!(bob_list_entry, "alice");

    // Alice asks for Bob; both sides hear about the pairing.
    alice
        .send_line("CONNECT:bob")
        .await
        .context("alice send connect")?;
    let alice_paired = read_line_expect(&mut alice.stdout, "waiting for alice pairing").await?;
    assert_eq!(alice_paired, "You are connected to bob");
    let bob_paired = read_line_expect(&mut bob.stdout, "waiting for bob pairing").await?;
    assert_eq!(bob_paired, "You are connected to alice");

    // Chat flows both ways, tagged with the sender.
    alice.send_line("hi").await.context("alice send line")?;
    let bob_hears_alice =
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "alice:hi");

    bob.send_line("hello alice").await.context("bob send line")?;
    let alice_hears_bob =
        read_line_expect(&mut alice.stdout, "waiting for alice to hear bob").await?;
    assert_eq!(alice_hears_bob, "bob:hello alice");

    // Bob leaves; Alice is told and stays connected.
    bob.send_line("bye").await.context("bob send bye")?;
    let bob_quit = read_line_expect(&mut bob.stdout, "waiting for bob quit confirmation").await?;
    assert_eq!(bob_quit, "*** leaving chat");
    let alice_sees_departure =
        read_line_expect(&mut alice.stdout, "waiting for alice to see bob leave").await?;
    assert_eq!(alice_sees_departure, "*** your peer left the chat");

    alice.send_line("LIST").await.context("alice send list")?;
    let alice_alone_again =
        read_line_expect(&mut alice.stdout, "waiting for alice second user list").await?;
    assert_eq!(alice_alone_again, "No other users are active now.");

    alice.send_line("bye").await.context("alice send bye")?;
    let alice_quit =
        read_line_expect(&mut alice.stdout, "waiting for alice quit confirmation").await?;
    assert_eq!(alice_quit, "*** leaving chat");

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // The server keeps running after clients disconnect; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

#[tokio::test]
async fn server_stops_on_operator_input() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("peer_chat_relay");

    let mut cmd = Command::new(&binary);
    cmd.arg("server")
        .arg("0")
        .arg("--bind")
        .arg("127.0.0.1")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    let mut child = cmd.spawn().context("failed to spawn server")?;
    let mut stdin = child.stdin.take().context("server stdin missing")?;
    let stdout = child.stdout.take().context("server stdout missing")?;
    let mut stdout = BufReader::new(stdout);
    read_server_port(&mut stdout).await?;

    stdin.write_all(b"\n").await?;
    stdin.flush().await?;

    let log_task = tokio::spawn(async move {
        drain_stdout(stdout).await;
    });
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .context("server did not stop after operator input")??;
    assert!(status.success(), "server exited with {status}");
    let _ = log_task.await;

    Ok(())
}

#[tokio::test]
async fn server_fails_when_port_is_taken() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("peer_chat_relay");
    let taken = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = taken.local_addr()?.port();

    let status = Command::new(&binary)
        .arg("server")
        .arg(port.to_string())
        .arg("--bind")
        .arg("127.0.0.1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    assert!(!status.success(), "bind failure must exit non-zero");

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("0")
        .arg("--bind")
        .arg("127.0.0.1")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_port(reader: &mut BufReader<ChildStdout>) -> Result<u16> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    let port = addr
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .ok_or_else(|| anyhow!("server banner missing socket: {trimmed}"))?;
    Ok(port)
}

async fn spawn_client(binary: &Path, username: &str, port: u16) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("127.0.0.1")
        .arg(port.to_string())
        .arg("--username")
        .arg(username)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {username}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let welcome = read_line_expect(&mut process.stdout, "waiting for welcome banner").await?;
    if welcome != format!("Welcome to the chat relay, {username}") {
        return Err(anyhow!(
            "expected welcome banner for {username}, got '{welcome}'"
        ));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
