//! Control socket: server (during `mtq run`) and client (for `mtq pause` etc).
//! Protocol: one command per line (`pause`, `resume`, `cancel`, `snapshot`),
//! one reply line each: `ok <state>`, `error <message>` or snapshot JSON.

use anyhow::{bail, Result};
use mtq_core::control::ControlCommand;
use mtq_core::engine::Engine;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Reply to one protocol line.
pub async fn handle_line(engine: &Engine, line: &str) -> String {
    let line = line.trim();
    if line.eq_ignore_ascii_case("snapshot") {
        return match serde_json::to_string(&engine.snapshot()) {
            Ok(json) => json,
            Err(e) => format!("error {}", e),
        };
    }
    let command = match line.parse::<ControlCommand>() {
        Ok(c) => c,
        Err(e) => return format!("error {}", e),
    };
    match engine.control(command).await {
        Ok(state) => format!("ok {}", state),
        Err(e) => format!("error {}", e),
    }
}

/// Spawns a task that listens on `path` and applies each command line to `engine`.
pub fn spawn_control_listener(
    engine: Engine,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut lines = BufReader::new(read).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let mut reply = handle_line(&engine, &line).await;
                            reply.push('\n');
                            if write.write_all(reply.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends one command line and returns the reply. `None` if no run is listening.
pub async fn send_command(socket_path: &Path, command: &str) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(path = %socket_path.display(), "stale control socket: {}", e);
            return Ok(None);
        }
    };
    stream.write_all(format!("{}\n", command).as_bytes()).await?;
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await?;
    Ok(Some(reply.trim_end().to_string()))
}

/// Fails when a run already answers on `socket_path`. A stale socket file
/// left by a crashed run does not count.
pub async fn ensure_no_live_run(socket_path: &Path) -> Result<()> {
    if send_command(socket_path, "snapshot").await?.is_some() {
        bail!(
            "another `mtq run` is active (control socket {})",
            socket_path.display()
        );
    }
    Ok(())
}

/// `send_command` against the default socket path.
pub async fn send_default(command: &str) -> Result<Option<String>> {
    let path = mtq_core::control::default_control_socket_path()?;
    send_command(&path, command).await
}
