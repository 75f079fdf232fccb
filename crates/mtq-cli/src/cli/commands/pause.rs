//! `mtq pause` – stop the active run from starting new transfers.

use anyhow::{bail, Result};

use crate::cli::control_socket;

pub async fn run_pause() -> Result<()> {
    match control_socket::send_default("pause").await? {
        Some(reply) if reply.starts_with("ok") => println!("Run paused"),
        Some(reply) => bail!("pause rejected: {}", reply.trim_start_matches("error ")),
        None => bail!("no active `mtq run` to pause"),
    }
    Ok(())
}
