//! `mtq resume` – let a paused run lease tasks again.

use anyhow::{bail, Result};

use crate::cli::control_socket;

pub async fn run_resume() -> Result<()> {
    match control_socket::send_default("resume").await? {
        Some(reply) if reply.starts_with("ok") => println!("Run resumed"),
        Some(reply) => bail!("resume rejected: {}", reply.trim_start_matches("error ")),
        None => bail!("no active `mtq run` to resume"),
    }
    Ok(())
}
