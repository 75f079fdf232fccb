//! `mtq cancel` – cancel the active run. Without one, cancel pending tasks in the DB.

use anyhow::{bail, Result};
use mtq_core::engine::RUN_CANCELLED;
use mtq_core::queue_store::QueueStore;

use crate::cli::control_socket;

pub async fn run_cancel(store: &QueueStore) -> Result<()> {
    match control_socket::send_default("cancel").await? {
        Some(reply) if reply.starts_with("ok") => println!("Run cancelled"),
        Some(reply) => bail!("cancel rejected: {}", reply.trim_start_matches("error ")),
        None => {
            let n = store.cancel_pending(RUN_CANCELLED).await?;
            println!("Cancelled {} pending task(s)", n);
        }
    }
    Ok(())
}
