//! `mtq add <collection> <items…>` – queue items.

use anyhow::Result;
use mtq_core::queue_store::QueueStore;
use mtq_core::task::TaskKey;

#[derive(Debug, Clone)]
pub struct AddArgs {
    pub collection: i64,
    pub items: Vec<i64>,
    pub priority: i64,
    pub max_retries: u32,
    pub reset: bool,
}

pub async fn run_add(store: &QueueStore, args: &AddArgs) -> Result<()> {
    let added = if args.reset {
        let mut added = 0u64;
        for &item in &args.items {
            let key = TaskKey::new(args.collection, item);
            if store
                .enqueue(key, args.priority, args.max_retries, true)
                .await?
            {
                added += 1;
            }
        }
        added
    } else {
        store
            .enqueue_many(args.collection, &args.items, args.priority, args.max_retries)
            .await?
    };
    println!(
        "Added {} new of {} item(s) to collection {}",
        added,
        args.items.len(),
        args.collection
    );
    Ok(())
}
