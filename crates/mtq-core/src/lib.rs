pub mod config;
pub mod logging;

pub mod control;
pub mod engine;
pub mod history;
pub mod notify;
pub mod progress;
pub mod queue_store;
pub mod retry;
pub mod task;
pub mod transfer;
pub mod worker;
