//! Task ledger: durable SQLite store of download tasks.
//!
//! One row per task. Writes go through [`Ledger::update`], which serializes
//! read-modify-write per record and refuses any status change that is not an
//! edge of the task state machine.

mod db;
mod locks;
mod tasks;
mod types;

pub use db::{default_path, now_millis, Ledger};
pub use tasks::SubmitRules;
pub use types::*;

#[cfg(test)]
pub(crate) use db::open_memory;
