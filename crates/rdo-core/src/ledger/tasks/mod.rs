//! Task CRUD, split like the read and write paths are used.

mod read;
mod write;

pub use write::SubmitRules;
