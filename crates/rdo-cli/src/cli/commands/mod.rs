//! CLI command handlers. Each command is in its own file.

mod add;
mod control;
mod list;
mod run;
mod watch;

pub use add::run_add;
pub use control::{run_cancel, run_pause, run_resume, run_retry, run_start};
pub use list::run_list;
pub use run::run_orchestrator;
pub use watch::run_watch;
