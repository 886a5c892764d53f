pub mod config;
pub mod logging;

pub mod broadcast;
pub mod control;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod ledger;
pub mod retry;
pub mod storage;
pub mod url_model;

pub use broadcast::{Broadcaster, Delivery, Event, ProgressEvent, Subscription, TaskEvent};
pub use config::RdoConfig;
pub use controller::{Controller, TaskView};
pub use error::{RdoError, RdoResult, ValidationError};
pub use ledger::{DownloadTask, Ledger, Submission, SubmitReport, TaskId, TaskStatus};
