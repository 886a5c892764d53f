//! Control socket wire format.
//!
//! One request per line, one JSON line per response. A `subscribe` request
//! turns the connection into a stream of JSON event lines.

use rdo_core::{Delivery, Event, Submission, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Start,
    PauseAll,
    Pause(TaskId),
    ResumeAll,
    Resume(TaskId),
    Cancel(TaskId),
    Retry { id: TaskId, fallback: bool },
    List { failed: bool },
    Add(Submission),
    Subscribe,
}

impl ControlRequest {
    /// Parse one request line, e.g. `pause 3`, `retry 7 fallback`, `add <url> [dest]`.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let id = || -> Result<TaskId, String> {
            rest.split_whitespace()
                .next()
                .ok_or_else(|| format!("{verb}: missing task id"))?
                .parse::<TaskId>()
                .map_err(|e| format!("{verb}: bad task id: {e}"))
        };

        let request = match verb {
            "start" if rest.is_empty() => ControlRequest::Start,
            "subscribe" if rest.is_empty() => ControlRequest::Subscribe,
            "pause" if rest.is_empty() => ControlRequest::PauseAll,
            "pause" => ControlRequest::Pause(id()?),
            "resume" if rest.is_empty() => ControlRequest::ResumeAll,
            "resume" => ControlRequest::Resume(id()?),
            "cancel" => ControlRequest::Cancel(id()?),
            "retry" => {
                let fallback = match rest.split_whitespace().nth(1) {
                    None => false,
                    Some("fallback") => true,
                    Some(other) => return Err(format!("retry: unexpected argument {other:?}")),
                };
                ControlRequest::Retry { id: id()?, fallback }
            }
            "list" => match rest {
                "" => ControlRequest::List { failed: false },
                "failed" => ControlRequest::List { failed: true },
                other => return Err(format!("list: unexpected argument {other:?}")),
            },
            "add" if rest.is_empty() => return Err("add: missing URL".to_string()),
            "add" => ControlRequest::Add(match rest.split_once(char::is_whitespace) {
                Some((url, dest)) => Submission::with_destination(url, dest.trim()),
                None => Submission::url(rest),
            }),
            "" => return Err("empty request".to_string()),
            other => return Err(format!("unknown request {other:?}")),
        };
        Ok(request)
    }

    /// The request line sent by the client.
    pub fn to_line(&self) -> String {
        match self {
            ControlRequest::Start => "start".to_string(),
            ControlRequest::PauseAll => "pause".to_string(),
            ControlRequest::Pause(id) => format!("pause {id}"),
            ControlRequest::ResumeAll => "resume".to_string(),
            ControlRequest::Resume(id) => format!("resume {id}"),
            ControlRequest::Cancel(id) => format!("cancel {id}"),
            ControlRequest::Retry { id, fallback: false } => format!("retry {id}"),
            ControlRequest::Retry { id, fallback: true } => format!("retry {id} fallback"),
            ControlRequest::List { failed: false } => "list".to_string(),
            ControlRequest::List { failed: true } => "list failed".to_string(),
            ControlRequest::Add(sub) => match &sub.destination {
                Some(dest) => format!("add {} {}", sub.url, dest.display()),
                None => format!("add {}", sub.url),
            },
            ControlRequest::Subscribe => "subscribe".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self::err(format!("encode response: {e}")),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Decode the payload of a successful response.
    pub fn into_data<T: serde::de::DeserializeOwned>(self) -> anyhow::Result<T> {
        if !self.ok {
            anyhow::bail!("{}", self.error.unwrap_or_else(|| "request failed".to_string()));
        }
        Ok(serde_json::from_value(self.data.unwrap_or(Value::Null))?)
    }
}

/// Queue state returned by `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub running: bool,
    pub in_flight: Vec<TaskId>,
}

/// Whether a `subscribe` line should be shown to a watcher following `only`.
///
/// Queue-wide events and missed-event notices always pass.
pub fn line_concerns(line: &str, only: Option<TaskId>) -> bool {
    let Some(only) = only else {
        return true;
    };
    match serde_json::from_str::<Event>(line) {
        Ok(event) => event.task_id().map_or(true, |id| id == only),
        Err(_) => true,
    }
}

/// One line of a `subscribe` stream.
pub fn delivery_line(delivery: &Delivery) -> serde_json::Result<String> {
    match delivery {
        Delivery::Event(event) => serde_json::to_string(event),
        Delivery::Missed(count) => {
            serde_json::to_string(&serde_json::json!({ "kind": "missed", "count": count }))
        }
    }
}
