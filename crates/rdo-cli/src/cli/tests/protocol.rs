//! Tests for control request parsing and response encoding.

use crate::cli::protocol::{delivery_line, line_concerns, ControlRequest, ControlResponse};
use rdo_core::{Delivery, Event, ProgressEvent, Submission};

#[test]
fn parses_global_and_per_task_commands() {
    assert_eq!(ControlRequest::parse("start"), Ok(ControlRequest::Start));
    assert_eq!(ControlRequest::parse("pause"), Ok(ControlRequest::PauseAll));
    assert_eq!(ControlRequest::parse("pause 3"), Ok(ControlRequest::Pause(3)));
    assert_eq!(ControlRequest::parse("  resume  "), Ok(ControlRequest::ResumeAll));
    assert_eq!(ControlRequest::parse("resume 4"), Ok(ControlRequest::Resume(4)));
    assert_eq!(ControlRequest::parse("cancel 5"), Ok(ControlRequest::Cancel(5)));
    assert_eq!(ControlRequest::parse("subscribe"), Ok(ControlRequest::Subscribe));
}

#[test]
fn parses_retry_and_list_arguments() {
    assert_eq!(
        ControlRequest::parse("retry 7"),
        Ok(ControlRequest::Retry { id: 7, fallback: false })
    );
    assert_eq!(
        ControlRequest::parse("retry 7 fallback"),
        Ok(ControlRequest::Retry { id: 7, fallback: true })
    );
    assert!(ControlRequest::parse("retry 7 sideways").is_err());
    assert_eq!(
        ControlRequest::parse("list failed"),
        Ok(ControlRequest::List { failed: true })
    );
    assert!(ControlRequest::parse("list everything").is_err());
}

#[test]
fn add_keeps_destination_with_spaces() {
    assert_eq!(
        ControlRequest::parse("add https://h.example/a.iso my isos/a.iso"),
        Ok(ControlRequest::Add(Submission::with_destination(
            "https://h.example/a.iso",
            "my isos/a.iso"
        )))
    );
    assert_eq!(
        ControlRequest::parse("add https://h.example/a.iso"),
        Ok(ControlRequest::Add(Submission::url("https://h.example/a.iso")))
    );
    assert!(ControlRequest::parse("add").is_err());
}

#[test]
fn rejects_malformed_lines() {
    assert!(ControlRequest::parse("").is_err());
    assert!(ControlRequest::parse("cancel").is_err());
    assert!(ControlRequest::parse("cancel x").is_err());
    assert!(ControlRequest::parse("start now").is_err());
    assert!(ControlRequest::parse("explode 1").is_err());
}

#[test]
fn request_lines_parse_back() {
    for request in [
        ControlRequest::PauseAll,
        ControlRequest::Resume(2),
        ControlRequest::Retry { id: 3, fallback: true },
        ControlRequest::List { failed: true },
        ControlRequest::Add(Submission::with_destination("https://h.example/x", "a b.bin")),
    ] {
        assert_eq!(ControlRequest::parse(&request.to_line()), Ok(request));
    }
}

#[test]
fn error_response_refuses_data() {
    let line = serde_json::to_string(&ControlResponse::err("task 9 not found")).unwrap();
    assert_eq!(line, r#"{"ok":false,"error":"task 9 not found"}"#);
    let back: ControlResponse = serde_json::from_str(&line).unwrap();
    let err = back.into_data::<Vec<i64>>().unwrap_err();
    assert_eq!(err.to_string(), "task 9 not found");
}

#[test]
fn stream_lines_are_tagged() {
    let queue = delivery_line(&Delivery::Event(Event::Queue { running: true })).unwrap();
    assert_eq!(queue, r#"{"kind":"queue","running":true}"#);
    let missed: serde_json::Value =
        serde_json::from_str(&delivery_line(&Delivery::Missed(12)).unwrap()).unwrap();
    assert_eq!(missed, serde_json::json!({ "kind": "missed", "count": 12 }));
}

#[test]
fn watch_filter_keeps_one_task_and_queue_events() {
    let progress = |task_id| {
        delivery_line(&Delivery::Event(Event::Progress(ProgressEvent {
            task_id,
            bytes_done: 1,
            bytes_total: None,
            speed: 0.0,
            eta_secs: None,
        })))
        .unwrap()
    };
    let queue = delivery_line(&Delivery::Event(Event::Queue { running: false })).unwrap();
    let missed = delivery_line(&Delivery::Missed(2)).unwrap();

    assert!(line_concerns(&progress(4), Some(4)));
    assert!(!line_concerns(&progress(5), Some(4)));
    assert!(line_concerns(&progress(5), None));
    assert!(line_concerns(&queue, Some(4)));
    assert!(line_concerns(&missed, Some(4)));
}
