//! Human-readable rendering of tasks and progress.

use rdo_core::{DownloadTask, ProgressEvent, SubmitReport, TaskView};

const MIB: f64 = 1_048_576.0;

fn mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

fn eta(secs: Option<f64>) -> String {
    secs.map(|s| format!("{:.0}s", s))
        .unwrap_or_else(|| "?".to_string())
}

fn progress_cell(task: &DownloadTask) -> String {
    match (task.bytes_total, task.fraction()) {
        (Some(total), Some(fraction)) => format!(
            "{:.1}/{:.1} MiB {:>3.0}%",
            mib(task.bytes_done),
            mib(total),
            fraction * 100.0
        ),
        _ => format!("{:.1} MiB", mib(task.bytes_done)),
    }
}

pub fn task_header() -> String {
    format!(
        "{:<6} {:<10} {:<26} {:<12} {}",
        "ID", "STATUS", "PROGRESS", "RATE", "URL"
    )
}

pub fn task_row(view: &TaskView) -> String {
    let task = &view.task;
    let rate = match view.speed {
        Some(speed) => format!("{:.2} MiB/s", speed / MIB),
        None => "-".to_string(),
    };
    let mut row = format!(
        "{:<6} {:<10} {:<26} {:<12} {}",
        task.id,
        task.status.as_str(),
        progress_cell(task),
        rate,
        task.url
    );
    if let Some(err) = &task.last_error {
        row.push_str(&format!("\n       last error (retry {}): {}", task.retry_count, err));
    }
    if let Some(original) = task.duplicate_of {
        row.push_str(&format!("\n       same content as task {original}"));
    }
    row
}

pub fn progress_line(p: &ProgressEvent) -> String {
    let total = p
        .bytes_total
        .map(|t| format!("{:.1}", mib(t)))
        .unwrap_or_else(|| "?".to_string());
    let pct = match p.bytes_total {
        Some(0) => 100.0,
        Some(t) => p.bytes_done as f64 / t as f64 * 100.0,
        None => 0.0,
    };
    format!(
        "  #{} {:.1} / {} MiB ({:.1}%)  {:.2} MiB/s  ETA {}",
        p.task_id,
        mib(p.bytes_done),
        total,
        pct,
        p.speed / MIB,
        eta(p.eta_secs)
    )
}

pub fn print_report(report: &SubmitReport) {
    for task in &report.accepted {
        println!(
            "Added task {} for URL: {} -> {}",
            task.id,
            task.url,
            task.destination.display()
        );
    }
    for rejected in &report.rejected {
        println!("Rejected {}: {}", rejected.url, rejected.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdo_core::TaskStatus;
    use std::path::PathBuf;

    fn task() -> DownloadTask {
        DownloadTask {
            id: 7,
            url: "https://h.example/a.iso".into(),
            destination: PathBuf::from("/dl/a.iso"),
            status: TaskStatus::Active,
            bytes_total: Some(2 * 1_048_576),
            bytes_done: 1_048_576,
            retry_count: 0,
            attempt: 1,
            last_error: None,
            fallback_requested: false,
            sha256: None,
            duplicate_of: None,
            next_attempt_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn row_shows_progress_and_rate() {
        let view = TaskView {
            task: task(),
            speed: Some(MIB),
            eta_secs: Some(1.0),
        };
        let row = task_row(&view);
        assert!(row.contains("1.0/2.0 MiB  50%"), "{row}");
        assert!(row.contains("1.00 MiB/s"), "{row}");
        assert!(row.starts_with("7 "));
    }

    #[test]
    fn row_without_total_or_rate() {
        let mut t = task();
        t.bytes_total = None;
        t.last_error = Some("HTTP 503".into());
        t.retry_count = 2;
        let row = task_row(&TaskView {
            task: t,
            speed: None,
            eta_secs: None,
        });
        assert!(row.contains("1.0 MiB"));
        assert!(row.contains("last error (retry 2): HTTP 503"));
    }

    #[test]
    fn row_names_the_original_of_a_duplicate() {
        let mut t = task();
        t.status = TaskStatus::Completed;
        t.duplicate_of = Some(3);
        let row = task_row(&TaskView {
            task: t,
            speed: None,
            eta_secs: None,
        });
        assert!(row.ends_with("same content as task 3"), "{row}");
    }

    #[test]
    fn progress_line_unknown_eta() {
        let line = progress_line(&ProgressEvent {
            task_id: 3,
            bytes_done: 0,
            bytes_total: None,
            speed: 0.0,
            eta_secs: None,
        });
        assert!(line.contains("#3"));
        assert!(line.ends_with("ETA ?"));
    }
}
