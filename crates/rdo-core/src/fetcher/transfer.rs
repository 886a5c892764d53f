//! One HTTP GET via libcurl on the blocking pool, streamed to async code.
//!
//! The blocking side sends the parsed response head first, then body bytes
//! as curl delivers them. Dropping the stream (or its receiver) makes the
//! next curl callback abort the transfer.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::head::{parse_head, ResponseHead};
use crate::retry::TransferError;

/// Frames in flight between curl and the fetcher.
const FRAME_BUFFER: usize = 16;

/// Below this many bytes/s for `stall_timeout` the transfer is a stall.
const LOW_SPEED_LIMIT: u32 = 1024;

#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferOptions {
    pub connect_timeout: Duration,
    pub stall_timeout: Duration,
}

pub(crate) enum Frame {
    Head(ResponseHead),
    Data(Vec<u8>),
}

pub(crate) struct CurlStream {
    rx: mpsc::Receiver<Frame>,
    handle: JoinHandle<Result<(), curl::Error>>,
    stop: Arc<AtomicBool>,
}

impl CurlStream {
    /// Start `GET url`, asking for `bytes=<offset>-` when `offset > 0`.
    pub fn open(url: &str, offset: u64, opts: TransferOptions) -> Self {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_cb = Arc::clone(&stop);
        let url = url.to_string();
        let handle = tokio::task::spawn_blocking(move || perform(&url, offset, opts, tx, &stop_cb));
        Self { rx, handle, stop }
    }

    pub async fn next(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Outcome of the curl transfer; call after `next` returned `None`.
    pub async fn finish(mut self) -> Result<(), TransferError> {
        self.rx.close();
        match (&mut self.handle).await {
            Ok(res) => res.map_err(TransferError::Curl),
            Err(join) => Err(TransferError::Storage(std::io::Error::other(join))),
        }
    }
}

impl Drop for CurlStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn perform(
    url: &str,
    offset: u64,
    opts: TransferOptions,
    tx: mpsc::Sender<Frame>,
    stop: &AtomicBool,
) -> Result<(), curl::Error> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(opts.connect_timeout)?;
    easy.low_speed_limit(LOW_SPEED_LIMIT)?;
    easy.low_speed_time(opts.stall_timeout)?;
    easy.progress(true)?;
    if offset > 0 {
        easy.range(&format!("{offset}-"))?;
    }

    let lines: RefCell<Vec<String>> = RefCell::new(Vec::new());
    let head_sent = Cell::new(false);
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|raw| {
            let line = String::from_utf8_lossy(raw).trim_end().to_string();
            if !line.is_empty() {
                lines.borrow_mut().push(line);
            }
            true
        })?;
        transfer.write_function(|data| {
            if !head_sent.replace(true) {
                let head = parse_head(&lines.borrow());
                if tx.blocking_send(Frame::Head(head)).is_err() {
                    return Ok(0);
                }
            }
            match tx.blocking_send(Frame::Data(data.to_vec())) {
                Ok(()) => Ok(data.len()),
                // Receiver gone: returning short aborts the transfer.
                Err(_) => Ok(0),
            }
        })?;
        transfer.progress_function(|_, _, _, _| !stop.load(Ordering::Relaxed))?;
        transfer.perform()?;
    }

    // Empty body (416, zero-length file): the head still has to reach the reader.
    if !head_sent.get() {
        let _ = tx.blocking_send(Frame::Head(parse_head(&lines.borrow())));
    }
    Ok(())
}
