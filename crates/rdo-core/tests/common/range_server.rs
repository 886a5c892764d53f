//! Minimal HTTP/1.1 server with Range GET support for integration tests.
//!
//! Serves one static body at every path. Can inject failures (leading error
//! statuses, a fixed status, a truncated first body), ignore ranges, and
//! throttle the body. Records the range offset of every GET it receives.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct RangeServerOptions {
    /// The first N GETs are answered with 503.
    pub fail_first: usize,
    /// Every GET is answered with this status and an empty body.
    pub fixed_status: Option<u16>,
    /// GET ignores Range and always returns 200 with the full body.
    pub ignore_range: bool,
    /// The first GET sends only this many body bytes, then closes.
    pub truncate_first: Option<usize>,
    /// Body is written in slices of this size with `throttle_delay` between.
    pub throttle_slice: Option<usize>,
    pub throttle_delay: Duration,
}

struct State {
    body: Vec<u8>,
    opts: RangeServerOptions,
    gets: AtomicUsize,
    offsets: Mutex<Vec<u64>>,
}

pub struct RangeServer {
    base: String,
    state: Arc<State>,
}

impl RangeServer {
    /// URL for a named file on this server (the path is only used for naming).
    pub fn url(&self, name: &str) -> String {
        format!("{}{}", self.base, name)
    }

    /// Number of GET requests served so far.
    pub fn gets(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }

    /// Range start of every GET in arrival order (0 when no Range was sent).
    pub fn offsets(&self) -> Vec<u64> {
        self.state.offsets.lock().unwrap().clone()
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

/// Starts a server in a background thread. It runs until the process exits.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(State {
        body,
        opts,
        gets: AtomicUsize::new(0),
        offsets: Mutex::new(Vec::new()),
    });
    let server_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&server_state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    RangeServer {
        base: format!("http://127.0.0.1:{}/", port),
        state,
    }
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(30)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range_start) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    }

    let nth = state.gets.fetch_add(1, Ordering::SeqCst);
    state.offsets.lock().unwrap().push(range_start.unwrap_or(0));
    let opts = state.opts;
    let body = &state.body[..];
    let total = body.len() as u64;

    if let Some(code) = opts.fixed_status {
        let _ = write_head(&mut stream, &format!("{} Injected", code), 0, None);
        return;
    }
    if nth < opts.fail_first {
        let _ = write_head(&mut stream, "503 Service Unavailable", 0, None);
        return;
    }

    let (status, content_range, slice) = match range_start {
        Some(start) if !opts.ignore_range => {
            if start >= total {
                let _ = write_head(
                    &mut stream,
                    "416 Range Not Satisfiable",
                    0,
                    Some(format!("bytes */{}", total)),
                );
                return;
            }
            (
                "206 Partial Content",
                Some(format!("bytes {}-{}/{}", start, total - 1, total)),
                &body[start as usize..],
            )
        }
        _ => ("200 OK", None, body),
    };

    if write_head(&mut stream, status, slice.len(), content_range).is_err() {
        return;
    }
    let slice = match opts.truncate_first {
        Some(cut) if nth == opts.fail_first => &slice[..cut.min(slice.len())],
        _ => slice,
    };
    match opts.throttle_slice {
        Some(size) => {
            for part in slice.chunks(size.max(1)) {
                if stream.write_all(part).is_err() {
                    return;
                }
                thread::sleep(opts.throttle_delay);
            }
        }
        None => {
            let _ = stream.write_all(slice);
        }
    }
}

fn write_head(
    stream: &mut TcpStream,
    status: &str,
    content_length: usize,
    content_range: Option<String>,
) -> std::io::Result<()> {
    let range = content_range
        .map(|r| format!("Content-Range: {}\r\n", r))
        .unwrap_or_default();
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Accept-Ranges: bytes\r\nConnection: close\r\n\r\n",
        status, content_length, range
    );
    stream.write_all(head.as_bytes())
}

/// Returns (method, start offset of `Range: bytes=X-`).
fn parse_request(request: &str) -> (&str, Option<u64>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, _)) = spec.split_once('-') {
                        range = a.trim().parse::<u64>().ok();
                    }
                }
            }
        }
    }
    (method, range)
}
