//! Control socket: server (during `rdo run`) and client (for every other command).

use anyhow::{Context, Result};
use rdo_core::{Controller, Subscription};
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use super::protocol::{delivery_line, ControlRequest, ControlResponse, QueueStatus};

/// Bind `path` (replacing a stale socket file) and serve requests against
/// `controller` until the returned task is aborted.
pub fn spawn_control_listener(
    controller: Arc<Controller>,
    path: impl AsRef<Path>,
) -> Result<JoinHandle<()>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    tracing::debug!(path = %path.display(), "control socket listening");

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let controller = Arc::clone(&controller);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(controller, stream).await {
                            tracing::debug!("control connection: {}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    }))
}

async fn serve_connection(controller: Arc<Controller>, stream: UnixStream) -> io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match ControlRequest::parse(&line) {
            Ok(ControlRequest::Subscribe) => {
                return stream_events(controller.subscribe(), lines, write).await;
            }
            Ok(request) => dispatch(&controller, request).await,
            Err(reason) => ControlResponse::err(reason),
        };
        write_json_line(&mut write, &response).await?;
    }
    Ok(())
}

/// Forward every delivery until the client hangs up.
async fn stream_events(
    mut events: Subscription,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut write: OwnedWriteHalf,
) -> io::Result<()> {
    loop {
        tokio::select! {
            delivery = events.recv() => {
                let Some(delivery) = delivery else { return Ok(()) };
                let mut line = delivery_line(&delivery).map_err(io::Error::other)?;
                line.push('\n');
                write.write_all(line.as_bytes()).await?;
            }
            incoming = lines.next_line() => {
                if incoming?.is_none() {
                    return Ok(());
                }
            }
        }
    }
}

async fn dispatch(controller: &Controller, request: ControlRequest) -> ControlResponse {
    fn reply<T: Serialize, E: std::fmt::Display>(result: Result<T, E>) -> ControlResponse {
        match result {
            Ok(data) => ControlResponse::ok(data),
            Err(e) => ControlResponse::err(e.to_string()),
        }
    }

    tracing::debug!(?request, "control request");
    match request {
        ControlRequest::Start => {
            controller.start();
            ControlResponse::ok(QueueStatus {
                running: controller.is_running(),
                in_flight: controller.in_flight(),
            })
        }
        ControlRequest::PauseAll => reply(controller.pause_all().await),
        ControlRequest::Pause(id) => reply(controller.pause(id).await),
        ControlRequest::ResumeAll => reply(controller.resume_all().await),
        ControlRequest::Resume(id) => reply(controller.resume(id).await),
        ControlRequest::Cancel(id) => reply(controller.cancel(id).await),
        ControlRequest::Retry { id, fallback } => reply(controller.retry(id, fallback).await),
        ControlRequest::List { failed: false } => reply(controller.list().await),
        ControlRequest::List { failed: true } => reply(controller.list_failed().await),
        ControlRequest::Add(submission) => {
            reply(controller.submit_with(std::slice::from_ref(&submission)).await)
        }
        ControlRequest::Subscribe => ControlResponse::err("subscribe must be the only request"),
    }
}

async fn write_json_line(write: &mut OwnedWriteHalf, value: &impl Serialize) -> io::Result<()> {
    let mut line = serde_json::to_string(value).map_err(io::Error::other)?;
    line.push('\n');
    write.write_all(line.as_bytes()).await
}

/// Connection to a running orchestrator.
pub struct ControlClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl ControlClient {
    /// Connect to `path`. `None` when no orchestrator is listening there.
    pub async fn connect(path: &Path) -> Result<Option<Self>> {
        let stream = match UnixStream::connect(path).await {
            Ok(s) => s,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("connect to {}", path.display()));
            }
        };
        let (read, write) = stream.into_split();
        Ok(Some(Self {
            lines: BufReader::new(read).lines(),
            write,
        }))
    }

    /// Send one request and wait for its response line.
    pub async fn request(&mut self, request: &ControlRequest) -> Result<ControlResponse> {
        self.send(request).await?;
        let line = self
            .lines
            .next_line()
            .await?
            .context("orchestrator closed the control connection")?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Switch the connection into an event stream.
    pub async fn subscribe(mut self) -> Result<EventStream> {
        self.send(&ControlRequest::Subscribe).await?;
        Ok(EventStream { client: self })
    }

    async fn send(&mut self, request: &ControlRequest) -> Result<()> {
        let mut line = request.to_line();
        line.push('\n');
        self.write.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Event lines pushed by the orchestrator after `subscribe`.
///
/// Holds the write half open: the server ends the stream when it sees EOF.
pub struct EventStream {
    client: ControlClient,
}

impl EventStream {
    /// Next JSON event line; `None` once the orchestrator goes away.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.client.lines.next_line().await?)
    }
}
