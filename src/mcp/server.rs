//! stdio server loop.
//!
//! One stdio connection is one [`Session`]. The loop has three parts:
//!
//! 1. **Reader task**: frames lines off the input and forwards them.
//! 2. **Main loop**: parses each line. `initialize` and notifications are
//!    handled in arrival order; every other request runs on its own task so a
//!    slow tool call does not hold up the next request.
//! 3. **Writer task**: owns the output and writes replies and
//!    `list_changed` notifications as they arrive.
//!
//! Replies may therefore leave out of order; clients correlate them by ID.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::capability::CapabilityKind;
use crate::mcp::dispatcher::Dispatcher;
use crate::mcp::protocol::{parse_message, IncomingMessage, JsonRpcError, JsonRpcReply, OutgoingNotification};
use crate::mcp::session::{Session, SessionState};
use crate::mcp::transport::{self, MessageReader, MessageWriter};

const OUTBOUND_CAPACITY: usize = 256;
const INBOUND_CAPACITY: usize = 64;

#[derive(Debug)]
enum Outbound {
    Reply(JsonRpcReply),
    Notify(OutgoingNotification),
}

/// Serves the dispatcher over a line-delimited stream.
#[derive(Debug, Clone)]
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
}

impl McpServer {
    /// Creates a server around a shared dispatcher.
    #[must_use]
    pub const fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// The dispatcher in use.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Serves stdin/stdout until EOF or a shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&self) -> io::Result<()> {
        let (reader, writer) = transport::stdio();
        let metrics = Arc::clone(self.dispatcher.metrics());

        let shutdown = async move {
            match shutdown_signal().await {
                Ok(signal) => tracing::info!(signal, "Received signal, initiating graceful shutdown"),
                Err(e) => {
                    tracing::error!(error = %e, "Cannot install signal handlers");
                    std::future::pending::<()>().await;
                }
            }
            metrics.begin_shutdown();
        };

        self.serve(reader, writer, shutdown).await
    }

    /// Serves one session over `reader`/`writer` until EOF or `shutdown`.
    ///
    /// On EOF, requests already running are allowed to finish and their
    /// replies are written. On shutdown they are cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub async fn serve<R, W, S>(&self, reader: MessageReader<R>, writer: MessageWriter<W>, shutdown: S) -> io::Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        let session = Arc::new(Session::connected(Uuid::new_v4().to_string()));
        let metrics = Arc::clone(self.dispatcher.metrics());
        metrics.session_opened();
        tracing::info!(session = session.id(), "Session opened");

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let writer_task = tokio::spawn(write_loop(writer, out_rx));
        let notifier = tokio::spawn(forward_list_changed(
            self.dispatcher.registry().subscribe(),
            Arc::clone(&session),
            out_tx.clone(),
        ));

        let (line_tx, mut line_rx) = mpsc::channel(INBOUND_CAPACITY);
        let reader_task = tokio::spawn(read_loop(reader, line_tx));

        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        let mut interrupted = false;
        let result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    interrupted = true;
                    break Ok(());
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Request task failed");
                    }
                }

                line = line_rx.recv() => match line {
                    None => {
                        tracing::info!(session = session.id(), "Input closed");
                        break Ok(());
                    }
                    Some(Ok(line)) => self.handle_line(&line, &session, &out_tx, &mut in_flight).await,
                    Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                        tracing::warn!(error = %e, "Unreadable message");
                        let _ = out_tx.send(Outbound::Reply(JsonRpcError::parse_error().into())).await;
                    }
                    Some(Err(e)) => break Err(e),
                },
            }
        };

        if interrupted {
            in_flight.shutdown().await;
        } else {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Request task failed");
                }
            }
        }

        reader_task.abort();
        notifier.abort();
        let _ = notifier.await;
        drop(out_tx);

        session.close();
        metrics.session_closed();
        tracing::info!(session = session.id(), "Session closed");

        let written = match writer_task.await {
            Ok(written) => written,
            Err(e) => Err(io::Error::other(e)),
        };
        result.and(written)
    }

    async fn handle_line(
        &self,
        line: &str,
        session: &Arc<Session>,
        out: &mpsc::Sender<Outbound>,
        in_flight: &mut JoinSet<()>,
    ) {
        if line.trim().is_empty() {
            return;
        }

        let request = match parse_message(line) {
            Ok(IncomingMessage::Request(req)) => req,
            Ok(IncomingMessage::Notification(notif)) => {
                self.dispatcher.handle_notification(session, &notif);
                return;
            }
            Err(error) => {
                self.dispatcher.metrics().record_error();
                let _ = out.send(Outbound::Reply(error.into())).await;
                return;
            }
        };

        if request.method == "initialize" {
            let reply = self.dispatcher.handle_request(session, request).await;
            let _ = out.send(Outbound::Reply(reply)).await;
            return;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let session = Arc::clone(session);
        let out = out.clone();
        in_flight.spawn(async move {
            let reply = dispatcher.handle_request(&session, request).await;
            let _ = out.send(Outbound::Reply(reply)).await;
        });
    }
}

async fn read_loop<R>(mut reader: MessageReader<R>, lines: mpsc::Sender<io::Result<String>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                if lines.send(Ok(line)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let fatal = e.kind() != io::ErrorKind::InvalidData;
                if lines.send(Err(e)).await.is_err() || fatal {
                    return;
                }
            }
        }
    }
}

async fn write_loop<W>(mut writer: MessageWriter<W>, mut outbound: mpsc::Receiver<Outbound>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Reply(reply) => writer.write_reply(&reply).await?,
            Outbound::Notify(notification) => writer.write_notification(&notification).await?,
        }
    }
    Ok(())
}

async fn forward_list_changed(mut versions: watch::Receiver<u64>, session: Arc<Session>, out: mpsc::Sender<Outbound>) {
    while versions.changed().await.is_ok() {
        if session.state() != SessionState::Ready {
            continue;
        }
        tracing::debug!(session = session.id(), version = *versions.borrow(), "Notifying list changes");
        for kind in CapabilityKind::ALL {
            if out
                .send(Outbound::Notify(OutgoingNotification::list_changed(kind)))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

/// Waits for SIGINT or SIGTERM and returns the signal's name.
///
/// # Errors
///
/// Returns an error if the handlers cannot be installed.
#[cfg(unix)]
pub async fn shutdown_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

/// Waits for Ctrl+C.
///
/// # Errors
///
/// Returns an error if the handler cannot be installed.
#[cfg(windows)]
pub async fn shutdown_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

/// Reloads the configuration every time SIGHUP arrives.
///
/// # Errors
///
/// Returns an error if the handler cannot be installed.
#[cfg(unix)]
pub fn spawn_reload_on_hangup(dispatcher: Arc<Dispatcher>) -> io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, reloading configuration");
            let dispatcher = Arc::clone(&dispatcher);
            match tokio::task::spawn_blocking(move || dispatcher.reload()).await {
                Ok(Ok(snapshot)) => tracing::debug!(version = snapshot.version(), "SIGHUP reload applied"),
                Ok(Err(_)) => {}
                Err(e) => tracing::error!(error = %e, "Reload task failed"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::capability::{handler_fn, CapabilityDescriptor, InvocationResult};
    use crate::mcp::dispatcher::DispatcherSettings;
    use crate::provider::StaticProvider;
    use crate::registry::{CapabilityRegistry, SnapshotBuilder};

    fn server() -> McpServer {
        let slow = CapabilityDescriptor::tool(
            "slow",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                InvocationResult::text("slow done")
            }),
        );
        let fast = CapabilityDescriptor::tool("fast", handler_fn(|_| async { InvocationResult::text("fast done") }));
        let mut builder = SnapshotBuilder::new(Duration::from_secs(5));
        builder.add_provider(&StaticProvider::new("t", vec![slow, fast])).unwrap();
        let registry = Arc::new(CapabilityRegistry::with_snapshot(builder.finish()));
        McpServer::new(Arc::new(Dispatcher::new(registry, DispatcherSettings::default())))
    }

    #[tokio::test]
    async fn pipelined_requests_complete_out_of_order() {
        let server = server();
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (client_read, mut client_write) = tokio::io::split(client);

        let serving = tokio::spawn(async move {
            server
                .serve(
                    MessageReader::new(server_read),
                    MessageWriter::new(server_write),
                    std::future::pending(),
                )
                .await
        });

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"slow"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":"b","method":"tools/call","params":{"name":"fast"}}"#,
            "\n",
        );
        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let mut ids = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            let value: Value = serde_json::from_str(&line).unwrap();
            ids.push(value["id"].clone());
        }

        assert_eq!(ids, [Value::from(1), Value::from("b"), Value::from("a")]);
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn garbage_line_gets_parse_error_and_session_continues() {
        let server = server();
        let input: &[u8] = b"this is not json\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n";
        let mut output = Vec::new();
        let (out_read, out_write) = tokio::io::duplex(16 * 1024);

        server
            .serve(MessageReader::new(input), MessageWriter::new(out_write), std::future::pending())
            .await
            .unwrap();

        let mut reader = BufReader::new(out_read);
        let mut line = String::new();
        while reader.read_line(&mut line).await.unwrap() > 0 {
            output.push(serde_json::from_str::<Value>(line.trim()).unwrap());
            line.clear();
        }

        assert_eq!(output[0]["error"]["code"], -32700);
        assert_eq!(output[0]["id"], Value::Null);
        // ping before initialize
        assert_eq!(output[1]["error"]["code"], -32600);
        assert_eq!(output[1]["id"], 2);
    }
}
