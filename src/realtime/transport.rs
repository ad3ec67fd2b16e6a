//! Socket.IO websocket transport.
//!
//! Each link owns one background worker. The worker performs the Engine.IO
//! and namespace handshakes, forwards outbound events, answers heartbeats,
//! and retries lost or failed sessions per the link's [`ReconnectPolicy`].

use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::realtime::client::{EventSink, Link, LinkEvent, RealtimeError, RealtimeOptions, Transport};
use crate::realtime::proto::{OpenMsg, Packet};
use crate::retry::{with_timeout, ReconnectPolicy};

const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`SocketIoLink`]s on the ambient tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct SocketIoTransport;

impl Transport for SocketIoTransport {
    fn open(
        &self,
        endpoint: &str,
        options: &RealtimeOptions,
        sink: EventSink,
    ) -> Result<Box<dyn Link>, RealtimeError> {
        let runtime = Handle::try_current().map_err(|err| RealtimeError::Runtime(err.to_string()))?;
        let (commands, command_rx) = mpsc::unbounded_channel();

        runtime.spawn(socket_io_worker(
            endpoint.to_string(),
            options.reconnect.clone(),
            options.connect_timeout,
            command_rx,
            sink,
        ));

        Ok(Box::new(SocketIoLink { commands }))
    }
}

#[derive(Debug)]
enum LinkCommand {
    Emit { event: String, payload: Value },
    Close,
}

/// Handle on a running Socket.IO worker. Dropping it stops the worker.
#[derive(Debug)]
pub struct SocketIoLink {
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl Link for SocketIoLink {
    fn emit(&self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        self.commands
            .send(LinkCommand::Emit {
                event: event.to_string(),
                payload,
            })
            .map_err(|_| RealtimeError::LinkClosed)
    }

    fn close(&self) {
        let _ = self.commands.send(LinkCommand::Close);
    }
}

enum SessionEnd {
    Closed,
    Lost(String),
}

async fn socket_io_worker(
    endpoint: String,
    reconnect: ReconnectPolicy,
    connect_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    sink: EventSink,
) {
    let mut failures = 0usize;

    loop {
        match run_session(&endpoint, connect_timeout, &mut commands, &sink).await {
            Ok(SessionEnd::Closed) => {
                debug!(event = "realtime_link_closed", endpoint = %endpoint);
                return;
            }
            Ok(SessionEnd::Lost(reason)) => {
                sink(LinkEvent::Disconnected { reason });
                failures = 0;
            }
            Err(err) => sink(LinkEvent::ConnectError {
                message: err.to_string(),
            }),
        }

        failures += 1;
        let Some(delay) = reconnect.delay_for_attempt(failures) else {
            sink(LinkEvent::Exhausted {
                attempts: failures - 1,
            });
            return;
        };

        debug!(
            event = "realtime_reconnect_scheduled",
            attempt = failures,
            max_attempts = reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64
        );
        if !wait_before_retry(delay, &mut commands).await {
            return;
        }
    }
}

async fn run_session(
    endpoint: &str,
    connect_timeout: Duration,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
    sink: &EventSink,
) -> Result<SessionEnd, RealtimeError> {
    let (mut socket, open) = tokio::select! {
        handshake = with_timeout(connect_timeout, handshake(endpoint)) => match handshake {
            Ok(result) => result?,
            Err(_) => {
                return Err(RealtimeError::Connection(format!(
                    "handshake timed out after {}ms",
                    connect_timeout.as_millis()
                )))
            }
        },
        _ = wait_for_close(commands) => return Ok(SessionEnd::Closed),
    };

    debug!(event = "realtime_session_open", sid = %open.sid);
    sink(LinkEvent::Connected);

    let heartbeat = Duration::from_millis(open.ping_interval.saturating_add(open.ping_timeout))
        .max(MIN_HEARTBEAT);
    let deadline = tokio::time::sleep(heartbeat);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Emit { event, payload }) => {
                    if let Err(err) = send_packet(&mut socket, &Packet::event(event, payload)).await {
                        return Ok(SessionEnd::Lost(err.to_string()));
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = send_packet(&mut socket, &Packet::Disconnect).await;
                    let _ = socket.close(None).await;
                    return Ok(SessionEnd::Closed);
                }
            },
            _ = &mut deadline => return Ok(SessionEnd::Lost("ping timeout".to_string())),
            inbound = socket.next() => {
                deadline.as_mut().reset(Instant::now() + heartbeat);
                match inbound {
                    Some(Ok(Message::Text(text))) => match Packet::from_text(&text) {
                        Ok(Packet::Ping) => {
                            if let Err(err) = send_packet(&mut socket, &Packet::Pong).await {
                                return Ok(SessionEnd::Lost(err.to_string()));
                            }
                        }
                        Ok(Packet::Event { name, payload }) => sink(LinkEvent::Event { name, payload }),
                        Ok(Packet::Disconnect) => {
                            return Ok(SessionEnd::Lost("io server disconnect".to_string()))
                        }
                        Ok(Packet::Close) => return Ok(SessionEnd::Lost("transport close".to_string())),
                        Ok(Packet::ConnectError(detail)) => {
                            return Ok(SessionEnd::Lost(format!("connect error: {detail}")))
                        }
                        Ok(_) => {}
                        Err(err) => warn!(event = "realtime_packet_rejected", error = %err),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return Ok(SessionEnd::Lost("transport error".to_string()));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(SessionEnd::Lost("transport close".to_string()))
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Ok(SessionEnd::Lost(err.to_string())),
                }
            }
        }
    }
}

async fn handshake(endpoint: &str) -> Result<(Socket, OpenMsg), RealtimeError> {
    let (mut socket, _) = connect_async(endpoint).await?;

    let open = match recv_packet(&mut socket, "engine open").await? {
        Packet::Open(open) => open,
        other => {
            return Err(RealtimeError::Protocol(format!(
                "expected engine open packet, got {other:?}"
            )))
        }
    };
    send_packet(&mut socket, &Packet::Connect(None)).await?;

    loop {
        match recv_packet(&mut socket, "namespace connect").await? {
            Packet::Connect(_) => return Ok((socket, open)),
            Packet::ConnectError(detail) => {
                let message = detail
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| detail.to_string());
                return Err(RealtimeError::Connection(message));
            }
            Packet::Ping => send_packet(&mut socket, &Packet::Pong).await?,
            Packet::Pong | Packet::Noop => {}
            other => {
                return Err(RealtimeError::Protocol(format!(
                    "unexpected packet before namespace connect: {other:?}"
                )))
            }
        }
    }
}

async fn recv_packet<S>(
    socket: &mut tokio_tungstenite::WebSocketStream<S>,
    stage: &str,
) -> Result<Packet, RealtimeError>
where
    tokio_tungstenite::WebSocketStream<S>: futures_util::Sink<Message, Error = WsError>
        + Stream<Item = Result<Message, WsError>>
        + Unpin,
{
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Packet::from_text(&text)?),
            Some(Ok(Message::Ping(payload))) => {
                socket.send(Message::Pong(payload)).await?;
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                return Err(RealtimeError::Protocol(format!(
                    "socket closed before {stage}"
                )));
            }
            Some(Ok(_)) => {
                return Err(RealtimeError::Protocol(format!(
                    "received non-text frame before {stage}"
                )));
            }
            Some(Err(err)) => return Err(RealtimeError::WebSocket(err)),
            None => {
                return Err(RealtimeError::Protocol(format!(
                    "socket ended before {stage}"
                )));
            }
        }
    }
}

async fn send_packet<S>(
    socket: &mut tokio_tungstenite::WebSocketStream<S>,
    packet: &Packet,
) -> Result<(), RealtimeError>
where
    tokio_tungstenite::WebSocketStream<S>: futures_util::Sink<Message, Error = WsError> + Unpin,
{
    socket.send(Message::Text(packet.to_text()?)).await?;
    Ok(())
}

/// Resolves once the owner closes or drops the link. Emits are dropped.
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<LinkCommand>) {
    loop {
        match commands.recv().await {
            Some(LinkCommand::Emit { event, .. }) => {
                debug!(event = "realtime_emit_dropped", name = %event, reason = "handshake in progress");
            }
            Some(LinkCommand::Close) | None => return,
        }
    }
}

/// Sleeps `delay`; returns `false` if the link was closed meanwhile.
async fn wait_before_retry(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = wait_for_close(commands) => false,
    }
}
