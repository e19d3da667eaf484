//! WebSocket transport and timers for one bridge connection.
//!
//! [`BridgeConnection`] carries out the [`Action`]s the session returns and
//! turns socket frames and timer ticks into [`ConnectionEvent`]s.

use std::time::Duration;

use autotracker_core::error::TrackerError;
use autotracker_core::machine::Action;
use autotracker_core::protocol::{BridgeMessage, Request};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something the driver has to feed into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Frame(BridgeMessage),
    Error(String),
    Closed,
    DiscoveryTick,
    PollTick,
    ReadTimeout,
}

pub struct BridgeConnection {
    sink: SplitSink<Socket, Message>,
    stream: SplitStream<Socket>,
    discovery: Option<Interval>,
    poll: Option<Interval>,
    /// When the outstanding request is declared stalled.
    read_deadline: Option<Instant>,
    period: Duration,
    read_timeout: Option<Duration>,
}

impl BridgeConnection {
    /// Open the WebSocket. Timers stay stopped until the session asks for them.
    pub async fn open(
        endpoint: &str,
        period: Duration,
        read_timeout: Option<Duration>,
    ) -> Result<Self, TrackerError> {
        let (socket, _response) = connect_async(endpoint)
            .await
            .map_err(|e| TrackerError::Transport(format!("{}: {}", endpoint, e)))?;
        let (sink, stream) = socket.split();

        Ok(Self {
            sink,
            stream,
            discovery: None,
            poll: None,
            read_deadline: None,
            period,
            read_timeout,
        })
    }

    /// Carry out session actions in order.
    pub async fn apply(&mut self, actions: Vec<Action>) -> Result<(), TrackerError> {
        for action in actions {
            match action {
                Action::Send(request) => self.send(&request).await?,
                Action::StartDiscoveryTimer => self.discovery = Some(self.timer()),
                Action::StopDiscoveryTimer => self.discovery = None,
                Action::StartPollTimer => self.poll = Some(self.timer()),
                Action::Close => self.close().await,
            }
        }
        Ok(())
    }

    /// Drop the stall deadline once nothing is outstanding.
    pub fn sync_read_deadline(&mut self, awaiting: bool) {
        if !awaiting {
            self.read_deadline = None;
        }
    }

    /// Stop both timers and close the socket.
    pub async fn close(&mut self) {
        self.discovery = None;
        self.poll = None;
        self.read_deadline = None;
        if let Err(e) = self.sink.close().await {
            debug!("Error closing bridge socket: {}", e);
        }
    }

    /// Wait for the next frame, tick or timeout.
    ///
    /// Control frames (ping, pong) are handled by the socket and skipped.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            let deadline = self.read_deadline;
            tokio::select! {
                frame = self.stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received text frame: {}", text);
                        return ConnectionEvent::Frame(BridgeMessage::Text(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Received binary frame: {} bytes", data.len());
                        return ConnectionEvent::Frame(BridgeMessage::Binary(data));
                    }
                    Some(Ok(Message::Close(_))) | None => return ConnectionEvent::Closed,
                    Some(Ok(_)) => continue,
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                        return ConnectionEvent::Closed;
                    }
                    Some(Err(e)) => return ConnectionEvent::Error(e.to_string()),
                },
                _ = tick(&mut self.discovery) => return ConnectionEvent::DiscoveryTick,
                _ = tick(&mut self.poll) => return ConnectionEvent::PollTick,
                _ = stall(deadline) => {
                    self.read_deadline = None;
                    return ConnectionEvent::ReadTimeout;
                }
            }
        }
    }

    async fn send(&mut self, request: &Request) -> Result<(), TrackerError> {
        let json =
            serde_json::to_string(request).map_err(|e| TrackerError::Protocol(e.to_string()))?;
        debug!("Sending: {}", json);
        self.sink
            .send(Message::Text(json))
            .await
            .map_err(|e| TrackerError::Transport(e.to_string()))?;

        if request.expects_reply() {
            self.read_deadline = self.read_timeout.map(|timeout| Instant::now() + timeout);
        }
        Ok(())
    }

    /// First tick one period from now, then every period.
    fn timer(&self) -> Interval {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn stall(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
