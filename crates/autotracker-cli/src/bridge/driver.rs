//! Event loop driving a [`TrackerSession`] over a live bridge connection.
//!
//! The driver owns the socket, the timers and the control channel. Every
//! event is handed to the session, the returned actions are carried out, and
//! any state changes are pushed to the notification channel.

use anyhow::{anyhow, Result};
use autotracker_core::error::TrackerError;
use autotracker_core::machine::{Action, ConnectionState, Epoch, ReadState, TrackerSession};
use autotracker_core::state::{EntityState, StateChange, GO_MODE};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bridge::connection::{BridgeConnection, ConnectionEvent};
use crate::bridge::control::Control;
use crate::config::TrackerConfig;

/// One line of tracker output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// An entity's visible state changed.
    Change(StateChange),
    /// The connection moved to a new lifecycle state.
    Connection { state: ConnectionState },
    /// Reply to a `status` control command.
    Status {
        connection: ConnectionState,
        read_state: ReadState,
        in_game: bool,
        entities: Vec<EntityState>,
    },
    /// A control command could not be applied.
    Error { message: String, suggestion: String },
}

impl From<&TrackerError> for Notification {
    fn from(err: &TrackerError) -> Self {
        Notification::Error {
            message: err.to_string(),
            suggestion: err.suggestion().to_string(),
        }
    }
}

/// How a connection ended.
enum Outcome {
    Offline,
    Reconnect,
    Quit,
}

enum Step {
    Event(ConnectionEvent),
    Control(Option<Control>),
}

pub struct Tracker {
    config: TrackerConfig,
    session: TrackerSession,
    notifications: mpsc::UnboundedSender<Notification>,
    /// Last connection state pushed to the notification channel.
    reported: ConnectionState,
}

impl Tracker {
    pub fn new(config: TrackerConfig, notifications: mpsc::UnboundedSender<Notification>) -> Self {
        // Without a read deadline only a poll tick can recover a lost reply
        let session = TrackerSession::new().restart_stalled_on_tick(config.read_timeout.is_none());
        Self {
            config,
            session,
            notifications,
            reported: ConnectionState::Disconnected,
        }
    }

    /// Track until `quit`, or until the control channel closes while offline.
    ///
    /// Dropped connections are not retried; a `connect` command starts a new one.
    pub async fn run(mut self, mut controls: mpsc::Receiver<Control>) -> Result<()> {
        let mut controls_open = true;
        let mut connect = self.config.auto_connect;

        loop {
            if connect {
                match self.run_connection(&mut controls, &mut controls_open).await? {
                    Outcome::Quit => return Ok(()),
                    Outcome::Reconnect => continue,
                    Outcome::Offline => connect = false,
                }
            }

            if !controls_open {
                info!("Control input closed while disconnected, exiting");
                return Ok(());
            }

            match controls.recv().await {
                Some(Control::Connect) => connect = true,
                Some(Control::Quit) => return Ok(()),
                Some(Control::Disconnect) => debug!("Already disconnected"),
                Some(Control::Toggle(identifier)) => self.toggle(&identifier)?,
                Some(Control::Status) => self.status()?,
                None => controls_open = false,
            }
            self.flush()?;
        }
    }

    async fn run_connection(
        &mut self,
        controls: &mut mpsc::Receiver<Control>,
        controls_open: &mut bool,
    ) -> Result<Outcome> {
        let epoch = self.session.connect();
        self.flush()?;
        info!("Connecting to {}", self.config.endpoint);

        let mut conn = match BridgeConnection::open(
            &self.config.endpoint,
            self.config.interval,
            self.config.read_timeout,
        )
        .await
        {
            Ok(conn) => conn,
            Err(e) => {
                error!("{}", e);
                info!("{}", e.suggestion());
                self.session.on_closed(epoch);
                self.flush()?;
                return Ok(Outcome::Offline);
            }
        };

        let actions = self.session.on_open(epoch);
        self.apply(&mut conn, epoch, actions).await;
        self.flush()?;

        loop {
            let step = tokio::select! {
                event = conn.next_event() => Step::Event(event),
                control = controls.recv(), if *controls_open => Step::Control(control),
            };

            let outcome = match step {
                Step::Event(event) => self.handle_event(&mut conn, epoch, event).await,
                Step::Control(None) => {
                    debug!("Control input closed, tracking continues");
                    *controls_open = false;
                    None
                }
                Step::Control(Some(control)) => {
                    self.handle_control(&mut conn, epoch, control).await?
                }
            };

            conn.sync_read_deadline(self.session.read_state().is_awaiting());
            self.flush()?;

            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
            if self.session.connection() == ConnectionState::Disconnected {
                conn.close().await;
                return Ok(Outcome::Offline);
            }
        }
    }

    async fn handle_event(
        &mut self,
        conn: &mut BridgeConnection,
        epoch: Epoch,
        event: ConnectionEvent,
    ) -> Option<Outcome> {
        let actions = match event {
            ConnectionEvent::Frame(message) => self.session.on_message(epoch, message),
            ConnectionEvent::DiscoveryTick => self.session.on_discovery_tick(epoch),
            ConnectionEvent::PollTick => self.session.on_poll_tick(epoch),
            ConnectionEvent::ReadTimeout => self.session.on_read_timeout(epoch),
            ConnectionEvent::Error(message) => {
                self.session.on_error(epoch, &message);
                Vec::new()
            }
            ConnectionEvent::Closed => {
                self.session.on_closed(epoch);
                conn.close().await;
                return Some(Outcome::Offline);
            }
        };
        self.apply(conn, epoch, actions).await;
        None
    }

    async fn handle_control(
        &mut self,
        conn: &mut BridgeConnection,
        epoch: Epoch,
        control: Control,
    ) -> Result<Option<Outcome>> {
        let outcome = match control {
            Control::Toggle(identifier) => {
                self.toggle(&identifier)?;
                None
            }
            Control::Status => {
                self.status()?;
                None
            }
            Control::Disconnect => Some(Outcome::Offline),
            Control::Connect => {
                info!("Restarting bridge connection");
                Some(Outcome::Reconnect)
            }
            Control::Quit => Some(Outcome::Quit),
        };

        if outcome.is_some() {
            let actions = self.session.disconnect();
            self.apply(conn, epoch, actions).await;
        }
        Ok(outcome)
    }

    /// Carry out session actions; a failed send is fed back as a socket error.
    async fn apply(&mut self, conn: &mut BridgeConnection, epoch: Epoch, actions: Vec<Action>) {
        if actions.is_empty() {
            return;
        }
        if let Err(e) = conn.apply(actions).await {
            let message = match e {
                TrackerError::Transport(message) => message,
                other => other.to_string(),
            };
            self.session.on_error(epoch, &message);
        }
    }

    fn toggle(&mut self, identifier: &str) -> Result<()> {
        let state = self.session.state_mut();
        match state.toggle(identifier) {
            Ok(obtained) => {
                info!("Toggled {} -> {}", identifier, obtained);
                if identifier != GO_MODE {
                    state.update_go_mode();
                }
                Ok(())
            }
            Err(e) => {
                warn!("{}", e);
                self.emit(Notification::from(&e))
            }
        }
    }

    fn status(&self) -> Result<()> {
        self.emit(Notification::Status {
            connection: self.session.connection(),
            read_state: self.session.read_state(),
            in_game: self.session.in_game(),
            entities: self.session.state().snapshot(),
        })
    }

    /// Push pending changes and any connection state transition.
    fn flush(&mut self) -> Result<()> {
        let connection = self.session.connection();
        if connection != self.reported {
            self.reported = connection;
            self.emit(Notification::Connection { state: connection })?;
        }
        for change in self.session.state_mut().take_changes() {
            self.emit(Notification::Change(change))?;
        }
        Ok(())
    }

    fn emit(&self, notification: Notification) -> Result<()> {
        self.notifications
            .send(notification)
            .map_err(|_| anyhow!("Notification output closed"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use autotracker_core::memory::Segment;
    use autotracker_core::protocol::{Opcode, Request};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Instant};
    use tokio_tungstenite::tungstenite::Message;

    use super::*;

    fn config(endpoint: String, auto_connect: bool) -> TrackerConfig {
        TrackerConfig {
            endpoint,
            interval: Duration::from_millis(20),
            read_timeout: Some(Duration::from_secs(1)),
            auto_connect,
        }
    }

    fn memory(segment: Segment) -> Vec<u8> {
        let mut bytes = vec![0u8; segment.size()];
        match segment {
            Segment::Party => {
                bytes.fill(0x80);
                bytes[0] = 0;
                bytes[1] = 1;
            }
            Segment::Inventory => bytes[3] = 0xD6,
            Segment::Equipment | Segment::Events => {}
        }
        bytes
    }

    /// Memory reads seen by the fake bridge, with arrival times.
    type Reads = mpsc::UnboundedReceiver<(Segment, Instant)>;

    /// Serve one client the way a bridge with a single attached console would.
    ///
    /// The first `swallow` memory reads get no reply. Every memory read is
    /// reported on the returned channel.
    async fn fake_bridge(swallow: usize) -> (String, Reads, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (reads_tx, reads_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut reads = 0;

            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let request: Request = serde_json::from_str(&text).unwrap();
                let replies = match request.opcode {
                    Opcode::DeviceList => {
                        vec![Message::Text(r#"{"Results":["FAKE SNES"]}"#.to_string())]
                    }
                    Opcode::Info => {
                        vec![Message::Text(r#"{"Results":["1.0","FAKE SNES"]}"#.to_string())]
                    }
                    Opcode::Attach => Vec::new(),
                    Opcode::GetAddress => {
                        let address =
                            u32::from_str_radix(request.operands[0].trim_start_matches("0x"), 16)
                                .unwrap();
                        let segment = Segment::CYCLE
                            .into_iter()
                            .find(|s| s.address() == address)
                            .unwrap();
                        let _ = reads_tx.send((segment, Instant::now()));
                        reads += 1;
                        if reads <= swallow {
                            continue;
                        }
                        let bytes = memory(segment);
                        // Large windows arrive in two frames
                        let (head, tail) = bytes.split_at(bytes.len() / 2);
                        vec![
                            Message::Binary(head.to_vec()),
                            Message::Binary(tail.to_vec()),
                        ]
                    }
                };
                for reply in replies {
                    if ws.send(reply).await.is_err() {
                        return;
                    }
                }
            }
        });

        (format!("ws://{}", addr), reads_rx, handle)
    }

    async fn next_matching<F>(
        rx: &mut mpsc::UnboundedReceiver<Notification>,
        pred: F,
    ) -> Notification
    where
        F: Fn(&Notification) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let notification = rx.recv().await.expect("notification channel closed");
                if pred(&notification) {
                    return notification;
                }
            }
        })
        .await
        .expect("timed out waiting for notification")
    }

    /// Track against a bridge that drops the first read until the pendant shows up.
    async fn pendant_after_lost_read(read_timeout: Option<Duration>) -> Vec<(Segment, Instant)> {
        let (endpoint, mut reads, bridge) = fake_bridge(1).await;
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(8);

        let config = TrackerConfig {
            read_timeout,
            ..config(endpoint, true)
        };
        let run = tokio::spawn(Tracker::new(config, notify_tx).run(control_rx));

        next_matching(&mut notify_rx, |n| {
            matches!(n, Notification::Change(c) if c.identifier == "pendant" && c.obtained)
        })
        .await;

        control_tx.send(Control::Quit).await.unwrap();
        timeout(Duration::from_secs(2), run)
            .await
            .expect("tracker did not stop")
            .unwrap()
            .unwrap();
        bridge.abort();

        std::iter::from_fn(|| reads.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_tracks_items_from_fake_bridge() {
        let (endpoint, _reads, bridge) = fake_bridge(0).await;
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(8);

        let tracker = Tracker::new(config(endpoint, true), notify_tx);
        let run = tokio::spawn(tracker.run(control_rx));

        next_matching(&mut notify_rx, |n| {
            matches!(n, Notification::Connection { state: ConnectionState::Polling })
        })
        .await;

        let change = next_matching(&mut notify_rx, |n| {
            matches!(n, Notification::Change(c) if c.identifier == "pendant")
        })
        .await;
        let Notification::Change(change) = change else {
            unreachable!()
        };
        assert!(change.obtained);

        control_tx.send(Control::Status).await.unwrap();
        let status =
            next_matching(&mut notify_rx, |n| matches!(n, Notification::Status { .. })).await;
        let Notification::Status {
            in_game, entities, ..
        } = status
        else {
            unreachable!()
        };
        assert!(in_game);
        let obtained: Vec<_> = entities
            .iter()
            .filter(|e| e.obtained)
            .map(|e| e.identifier.as_str())
            .collect();
        assert_eq!(obtained, vec!["Crono", "Marle", "pendant"]);

        control_tx.send(Control::Quit).await.unwrap();
        timeout(Duration::from_secs(2), run)
            .await
            .expect("tracker did not stop")
            .unwrap()
            .unwrap();
        bridge.abort();
    }

    #[tokio::test]
    async fn test_stalled_read_times_out_and_polling_resumes() {
        let read_timeout = Duration::from_millis(100);
        let reads = pendant_after_lost_read(Some(read_timeout)).await;

        // The lost party read is only retried once the deadline forced Idle
        assert!(reads.len() >= 5, "reads: {:?}", reads);
        assert_eq!(reads[0].0, Segment::Party);
        assert_eq!(reads[1].0, Segment::Party);
        assert!(reads[1].1 - reads[0].1 >= read_timeout / 2);
    }

    #[tokio::test]
    async fn test_stalled_read_restarts_on_tick_without_read_timeout() {
        let reads = pendant_after_lost_read(None).await;

        assert!(reads.len() >= 5, "reads: {:?}", reads);
        assert_eq!(reads[0].0, Segment::Party);
        assert_eq!(reads[1].0, Segment::Party);
    }

    #[tokio::test]
    async fn test_connection_refused_goes_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(8);
        drop(control_tx);

        let tracker = Tracker::new(config(endpoint, true), notify_tx);
        timeout(Duration::from_secs(5), tracker.run(control_rx))
            .await
            .expect("tracker did not exit")
            .unwrap();

        let states: Vec<_> = std::iter::from_fn(|| notify_rx.try_recv().ok())
            .filter_map(|n| match n {
                Notification::Connection { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[tokio::test]
    async fn test_remote_close_goes_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        let bridge = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.close(None).await;
        });

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(8);
        drop(control_tx);

        let tracker = Tracker::new(config(endpoint, true), notify_tx);
        timeout(Duration::from_secs(5), tracker.run(control_rx))
            .await
            .expect("tracker did not exit")
            .unwrap();
        bridge.await.unwrap();

        let last = std::iter::from_fn(|| notify_rx.try_recv().ok()).last();
        assert_eq!(
            last,
            Some(Notification::Connection {
                state: ConnectionState::Disconnected
            })
        );
    }

    #[tokio::test]
    async fn test_toggle_while_offline() {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(8);

        for control in [
            Control::Toggle("moonstone".to_string()),
            Control::Toggle("sunshade".to_string()),
            Control::Disconnect,
        ] {
            control_tx.send(control).await.unwrap();
        }
        drop(control_tx);

        let tracker = Tracker::new(config("ws://127.0.0.1:1".to_string(), false), notify_tx);
        timeout(Duration::from_secs(2), tracker.run(control_rx))
            .await
            .expect("tracker did not exit")
            .unwrap();

        let notifications: Vec<_> = std::iter::from_fn(|| notify_rx.try_recv().ok()).collect();
        assert_eq!(notifications.len(), 2);
        match &notifications[0] {
            Notification::Change(change) => {
                assert_eq!(change.identifier, "moonstone");
                assert!(change.obtained);
                assert_eq!(change.art.as_deref(), Some("moonstone"));
            }
            other => panic!("expected change, got {:?}", other),
        }
        match &notifications[1] {
            Notification::Error { message, suggestion } => {
                assert!(message.contains("sunshade"));
                assert!(suggestion.contains("autotracker items"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_notification_json_shape() {
        let json = serde_json::to_value(Notification::Connection {
            state: ConnectionState::Attaching,
        })
        .unwrap();
        assert_eq!(json["type"], "connection");
        assert_eq!(json["state"], "attaching");

        let json = serde_json::to_value(Notification::from(&TrackerError::UnknownIdentifier(
            "x".to_string(),
        )))
        .unwrap();
        assert_eq!(json["type"], "error");
        assert!(json["suggestion"].is_string());
    }
}
