//! Polling state machine for a bridge session.
//!
//! [`TrackerSession`] owns everything one connection needs: the read state,
//! the latest memory segments, the in-game flag and the obtained-state store.
//! It performs no I/O. The driver feeds it socket and timer events and carries
//! out the [`Action`]s it returns.
//!
//! # Sequence
//!
//! ```text
//! open ──▶ discovery timer ──▶ DeviceList ──▶ Attach + Info ──▶ poll timer
//!                                                                  │
//!   ┌──────────────────────────────────────────────────────────────┘
//!   ▼
//! party ──▶ equipment ──▶ events ──▶ inventory ──▶ Idle (next tick)
//! ```
//!
//! At most one reply is outstanding at any time. Every event carries the
//! [`Epoch`] of the connection it came from; events from a connection that has
//! since been torn down are dropped.

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::TrackerError;
use crate::items::ResolveContext;
use crate::memory::{decode_party, Segment, SegmentBuffer};
use crate::protocol::{BridgeMessage, Request, ResultsReply};
use crate::state::TrackerState;

/// Which reply the session is waiting for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadState {
    #[default]
    Idle,
    AwaitingDeviceList,
    Attaching,
    AwaitingDeviceInfo,
    AwaitingParty,
    AwaitingEquip,
    AwaitingEvents,
    AwaitingInventory,
}

impl ReadState {
    fn awaiting(segment: Segment) -> Self {
        match segment {
            Segment::Party => ReadState::AwaitingParty,
            Segment::Equipment => ReadState::AwaitingEquip,
            Segment::Events => ReadState::AwaitingEvents,
            Segment::Inventory => ReadState::AwaitingInventory,
        }
    }

    /// The memory segment being read, if any.
    pub fn segment(self) -> Option<Segment> {
        match self {
            ReadState::AwaitingParty => Some(Segment::Party),
            ReadState::AwaitingEquip => Some(Segment::Equipment),
            ReadState::AwaitingEvents => Some(Segment::Events),
            ReadState::AwaitingInventory => Some(Segment::Inventory),
            _ => None,
        }
    }

    /// Whether a reply is outstanding.
    pub fn is_awaiting(self) -> bool {
        !matches!(self, ReadState::Idle | ReadState::Attaching)
    }
}

/// Lifecycle of the bridge connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Socket requested, not yet open.
    Connecting,
    /// Socket open, searching for or attaching to a device.
    Attaching,
    /// Device confirmed, waiting for the first poll tick.
    Attached,
    Polling,
}

/// Generation counter identifying one connection attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Epoch(u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Side effects requested by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(Request),
    StartDiscoveryTimer,
    StopDiscoveryTimer,
    StartPollTimer,
    /// Stop both timers and close the socket.
    Close,
}

/// Latest copy of each memory segment.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    pub party: Option<SegmentBuffer>,
    pub equipment: Option<SegmentBuffer>,
    pub events: Option<SegmentBuffer>,
    pub inventory: Option<SegmentBuffer>,
}

impl MemorySnapshot {
    pub fn get(&self, segment: Segment) -> Option<&SegmentBuffer> {
        match segment {
            Segment::Party => self.party.as_ref(),
            Segment::Equipment => self.equipment.as_ref(),
            Segment::Events => self.events.as_ref(),
            Segment::Inventory => self.inventory.as_ref(),
        }
    }

    fn store(&mut self, segment: Segment, buffer: SegmentBuffer) {
        let slot = match segment {
            Segment::Party => &mut self.party,
            Segment::Equipment => &mut self.equipment,
            Segment::Events => &mut self.events,
            Segment::Inventory => &mut self.inventory,
        };
        *slot = Some(buffer);
    }
}

/// One tracker session: connection state machine plus tracker state.
#[derive(Debug, Default)]
pub struct TrackerSession {
    epoch: Epoch,
    connection: ConnectionState,
    read_state: ReadState,
    in_game: bool,
    /// Binary frames received so far for the outstanding memory read.
    pending: Vec<u8>,
    memory: MemorySnapshot,
    state: TrackerState,
    /// Restart the cycle when a poll tick finds a segment read outstanding.
    restart_stalled_on_tick: bool,
}

impl TrackerSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let poll ticks recover stalled segment reads.
    ///
    /// Needed when the driver arms no read deadline, otherwise a lost reply
    /// would stop polling for good.
    pub fn restart_stalled_on_tick(mut self, enabled: bool) -> Self {
        self.restart_stalled_on_tick = enabled;
        self
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    pub fn in_game(&self) -> bool {
        self.in_game
    }

    pub fn memory(&self) -> &MemorySnapshot {
        &self.memory
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut TrackerState {
        &mut self.state
    }

    /// Begin a new connection attempt.
    ///
    /// Machine state starts clean; obtained state is kept. Returns the epoch
    /// every event for this connection must carry.
    pub fn connect(&mut self) -> Epoch {
        self.epoch = Epoch(self.epoch.0 + 1);
        self.connection = ConnectionState::Connecting;
        self.read_state = ReadState::Idle;
        self.in_game = false;
        self.pending.clear();
        self.memory = MemorySnapshot::default();
        debug!("Starting connection {}", self.epoch);
        self.epoch
    }

    /// The socket opened.
    pub fn on_open(&mut self, epoch: Epoch) -> Vec<Action> {
        if !self.accepts(epoch) {
            return Vec::new();
        }
        info!("Connected to bridge");
        info!("Searching for device...");
        self.connection = ConnectionState::Attaching;
        vec![Action::StartDiscoveryTimer]
    }

    /// The discovery timer fired.
    pub fn on_discovery_tick(&mut self, epoch: Epoch) -> Vec<Action> {
        if !self.accepts(epoch) || self.connection != ConnectionState::Attaching {
            return Vec::new();
        }
        if !matches!(
            self.read_state,
            ReadState::Idle | ReadState::AwaitingDeviceList
        ) {
            return Vec::new();
        }
        self.transition(ReadState::AwaitingDeviceList);
        vec![Action::Send(Request::device_list())]
    }

    /// The poll timer fired. Starts a cycle unless one is still running, or
    /// restarts a stalled one if that is enabled.
    pub fn on_poll_tick(&mut self, epoch: Epoch) -> Vec<Action> {
        if !self.accepts(epoch)
            || !matches!(
                self.connection,
                ConnectionState::Attached | ConnectionState::Polling
            )
        {
            return Vec::new();
        }
        if self.read_state != ReadState::Idle {
            match self.read_state.segment() {
                Some(segment) if self.restart_stalled_on_tick => {
                    warn!("Stalled read: no reply for {}, restarting cycle", segment);
                }
                _ => {
                    debug!("Skipping poll tick while {:?}", self.read_state);
                    return Vec::new();
                }
            }
        }
        self.connection = ConnectionState::Polling;
        vec![self.request(Segment::Party)]
    }

    /// A frame arrived from the bridge.
    pub fn on_message(&mut self, epoch: Epoch, message: BridgeMessage) -> Vec<Action> {
        if !self.accepts(epoch) {
            return Vec::new();
        }
        match self.read_state {
            ReadState::Idle | ReadState::Attaching => {
                debug!("Ignoring unsolicited frame while {:?}", self.read_state);
                Vec::new()
            }
            ReadState::AwaitingDeviceList => self.handle_device_list(message),
            ReadState::AwaitingDeviceInfo => self.handle_device_info(),
            ReadState::AwaitingParty
            | ReadState::AwaitingEquip
            | ReadState::AwaitingEvents
            | ReadState::AwaitingInventory => match self.read_state.segment() {
                Some(segment) => self.handle_memory(segment, message),
                None => Vec::new(),
            },
        }
    }

    /// The transport reported an error. The socket closes itself afterwards.
    pub fn on_error(&mut self, epoch: Epoch, message: &str) {
        if !self.accepts(epoch) {
            return;
        }
        let err = TrackerError::Transport(message.to_string());
        error!("{}", err);
        self.reset_read();
    }

    /// No reply arrived within the read timeout.
    pub fn on_read_timeout(&mut self, epoch: Epoch) -> Vec<Action> {
        if !self.accepts(epoch) || !self.read_state.is_awaiting() {
            return Vec::new();
        }
        let stalled = self.read_state;
        warn!("Stalled read: no reply while {:?}, returning to idle", stalled);
        self.reset_read();

        if stalled == ReadState::AwaitingDeviceInfo {
            // The poll timer never started, so discovery has to run again.
            info!("Searching for device...");
            self.connection = ConnectionState::Attaching;
            return vec![Action::StartDiscoveryTimer];
        }
        Vec::new()
    }

    /// The socket closed.
    pub fn on_closed(&mut self, epoch: Epoch) {
        if epoch != self.epoch || self.connection == ConnectionState::Disconnected {
            return;
        }
        info!("Disconnected from bridge");
        self.connection = ConnectionState::Disconnected;
        self.reset_read();
    }

    /// Tear down the connection. Calling this again is a no-op.
    pub fn disconnect(&mut self) -> Vec<Action> {
        if self.connection == ConnectionState::Disconnected {
            return Vec::new();
        }
        info!("Disconnecting from bridge");
        self.connection = ConnectionState::Disconnected;
        self.reset_read();
        vec![Action::Close]
    }

    fn accepts(&self, epoch: Epoch) -> bool {
        if epoch != self.epoch || self.connection == ConnectionState::Disconnected {
            debug!("Dropping event from stale connection {}", epoch);
            return false;
        }
        true
    }

    fn transition(&mut self, next: ReadState) {
        debug!("Read state {:?} -> {:?}", self.read_state, next);
        self.read_state = next;
    }

    fn reset_read(&mut self) {
        self.pending.clear();
        self.transition(ReadState::Idle);
    }

    fn request(&mut self, segment: Segment) -> Action {
        self.pending.clear();
        self.transition(ReadState::awaiting(segment));
        Action::Send(Request::get_address(segment.address(), segment.size()))
    }

    fn protocol_error(&mut self, err: TrackerError) -> Vec<Action> {
        warn!("{} ({})", err, err.suggestion());
        self.reset_read();
        Vec::new()
    }

    fn handle_device_list(&mut self, message: BridgeMessage) -> Vec<Action> {
        let text = match message {
            BridgeMessage::Text(text) => text,
            BridgeMessage::Binary(_) => {
                return self.protocol_error(TrackerError::Protocol(
                    "binary reply to DeviceList".to_string(),
                ))
            }
        };
        let reply = match ResultsReply::parse(&text) {
            Ok(reply) => reply,
            Err(e) => return self.protocol_error(e),
        };

        let Some(device) = reply.results.into_iter().next() else {
            debug!("No devices found yet");
            self.transition(ReadState::Idle);
            return Vec::new();
        };

        info!("Attaching to: {}", device);
        self.transition(ReadState::Attaching);
        let mut actions = vec![
            Action::StopDiscoveryTimer,
            Action::Send(Request::attach(device)),
        ];
        self.transition(ReadState::AwaitingDeviceInfo);
        actions.push(Action::Send(Request::info()));
        actions
    }

    fn handle_device_info(&mut self) -> Vec<Action> {
        info!("Successfully attached to device");
        info!("Starting autotracking");
        self.connection = ConnectionState::Attached;
        self.transition(ReadState::Idle);
        vec![Action::StartPollTimer]
    }

    fn handle_memory(&mut self, segment: Segment, message: BridgeMessage) -> Vec<Action> {
        let data = match message {
            BridgeMessage::Binary(data) => data,
            BridgeMessage::Text(text) => {
                return self.protocol_error(TrackerError::Protocol(format!(
                    "text reply to {} read: {}",
                    segment, text
                )))
            }
        };

        self.pending.extend_from_slice(&data);
        let expected = segment.size();
        let actual = self.pending.len();
        if actual < expected {
            debug!("{} read: {}/{} bytes", segment, actual, expected);
            return Vec::new();
        }
        if actual > expected {
            return self.protocol_error(TrackerError::SegmentLength {
                segment,
                expected,
                actual,
            });
        }

        let buffer = SegmentBuffer::new(std::mem::take(&mut self.pending));
        self.apply_segment(segment, buffer);

        match segment.next() {
            Some(next) => vec![self.request(next)],
            None => {
                self.transition(ReadState::Idle);
                Vec::new()
            }
        }
    }

    fn apply_segment(&mut self, segment: Segment, buffer: SegmentBuffer) {
        if segment == Segment::Party {
            let party = decode_party(&buffer);
            if party.in_game() != self.in_game {
                info!("In game: {}", party.in_game());
            }
            self.in_game = party.in_game();
            if self.in_game {
                self.state.apply_party(&party);
            }
            self.memory.store(segment, buffer);
            return;
        }

        if !self.in_game {
            return;
        }
        self.memory.store(segment, buffer);

        match segment {
            Segment::Party | Segment::Equipment => {}
            Segment::Events => {
                if let Some(events) = self.memory.get(Segment::Events) {
                    self.state.apply_events(events);
                }
            }
            Segment::Inventory => {
                let empty = SegmentBuffer::default();
                let ctx = ResolveContext {
                    inventory: self.memory.get(Segment::Inventory).unwrap_or(&empty),
                    equipment: self.memory.get(Segment::Equipment).unwrap_or(&empty),
                    events: self.memory.get(Segment::Events).unwrap_or(&empty),
                };
                self.state.apply_items(&ctx);
                self.state.update_go_mode();
            }
        }
    }
}
