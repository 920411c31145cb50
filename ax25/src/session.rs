//! Connected-mode AX.25 link state machine.
//!
//! A `Session` owns everything about one link between a local and a remote
//! station: connection state, sequence variables, the send queue and the
//! T1/T2/T3 timers. It performs no I/O. Every operation takes the current
//! time and returns a list of `Output`s for the caller to act on, either a
//! frame to transmit or an event for the application.
//!
//! ```text
//!                connect()            UA
//! Disconnected ───────────> Connecting ───> Connected
//!      ^                        │               │ disconnect()
//!      │   DM / T1 exhausted    │               v
//!      └────────────────────────┴────────── Disconnecting
//!                          UA / DM / T1 exhausted
//! ```
//!
//! Timer deadlines are exposed through `poll_timeout`. When one passes, the
//! caller invokes `handle_timeout` and the expiry is processed through the
//! same path as an inbound frame.

use std::time::{Duration, Instant};

use crate::error::{FrameError, SessionError};
use crate::frame::{
    Address, Ax25Frame, CommandResponse, Disconnect, DisconnectedMode, FrameContent, Information,
    ProtocolIdentifier, ReceiveReady, Reject, RouteEntry, SetAsynchronousBalancedMode,
    SetAsynchronousBalancedModeExtended, UnnumberedAcknowledge, MAX_REPEATERS,
};
use crate::sequence::{distance, Modulo};
use crate::timer::{Timer, TimerExpiry, TimerKind, TimerToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Something the application needs to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Payload from an in-order I frame or any UI frame.
    Data(Vec<u8>),
    /// The link came up (`true`) or went down (`false`).
    Connection(bool),
    /// An operation was misused. The session has already recovered.
    Error(SessionError),
}

/// Work produced by a session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Encode this frame and hand it to the transport.
    Transmit(Ax25Frame),
    Event(Event),
}

/// Link parameters. Modify through `Session` setters once a session exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub modulo: Modulo,
    /// Maximum number of outstanding I frames (k).
    pub window_size: u8,
    /// Maximum information field length of an outgoing I frame (N1).
    pub max_info_length: usize,
    /// How many times T1 and T3 fire before giving up (N2).
    pub retries: u32,
    /// Bits per second on the radio link, used to scale T1.
    pub link_speed: u32,
    /// T1 interval with nothing outstanding.
    pub ack_time: Duration,
    pub t2: Duration,
    pub t3: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            modulo: Modulo::Eight,
            window_size: 7,
            max_info_length: 256,
            retries: 10,
            link_speed: 1200,
            ack_time: Duration::from_secs(3),
            t2: Duration::from_secs(1),
            t3: Duration::from_secs(180),
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), SessionError> {
        check_window(self.window_size, self.modulo)?;
        check_nonzero("max_info_length", self.max_info_length as u64)?;
        check_nonzero("retries", self.retries as u64)?;
        check_nonzero("link_speed", self.link_speed as u64)?;
        Ok(())
    }
}

fn check_window(window_size: u8, modulo: Modulo) -> Result<(), SessionError> {
    if window_size == 0 || window_size > modulo.max_window() {
        return Err(SessionError::InvalidField {
            field: "window_size",
            reason: format!(
                "{} must be from 1 to {} for {}",
                window_size,
                modulo.max_window(),
                modulo
            ),
        });
    }
    Ok(())
}

fn check_nonzero(field: &'static str, value: u64) -> Result<(), SessionError> {
    if value == 0 {
        return Err(SessionError::InvalidField {
            field,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct QueuedFrame {
    pid: ProtocolIdentifier,
    info: Vec<u8>,
    send_sequence: u8,
    sent: bool,
}

/// Everything a session reacts to. Application calls, inbound frames and
/// timer expiries all funnel through `Session::step`.
#[derive(Debug)]
enum Input {
    Connect,
    Disconnect,
    Send(Vec<u8>),
    Frame(Ax25Frame),
    TimerExpired(TimerToken),
}

#[derive(Debug, Clone)]
pub struct Session {
    config: SessionConfig,
    local: Option<Address>,
    remote: Option<Address>,
    /// Repeaters to transmit through, in order.
    route: Vec<Address>,
    state: SessionState,
    /// V(S): next send sequence number.
    send_state: u8,
    /// V(R): next expected receive sequence number.
    receive_state: u8,
    /// V(A): oldest unacknowledged send sequence number.
    acknowledge_state: u8,
    remote_busy: bool,
    reject_outstanding: bool,
    ack_pending: bool,
    poll_outstanding: bool,
    retransmit: bool,
    queue: Vec<QueuedFrame>,
    t1: Timer,
    t2: Timer,
    t3: Timer,
}

impl Default for Session {
    fn default() -> Self {
        Session::from_valid_config(SessionConfig::default())
    }
}

impl Session {
    /// A disconnected session with default parameters and no addresses.
    pub fn new() -> Session {
        Session::default()
    }

    pub fn with_config(config: SessionConfig) -> Result<Session, SessionError> {
        config.validate()?;
        Ok(Session::from_valid_config(config))
    }

    fn from_valid_config(config: SessionConfig) -> Session {
        let t1 = Timer::new(TimerKind::T1, config.ack_time, config.retries);
        // T2 is single shot
        let t2 = Timer::new(TimerKind::T2, config.t2, 0);
        let t3 = Timer::new(TimerKind::T3, config.t3, config.retries);
        Session {
            config,
            local: None,
            remote: None,
            route: Vec::new(),
            state: SessionState::Disconnected,
            send_state: 0,
            receive_state: 0,
            acknowledge_state: 0,
            remote_busy: false,
            reject_outstanding: false,
            ack_pending: false,
            poll_outstanding: false,
            retransmit: false,
            queue: Vec::new(),
            t1,
            t2,
            t3,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The sequence space in use. Inbound frames should be decoded with this.
    pub fn modulo(&self) -> Modulo {
        self.config.modulo
    }

    pub fn local_address(&self) -> Option<&Address> {
        self.local.as_ref()
    }

    pub fn remote_address(&self) -> Option<&Address> {
        self.remote.as_ref()
    }

    pub fn route(&self) -> &[Address] {
        &self.route
    }

    pub fn send_state(&self) -> u8 {
        self.send_state
    }

    pub fn receive_state(&self) -> u8 {
        self.receive_state
    }

    pub fn acknowledge_state(&self) -> u8 {
        self.acknowledge_state
    }

    pub fn remote_busy(&self) -> bool {
        self.remote_busy
    }

    pub fn reject_outstanding(&self) -> bool {
        self.reject_outstanding
    }

    /// I frames sent and not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        self.queue.iter().filter(|q| q.sent).count()
    }

    /// Every queued I frame, sent or not.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The window actually applied, which never exceeds what the modulo allows.
    pub fn window_size(&self) -> u8 {
        self.config.window_size.min(self.config.modulo.max_window())
    }

    pub fn timer(&self, kind: TimerKind) -> &Timer {
        match kind {
            TimerKind::T1 => &self.t1,
            TimerKind::T2 => &self.t2,
            TimerKind::T3 => &self.t3,
        }
    }

    fn timer_mut(&mut self, kind: TimerKind) -> &mut Timer {
        match kind {
            TimerKind::T1 => &mut self.t1,
            TimerKind::T2 => &mut self.t2,
            TimerKind::T3 => &mut self.t3,
        }
    }

    fn ensure_configurable(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::ProtocolViolation {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    pub fn set_window_size(&mut self, window_size: u8) -> Result<(), SessionError> {
        self.ensure_configurable("set window size")?;
        check_window(window_size, self.config.modulo)?;
        self.config.window_size = window_size;
        Ok(())
    }

    pub fn set_max_info_length(&mut self, max_info_length: usize) -> Result<(), SessionError> {
        self.ensure_configurable("set max info length")?;
        check_nonzero("max_info_length", max_info_length as u64)?;
        self.config.max_info_length = max_info_length;
        Ok(())
    }

    pub fn set_retries(&mut self, retries: u32) -> Result<(), SessionError> {
        self.ensure_configurable("set retries")?;
        check_nonzero("retries", retries as u64)?;
        self.config.retries = retries;
        self.t1.set_max_repetitions(retries);
        self.t3.set_max_repetitions(retries);
        Ok(())
    }

    pub fn set_link_speed(&mut self, link_speed: u32) -> Result<(), SessionError> {
        self.ensure_configurable("set link speed")?;
        check_nonzero("link_speed", link_speed as u64)?;
        self.config.link_speed = link_speed;
        Ok(())
    }

    pub fn set_modulo(&mut self, modulo: Modulo) -> Result<(), SessionError> {
        self.ensure_configurable("set modulo")?;
        self.config.modulo = modulo;
        Ok(())
    }

    pub fn set_local_address(&mut self, address: Address) -> Result<(), SessionError> {
        self.ensure_configurable("set local address")?;
        self.local = Some(address);
        Ok(())
    }

    pub fn set_remote_address(&mut self, address: Address) -> Result<(), SessionError> {
        self.ensure_configurable("set remote address")?;
        self.remote = Some(address);
        Ok(())
    }

    /// Repeaters to route outgoing frames through, nearest first.
    pub fn set_route(&mut self, route: Vec<Address>) -> Result<(), SessionError> {
        self.ensure_configurable("set route")?;
        if route.len() > MAX_REPEATERS {
            return Err(SessionError::InvalidField {
                field: "route",
                reason: format!(
                    "{} repeaters exceeds the maximum of {}",
                    route.len(),
                    MAX_REPEATERS
                ),
            });
        }
        self.route = route;
        Ok(())
    }

    /// Start (or restart) the connection handshake.
    pub fn connect(&mut self, now: Instant) -> Vec<Output> {
        self.run(Input::Connect, now)
    }

    /// Begin an orderly disconnect of an established link.
    pub fn disconnect(&mut self, now: Instant) -> Vec<Output> {
        self.run(Input::Disconnect, now)
    }

    /// Queue data for reliable delivery, split into I frames of at most N1 bytes.
    pub fn send(&mut self, data: &[u8], now: Instant) -> Vec<Output> {
        self.run(Input::Send(data.to_vec()), now)
    }

    /// Process an inbound frame.
    pub fn receive(&mut self, frame: Ax25Frame, now: Instant) -> Vec<Output> {
        self.run(Input::Frame(frame), now)
    }

    /// The earliest instant at which `handle_timeout` has work to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        [&self.t1, &self.t2, &self.t3]
            .iter()
            .filter_map(|t| t.deadline())
            .min()
    }

    /// Deliver every timer that is due at `now`.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<Output> {
        let mut out = Vec::new();
        let due: Vec<TimerToken> = [&self.t1, &self.t2, &self.t3]
            .into_iter()
            .filter_map(|timer| timer.due(now))
            .collect();
        for token in due {
            self.step(Input::TimerExpired(token), now, &mut out);
        }
        out
    }

    fn run(&mut self, input: Input, now: Instant) -> Vec<Output> {
        let mut out = Vec::new();
        self.step(input, now, &mut out);
        out
    }

    fn step(&mut self, input: Input, now: Instant, out: &mut Vec<Output>) {
        match input {
            Input::Connect => self.on_connect(now, out),
            Input::Disconnect => self.on_disconnect(now, out),
            Input::Send(data) => self.on_send(data, now, out),
            Input::Frame(frame) => self.on_frame(frame, now, out),
            Input::TimerExpired(token) => self.on_timer(token, now, out),
        }
    }

    fn on_timer(&mut self, token: TimerToken, now: Instant, out: &mut Vec<Output>) {
        // Stopped or restarted by an earlier input in the same batch
        let Some(expiry) = self.timer_mut(token.kind).expire(token, now) else {
            tracing::trace!(?token, "stale timer token");
            return;
        };
        tracing::trace!(timer = ?token.kind, ?expiry, "timer expired");
        match token.kind {
            TimerKind::T1 => self.on_t1(expiry, now, out),
            TimerKind::T2 => self.on_t2(now, out),
            TimerKind::T3 => self.on_t3(expiry, now, out),
        }
    }

    fn on_connect(&mut self, now: Instant, out: &mut Vec<Output>) {
        if !matches!(
            self.state,
            SessionState::Disconnected | SessionState::Connecting
        ) {
            self.error(
                SessionError::ProtocolViolation {
                    operation: "connect",
                    state: self.state,
                },
                out,
            );
            return;
        }
        if self.local.is_none() || self.remote.is_none() {
            self.error(
                FrameError::incomplete("local and remote addresses are required to connect")
                    .into(),
                out,
            );
            return;
        }
        self.reset();
        self.request_connection(now, out);
    }

    fn on_disconnect(&mut self, now: Instant, out: &mut Vec<Output>) {
        if self.state != SessionState::Connected {
            let was = self.state;
            self.error(
                SessionError::ProtocolViolation {
                    operation: "disconnect",
                    state: was,
                },
                out,
            );
            self.reset();
            self.set_state(SessionState::Disconnected);
            if was == SessionState::Disconnecting {
                event(out, Event::Connection(false));
            }
            return;
        }
        self.queue.clear();
        self.t2.stop();
        self.t3.stop();
        self.transmit(
            FrameContent::Disconnect(Disconnect { poll: true }),
            CommandResponse::Command,
            out,
        );
        self.start_t1(now);
        self.set_state(SessionState::Disconnecting);
    }

    fn on_send(&mut self, data: Vec<u8>, now: Instant, out: &mut Vec<Output>) {
        if self.state == SessionState::Disconnecting {
            self.error(
                SessionError::ProtocolViolation {
                    operation: "send",
                    state: self.state,
                },
                out,
            );
            return;
        }
        let modulo = self.config.modulo.value() as usize;
        for chunk in data.chunks(self.config.max_info_length) {
            let send_sequence = (self.queue.len() % modulo) as u8;
            self.queue.push(QueuedFrame {
                pid: ProtocolIdentifier::None,
                info: chunk.to_vec(),
                send_sequence,
                sent: false,
            });
        }
        self.drain(now, false, out);
    }

    fn on_frame(&mut self, frame: Ax25Frame, now: Instant, out: &mut Vec<Output>) {
        if !self.accept(&frame) {
            return;
        }
        tracing::trace!(%frame, state = ?self.state, "received");
        if self.state == SessionState::Connected {
            self.t3.start(now);
        }

        let polled = frame.is_poll();
        let poll_or_final = frame.content.poll_or_final();
        let final_response =
            poll_or_final && frame.command_or_response == Some(CommandResponse::Response);

        match frame.content {
            FrameContent::SetAsynchronousBalancedMode(_) => {
                self.on_connect_request(Modulo::Eight, poll_or_final, now, out)
            }
            FrameContent::SetAsynchronousBalancedModeExtended(_) => {
                self.on_connect_request(Modulo::OneTwentyEight, poll_or_final, now, out)
            }
            FrameContent::Disconnect(_) => {
                if self.state == SessionState::Connected {
                    self.reset();
                    self.set_state(SessionState::Disconnected);
                    self.unnumbered_acknowledge(poll_or_final, out);
                    event(out, Event::Connection(false));
                } else {
                    self.disconnected_mode(true, out);
                }
            }
            FrameContent::UnnumberedAcknowledge(_) => match self.state {
                SessionState::Connecting => {
                    self.t1.stop();
                    self.t3.start(now);
                    self.set_state(SessionState::Connected);
                    event(out, Event::Connection(true));
                    self.drain(now, false, out);
                }
                SessionState::Disconnecting => {
                    self.reset();
                    self.set_state(SessionState::Disconnected);
                    event(out, Event::Connection(false));
                }
                SessionState::Connected => self.link_reset("unexpected UA", now, out),
                SessionState::Disconnected => self.disconnected_mode(poll_or_final, out),
            },
            FrameContent::DisconnectedMode(_) => match self.state {
                SessionState::Connected => self.link_reset("DM while connected", now, out),
                SessionState::Connecting if self.config.modulo == Modulo::OneTwentyEight => {
                    event(out, Event::Connection(false));
                    self.fall_back_to_modulo_8(now, out)
                }
                SessionState::Connecting | SessionState::Disconnecting => {
                    self.reset();
                    self.set_state(SessionState::Disconnected);
                    event(out, Event::Connection(false));
                }
                SessionState::Disconnected => {}
            },
            FrameContent::FrameReject(frmr) => match self.state {
                SessionState::Connecting if self.config.modulo == Modulo::OneTwentyEight => {
                    self.fall_back_to_modulo_8(now, out)
                }
                SessionState::Connected => {
                    tracing::warn!(?frmr, "peer rejected a frame");
                    self.link_reset("FRMR", now, out)
                }
                _ => self.unhandled(out),
            },
            FrameContent::UnnumberedInformation(ui) => {
                if polled {
                    if self.state == SessionState::Connected {
                        self.receive_ready(true, CommandResponse::Response, out);
                    } else {
                        self.disconnected_mode(true, out);
                    }
                }
                event(out, Event::Data(ui.info));
            }
            FrameContent::ReceiveReady(rr) if self.state == SessionState::Connected => {
                self.remote_busy = false;
                self.acknowledge(rr.receive_sequence, now);
                self.check_poll_answered(final_response);
                if polled {
                    self.receive_ready(true, CommandResponse::Response, out);
                }
                self.drain(now, false, out);
            }
            FrameContent::ReceiveNotReady(rnr) if self.state == SessionState::Connected => {
                self.remote_busy = true;
                self.acknowledge(rnr.receive_sequence, now);
                self.check_poll_answered(final_response);
                // T3 polls the peer until it clears busy
                self.t1.stop();
                if polled {
                    self.receive_ready(true, CommandResponse::Response, out);
                }
            }
            FrameContent::Reject(rej) if self.state == SessionState::Connected => {
                self.remote_busy = false;
                self.acknowledge(rej.receive_sequence, now);
                self.poll_outstanding = false;
                self.retransmit = true;
                if polled {
                    self.receive_ready(true, CommandResponse::Response, out);
                }
                self.drain(now, false, out);
            }
            FrameContent::Information(i) if self.state == SessionState::Connected => {
                self.on_information(i, now, out)
            }
            FrameContent::ExchangeIdentification(_) => self.disconnected_mode(true, out),
            _ => self.unhandled(out),
        }
    }

    /// Address adoption and filtering. Returns false if the frame is not for this session.
    fn accept(&mut self, frame: &Ax25Frame) -> bool {
        if self.local.as_ref().is_some_and(|local| *local != frame.destination) {
            tracing::trace!(destination = %frame.destination, "dropping frame for another station");
            return false;
        }
        if self.remote.as_ref().is_some_and(|remote| *remote != frame.source) {
            tracing::trace!(source = %frame.source, "dropping frame from another station");
            return false;
        }
        if frame.route.iter().any(|entry| !entry.has_repeated) {
            // Still on its way through the repeaters
            tracing::trace!(%frame, "dropping frame not yet repeated");
            return false;
        }
        // Only a frame that passed every filter may bind the addresses
        self.local.get_or_insert_with(|| frame.destination.clone());
        self.remote.get_or_insert_with(|| frame.source.clone());
        self.route = frame
            .route
            .iter()
            .rev()
            .map(|entry| entry.repeater.clone())
            .collect();
        true
    }

    fn on_connect_request(
        &mut self,
        modulo: Modulo,
        poll: bool,
        now: Instant,
        out: &mut Vec<Output>,
    ) {
        self.config.modulo = modulo;
        self.reset();
        self.set_state(SessionState::Connected);
        self.t3.start(now);
        self.unnumbered_acknowledge(poll, out);
        event(out, Event::Connection(true));
        self.drain(now, false, out);
    }

    fn on_information(&mut self, i: Information, now: Instant, out: &mut Vec<Output>) {
        self.acknowledge(i.receive_sequence, now);

        if i.send_sequence != self.receive_state {
            if !self.reject_outstanding {
                self.reject_outstanding = true;
                tracing::debug!(
                    expected = self.receive_state,
                    got = i.send_sequence,
                    "out of sequence I frame"
                );
                let reject = FrameContent::Reject(Reject {
                    receive_sequence: self.receive_state,
                    poll_or_final: i.poll,
                });
                self.transmit(reject, CommandResponse::Response, out);
            }
            return;
        }

        self.receive_state = self.config.modulo.next(self.receive_state);
        self.reject_outstanding = false;
        event(out, Event::Data(i.info));

        if i.poll {
            self.receive_ready(true, CommandResponse::Response, out);
            self.drain(now, false, out);
        } else if !self.t2.is_running() {
            self.drain(now, true, out);
            self.t2.start(now);
        } else {
            self.ack_pending = true;
        }
    }

    fn on_t1(&mut self, expiry: TimerExpiry, now: Instant, out: &mut Vec<Output>) {
        match (self.state, expiry) {
            (SessionState::Connecting, TimerExpiry::Fire) => {
                tracing::debug!(attempt = self.t1.attempts(), "repeating connect request");
                self.transmit(self.connect_request(), CommandResponse::Command, out);
            }
            (SessionState::Connecting, TimerExpiry::GiveUp) => {
                tracing::warn!(remote = ?self.remote, "no answer to connect request");
                self.reset();
                self.set_state(SessionState::Disconnected);
                event(out, Event::Connection(false));
            }
            (SessionState::Connected, TimerExpiry::Fire) => {
                self.poll_outstanding = true;
                self.receive_ready(true, CommandResponse::Command, out);
            }
            (SessionState::Connected, TimerExpiry::GiveUp) => {
                self.link_reset("acknowledgement timer exhausted", now, out)
            }
            (SessionState::Disconnecting, TimerExpiry::Fire) => {
                tracing::debug!(attempt = self.t1.attempts(), "repeating disconnect request");
                self.transmit(
                    FrameContent::Disconnect(Disconnect { poll: true }),
                    CommandResponse::Command,
                    out,
                );
            }
            (SessionState::Disconnecting, TimerExpiry::GiveUp) => {
                tracing::warn!(remote = ?self.remote, "no answer to disconnect request");
                self.disconnected_mode(true, out);
                self.reset();
                self.set_state(SessionState::Disconnected);
                event(out, Event::Connection(false));
            }
            (SessionState::Disconnected, _) => {}
        }
    }

    fn on_t2(&mut self, now: Instant, out: &mut Vec<Output>) {
        if self.ack_pending {
            self.ack_pending = false;
            self.drain(now, true, out);
        }
    }

    fn on_t3(&mut self, expiry: TimerExpiry, now: Instant, out: &mut Vec<Output>) {
        if self.state != SessionState::Connected {
            return;
        }
        match expiry {
            TimerExpiry::Fire => {
                self.poll_outstanding = true;
                self.receive_ready(true, CommandResponse::Command, out);
            }
            TimerExpiry::GiveUp => {
                tracing::warn!(remote = ?self.remote, "link idle with no answer to polls");
                self.on_disconnect(now, out);
            }
        }
    }

    /// Drop everything in flight and send the connect handshake again.
    fn link_reset(&mut self, reason: &str, now: Instant, out: &mut Vec<Output>) {
        tracing::warn!(reason, "resetting link");
        self.reset();
        self.request_connection(now, out);
    }

    fn fall_back_to_modulo_8(&mut self, now: Instant, out: &mut Vec<Output>) {
        tracing::debug!("peer refused modulo 128, retrying with modulo 8");
        self.config.modulo = Modulo::Eight;
        self.reset();
        self.request_connection(now, out);
    }

    fn request_connection(&mut self, now: Instant, out: &mut Vec<Output>) {
        self.transmit(self.connect_request(), CommandResponse::Command, out);
        self.start_t1(now);
        self.set_state(SessionState::Connecting);
    }

    fn connect_request(&self) -> FrameContent {
        match self.config.modulo {
            Modulo::Eight => {
                FrameContent::SetAsynchronousBalancedMode(SetAsynchronousBalancedMode {
                    poll: true,
                })
            }
            Modulo::OneTwentyEight => FrameContent::SetAsynchronousBalancedModeExtended(
                SetAsynchronousBalancedModeExtended { poll: true },
            ),
        }
    }

    /// Default handling for a frame with no applicable transition.
    fn unhandled(&mut self, out: &mut Vec<Output>) {
        if self.state == SessionState::Disconnected {
            self.disconnected_mode(true, out);
        }
    }

    fn check_poll_answered(&mut self, final_response: bool) {
        if final_response && self.poll_outstanding {
            self.poll_outstanding = false;
            if self.outstanding() > 0 {
                self.retransmit = true;
            }
        }
    }

    /// Full reset of sequence variables, flags and timers.
    fn reset(&mut self) {
        self.send_state = 0;
        self.receive_state = 0;
        self.acknowledge_state = 0;
        self.remote_busy = false;
        self.reject_outstanding = false;
        self.ack_pending = false;
        self.poll_outstanding = false;
        self.retransmit = false;
        self.t1.stop();
        self.t2.stop();
        self.t3.stop();
        self.renumber();
    }

    fn renumber(&mut self) {
        let modulo = self.config.modulo.value() as usize;
        for (i, entry) in self.queue.iter_mut().enumerate() {
            entry.sent = false;
            entry.send_sequence = (i % modulo) as u8;
        }
    }

    /// Apply an inbound N(R), releasing acknowledged frames.
    fn acknowledge(&mut self, receive_sequence: u8, now: Instant) {
        let modulo = self.config.modulo.value();
        let va = self.acknowledge_state;
        let acked = distance(receive_sequence, va, modulo);
        if acked > distance(self.send_state, va, modulo) {
            tracing::warn!(
                n_r = receive_sequence,
                v_a = va,
                v_s = self.send_state,
                "ignoring invalid N(R)"
            );
            return;
        }

        let before = self.queue.len();
        self.queue
            .retain(|q| !(q.sent && distance(q.send_sequence, va, modulo) < acked));
        self.acknowledge_state = receive_sequence;

        if self.outstanding() == 0 {
            self.t1.stop();
        } else if self.queue.len() != before {
            self.start_t1(now);
        }
    }

    /// Transmit whatever the window allows, or a lone RR if an acknowledgement is owed.
    fn drain(&mut self, now: Instant, ack_required: bool, out: &mut Vec<Output>) {
        if self.state != SessionState::Connected {
            return;
        }
        if self.remote_busy {
            self.t1.stop();
            return;
        }

        let modulo = self.config.modulo;
        let window = self.window_size();
        let retransmit = std::mem::take(&mut self.retransmit);
        let mut emitted = Vec::new();
        for entry in self.queue.iter_mut() {
            if entry.sent {
                if retransmit {
                    emitted.push(Information {
                        pid: entry.pid,
                        info: entry.info.clone(),
                        receive_sequence: self.receive_state,
                        send_sequence: entry.send_sequence,
                        poll: false,
                    });
                }
            } else if distance(self.send_state, self.acknowledge_state, modulo.value()) < window {
                entry.send_sequence = self.send_state;
                entry.sent = true;
                emitted.push(Information {
                    pid: entry.pid,
                    info: entry.info.clone(),
                    receive_sequence: self.receive_state,
                    send_sequence: entry.send_sequence,
                    poll: false,
                });
                self.send_state = modulo.next(self.send_state);
            } else {
                break;
            }
        }

        if emitted.is_empty() {
            if ack_required && !self.reject_outstanding {
                self.ack_pending = false;
                self.receive_ready(false, CommandResponse::Response, out);
            }
            return;
        }
        if retransmit {
            tracing::debug!(count = self.outstanding(), "retransmitting");
        }
        self.ack_pending = false;
        for i in emitted {
            self.transmit(FrameContent::Information(i), CommandResponse::Command, out);
        }
        self.start_t1(now);
    }

    fn start_t1(&mut self, now: Instant) {
        let interval = self.t1_interval();
        self.t1.set_interval(interval);
        self.t1.start(now);
    }

    /// Base acknowledgement time plus twice the air time of everything outstanding.
    fn t1_interval(&self) -> Duration {
        let overhead = (2 + self.route.len()) * 7 + self.config.modulo.control_octets() + 1;
        let bytes: usize = self
            .queue
            .iter()
            .filter(|q| q.sent)
            .map(|q| q.info.len() + overhead)
            .sum();
        let air_time = (bytes * 8) as f64 / f64::from(self.config.link_speed);
        self.config.ack_time + Duration::from_secs_f64(2.0 * air_time)
    }

    fn receive_ready(&mut self, poll_or_final: bool, cr: CommandResponse, out: &mut Vec<Output>) {
        let rr = FrameContent::ReceiveReady(ReceiveReady {
            receive_sequence: self.receive_state,
            poll_or_final,
        });
        self.transmit(rr, cr, out);
    }

    fn unnumbered_acknowledge(&mut self, final_bit: bool, out: &mut Vec<Output>) {
        self.transmit(
            FrameContent::UnnumberedAcknowledge(UnnumberedAcknowledge { final_bit }),
            CommandResponse::Response,
            out,
        );
    }

    fn disconnected_mode(&mut self, final_bit: bool, out: &mut Vec<Output>) {
        self.transmit(
            FrameContent::DisconnectedMode(DisconnectedMode { final_bit }),
            CommandResponse::Response,
            out,
        );
    }

    fn transmit(&self, content: FrameContent, cr: CommandResponse, out: &mut Vec<Output>) {
        let (source, destination) = match (&self.local, &self.remote) {
            (Some(local), Some(remote)) => (local.clone(), remote.clone()),
            _ => {
                tracing::warn!(%content, "cannot transmit without local and remote addresses");
                return;
            }
        };
        let frame = Ax25Frame {
            source,
            destination,
            route: self
                .route
                .iter()
                .map(|repeater| RouteEntry {
                    repeater: repeater.clone(),
                    has_repeated: false,
                })
                .collect(),
            command_or_response: Some(cr),
            modulo: self.config.modulo,
            content,
        };
        tracing::trace!(%frame, "transmit");
        out.push(Output::Transmit(frame));
    }

    fn set_state(&mut self, to: SessionState) {
        if self.state != to {
            tracing::debug!(from = ?self.state, ?to, "session state change");
            self.state = to;
        }
    }

    fn error(&self, err: SessionError, out: &mut Vec<Output>) {
        tracing::warn!(%err, "session operation refused");
        event(out, Event::Error(err));
    }
}

fn event(out: &mut Vec<Output>, event: Event) {
    out.push(Output::Event(event));
}
