use crate::tnc::{RawFrameResult, Tnc, TncError};
use ax25::frame::Ax25Frame;
use ax25::{Event, Output, Session};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Anything that can carry encoded AX.25 frames to and from the radio.
pub trait Transport: Send + 'static {
    /// Transmit one encoded frame.
    fn send(&self, frame: &[u8]) -> Result<(), TncError>;

    /// A receiver that yields every inbound frame, undecoded.
    fn incoming(&self) -> Receiver<RawFrameResult>;
}

impl Transport for Tnc {
    fn send(&self, frame: &[u8]) -> Result<(), TncError> {
        self.send_raw(frame)
    }

    fn incoming(&self) -> Receiver<RawFrameResult> {
        Tnc::incoming(self)
    }
}

enum Command {
    Connect,
    Disconnect,
    Send(Vec<u8>),
    Inbound(RawFrameResult),
    Shutdown,
}

/// A `Session` running on its own thread against a `Transport`.
///
/// Inbound frames, application requests and timer deadlines are all delivered
/// to the session from that one thread, so it never needs locking.
pub struct Link {
    commands: Sender<Command>,
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    pub fn spawn<T: Transport>(session: Session, transport: T) -> Link {
        let (commands, receiver) = channel();
        let subscribers: Arc<Mutex<Vec<Sender<Event>>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let incoming = transport.incoming();
            let commands = commands.clone();
            thread::spawn(move || {
                for frame in incoming {
                    if commands.send(Command::Inbound(frame)).is_err() {
                        break;
                    }
                }
            });
        }

        let driver = {
            let subscribers = subscribers.clone();
            thread::spawn(move || {
                Driver {
                    session,
                    transport,
                    subscribers,
                }
                .run(receiver)
            })
        };

        Link {
            commands,
            subscribers,
            driver: Mutex::new(Some(driver)),
        }
    }

    pub fn connect(&self) -> Result<(), TncError> {
        self.command(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), TncError> {
        self.command(Command::Disconnect)
    }

    /// Queue data for reliable delivery to the remote station.
    pub fn send(&self, data: &[u8]) -> Result<(), TncError> {
        self.command(Command::Send(data.to_vec()))
    }

    /// Create a new `Receiver<Event>`.
    /// This will receive a copy of every event from the session.
    pub fn events(&self) -> Receiver<Event> {
        let (sender, receiver) = channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(sender);
        }
        receiver
    }

    /// Stop the driver thread and wait for it to exit. The session is dropped as-is.
    pub fn shutdown(&self) -> Result<(), TncError> {
        let _ = self.commands.send(Command::Shutdown);
        let handle = self
            .driver
            .lock()
            .map_err(|_| TncError::Shutdown)?
            .take();
        match handle {
            Some(handle) => handle.join().map_err(|_| TncError::Shutdown),
            None => Ok(()),
        }
    }

    fn command(&self, command: Command) -> Result<(), TncError> {
        self.commands.send(command).map_err(|_| TncError::Shutdown)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Driver<T> {
    session: Session,
    transport: T,
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl<T: Transport> Driver<T> {
    fn run(mut self, commands: Receiver<Command>) {
        loop {
            let command = match self.session.poll_timeout() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match commands.recv_timeout(wait) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
            };

            let now = Instant::now();
            let mut outputs = match command {
                None => Vec::new(),
                Some(Command::Connect) => self.session.connect(now),
                Some(Command::Disconnect) => self.session.disconnect(now),
                Some(Command::Send(data)) => self.session.send(&data, now),
                Some(Command::Inbound(Ok(bytes))) => {
                    match Ax25Frame::from_bytes_with_modulo(&bytes, self.session.modulo()) {
                        Ok(frame) => self.session.receive(frame, now),
                        Err(e) => {
                            tracing::warn!(%e, len = bytes.len(), "dropping malformed frame");
                            Vec::new()
                        }
                    }
                }
                Some(Command::Inbound(Err(e))) => {
                    // Timers will notice the silence and take the link down
                    tracing::warn!(%e, "transport stopped delivering frames");
                    Vec::new()
                }
                Some(Command::Shutdown) => break,
            };
            outputs.extend(self.session.handle_timeout(now));
            self.dispatch(outputs);
        }
        tracing::debug!(state = ?self.session.state(), "link driver stopped");
    }

    fn dispatch(&self, outputs: Vec<Output>) {
        for output in outputs {
            match output {
                Output::Transmit(frame) => match frame.to_bytes() {
                    Ok(bytes) => {
                        if let Err(e) = self.transport.send(&bytes) {
                            tracing::warn!(%e, %frame, "unable to transmit");
                        }
                    }
                    Err(e) => tracing::warn!(%e, %frame, "unable to encode"),
                },
                Output::Event(event) => {
                    if let Ok(mut subscribers) = self.subscribers.lock() {
                        subscribers.retain(|s| s.send(event.clone()).is_ok());
                    }
                }
            }
        }
    }
}
