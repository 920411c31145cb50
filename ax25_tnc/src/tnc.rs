use crate::kiss::{KissCommand, TcpKissInterface};
use ax25::frame::Ax25Frame;
use ax25::FrameError;
use std::str::FromStr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;

/// Errors that can occur when interacting with a `Tnc`.
#[derive(Debug, Error)]
pub enum TncError {
    #[error("Unable to connect to TNC: {source}")]
    OpenTnc { source: std::io::Error },
    #[error("Unable to send frame: {source}")]
    SendFrame { source: std::io::Error },
    #[error("Unable to receive frame: {source}")]
    ReceiveFrame { source: std::io::Error },
    #[error("Unable to encode frame: {source}")]
    EncodeFrame { source: FrameError },
    #[error("The connection has been shut down")]
    Shutdown,
}

/// Errors that can occur when parsing a `TncAddress` from a string.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("TNC address '{string}' is invalid - it should begin with 'tnc:'")]
    NoTncPrefix { string: String },
    #[error("Unknown TNC type {tnc_type}")]
    UnknownType { tnc_type: String },
    #[error("TNC type '{tnc_type}' expects {expected} parameters to follow but there are {actual}")]
    WrongParameterCount {
        tnc_type: String,
        expected: usize,
        actual: usize,
    },
    #[error("Supplied port '{input}' should be a number from 0 to 65535")]
    InvalidPort {
        input: String,
        source: std::num::ParseIntError,
    },
}

/// Configuration details for a TCP KISS TNC. This structure can be created directly
/// or indirectly by parsing a string into a `TncAddress`.
#[derive(PartialEq, Debug, Eq, Clone)]
pub struct TcpKissConfig {
    /// Hostname or IP address of the computer with the TNC
    pub host: String,
    /// Port number
    pub port: u16,
}

/// A parsed TNC address that can be used to open a `Tnc`.
///
/// The string form is `tnc:tcpkiss:<host>:<port>`, e.g. `tnc:tcpkiss:192.168.0.1:8001`.
#[derive(PartialEq, Debug, Eq, Clone)]
pub struct TncAddress {
    config: TcpKissConfig,
}

impl TncAddress {
    pub fn new(config: TcpKissConfig) -> Self {
        TncAddress { config }
    }

    pub fn config(&self) -> &TcpKissConfig {
        &self.config
    }
}

impl FromStr for TncAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix("tnc:") else {
            return Err(ParseError::NoTncPrefix {
                string: s.to_string(),
            });
        };
        let params: Vec<&str> = rest.split(':').collect();
        match params.as_slice() {
            ["tcpkiss", host, port] => {
                let port = port.parse().map_err(|e| ParseError::InvalidPort {
                    input: port.to_string(),
                    source: e,
                })?;
                Ok(TncAddress::new(TcpKissConfig {
                    host: host.to_string(),
                    port,
                }))
            }
            ["tcpkiss", ..] => Err(ParseError::WrongParameterCount {
                tnc_type: "tcpkiss".to_string(),
                expected: 2,
                actual: params.len() - 1,
            }),
            [unknown, ..] => Err(ParseError::UnknownType {
                tnc_type: unknown.to_string(),
            }),
            [] => Err(ParseError::UnknownType {
                tnc_type: String::new(),
            }),
        }
    }
}

/// The bytes of one received AX.25 frame, undecoded, or the error that ended reception.
pub type RawFrameResult = Result<Vec<u8>, Arc<TncError>>;

/// A local or remote TNC attached to a radio, which can send and receive frames.
///
/// Frames are handed out undecoded because the control field layout depends on
/// whether the link in question uses modulo 8 or modulo 128.
#[derive(Clone)]
pub struct Tnc(Arc<TncInner>);

impl Tnc {
    /// Attempt to obtain a `Tnc` connection using the provided address.
    pub fn open(address: &TncAddress) -> Result<Self, TncError> {
        let TcpKissConfig { host, port } = &address.config;
        let iface = TcpKissInterface::new(format!("{}:{}", host, port))
            .map_err(|e| TncError::OpenTnc { source: e })?;
        tracing::info!(%host, port, "connected to TCP KISS TNC");
        Ok(Tnc(Arc::new(TncInner::new(Arc::new(iface)))))
    }

    /// Transmit a frame on the radio. Transmission is not guaranteed even if a
    /// `Ok` result is returned.
    pub fn send_frame(&self, frame: &Ax25Frame) -> Result<(), TncError> {
        let bytes = frame
            .to_bytes()
            .map_err(|e| TncError::EncodeFrame { source: e })?;
        self.send_raw(&bytes)
    }

    /// Transmit already encoded AX.25 bytes.
    pub fn send_raw(&self, bytes: &[u8]) -> Result<(), TncError> {
        self.0
            .iface
            .send_frame(0, KissCommand::DataFrame, bytes)
            .map_err(|e| TncError::SendFrame { source: e })
    }

    /// Send a KISS parameter command such as TXDELAY to the TNC.
    pub fn send_command(&self, command: KissCommand, value: &[u8]) -> Result<(), TncError> {
        tracing::debug!(?command, ?value, "sending KISS command");
        self.0
            .iface
            .send_frame(0, command, value)
            .map_err(|e| TncError::SendFrame { source: e })
    }

    /// Create a new `Receiver<RawFrameResult>`.
    /// This will receive a copy of all incoming frames.
    pub fn incoming(&self) -> Receiver<RawFrameResult> {
        self.0.incoming()
    }
}

struct TncInner {
    iface: Arc<TcpKissInterface>,
    senders: Arc<Mutex<Vec<Sender<RawFrameResult>>>>,
}

impl TncInner {
    fn new(iface: Arc<TcpKissInterface>) -> Self {
        let senders: Arc<Mutex<Vec<Sender<RawFrameResult>>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let iface = iface.clone();
            let senders = senders.clone();

            thread::spawn(move || {
                loop {
                    let received = match iface.receive_frame() {
                        Ok(frame) if frame.command == KissCommand::DataFrame => Ok(frame.data),
                        Ok(frame) => {
                            tracing::trace!(command = ?frame.command, "ignoring KISS frame");
                            continue;
                        }
                        Err(e) => Err(Arc::new(TncError::ReceiveFrame { source: e })),
                    };

                    let Ok(mut senders) = senders.lock() else {
                        break;
                    };
                    // Receivers that have hung up are forgotten
                    senders.retain(|s| s.send(received.clone()).is_ok());
                    if let Err(e) = received {
                        tracing::info!(%e, "TNC reader stopped");
                        senders.clear();
                        break;
                    }
                }
            });
        }

        TncInner { iface, senders }
    }

    fn incoming(&self) -> Receiver<RawFrameResult> {
        let (sender, receiver) = channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(sender);
        }
        receiver
    }
}

impl Drop for TncInner {
    fn drop(&mut self) {
        tracing::info!("closing TNC connection");
        self.iface.shutdown();
    }
}
