use std::io;
use std::io::prelude::*;
use std::net::Shutdown;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::sync::{Mutex, MutexGuard};

pub(crate) const FEND: u8 = 0xC0;
pub(crate) const FESC: u8 = 0xDB;
pub(crate) const TFEND: u8 = 0xDC;
pub(crate) const TFESC: u8 = 0xDD;

/// The command nibble of a KISS frame's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KissCommand {
    /// The rest of the frame is data to transmit, or data that was received.
    DataFrame,
    TxDelay,
    Persistence,
    SlotTime,
    TxTail,
    FullDuplex,
    SetHardware,
    /// Exit KISS mode. Always sent as 0xFF regardless of port.
    Return,
    Unknown(u8),
}

impl KissCommand {
    fn from_byte(byte: u8) -> KissCommand {
        if byte == 0xFF {
            return KissCommand::Return;
        }
        match byte & 0x0F {
            0 => KissCommand::DataFrame,
            1 => KissCommand::TxDelay,
            2 => KissCommand::Persistence,
            3 => KissCommand::SlotTime,
            4 => KissCommand::TxTail,
            5 => KissCommand::FullDuplex,
            6 => KissCommand::SetHardware,
            other => KissCommand::Unknown(other),
        }
    }

    fn to_nibble(self) -> u8 {
        match self {
            KissCommand::DataFrame => 0,
            KissCommand::TxDelay => 1,
            KissCommand::Persistence => 2,
            KissCommand::SlotTime => 3,
            KissCommand::TxTail => 4,
            KissCommand::FullDuplex => 5,
            KissCommand::SetHardware => 6,
            KissCommand::Return => 0x0F,
            KissCommand::Unknown(n) => n & 0x0F,
        }
    }
}

/// One unescaped KISS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KissFrame {
    pub port: u8,
    pub command: KissCommand,
    pub data: Vec<u8>,
}

/// Wrap `data` in FENDs with the port/command byte, escaping FEND and FESC.
pub fn encode_frame(port: u8, command: KissCommand, data: &[u8]) -> Vec<u8> {
    let type_byte = match command {
        KissCommand::Return => 0xFF,
        _ => ((port & 0x0F) << 4) | command.to_nibble(),
    };
    let mut encoded = Vec::with_capacity(data.len() + 4);
    encoded.push(FEND);
    for &b in std::iter::once(&type_byte).chain(data) {
        match b {
            FEND => encoded.extend([FESC, TFEND]),
            FESC => encoded.extend([FESC, TFESC]),
            b => encoded.push(b),
        }
    }
    encoded.push(FEND);
    encoded
}

/// Remove the next complete frame from `buffer`, if there is one.
pub fn decode_frame(buffer: &mut Vec<u8>) -> Option<KissFrame> {
    let raw = make_frame_from_buffer(buffer)?;
    let (&type_byte, data) = raw.split_first()?;
    Some(KissFrame {
        port: if type_byte == 0xFF { 0 } else { type_byte >> 4 },
        command: KissCommand::from_byte(type_byte),
        data: data.to_vec(),
    })
}

pub struct TcpKissInterface {
    // Interior mutability is desirable so that we can clone the TNC and have
    // different threads sending and receiving concurrently.
    tx_stream: Mutex<TcpStream>,
    rx_stream: Mutex<TcpStream>,
    buffer: Mutex<Vec<u8>>,
}

fn lock<T>(mutex: &Mutex<T>) -> io::Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "KISS interface lock poisoned"))
}

impl TcpKissInterface {
    pub fn new<A: ToSocketAddrs>(addr: A) -> io::Result<TcpKissInterface> {
        let tx_stream = TcpStream::connect(addr)?;
        let rx_stream = tx_stream.try_clone()?;
        Ok(TcpKissInterface {
            tx_stream: Mutex::new(tx_stream),
            rx_stream: Mutex::new(rx_stream),
            buffer: Mutex::new(Vec::new()),
        })
    }

    /// Block until a complete KISS frame arrives.
    pub fn receive_frame(&self) -> io::Result<KissFrame> {
        loop {
            {
                let mut buffer = lock(&self.buffer)?;
                if let Some(frame) = decode_frame(&mut buffer) {
                    return Ok(frame);
                }
            }
            let mut buf = vec![0u8; 1024];
            let n_bytes = {
                let mut rx_stream = lock(&self.rx_stream)?;
                rx_stream.read(&mut buf)?
            };
            if n_bytes == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "KISS server closed the connection",
                ));
            }
            lock(&self.buffer)?.extend(buf.iter().take(n_bytes));
        }
    }

    pub fn send_frame(&self, port: u8, command: KissCommand, data: &[u8]) -> io::Result<()> {
        let mut tx_stream = lock(&self.tx_stream)?;
        tx_stream.write_all(&encode_frame(port, command, data))?;
        tx_stream.flush()?;
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Ok(tx_stream) = self.tx_stream.lock() {
            let _ = tx_stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpKissInterface {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn make_frame_from_buffer(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut possible_frame = Vec::new();

    enum Scan {
        LookingForStartMarker,
        Data,
        Escaped,
    }
    let mut state = Scan::LookingForStartMarker;
    let mut final_idx = 0;

    // Check for possible frame read-only until we know we have a complete frame
    // If we take one out, clear out buffer up to the final index
    for (idx, &c) in buffer.iter().enumerate() {
        match state {
            Scan::LookingForStartMarker => {
                if c == FEND {
                    state = Scan::Data;
                }
            }
            Scan::Data => {
                if c == FEND {
                    if !possible_frame.is_empty() {
                        // Successfully read a non-zero-length frame
                        final_idx = idx;
                        break;
                    }
                } else if c == FESC {
                    state = Scan::Escaped;
                } else {
                    possible_frame.push(c);
                }
            }
            Scan::Escaped => {
                if c == TFEND {
                    possible_frame.push(FEND);
                } else if c == TFESC {
                    possible_frame.push(FESC);
                } else if c == FEND && !possible_frame.is_empty() {
                    // Successfully read a non-zero-length frame
                    final_idx = idx;
                    break;
                }
                state = Scan::Data;
            }
        }
    }

    match final_idx {
        0 => None,
        n => {
            // Draining up to "n" will leave the final FEND in place
            // This way we can use it as the start marker for the next frame
            buffer.drain(0..n);
            Some(possible_frame)
        }
    }
}
