//! AX.25 packets and connected-mode links in Rust.
//!
//! * `frame` converts between raw bytes and strongly typed AX.25 frames,
//!   including the two-octet control field used by modulo 128 links.
//! * `session` is a sans-IO state machine for a single connected link. It
//!   handles the SABM/UA handshake, sliding-window acknowledgement, reject
//!   recovery, busy flow control and the T1/T2/T3 timers. Feed it frames and
//!   the current time, then transmit or deliver whatever it returns.
//!
//! Nothing here performs I/O. See the `ax25_tnc` crate for KISS TNCs and a
//! threaded driver that runs a `Session` against one.

/// Encoding and decoding AX.25 v2.2 frames between raw bytes and strongly typed structures.
pub mod frame;

/// Modular sequence number arithmetic.
pub mod sequence;

/// Restartable link timers driven by the caller's clock.
pub mod timer;

/// The connected-mode link state machine.
pub mod session;

pub mod error;

pub use error::{FrameError, SessionError};
pub use session::{Event, Output, Session, SessionConfig, SessionState};
