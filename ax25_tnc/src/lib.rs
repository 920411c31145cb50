//! Utilities for Packet Radio in Rust.
//!
//! This crate connects the `ax25` crate's frames and sessions to real radios.
//!
//! Main features:
//! * Connect to TCP KISS TNCs such as Dire Wolf
//! * KISS protocol framing, including TNC parameter commands
//! * Run a connected-mode `Session` on a background thread with `link::Link`
//!
//! Most developers will want to focus on `tnc::TncAddress`, `tnc::Tnc` and `link::Link`.
//! 1. Generate or ask the user to supply an address string. This takes the form:
//!    `tnc:tcpkiss:192.168.0.1:8001`
//! 2. Parse this to an address: `let addr = string.parse::<TncAddress>()?;`
//! 3. Attempt to open the TNC: `let tnc = Tnc::open(&addr)?;`
//! 4. Either use `send_frame()` and `incoming()` to work with raw frames, or
//!    hand the `Tnc` and a `Session` to `Link::spawn` for a reliable connection.
//! 5. The `Tnc` can be cloned for multithreaded use.
//!
//! A sample echo server is provided in the source code repository under `/examples`.

/// Connect to a TNC and use it to send and receive frames.
pub mod tnc;

/// Drive a connected-mode session over a TNC.
pub mod link;

/// KISS framing and TCP KISS servers such as Dire Wolf.
pub mod kiss;
