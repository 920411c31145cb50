use ax25::frame::{Address, Ax25Frame};
use ax25::sequence::Modulo;
use ax25::{Event, Output, Session, SessionState};
use ax25_tnc::tnc::{Tnc, TncAddress};
use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

/// Accepts connections addressed to `<my-callsign>` from any number of stations
/// and echoes back whatever each of them sends.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        println!("Usage: {} <tnc-address> <my-callsign>", args[0]);
        std::process::exit(1);
    }

    let addr = args[1].parse::<TncAddress>()?;
    let me = args[2].parse::<Address>()?;
    let tnc = Tnc::open(&addr)?;
    let incoming = tnc.incoming();
    let mut sessions: HashMap<Address, Session> = HashMap::new();

    loop {
        let wait = sessions
            .values()
            .filter_map(Session::poll_timeout)
            .min()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(60));

        match incoming.recv_timeout(wait) {
            Ok(bytes) => {
                let bytes = bytes?;
                let now = Instant::now();
                let Some(frame) = decode(&bytes, &sessions) else {
                    continue;
                };
                if frame.destination != me {
                    continue;
                }
                let station = frame.source.clone();
                if !sessions.contains_key(&station) {
                    let mut session = Session::new();
                    session.set_local_address(me.clone())?;
                    sessions.insert(station.clone(), session);
                }
                if let Some(session) = sessions.get_mut(&station) {
                    let outputs = session.receive(frame, now);
                    process(&tnc, &station, session, outputs, now)?;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                for (station, session) in sessions.iter_mut() {
                    let outputs = session.handle_timeout(now);
                    process(&tnc, station, session, outputs, now)?;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        sessions.retain(|_, s| {
            s.state() != SessionState::Disconnected || s.poll_timeout().is_some()
        });
    }

    Ok(())
}

/// Decode in the sequence space of whichever session the frame belongs to.
fn decode(bytes: &[u8], sessions: &HashMap<Address, Session>) -> Option<Ax25Frame> {
    // Addresses read the same in either modulo
    let frame = Ax25Frame::from_bytes(bytes).ok()?;
    match sessions.get(&frame.source) {
        Some(session) if session.modulo() == Modulo::OneTwentyEight => {
            Ax25Frame::from_bytes_with_modulo(bytes, session.modulo()).ok()
        }
        _ => Some(frame),
    }
}

fn process(
    tnc: &Tnc,
    station: &Address,
    session: &mut Session,
    mut outputs: Vec<Output>,
    now: Instant,
) -> Result<(), Box<dyn Error>> {
    while !outputs.is_empty() {
        let mut more = Vec::new();
        for output in outputs.drain(..) {
            match output {
                Output::Transmit(frame) => {
                    tracing::debug!(%frame, "tx");
                    tnc.send_frame(&frame)?;
                }
                Output::Event(Event::Data(data)) => {
                    let reply = format!(
                        "You sent: {} ({})\r\n",
                        String::from_utf8_lossy(&data).trim_end(),
                        OffsetDateTime::now_utc()
                    );
                    more.extend(session.send(reply.as_bytes(), now));
                }
                Output::Event(Event::Connection(up)) => {
                    tracing::info!(
                        %station,
                        "client {}",
                        if up { "connected" } else { "disconnected" }
                    );
                }
                Output::Event(Event::Error(e)) => tracing::warn!(%station, %e, "session error"),
            }
        }
        outputs = more;
    }
    Ok(())
}
