use ax25::frame::{
    Address, Ax25Frame, CommandResponse, FrameContent, FrameReject, UnnumberedAcknowledge,
};
use ax25::sequence::Modulo;
use ax25::{Event, Session, SessionConfig};
use ax25_tnc::link::{Link, Transport};
use ax25_tnc::tnc::{RawFrameResult, TncError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

/// One end of an in-memory radio channel.
struct Pipe {
    peer: Sender<RawFrameResult>,
    incoming: Mutex<Option<Receiver<RawFrameResult>>>,
    /// Silently lose the frame with this index, counting from zero.
    lose: Option<usize>,
    sent: AtomicUsize,
}

impl Transport for Pipe {
    fn send(&self, frame: &[u8]) -> Result<(), TncError> {
        let index = self.sent.fetch_add(1, Ordering::SeqCst);
        if self.lose == Some(index) {
            return Ok(());
        }
        self.peer
            .send(Ok(frame.to_vec()))
            .map_err(|_| TncError::Shutdown)
    }

    fn incoming(&self) -> Receiver<RawFrameResult> {
        self.incoming
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| channel().1)
    }
}

fn pipes(lose_from_a: Option<usize>) -> (Pipe, Pipe) {
    let (to_a, a_rx) = channel();
    let (to_b, b_rx) = channel();
    (
        Pipe {
            peer: to_b,
            incoming: Mutex::new(Some(a_rx)),
            lose: lose_from_a,
            sent: AtomicUsize::new(0),
        },
        Pipe {
            peer: to_a,
            incoming: Mutex::new(Some(b_rx)),
            lose: None,
            sent: AtomicUsize::new(0),
        },
    )
}

fn caller(config: SessionConfig) -> Session {
    let mut s = Session::with_config(config).unwrap();
    s.set_local_address("VK7NTK-1".parse::<Address>().unwrap())
        .unwrap();
    s.set_remote_address("VK7XT-2".parse::<Address>().unwrap())
        .unwrap();
    s
}

fn fast() -> SessionConfig {
    SessionConfig {
        ack_time: Duration::from_millis(200),
        t2: Duration::from_millis(50),
        ..SessionConfig::default()
    }
}

fn next_data(events: &Receiver<Event>) -> Vec<u8> {
    loop {
        match events.recv_timeout(WAIT).unwrap() {
            Event::Data(data) => return data,
            Event::Connection(_) => continue,
            Event::Error(e) => panic!("unexpected error: {}", e),
        }
    }
}

#[test]
fn two_links_exchange_data() {
    let (pa, pb) = pipes(None);
    let a = Link::spawn(caller(fast()), pa);
    // The answering side learns both addresses from the first SABM
    let b = Link::spawn(Session::with_config(fast()).unwrap(), pb);
    let a_events = a.events();
    let b_events = b.events();

    a.connect().unwrap();
    assert_eq!(a_events.recv_timeout(WAIT).unwrap(), Event::Connection(true));
    assert_eq!(b_events.recv_timeout(WAIT).unwrap(), Event::Connection(true));

    a.send(b"hello over the air").unwrap();
    assert_eq!(next_data(&b_events), b"hello over the air".to_vec());

    b.send(b"and back again").unwrap();
    assert_eq!(next_data(&a_events), b"and back again".to_vec());

    a.disconnect().unwrap();
    assert_eq!(a_events.recv_timeout(WAIT).unwrap(), Event::Connection(false));
    assert_eq!(b_events.recv_timeout(WAIT).unwrap(), Event::Connection(false));

    a.shutdown().unwrap();
    b.shutdown().unwrap();
}

#[test]
fn large_payload_arrives_in_order() {
    let (pa, pb) = pipes(None);
    let a = Link::spawn(caller(fast()), pa);
    let b = Link::spawn(Session::with_config(fast()).unwrap(), pb);
    let a_events = a.events();
    let b_events = b.events();
    a.connect().unwrap();
    assert_eq!(a_events.recv_timeout(WAIT).unwrap(), Event::Connection(true));

    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    a.send(&payload).unwrap();

    let mut received = Vec::new();
    while received.len() < payload.len() {
        received.extend(next_data(&b_events));
    }
    assert_eq!(received, payload);
}

#[test]
fn lost_frame_is_recovered() {
    // Frame 0 is the SABM, 1-3 carry "a", "b", "c"; lose "b"
    let (pa, pb) = pipes(Some(2));
    let config = SessionConfig {
        max_info_length: 1,
        ..fast()
    };
    let a = Link::spawn(caller(config), pa);
    let b = Link::spawn(Session::with_config(fast()).unwrap(), pb);
    let a_events = a.events();
    let b_events = b.events();
    a.connect().unwrap();
    assert_eq!(a_events.recv_timeout(WAIT).unwrap(), Event::Connection(true));

    a.send(b"abc").unwrap();
    let mut received = Vec::new();
    while received.len() < 3 {
        received.extend(next_data(&b_events));
    }
    assert_eq!(received, b"abc".to_vec());
}

/// Wait for the next frame from the link that satisfies `wanted`.
fn next_frame(peer: &Receiver<RawFrameResult>, wanted: fn(&FrameContent) -> bool) -> Ax25Frame {
    loop {
        let bytes = peer.recv_timeout(WAIT).unwrap().unwrap();
        // Only U frames are expected here, which share one layout
        let frame = Ax25Frame::from_bytes(&bytes).unwrap();
        if wanted(&frame.content) {
            return frame;
        }
    }
}

fn reply(to: &Ax25Frame, content: FrameContent) -> Vec<u8> {
    Ax25Frame {
        source: to.destination.clone(),
        destination: to.source.clone(),
        route: Vec::new(),
        command_or_response: Some(CommandResponse::Response),
        modulo: Modulo::Eight,
        content,
    }
    .to_bytes()
    .unwrap()
}

#[test]
fn extended_mode_refused_by_frame_reject() {
    let (pa, pb) = pipes(None);
    let config = SessionConfig {
        modulo: Modulo::OneTwentyEight,
        ..fast()
    };
    let a = Link::spawn(caller(config), pa);
    let a_events = a.events();
    let peer = pb.incoming();
    a.connect().unwrap();

    let sabme = next_frame(&peer, |c| {
        matches!(c, FrameContent::SetAsynchronousBalancedModeExtended(_))
    });
    let frmr = FrameContent::FrameReject(FrameReject {
        final_bit: true,
        rejected_control_field_raw: 0x7F,
        z: false,
        y: false,
        x: false,
        w: true,
        receive_sequence: 0,
        send_sequence: 0,
        command_response: CommandResponse::Command,
    });
    pb.send(&reply(&sabme, frmr)).unwrap();

    let sabm = next_frame(&peer, |c| {
        matches!(c, FrameContent::SetAsynchronousBalancedMode(_))
    });
    pb.send(&reply(
        &sabm,
        FrameContent::UnnumberedAcknowledge(UnnumberedAcknowledge { final_bit: true }),
    ))
    .unwrap();
    assert_eq!(a_events.recv_timeout(WAIT).unwrap(), Event::Connection(true));
    a.shutdown().unwrap();
}

#[test]
fn commands_after_shutdown_fail() {
    let (pa, _pb) = pipes(None);
    let a = Link::spawn(caller(fast()), pa);
    a.shutdown().unwrap();
    assert!(matches!(a.connect(), Err(TncError::Shutdown)));
    assert!(a.shutdown().is_ok());
}
