use core::fmt;
use core::str::FromStr;

use crate::error::FrameError;
use crate::sequence::Modulo;

/// Length of one encoded address: six callsign octets plus the SSID octet.
const ADDRESS_LEN: usize = 7;
/// Destination, source and a single control octet.
const MIN_FRAME_LEN: usize = 2 * ADDRESS_LEN + 1;
/// AX.25 v2 permits at most eight digipeaters in the address field.
pub const MAX_REPEATERS: usize = 8;

const PF_MASK: u8 = 0b0001_0000;

const S_RR: u8 = 0b0000_0001;
const S_RNR: u8 = 0b0000_0101;
const S_REJ: u8 = 0b0000_1001;
const S_SREJ: u8 = 0b0000_1101;

const U_SABM: u8 = 0b0010_1111;
const U_SABME: u8 = 0b0110_1111;
const U_DISC: u8 = 0b0100_0011;
const U_DM: u8 = 0b0000_1111;
const U_UA: u8 = 0b0110_0011;
const U_FRMR: u8 = 0b1000_0111;
const U_UI: u8 = 0b0000_0011;
const U_XID: u8 = 0b1010_1111;
const U_TEST: u8 = 0b1110_0011;

// Mostly from AX.25 2.2 spec which has far more examples than 2.0
/// Identifiers compare by their wire value, so `Unknown(0xF0)` equals `None`.
#[derive(Debug, Clone, Copy, Eq)]
pub enum ProtocolIdentifier {
    /// AX.25 layer 3 implemented. Carries the raw PID since several values map here.
    Layer3Impl(u8),
    X25Plp,
    CompressedTcpIp,
    UncompressedTcpIp,
    SegmentationFragment,
    TexnetDatagram,
    LinkQuality,
    Appletalk,
    AppletalkArp,
    ArpaIp,
    ArpaAddress,
    Flexnet,
    NetRom,
    None,
    Escape,
    Unknown(u8),
}

impl ProtocolIdentifier {
    pub fn from_byte(byte: u8) -> ProtocolIdentifier {
        match byte {
            pid if pid & 0b0011_0000 == 0b0001_0000 || pid & 0b0011_0000 == 0b0010_0000 => {
                ProtocolIdentifier::Layer3Impl(pid)
            }
            0x01 => ProtocolIdentifier::X25Plp,
            0x06 => ProtocolIdentifier::CompressedTcpIp,
            0x07 => ProtocolIdentifier::UncompressedTcpIp,
            0x08 => ProtocolIdentifier::SegmentationFragment,
            0xC3 => ProtocolIdentifier::TexnetDatagram,
            0xC4 => ProtocolIdentifier::LinkQuality,
            0xCA => ProtocolIdentifier::Appletalk,
            0xCB => ProtocolIdentifier::AppletalkArp,
            0xCC => ProtocolIdentifier::ArpaIp,
            0xCD => ProtocolIdentifier::ArpaAddress,
            0xCE => ProtocolIdentifier::Flexnet,
            0xCF => ProtocolIdentifier::NetRom,
            0xF0 => ProtocolIdentifier::None,
            0xFF => ProtocolIdentifier::Escape,
            pid => ProtocolIdentifier::Unknown(pid),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ProtocolIdentifier::Layer3Impl(pid) => pid,
            ProtocolIdentifier::X25Plp => 0x01,
            ProtocolIdentifier::CompressedTcpIp => 0x06,
            ProtocolIdentifier::UncompressedTcpIp => 0x07,
            ProtocolIdentifier::SegmentationFragment => 0x08,
            ProtocolIdentifier::TexnetDatagram => 0xC3,
            ProtocolIdentifier::LinkQuality => 0xC4,
            ProtocolIdentifier::Appletalk => 0xCA,
            ProtocolIdentifier::AppletalkArp => 0xCB,
            ProtocolIdentifier::ArpaIp => 0xCC,
            ProtocolIdentifier::ArpaAddress => 0xCD,
            ProtocolIdentifier::Flexnet => 0xCE,
            ProtocolIdentifier::NetRom => 0xCF,
            ProtocolIdentifier::None => 0xF0,
            ProtocolIdentifier::Escape => 0xFF,
            ProtocolIdentifier::Unknown(pid) => pid,
        }
    }
}

impl PartialEq for ProtocolIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.to_byte() == other.to_byte()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResponse {
    Command,
    Response,
}

/// Information (I) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Information {
    pub pid: ProtocolIdentifier,
    pub info: Vec<u8>,
    pub receive_sequence: u8,
    pub send_sequence: u8,
    pub poll: bool,
}

/// RR Supervisory (S) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReady {
    pub receive_sequence: u8,
    pub poll_or_final: bool,
}

/// RNR Supervisory (S) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveNotReady {
    pub receive_sequence: u8,
    pub poll_or_final: bool,
}

/// REJ Supervisory (S) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    pub receive_sequence: u8,
    pub poll_or_final: bool,
}

/// SREJ Supervisory (S) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectiveReject {
    pub receive_sequence: u8,
    pub poll_or_final: bool,
}

/// SABM Unnumbered (U) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAsynchronousBalancedMode {
    pub poll: bool,
}

/// SABME Unnumbered (U) frame, requesting a modulo 128 connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAsynchronousBalancedModeExtended {
    pub poll: bool,
}

/// DISC Unnumbered (U) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub poll: bool,
}

/// DM Unnumbered (U) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectedMode {
    pub final_bit: bool, // 'final' is a rust keyword
}

/// UA Unnumbered (U) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnnumberedAcknowledge {
    pub final_bit: bool,
}

/// FRMR Unnumbered (U) frame. Flags correspond to names in the AX.25 specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReject {
    pub final_bit: bool,
    /// A raw copy of the control field in the frame that was rejected.
    /// Only the low octet is used on a modulo 8 link.
    pub rejected_control_field_raw: u16,
    /// The attached control field contained an invalid Receive Sequence Number
    pub z: bool,
    /// The information field of a received frame exceeded the maximum allowable length.
    pub y: bool,
    /// A U or S frame was received that contained an information field.
    pub x: bool,
    /// The received control field was invalid or not implemented.
    pub w: bool,
    pub receive_sequence: u8,
    pub send_sequence: u8,
    pub command_response: CommandResponse,
}

/// UI Unnumbered Information frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnnumberedInformation {
    pub pid: ProtocolIdentifier,
    pub info: Vec<u8>,
    pub poll_or_final: bool,
}

/// XID Unnumbered (U) frame. Parameter fields are kept raw and not negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeIdentification {
    pub poll_or_final: bool,
    pub info: Vec<u8>,
}

/// TEST Unnumbered (U) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub poll_or_final: bool,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameContent {
    Information(Information),
    ReceiveReady(ReceiveReady),
    ReceiveNotReady(ReceiveNotReady),
    Reject(Reject),
    SelectiveReject(SelectiveReject),
    SetAsynchronousBalancedMode(SetAsynchronousBalancedMode),
    SetAsynchronousBalancedModeExtended(SetAsynchronousBalancedModeExtended),
    Disconnect(Disconnect),
    DisconnectedMode(DisconnectedMode),
    UnnumberedAcknowledge(UnnumberedAcknowledge),
    FrameReject(FrameReject),
    UnnumberedInformation(UnnumberedInformation),
    ExchangeIdentification(ExchangeIdentification),
    Test(Test),
}

impl FrameContent {
    /// The poll or final bit, whichever this frame carries.
    pub fn poll_or_final(&self) -> bool {
        match self {
            FrameContent::Information(i) => i.poll,
            FrameContent::ReceiveReady(s) => s.poll_or_final,
            FrameContent::ReceiveNotReady(s) => s.poll_or_final,
            FrameContent::Reject(s) => s.poll_or_final,
            FrameContent::SelectiveReject(s) => s.poll_or_final,
            FrameContent::SetAsynchronousBalancedMode(u) => u.poll,
            FrameContent::SetAsynchronousBalancedModeExtended(u) => u.poll,
            FrameContent::Disconnect(u) => u.poll,
            FrameContent::DisconnectedMode(u) => u.final_bit,
            FrameContent::UnnumberedAcknowledge(u) => u.final_bit,
            FrameContent::FrameReject(u) => u.final_bit,
            FrameContent::UnnumberedInformation(u) => u.poll_or_final,
            FrameContent::ExchangeIdentification(u) => u.poll_or_final,
            FrameContent::Test(u) => u.poll_or_final,
        }
    }

    fn poll_or_final_mut(&mut self) -> &mut bool {
        match self {
            FrameContent::Information(i) => &mut i.poll,
            FrameContent::ReceiveReady(s) => &mut s.poll_or_final,
            FrameContent::ReceiveNotReady(s) => &mut s.poll_or_final,
            FrameContent::Reject(s) => &mut s.poll_or_final,
            FrameContent::SelectiveReject(s) => &mut s.poll_or_final,
            FrameContent::SetAsynchronousBalancedMode(u) => &mut u.poll,
            FrameContent::SetAsynchronousBalancedModeExtended(u) => &mut u.poll,
            FrameContent::Disconnect(u) => &mut u.poll,
            FrameContent::DisconnectedMode(u) => &mut u.final_bit,
            FrameContent::UnnumberedAcknowledge(u) => &mut u.final_bit,
            FrameContent::FrameReject(u) => &mut u.final_bit,
            FrameContent::UnnumberedInformation(u) => &mut u.poll_or_final,
            FrameContent::ExchangeIdentification(u) => &mut u.poll_or_final,
            FrameContent::Test(u) => &mut u.poll_or_final,
        }
    }

    /// N(R) for I and S frames.
    pub fn receive_sequence(&self) -> Option<u8> {
        match self {
            FrameContent::Information(i) => Some(i.receive_sequence),
            FrameContent::ReceiveReady(s) => Some(s.receive_sequence),
            FrameContent::ReceiveNotReady(s) => Some(s.receive_sequence),
            FrameContent::Reject(s) => Some(s.receive_sequence),
            FrameContent::SelectiveReject(s) => Some(s.receive_sequence),
            _ => None,
        }
    }

    fn receive_sequence_mut(&mut self) -> Option<&mut u8> {
        match self {
            FrameContent::Information(i) => Some(&mut i.receive_sequence),
            FrameContent::ReceiveReady(s) => Some(&mut s.receive_sequence),
            FrameContent::ReceiveNotReady(s) => Some(&mut s.receive_sequence),
            FrameContent::Reject(s) => Some(&mut s.receive_sequence),
            FrameContent::SelectiveReject(s) => Some(&mut s.receive_sequence),
            _ => None,
        }
    }

    /// N(S) for I frames.
    pub fn send_sequence(&self) -> Option<u8> {
        match self {
            FrameContent::Information(i) => Some(i.send_sequence),
            _ => None,
        }
    }

    /// The information field of I, UI and TEST frames.
    pub fn info(&self) -> Option<&[u8]> {
        match self {
            FrameContent::Information(i) => Some(&i.info),
            FrameContent::UnnumberedInformation(u) => Some(&u.info),
            FrameContent::Test(u) => Some(&u.info),
            _ => None,
        }
    }

    /// The protocol identifier of I and UI frames.
    pub fn pid(&self) -> Option<ProtocolIdentifier> {
        match self {
            FrameContent::Information(i) => Some(i.pid),
            FrameContent::UnnumberedInformation(u) => Some(u.pid),
            _ => None,
        }
    }

    fn encode(&self, modulo: Modulo, encoded: &mut Vec<u8>) -> Result<(), FrameError> {
        if let Some(n_r) = self.receive_sequence() {
            check_sequence("N(R)", n_r, modulo)?;
        }
        match self {
            FrameContent::Information(i) => {
                check_sequence("N(S)", i.send_sequence, modulo)?;
                if i.info.is_empty() {
                    return Err(FrameError::incomplete(
                        "I frame must carry an information field",
                    ));
                }
                match modulo {
                    Modulo::Eight => {
                        let mut c: u8 = 0;
                        c |= (i.receive_sequence & 0b0000_0111) << 5;
                        c |= if i.poll { PF_MASK } else { 0 };
                        c |= (i.send_sequence & 0b0000_0111) << 1;
                        encoded.push(c);
                    }
                    Modulo::OneTwentyEight => {
                        encoded.push(i.send_sequence << 1);
                        encoded.push((i.receive_sequence << 1) | u8::from(i.poll));
                    }
                }
                encoded.push(i.pid.to_byte());
                encoded.extend(&i.info);
            }
            FrameContent::ReceiveReady(s) => {
                encode_s(S_RR, s.receive_sequence, s.poll_or_final, modulo, encoded)
            }
            FrameContent::ReceiveNotReady(s) => {
                encode_s(S_RNR, s.receive_sequence, s.poll_or_final, modulo, encoded)
            }
            FrameContent::Reject(s) => {
                encode_s(S_REJ, s.receive_sequence, s.poll_or_final, modulo, encoded)
            }
            FrameContent::SelectiveReject(s) => {
                encode_s(S_SREJ, s.receive_sequence, s.poll_or_final, modulo, encoded)
            }
            FrameContent::SetAsynchronousBalancedMode(u) => encoded.push(encode_u(U_SABM, u.poll)),
            FrameContent::SetAsynchronousBalancedModeExtended(u) => {
                encoded.push(encode_u(U_SABME, u.poll))
            }
            FrameContent::Disconnect(u) => encoded.push(encode_u(U_DISC, u.poll)),
            FrameContent::DisconnectedMode(u) => encoded.push(encode_u(U_DM, u.final_bit)),
            FrameContent::UnnumberedAcknowledge(u) => encoded.push(encode_u(U_UA, u.final_bit)),
            FrameContent::FrameReject(frmr) => {
                check_sequence("FRMR V(R)", frmr.receive_sequence, modulo)?;
                check_sequence("FRMR V(S)", frmr.send_sequence, modulo)?;
                if modulo == Modulo::Eight && frmr.rejected_control_field_raw > 0xFF {
                    return Err(FrameError::invalid(
                        "FRMR control field",
                        format!(
                            "{:#06x} does not fit the single octet of a modulo 8 FRMR",
                            frmr.rejected_control_field_raw
                        ),
                    ));
                }
                encoded.push(encode_u(U_FRMR, frmr.final_bit));
                encode_frmr_info(frmr, modulo, encoded);
            }
            FrameContent::UnnumberedInformation(u) => {
                encoded.push(encode_u(U_UI, u.poll_or_final));
                encoded.push(u.pid.to_byte());
                encoded.extend(&u.info);
            }
            FrameContent::ExchangeIdentification(u) => {
                encoded.push(encode_u(U_XID, u.poll_or_final));
                encoded.extend(&u.info);
            }
            FrameContent::Test(u) => {
                encoded.push(encode_u(U_TEST, u.poll_or_final));
                encoded.extend(&u.info);
            }
        }
        Ok(())
    }
}

impl fmt::Display for FrameContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pf = if self.poll_or_final() { " P/F" } else { "" };
        match self {
            FrameContent::Information(i) => write!(
                f,
                "I R{} S{}{} pid={:02X}",
                i.receive_sequence,
                i.send_sequence,
                pf,
                i.pid.to_byte()
            ),
            FrameContent::ReceiveReady(s) => write!(f, "RR R{}{}", s.receive_sequence, pf),
            FrameContent::ReceiveNotReady(s) => write!(f, "RNR R{}{}", s.receive_sequence, pf),
            FrameContent::Reject(s) => write!(f, "REJ R{}{}", s.receive_sequence, pf),
            FrameContent::SelectiveReject(s) => write!(f, "SREJ R{}{}", s.receive_sequence, pf),
            FrameContent::SetAsynchronousBalancedMode(_) => write!(f, "SABM{}", pf),
            FrameContent::SetAsynchronousBalancedModeExtended(_) => write!(f, "SABME{}", pf),
            FrameContent::Disconnect(_) => write!(f, "DISC{}", pf),
            FrameContent::DisconnectedMode(_) => write!(f, "DM{}", pf),
            FrameContent::UnnumberedAcknowledge(_) => write!(f, "UA{}", pf),
            FrameContent::FrameReject(_) => write!(f, "FRMR{}", pf),
            FrameContent::UnnumberedInformation(u) => {
                write!(f, "UI{} pid={:02X}", pf, u.pid.to_byte())
            }
            FrameContent::ExchangeIdentification(_) => write!(f, "XID{}", pf),
            FrameContent::Test(_) => write!(f, "TEST{}", pf),
        }
    }
}

fn check_sequence(field: &'static str, n: u8, modulo: Modulo) -> Result<(), FrameError> {
    if modulo.contains(n) {
        Ok(())
    } else {
        Err(FrameError::invalid(
            field,
            format!("{} is out of range for {}", n, modulo),
        ))
    }
}

fn encode_s(subtype: u8, n_r: u8, poll_or_final: bool, modulo: Modulo, encoded: &mut Vec<u8>) {
    match modulo {
        Modulo::Eight => {
            let mut c = subtype;
            c |= if poll_or_final { PF_MASK } else { 0 };
            c |= (n_r & 0b0000_0111) << 5;
            encoded.push(c);
        }
        Modulo::OneTwentyEight => {
            encoded.push(subtype);
            encoded.push((n_r << 1) | u8::from(poll_or_final));
        }
    }
}

fn encode_u(subtype: u8, poll_or_final: bool) -> u8 {
    subtype | if poll_or_final { PF_MASK } else { 0 }
}

fn encode_frmr_info(frmr: &FrameReject, modulo: Modulo, encoded: &mut Vec<u8>) {
    let cr = u8::from(frmr.command_response == CommandResponse::Response);
    let mut flags: u8 = 0;
    flags |= if frmr.w { 1 << 0 } else { 0 };
    flags |= if frmr.x { 1 << 1 } else { 0 };
    flags |= if frmr.y { 1 << 2 } else { 0 };
    flags |= if frmr.z { 1 << 3 } else { 0 };
    match modulo {
        Modulo::Eight => {
            encoded.push(frmr.rejected_control_field_raw as u8);
            encoded.push(
                ((frmr.receive_sequence & 0b0000_0111) << 5)
                    | (cr << 4)
                    | ((frmr.send_sequence & 0b0000_0111) << 1),
            );
        }
        Modulo::OneTwentyEight => {
            encoded.extend(frmr.rejected_control_field_raw.to_le_bytes());
            encoded.push(frmr.send_sequence << 1);
            encoded.push((frmr.receive_sequence << 1) | cr);
        }
    }
    encoded.push(flags);
}

/// A station callsign and SSID, e.g. VK7NTK-2.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    callsign: String,
    ssid: u8,
}

impl Address {
    /// Create an address from a callsign of 1-6 uppercase letters/digits and an SSID of 0-15.
    pub fn new(callsign: &str, ssid: u8) -> Result<Address, FrameError> {
        if callsign.is_empty() || callsign.len() > 6 {
            return Err(FrameError::invalid(
                "callsign",
                format!("'{}' must be 1-6 letters/numbers", callsign),
            ));
        }
        if !callsign
            .bytes()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(FrameError::invalid(
                "callsign",
                format!(
                    "'{}' must be uppercase alphanumeric only (space padding is handled internally)",
                    callsign
                ),
            ));
        }
        if ssid > 15 {
            return Err(FrameError::invalid(
                "SSID",
                format!("{} must be from 0 to 15", ssid),
            ));
        }
        Ok(Address {
            callsign: callsign.to_string(),
            ssid,
        })
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    fn to_bytes(&self, high_bit: bool, final_in_address: bool) -> [u8; ADDRESS_LEN] {
        // Space padding, shifted by one bit as required for AX.25 address encoding
        let mut encoded = [b' ' << 1; ADDRESS_LEN];
        for (slot, b) in encoded.iter_mut().zip(self.callsign.as_bytes()) {
            *slot = b << 1;
        }
        let high = if high_bit { 0b1000_0000 } else { 0 };
        let low = if final_in_address { 0b0000_0001 } else { 0 };
        encoded[6] = (self.ssid << 1) | 0b0110_0000 | high | low;
        encoded
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ssid {
            0 => write!(f, "{}", self.callsign),
            ssid => write!(f, "{}-{}", self.callsign, ssid),
        }
    }
}

impl FromStr for Address {
    type Err = FrameError;

    /// Parses `CALL-N`, or `CALL` for SSID 0. Lowercase callsigns are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (callsign, ssid) = match s.split_once('-') {
            Some((callsign, ssid)) => {
                let ssid = ssid.parse::<u8>().map_err(|_| {
                    FrameError::invalid("SSID", format!("'{}' must be from 0 to 15", ssid))
                })?;
                (callsign, ssid)
            }
            None => (s, 0),
        };
        Address::new(&callsign.to_uppercase(), ssid)
    }
}

/// A repeater in the address field and whether it has already relayed this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub repeater: Address,
    pub has_repeated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Frame {
    pub source: Address,
    pub destination: Address,
    /// The route the packet has taken/will take according to repeater entries in the address field
    pub route: Vec<RouteEntry>,
    /// AX.25 2.0-compliant stations will indicate in every frame whether it is a command
    /// or a response, as part of the address field.
    pub command_or_response: Option<CommandResponse>,
    /// Sequence space used for the control field of I and S frames.
    pub modulo: Modulo,
    pub content: FrameContent,
}

impl Ax25Frame {
    /// Returns a UTF-8 string that is a "best effort" at displaying the information
    /// content of this frame. Returns None if there is no information field present.
    /// Most applications will need to work with the Vec<u8> info directly.
    pub fn info_string_lossy(&self) -> Option<String> {
        self.content
            .info()
            .map(|info| String::from_utf8_lossy(info).into_owned())
    }

    /// True when this frame is a command with the poll bit set, i.e. it demands a response.
    pub fn is_poll(&self) -> bool {
        self.content.poll_or_final() && self.command_or_response != Some(CommandResponse::Response)
    }

    /// Assign N(R), checked against the frame's modulo.
    pub fn set_receive_sequence(&mut self, n_r: u8) -> Result<(), FrameError> {
        check_sequence("N(R)", n_r, self.modulo)?;
        match self.content.receive_sequence_mut() {
            Some(slot) => {
                *slot = n_r;
                Ok(())
            }
            None => Err(FrameError::invalid(
                "N(R)",
                "only I and S frames carry a receive sequence",
            )),
        }
    }

    /// Assign N(S), checked against the frame's modulo.
    pub fn set_send_sequence(&mut self, n_s: u8) -> Result<(), FrameError> {
        check_sequence("N(S)", n_s, self.modulo)?;
        match &mut self.content {
            FrameContent::Information(i) => {
                i.send_sequence = n_s;
                Ok(())
            }
            _ => Err(FrameError::invalid(
                "N(S)",
                "only I frames carry a send sequence",
            )),
        }
    }

    pub fn set_poll_or_final(&mut self, poll_or_final: bool) {
        *self.content.poll_or_final_mut() = poll_or_final;
    }

    /// Decode a frame from a modulo 8 link.
    pub fn from_bytes(bytes: &[u8]) -> Result<Ax25Frame, FrameError> {
        Ax25Frame::from_bytes_with_modulo(bytes, Modulo::Eight)
    }

    /// Decode a frame using the control field layout of the given modulo.
    pub fn from_bytes_with_modulo(bytes: &[u8], modulo: Modulo) -> Result<Ax25Frame, FrameError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(FrameError::malformed(format!(
                "Packet is unreasonably short: {} bytes",
                bytes.len()
            )));
        }

        let dest = parse_address(&bytes[0..ADDRESS_LEN])?;
        if dest.extension {
            return Err(FrameError::malformed(
                "Address field ends after the destination",
            ));
        }
        let src = parse_address(&bytes[ADDRESS_LEN..2 * ADDRESS_LEN])?;

        let mut offset = 2 * ADDRESS_LEN;
        let mut last_extension = src.extension;
        let mut route: Vec<RouteEntry> = Vec::new();
        while !last_extension {
            if route.len() == MAX_REPEATERS {
                return Err(FrameError::malformed(format!(
                    "More than {} repeaters in address field",
                    MAX_REPEATERS
                )));
            }
            if offset + ADDRESS_LEN > bytes.len() {
                return Err(FrameError::malformed("Address field is truncated"));
            }
            let repeater = parse_address(&bytes[offset..offset + ADDRESS_LEN])?;
            last_extension = repeater.extension;
            route.push(RouteEntry {
                // The "C" bit in an address happens to be the repeated bit for a repeater
                has_repeated: repeater.c_bit,
                repeater: repeater.address,
            });
            offset += ADDRESS_LEN;
        }

        let content = parse_content(&bytes[offset..], modulo)?;
        let modulo = match &content {
            FrameContent::FrameReject(_) => frmr_layout(&bytes[offset + 1..])?,
            _ => modulo,
        };
        let command_or_response = match (dest.c_bit, src.c_bit) {
            (true, false) => Some(CommandResponse::Command),
            (false, true) => Some(CommandResponse::Response),
            _ => None,
        };

        Ok(Ax25Frame {
            source: src.address,
            destination: dest.address,
            route,
            command_or_response,
            modulo,
            content,
        })
    }

    /// Encode the frame using the control field layout of `self.modulo`.
    ///
    /// A frame with `command_or_response: None` is sent with command bits, so
    /// it decodes as `Some(CommandResponse::Command)`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        if self.route.len() > MAX_REPEATERS {
            return Err(FrameError::invalid(
                "route",
                format!(
                    "{} repeaters exceeds the maximum of {}",
                    self.route.len(),
                    MAX_REPEATERS
                ),
            ));
        }
        let mut frame = Vec::with_capacity(MIN_FRAME_LEN + self.route.len() * ADDRESS_LEN + 1);
        let (dest_c_bit, src_c_bit) = match self.command_or_response {
            Some(CommandResponse::Command) => (true, false),
            Some(CommandResponse::Response) => (false, true),
            _ => (true, false), // assume Command
        };
        frame.extend(self.destination.to_bytes(dest_c_bit, false));
        frame.extend(self.source.to_bytes(src_c_bit, self.route.is_empty()));

        for (i, entry) in self.route.iter().enumerate() {
            frame.extend(
                entry
                    .repeater
                    .to_bytes(entry.has_repeated, i + 1 == self.route.len()),
            );
        }

        self.content.encode(self.modulo, &mut frame)?;
        Ok(frame)
    }
}

impl fmt::Display for Ax25Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.source, self.destination)?;
        for entry in &self.route {
            write!(
                f,
                ",{}{}",
                entry.repeater,
                if entry.has_repeated { "*" } else { "" }
            )?;
        }
        let cr = match self.command_or_response {
            Some(CommandResponse::Command) => " cmd",
            Some(CommandResponse::Response) => " res",
            None => "",
        };
        write!(f, " <{}{}>", self.content, cr)?;
        if let Some(info) = self.info_string_lossy() {
            write!(f, " \"{}\"", info)?;
        }
        Ok(())
    }
}

struct ParsedAddress {
    address: Address,
    c_bit: bool,
    extension: bool,
}

fn parse_address(bytes: &[u8]) -> Result<ParsedAddress, FrameError> {
    let mut callsign: Vec<u8> = bytes[0..6]
        .iter()
        .rev()
        .map(|&c| c >> 1)
        .skip_while(|&c| c == b' ')
        .collect();
    callsign.reverse();
    let callsign = String::from_utf8(callsign)
        .map_err(|_| FrameError::malformed("Callsign is not valid ASCII"))?;
    let address = Address::new(&callsign, (bytes[6] >> 1) & 0x0f)
        .map_err(|e| FrameError::malformed(format!("Bad address in frame: {}", e)))?;
    Ok(ParsedAddress {
        address,
        c_bit: bytes[6] & 0b1000_0000 > 0,
        extension: bytes[6] & 0b0000_0001 > 0,
    })
}

/// Parse the content of the frame starting from the control field
fn parse_content(bytes: &[u8], modulo: Modulo) -> Result<FrameContent, FrameError> {
    match bytes.first() {
        None => Err(FrameError::malformed("Missing control field")),
        Some(c) if c & 0x01 == 0x00 => parse_i_frame(bytes, modulo),
        Some(c) if c & 0x03 == 0x01 => parse_s_frame(bytes, modulo),
        Some(_) => parse_u_frame(bytes),
    }
}

/// Returns (N(R), poll/final) for an I or S frame control field.
fn sequenced_control(bytes: &[u8], modulo: Modulo) -> (u8, bool) {
    match modulo {
        Modulo::Eight => ((bytes[0] & 0b1110_0000) >> 5, bytes[0] & PF_MASK > 0),
        Modulo::OneTwentyEight => (bytes[1] >> 1, bytes[1] & 0b0000_0001 > 0),
    }
}

fn parse_i_frame(bytes: &[u8], modulo: Modulo) -> Result<FrameContent, FrameError> {
    let control_len = modulo.control_octets();
    if bytes.len() < control_len + 1 {
        return Err(FrameError::malformed("Missing PID field"));
    }
    let (receive_sequence, poll) = sequenced_control(bytes, modulo);
    let send_sequence = match modulo {
        Modulo::Eight => (bytes[0] & 0b0000_1110) >> 1,
        Modulo::OneTwentyEight => bytes[0] >> 1,
    };
    Ok(FrameContent::Information(Information {
        receive_sequence,
        send_sequence,
        poll,
        pid: ProtocolIdentifier::from_byte(bytes[control_len]),
        info: bytes[control_len + 1..].to_vec(),
    }))
}

fn parse_s_frame(bytes: &[u8], modulo: Modulo) -> Result<FrameContent, FrameError> {
    // These all have the same general layout
    // There should be no PID or info following the control field
    if bytes.len() < modulo.control_octets() {
        return Err(FrameError::malformed("Truncated control field"));
    }
    let (receive_sequence, poll_or_final) = sequenced_control(bytes, modulo);

    match bytes[0] & 0b0000_1111 {
        S_RR => Ok(FrameContent::ReceiveReady(ReceiveReady {
            receive_sequence,
            poll_or_final,
        })),
        S_RNR => Ok(FrameContent::ReceiveNotReady(ReceiveNotReady {
            receive_sequence,
            poll_or_final,
        })),
        S_REJ => Ok(FrameContent::Reject(Reject {
            receive_sequence,
            poll_or_final,
        })),
        S_SREJ => Ok(FrameContent::SelectiveReject(SelectiveReject {
            receive_sequence,
            poll_or_final,
        })),
        _ => Err(FrameError::malformed("Unrecognised S field type")),
    }
}

fn parse_u_frame(bytes: &[u8]) -> Result<FrameContent, FrameError> {
    // The only moving part in control for U frames is the P/F bit
    let c = bytes[0];
    let poll_or_final = c & PF_MASK > 0;

    // Ignore the P/F bit for identifying the command or response
    match c & !PF_MASK {
        U_SABM => Ok(FrameContent::SetAsynchronousBalancedMode(
            SetAsynchronousBalancedMode {
                poll: poll_or_final,
            },
        )),
        U_SABME => Ok(FrameContent::SetAsynchronousBalancedModeExtended(
            SetAsynchronousBalancedModeExtended {
                poll: poll_or_final,
            },
        )),
        U_DISC => Ok(FrameContent::Disconnect(Disconnect {
            poll: poll_or_final,
        })),
        U_DM => Ok(FrameContent::DisconnectedMode(DisconnectedMode {
            final_bit: poll_or_final,
        })),
        U_UA => Ok(FrameContent::UnnumberedAcknowledge(UnnumberedAcknowledge {
            final_bit: poll_or_final,
        })),
        U_FRMR => parse_frmr_frame(bytes),
        U_UI => {
            if bytes.len() < 2 {
                return Err(FrameError::malformed("Missing PID field"));
            }
            Ok(FrameContent::UnnumberedInformation(UnnumberedInformation {
                poll_or_final,
                pid: ProtocolIdentifier::from_byte(bytes[1]),
                info: bytes[2..].to_vec(),
            }))
        }
        U_XID => Ok(FrameContent::ExchangeIdentification(
            ExchangeIdentification {
                poll_or_final,
                info: bytes[1..].to_vec(),
            },
        )),
        U_TEST => Ok(FrameContent::Test(Test {
            poll_or_final,
            info: bytes[1..].to_vec(),
        })),
        _ => Err(FrameError::malformed("Unrecognised U field type")),
    }
}

/// The FRMR info field layout, which is known from its length alone.
///
/// A modulo 8 station answers SABME with a 3 octet FRMR, whatever modulo the
/// receiving side is decoding with.
fn frmr_layout(info: &[u8]) -> Result<Modulo, FrameError> {
    match info.len() {
        3 => Ok(Modulo::Eight),
        5 => Ok(Modulo::OneTwentyEight),
        len => Err(FrameError::malformed(format!(
            "Wrong size for FRMR info: {} bytes",
            len
        ))),
    }
}

fn parse_frmr_frame(bytes: &[u8]) -> Result<FrameContent, FrameError> {
    let info = &bytes[1..];
    let modulo = frmr_layout(info)?;
    let (rejected_control_field_raw, receive_sequence, send_sequence, cr) = match modulo {
        Modulo::Eight => (
            info[0] as u16,
            (info[1] & 0b1110_0000) >> 5,
            (info[1] & 0b0000_1110) >> 1,
            info[1] & 0b0001_0000 > 0,
        ),
        Modulo::OneTwentyEight => (
            u16::from_le_bytes([info[0], info[1]]),
            info[3] >> 1,
            info[2] >> 1,
            info[3] & 0b0000_0001 > 0,
        ),
    };
    let flags = info[info.len() - 1];
    Ok(FrameContent::FrameReject(FrameReject {
        final_bit: bytes[0] & PF_MASK > 0,
        rejected_control_field_raw,
        z: flags & 0b0000_1000 > 0,
        y: flags & 0b0000_0100 > 0,
        x: flags & 0b0000_0010 > 0,
        w: flags & 0b0000_0001 > 0,
        receive_sequence,
        send_sequence,
        command_response: if cr {
            CommandResponse::Response
        } else {
            CommandResponse::Command
        },
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    /// APRS <- VK7NTK-1, UI, PID none, "hi"
    const UI_FRAME: [u8; 18] = [
        0x82, 0xA0, 0xA4, 0xA6, 0x40, 0x40, 0xE0, // APRS, command
        0xAC, 0x96, 0x6E, 0x9C, 0xA8, 0x96, 0x63, // VK7NTK-1, last address
        0x03, 0xF0, 0x68, 0x69,
    ];

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn frame(content: FrameContent, modulo: Modulo) -> Ax25Frame {
        Ax25Frame {
            source: addr("VK7NTK-1"),
            destination: addr("VK7XT-12"),
            route: Vec::new(),
            command_or_response: Some(CommandResponse::Command),
            modulo,
            content,
        }
    }

    #[test]
    fn pid_test() {
        use ProtocolIdentifier::*;
        assert_eq!(ProtocolIdentifier::from_byte(0x01), X25Plp);
        assert_eq!(ProtocolIdentifier::from_byte(0xCA), Appletalk);
        assert_eq!(ProtocolIdentifier::from_byte(0xFF), Escape);
        assert_eq!(ProtocolIdentifier::from_byte(0xF0), None);
        assert!(matches!(ProtocolIdentifier::from_byte(0x45), Unknown(0x45)));
        assert!(matches!(ProtocolIdentifier::from_byte(0x10), Layer3Impl(0x10)));
        assert!(matches!(ProtocolIdentifier::from_byte(0x20), Layer3Impl(0x20)));
        assert!(matches!(ProtocolIdentifier::from_byte(0xA5), Layer3Impl(0xA5)));
        for byte in 0..=255u8 {
            assert_eq!(ProtocolIdentifier::from_byte(byte).to_byte(), byte);
        }
    }

    #[test]
    fn pid_compares_by_wire_value() {
        use ProtocolIdentifier::*;
        assert_eq!(Unknown(0x10), Layer3Impl(0x10));
        assert_eq!(Layer3Impl(0xF0), None);
        assert_ne!(Unknown(0x10), Unknown(0x11));

        let f = frame(
            FrameContent::UnnumberedInformation(UnnumberedInformation {
                pid: Unknown(0x10),
                info: b"x".to_vec(),
                poll_or_final: false,
            }),
            Modulo::Eight,
        );
        let parsed = Ax25Frame::from_bytes(&f.to_bytes().unwrap()).unwrap();
        assert!(matches!(parsed.content.pid(), Some(Layer3Impl(0x10))));
        assert_eq!(parsed, f);
    }

    #[test]
    fn test_address_fromstr() {
        assert_eq!(
            Address::from_str("VK7NTK-1").unwrap(),
            Address {
                callsign: "VK7NTK".to_string(),
                ssid: 1
            }
        );
        assert_eq!(
            Address::from_str("ID-15").unwrap(),
            Address {
                callsign: "ID".to_string(),
                ssid: 15
            }
        );
        assert_eq!(Address::from_str("vk7ntk-5").unwrap().callsign(), "VK7NTK");
        assert_eq!(Address::from_str("VK7NTK").unwrap().ssid(), 0);

        assert!(Address::from_str("-1").is_err());
        assert!(Address::from_str("VK7N -5").is_err());
        assert!(Address::from_str("VK7NTK-16").is_err());
        assert!(Address::from_str("VK7NTKX-1").is_err());
        assert!(Address::from_str("vk7n--1").is_err());
    }

    #[test]
    fn address_new_is_strict() {
        assert!(Address::new("VK7NTK", 2).is_ok());
        assert!(matches!(
            Address::new("vk7ntk", 2),
            Err(FrameError::InvalidField {
                field: "callsign",
                ..
            })
        ));
        assert!(matches!(
            Address::new("VK7NTK", 16),
            Err(FrameError::InvalidField { field: "SSID", .. })
        ));
        assert!(Address::new("", 0).is_err());
    }

    #[test]
    fn address_display() {
        assert_eq!(addr("VK7NTK-2").to_string(), "VK7NTK-2");
        assert_eq!(addr("APRS-0").to_string(), "APRS");
    }

    #[test]
    fn decode_ui_frame() {
        let parsed = Ax25Frame::from_bytes(&UI_FRAME).unwrap();
        assert_eq!(parsed.destination, addr("APRS"));
        assert_eq!(parsed.source, addr("VK7NTK-1"));
        assert!(parsed.route.is_empty());
        assert_eq!(parsed.command_or_response, Some(CommandResponse::Command));
        assert_eq!(
            parsed.content,
            FrameContent::UnnumberedInformation(UnnumberedInformation {
                pid: ProtocolIdentifier::None,
                info: b"hi".to_vec(),
                poll_or_final: false,
            })
        );
        assert_eq!(parsed.info_string_lossy().as_deref(), Some("hi"));
        assert_eq!(parsed.to_bytes().unwrap(), UI_FRAME.to_vec());
    }

    #[test]
    fn decode_repeater_path() {
        let mut f = frame(
            FrameContent::UnnumberedInformation(UnnumberedInformation {
                pid: ProtocolIdentifier::None,
                info: b"test".to_vec(),
                poll_or_final: false,
            }),
            Modulo::Eight,
        );
        f.route = vec![
            RouteEntry {
                repeater: addr("WIDE1-1"),
                has_repeated: true,
            },
            RouteEntry {
                repeater: addr("WIDE2-2"),
                has_repeated: false,
            },
        ];
        let bytes = f.to_bytes().unwrap();
        assert_eq!(bytes.len(), 4 * 7 + 2 + 4);
        // Extension bit only on the last repeater
        assert_eq!(bytes[13] & 0x01, 0);
        assert_eq!(bytes[20] & 0x01, 0);
        assert_eq!(bytes[27] & 0x01, 1);
        // H bit on the first repeater only
        assert_eq!(bytes[20] & 0x80, 0x80);
        assert_eq!(bytes[27] & 0x80, 0);

        let parsed = Ax25Frame::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, f);
        assert_eq!(
            parsed.to_string(),
            "VK7NTK-1>VK7XT-12,WIDE1-1*,WIDE2-2 <UI pid=F0 cmd> \"test\""
        );
    }

    #[test]
    fn decode_modulo_8_information() {
        let mut bytes = UI_FRAME[..14].to_vec();
        // N(R)=2, P=1, N(S)=5
        bytes.extend([0x5A, 0xF0, b'x']);
        let parsed = Ax25Frame::from_bytes(&bytes).unwrap();
        assert_eq!(
            parsed.content,
            FrameContent::Information(Information {
                pid: ProtocolIdentifier::None,
                info: b"x".to_vec(),
                receive_sequence: 2,
                send_sequence: 5,
                poll: true,
            })
        );
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn decode_modulo_128_information() {
        let mut bytes = UI_FRAME[..14].to_vec();
        // N(S)=100, N(R)=77, P=1
        bytes.extend([0xC8, 0x9B, 0xF0, b'x']);
        let parsed = Ax25Frame::from_bytes_with_modulo(&bytes, Modulo::OneTwentyEight).unwrap();
        assert_eq!(parsed.content.send_sequence(), Some(100));
        assert_eq!(parsed.content.receive_sequence(), Some(77));
        assert!(parsed.content.poll_or_final());
        assert_eq!(parsed.modulo, Modulo::OneTwentyEight);
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn modulo_128_supervisory_is_two_octets() {
        let f = frame(
            FrameContent::Reject(Reject {
                receive_sequence: 99,
                poll_or_final: false,
            }),
            Modulo::OneTwentyEight,
        );
        let bytes = f.to_bytes().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[14..], &[0x09, 99 << 1]);
        assert_eq!(
            Ax25Frame::from_bytes_with_modulo(&bytes, Modulo::OneTwentyEight).unwrap(),
            f
        );
    }

    #[test]
    fn unnumbered_control_values() {
        let cases = [
            (
                FrameContent::SetAsynchronousBalancedMode(SetAsynchronousBalancedMode {
                    poll: true,
                }),
                0x3F,
            ),
            (
                FrameContent::SetAsynchronousBalancedModeExtended(
                    SetAsynchronousBalancedModeExtended { poll: true },
                ),
                0x7F,
            ),
            (FrameContent::Disconnect(Disconnect { poll: false }), 0x43),
            (
                FrameContent::DisconnectedMode(DisconnectedMode { final_bit: true }),
                0x1F,
            ),
            (
                FrameContent::UnnumberedAcknowledge(UnnumberedAcknowledge { final_bit: true }),
                0x73,
            ),
        ];
        for (content, control) in cases {
            let f = frame(content, Modulo::OneTwentyEight);
            let bytes = f.to_bytes().unwrap();
            assert_eq!(bytes.len(), 15);
            assert_eq!(bytes[14], control);
            assert_eq!(
                Ax25Frame::from_bytes_with_modulo(&bytes, Modulo::OneTwentyEight).unwrap(),
                f
            );
        }
    }

    #[test]
    fn frame_reject_layouts() {
        let frmr = FrameReject {
            final_bit: true,
            rejected_control_field_raw: 0x5A,
            z: true,
            y: false,
            x: true,
            w: false,
            receive_sequence: 3,
            send_sequence: 6,
            command_response: CommandResponse::Response,
        };
        let f8 = frame(FrameContent::FrameReject(frmr.clone()), Modulo::Eight);
        let bytes = f8.to_bytes().unwrap();
        assert_eq!(&bytes[14..], &[0x97, 0x5A, 0x7C, 0x0A]);
        assert_eq!(Ax25Frame::from_bytes(&bytes).unwrap(), f8);

        let mut wide = frmr;
        wide.rejected_control_field_raw = 0x9BC8;
        wide.receive_sequence = 100;
        wide.send_sequence = 77;
        let f128 = frame(FrameContent::FrameReject(wide), Modulo::OneTwentyEight);
        let bytes = f128.to_bytes().unwrap();
        assert_eq!(bytes.len(), 14 + 1 + 5);
        assert_eq!(
            Ax25Frame::from_bytes_with_modulo(&bytes, Modulo::OneTwentyEight).unwrap(),
            f128
        );
        // The layout comes from the info length, not the decoding context
        assert_eq!(Ax25Frame::from_bytes(&bytes).unwrap(), f128);
    }

    #[test]
    fn narrow_frame_reject_decodes_on_wide_link() {
        let f8 = frame(
            FrameContent::FrameReject(FrameReject {
                final_bit: true,
                rejected_control_field_raw: 0x6F,
                z: false,
                y: false,
                x: false,
                w: true,
                receive_sequence: 0,
                send_sequence: 0,
                command_response: CommandResponse::Command,
            }),
            Modulo::Eight,
        );
        let bytes = f8.to_bytes().unwrap();
        assert_eq!(bytes.len(), 14 + 1 + 3);
        let parsed = Ax25Frame::from_bytes_with_modulo(&bytes, Modulo::OneTwentyEight).unwrap();
        assert_eq!(parsed.modulo, Modulo::Eight);
        assert_eq!(parsed, f8);

        let mut padded = bytes;
        padded.push(0);
        assert!(matches!(
            Ax25Frame::from_bytes_with_modulo(&padded, Modulo::OneTwentyEight),
            Err(FrameError::Malformed { .. })
        ));
    }

    #[test]
    fn wide_rejected_control_field_needs_wide_link() {
        let frmr = FrameReject {
            final_bit: false,
            rejected_control_field_raw: 0x1234,
            z: false,
            y: false,
            x: true,
            w: false,
            receive_sequence: 1,
            send_sequence: 2,
            command_response: CommandResponse::Response,
        };
        let narrow = frame(FrameContent::FrameReject(frmr.clone()), Modulo::Eight);
        assert!(matches!(
            narrow.to_bytes(),
            Err(FrameError::InvalidField {
                field: "FRMR control field",
                ..
            })
        ));

        let wide = frame(FrameContent::FrameReject(frmr), Modulo::OneTwentyEight);
        let bytes = wide.to_bytes().unwrap();
        assert_eq!(Ax25Frame::from_bytes(&bytes).unwrap(), wide);
    }

    #[test]
    fn command_response_bits() {
        let mut f = frame(
            FrameContent::ReceiveReady(ReceiveReady {
                receive_sequence: 1,
                poll_or_final: true,
            }),
            Modulo::Eight,
        );
        f.command_or_response = Some(CommandResponse::Response);
        let bytes = f.to_bytes().unwrap();
        assert_eq!(bytes[6] & 0x80, 0);
        assert_eq!(bytes[13] & 0x80, 0x80);
        let parsed = Ax25Frame::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.command_or_response, Some(CommandResponse::Response));
        assert!(!parsed.is_poll());

        // Unset is sent as a command
        f.command_or_response = None;
        let parsed = Ax25Frame::from_bytes(&f.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.command_or_response, Some(CommandResponse::Command));

        // Both bits equal is the pre-2.0 encoding
        let mut legacy = bytes.clone();
        legacy[6] |= 0x80;
        assert_eq!(
            Ax25Frame::from_bytes(&legacy).unwrap().command_or_response,
            None
        );
    }

    #[test]
    fn reserved_bits_are_set() {
        let bytes = Ax25Frame::from_bytes(&UI_FRAME)
            .unwrap()
            .to_bytes()
            .unwrap();
        assert_eq!(bytes[6] & 0b0110_0000, 0b0110_0000);
        assert_eq!(bytes[13] & 0b0110_0000, 0b0110_0000);
    }

    #[test]
    fn malformed_frames() {
        assert!(matches!(
            Ax25Frame::from_bytes(&UI_FRAME[..14]),
            Err(FrameError::Malformed { .. })
        ));

        // UI with no PID
        assert!(Ax25Frame::from_bytes(&UI_FRAME[..15]).is_err());

        // Lowercase callsign on the wire
        let mut bad_call = UI_FRAME;
        bad_call[0] = b'a' << 1;
        assert!(Ax25Frame::from_bytes(&bad_call).is_err());

        // Interior padding
        let mut gap = UI_FRAME;
        gap[1] = b' ' << 1;
        assert!(Ax25Frame::from_bytes(&gap).is_err());

        // Unknown U frame subtype
        let mut unknown = UI_FRAME;
        unknown[14] = 0b0010_0011;
        assert!(Ax25Frame::from_bytes(&unknown).is_err());

        // Source without extension bit but nothing following
        let mut truncated = UI_FRAME[..15].to_vec();
        truncated[13] &= 0xFE;
        assert!(Ax25Frame::from_bytes(&truncated).is_err());

        // Modulo 128 I frame missing its second control octet and PID
        let mut short_i = UI_FRAME[..14].to_vec();
        short_i.extend([0x02, 0x00]);
        assert!(Ax25Frame::from_bytes_with_modulo(&short_i, Modulo::OneTwentyEight).is_err());
    }

    #[test]
    fn too_many_repeaters() {
        let mut bytes = UI_FRAME[..14].to_vec();
        bytes[13] &= 0xFE;
        let hop = addr("WIDE1-1").to_bytes(false, false);
        for _ in 0..9 {
            bytes.extend(hop);
        }
        let last = bytes.len() - 1;
        bytes[last] |= 0x01;
        bytes.extend([0x03, 0xF0]);
        assert!(Ax25Frame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn encode_errors() {
        let empty_i = frame(
            FrameContent::Information(Information {
                pid: ProtocolIdentifier::None,
                info: Vec::new(),
                receive_sequence: 0,
                send_sequence: 0,
                poll: false,
            }),
            Modulo::Eight,
        );
        assert!(matches!(
            empty_i.to_bytes(),
            Err(FrameError::Incomplete { .. })
        ));

        let out_of_range = frame(
            FrameContent::ReceiveReady(ReceiveReady {
                receive_sequence: 8,
                poll_or_final: false,
            }),
            Modulo::Eight,
        );
        assert!(matches!(
            out_of_range.to_bytes(),
            Err(FrameError::InvalidField { field: "N(R)", .. })
        ));
    }

    #[test]
    fn sequence_setters_validate() {
        let mut f = frame(
            FrameContent::Information(Information {
                pid: ProtocolIdentifier::None,
                info: b"abc".to_vec(),
                receive_sequence: 0,
                send_sequence: 0,
                poll: false,
            }),
            Modulo::Eight,
        );
        assert!(f.set_receive_sequence(7).is_ok());
        assert!(f.set_send_sequence(3).is_ok());
        assert!(f.set_receive_sequence(8).is_err());
        assert!(f.set_send_sequence(100).is_err());
        assert_eq!(f.content.receive_sequence(), Some(7));
        assert_eq!(f.content.send_sequence(), Some(3));

        f.modulo = Modulo::OneTwentyEight;
        assert!(f.set_send_sequence(100).is_ok());

        let mut ua = frame(
            FrameContent::UnnumberedAcknowledge(UnnumberedAcknowledge { final_bit: false }),
            Modulo::Eight,
        );
        assert!(ua.set_receive_sequence(1).is_err());
        assert!(ua.set_send_sequence(1).is_err());
        ua.set_poll_or_final(true);
        assert!(ua.content.poll_or_final());
    }

    fn sequenced_content(m: u8) -> impl Strategy<Value = FrameContent> {
        prop_oneof![
            (0..m, 0..m, any::<bool>(), any::<u8>(), prop::collection::vec(any::<u8>(), 1..64)).prop_map(
                |(receive_sequence, send_sequence, poll, pid, info)| {
                    FrameContent::Information(Information {
                        pid: ProtocolIdentifier::Unknown(pid),
                        info,
                        receive_sequence,
                        send_sequence,
                        poll,
                    })
                }
            ),
            (0..m, any::<bool>()).prop_map(|(receive_sequence, poll_or_final)| {
                FrameContent::ReceiveNotReady(ReceiveNotReady {
                    receive_sequence,
                    poll_or_final,
                })
            }),
            (0..m, any::<bool>()).prop_map(|(receive_sequence, poll_or_final)| {
                FrameContent::SelectiveReject(SelectiveReject {
                    receive_sequence,
                    poll_or_final,
                })
            }),
        ]
    }

    proptest! {
        #[test]
        fn sequenced_frames_survive_encoding(
            (modulo, content) in prop_oneof![Just(Modulo::Eight), Just(Modulo::OneTwentyEight)]
                .prop_flat_map(|m| (Just(m), sequenced_content(m.value())))
        ) {
            let f = frame(content, modulo);
            let bytes = f.to_bytes().unwrap();
            prop_assert_eq!(Ax25Frame::from_bytes_with_modulo(&bytes, modulo).unwrap(), f);
        }
    }
}
