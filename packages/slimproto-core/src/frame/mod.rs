//! SlimProto frame codec.
//!
//! Client→server frames: 4-byte ASCII operation tag, 4-byte big-endian
//! length, payload. Server→client frames: 4-byte ASCII operation tag,
//! 2-byte big-endian length, payload. All multi-byte integer fields in
//! payloads are big-endian. Framing is bit-exact with existing
//! SqueezeCenter/LMS clients; this module does not reinterpret payload
//! semantics beyond what the Client Session needs.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol_constants::{CLIENT_OP_TAG_LEN, MAX_FRAME_PAYLOAD_BYTES, SERVER_OP_TAG_LEN};

/// A fully-decoded client→server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    /// 4-character ASCII operation tag, e.g. `"HELO"`, `"STAT"`, `"BYE!"`.
    pub op: String,
    /// Raw payload bytes, exactly as many as the frame's declared length.
    pub payload: Bytes,
}

/// Incrementally decodes a stream of bytes into [`ClientFrame`]s.
///
/// Owns no socket; the Client Session feeds it bytes as they arrive and
/// drains complete frames. This split keeps the codec unit-testable
/// without a TCP connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly-read bytes to the internal scratch buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempts to decode one complete frame from the buffered bytes.
    ///
    /// Returns `Ok(None)` if the buffer does not yet hold a full frame
    /// (the caller should read more bytes and call again). Returns
    /// `Err` on a malformed length; the session must then disconnect.
    pub fn try_decode(&mut self) -> Result<Option<ClientFrame>, FrameError> {
        let header_len = CLIENT_OP_TAG_LEN + 4;
        if self.buf.len() < header_len {
            return Ok(None);
        }

        let op_bytes = &self.buf[0..CLIENT_OP_TAG_LEN];
        let length_offset = CLIENT_OP_TAG_LEN;
        let length = u32::from_be_bytes([
            self.buf[length_offset],
            self.buf[length_offset + 1],
            self.buf[length_offset + 2],
            self.buf[length_offset + 3],
        ]);
        if length > MAX_FRAME_PAYLOAD_BYTES {
            return Err(FrameError::LengthOutOfRange(length));
        }

        let total_len = header_len + length as usize;
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let op = String::from_utf8_lossy(op_bytes).to_string();
        self.buf.advance(header_len);
        let payload = self.buf.split_to(length as usize).freeze();

        Ok(Some(ClientFrame { op, payload }))
    }
}

/// Encodes a server→client frame with the given 4-character op tag and
/// payload. The op must be exactly [`SERVER_OP_TAG_LEN`] ASCII bytes.
#[must_use]
pub fn encode_server_frame(op: &str, payload: &[u8]) -> Bytes {
    debug_assert_eq!(op.len(), SERVER_OP_TAG_LEN, "server op tag must be 4 bytes");
    let mut buf = BytesMut::with_capacity(SERVER_OP_TAG_LEN + 2 + payload.len());
    buf.put_slice(op.as_bytes());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    buf.freeze()
}

/// `strm` subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrmSubcommand {
    /// `s` — start a new stream.
    Start,
    /// `p` — pause for a given number of milliseconds (or indefinitely if 0).
    Pause,
    /// `u` — unpause, optionally at a future absolute jiffies timestamp.
    Unpause,
    /// `q` — stop.
    Stop,
    /// `f` — flush buffers.
    Flush,
    /// `a` — skip ahead by a given number of milliseconds.
    SkipAhead,
    /// `t` — request status.
    Status,
}

impl StrmSubcommand {
    fn as_byte(self) -> u8 {
        match self {
            Self::Start => b's',
            Self::Pause => b'p',
            Self::Unpause => b'u',
            Self::Stop => b'q',
            Self::Flush => b'f',
            Self::SkipAhead => b'a',
            Self::Status => b't',
        }
    }
}

/// Transition applied when starting or appending a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transition {
    #[default]
    None,
    Crossfade,
}

/// Parameters for a `strm` command, covering every use: plain transport
/// control, the drift controller's pause-for/skip-ahead escape hatch, and
/// the buffer-coordinated unpause-at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StrmCommand {
    pub subcommand: Option<StrmSubcommand>,
    /// Overloaded field: milliseconds for pause-for/skip-ahead, an
    /// absolute future jiffies timestamp for unpause-at, otherwise 0.
    pub replay_gain: u32,
    /// Present only for `Start`: the URL the client should fetch.
    pub http_request: Option<String>,
    pub transition: Transition,
    pub transition_duration_secs: u32,
    pub autostart: bool,
    pub flush: bool,
}

impl StrmCommand {
    /// Builds the lowest-level correction command: skip ahead or pause for
    /// the given number of milliseconds.
    #[must_use]
    pub fn correction(subcommand: StrmSubcommand, millis: u32) -> Self {
        Self {
            subcommand: Some(subcommand),
            replay_gain: millis,
            ..Default::default()
        }
    }

    /// Builds the buffer-coordinated unpause-at command.
    #[must_use]
    pub fn unpause_at(jiffies: u32) -> Self {
        Self {
            subcommand: Some(StrmSubcommand::Unpause),
            replay_gain: jiffies,
            ..Default::default()
        }
    }

    /// Builds a bare stop command.
    #[must_use]
    pub fn stop() -> Self {
        Self {
            subcommand: Some(StrmSubcommand::Stop),
            ..Default::default()
        }
    }

    /// Encodes this command's payload for an outbound `strm` frame.
    ///
    /// Layout: 1-byte subcommand, 1-byte flags (bit0=autostart,
    /// bit1=flush, bit2=crossfade), 4-byte BE replay_gain, 4-byte BE
    /// transition_duration_secs, then the HTTP request tail if present.
    #[must_use]
    pub fn encode_payload(&self) -> Bytes {
        let subcommand = self
            .subcommand
            .expect("StrmCommand must have a subcommand before encoding")
            .as_byte();
        let mut flags = 0u8;
        if self.autostart {
            flags |= 0b001;
        }
        if self.flush {
            flags |= 0b010;
        }
        if self.transition == Transition::Crossfade {
            flags |= 0b100;
        }

        let mut buf = BytesMut::new();
        buf.put_u8(subcommand);
        buf.put_u8(flags);
        buf.put_u32(self.replay_gain);
        buf.put_u32(self.transition_duration_secs);
        if let Some(req) = &self.http_request {
            buf.put_slice(req.as_bytes());
        }
        buf.freeze()
    }
}

/// Encodes a `strm` frame.
#[must_use]
pub fn encode_strm(command: &StrmCommand) -> Bytes {
    encode_server_frame("strm", &command.encode_payload())
}

/// Encodes an `audg` (volume gain) frame. `volume` is 0-100; scaled to the
/// 16-bit gain field `strm`-family commands expect.
#[must_use]
pub fn encode_audg(volume: u8) -> Bytes {
    let gain = u32::from(volume.min(100)) * 655; // scale 0..100 -> 0..65500
    let mut buf = BytesMut::new();
    buf.put_u32(gain);
    buf.put_u32(gain);
    encode_server_frame("audg", &buf)
}

/// Encodes an `aude` (audio enable/power) frame.
#[must_use]
pub fn encode_aude(powered: bool) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(u8::from(powered));
    buf.put_u8(u8::from(powered));
    encode_server_frame("aude", &buf)
}

/// Encodes a `setd` (device settings) frame carrying a new player name.
#[must_use]
pub fn encode_setd_name(name: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(0); // id 0 = player name, per SlimProto SETD conventions
    buf.put_slice(name.as_bytes());
    encode_server_frame("setd", &buf)
}

/// Parsed fields of an inbound `HELO` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helo {
    pub device_id: u8,
    pub revision: u8,
    pub mac: [u8; 6],
    pub uuid: [u8; 16],
    pub wlan_channel_list: u16,
    pub bytes_received: u64,
    pub language: [u8; 2],
    pub capabilities: String,
}

impl Helo {
    /// Parses the fixed-layout fields of a HELO payload.
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        const FIXED_LEN: usize = 1 + 1 + 6 + 16 + 2 + 8 + 2;
        if payload.len() < FIXED_LEN {
            return Err(FrameError::TruncatedHelo(payload.len()));
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&payload[2..8]);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&payload[8..24]);
        let wlan_channel_list = u16::from_be_bytes([payload[24], payload[25]]);
        let bytes_received = u64::from_be_bytes(payload[26..34].try_into().unwrap());
        let language = [payload[34], payload[35]];
        let capabilities = String::from_utf8_lossy(&payload[FIXED_LEN..]).to_string();

        Ok(Self {
            device_id: payload[0],
            revision: payload[1],
            mac,
            uuid,
            wlan_channel_list,
            bytes_received,
            language,
            capabilities,
        })
    }
}

/// The 4-character STAT sub-opcode, identifying which event a STAT frame
/// carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatEvent {
    AudioReady,
    Connect,
    DecoderReady,
    ConnEstablished,
    ConnClosed,
    HeaderReady,
    BufferReady,
    OutputUnderrun,
    Pause,
    Resume,
    TrackStarted,
    Heartbeat,
    Underrun,
    Unknown(String),
}

impl StatEvent {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "STMa" => Self::AudioReady,
            "STMc" => Self::Connect,
            "STMd" => Self::DecoderReady,
            "STMe" => Self::ConnEstablished,
            "STMf" => Self::ConnClosed,
            "STMh" => Self::HeaderReady,
            "STMl" => Self::BufferReady,
            "STMo" => Self::OutputUnderrun,
            "STMp" => Self::Pause,
            "STMr" => Self::Resume,
            "STMs" => Self::TrackStarted,
            "STMt" => Self::Heartbeat,
            "STMu" => Self::Underrun,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Parsed fields of an inbound `STAT` frame relevant to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub event: StatEvent,
    pub jiffies: u32,
    pub output_buffer_size: u32,
    pub output_buffer_fullness: u32,
    pub elapsed_seconds: u32,
    pub elapsed_milliseconds: u32,
    pub signal_strength: u16,
    pub voltage: u16,
}

impl Stat {
    /// Fixed payload length this layout expects: event tag (4) + jiffies
    /// (4) + output_buffer_size (4) + output_buffer_fullness (4) +
    /// elapsed_seconds (4) + elapsed_milliseconds (4) + signal_strength
    /// (2) + voltage (2).
    pub const FIXED_LEN: usize = 4 + 4 + 4 + 4 + 4 + 4 + 2 + 2;

    /// Parses the fixed-layout fields of a STAT payload.
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < Self::FIXED_LEN {
            return Err(FrameError::TruncatedStat(payload.len()));
        }
        let event_tag = String::from_utf8_lossy(&payload[0..4]).to_string();
        let jiffies = u32::from_be_bytes(payload[4..8].try_into().unwrap());
        let output_buffer_size = u32::from_be_bytes(payload[8..12].try_into().unwrap());
        let output_buffer_fullness = u32::from_be_bytes(payload[12..16].try_into().unwrap());
        let elapsed_seconds = u32::from_be_bytes(payload[16..20].try_into().unwrap());
        let elapsed_milliseconds = u32::from_be_bytes(payload[20..24].try_into().unwrap());
        let signal_strength = u16::from_be_bytes(payload[24..26].try_into().unwrap());
        let voltage = u16::from_be_bytes(payload[26..28].try_into().unwrap());

        Ok(Self {
            event: StatEvent::from_tag(&event_tag),
            jiffies,
            output_buffer_size,
            output_buffer_fullness,
            elapsed_seconds,
            elapsed_milliseconds,
            signal_strength,
            voltage,
        })
    }
}

/// Builds a STAT payload matching [`Stat::FIXED_LEN`]'s layout. Used by the
/// frame codec's own tests and by the Client Session test suite to
/// simulate inbound STAT frames without a real socket.
#[must_use]
pub fn build_stat_payload(event_tag: &str, jiffies: u32, elapsed_milliseconds: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(Stat::FIXED_LEN);
    buf.extend_from_slice(event_tag.as_bytes());
    buf.extend_from_slice(&jiffies.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // output_buffer_size
    buf.extend_from_slice(&0u32.to_be_bytes()); // output_buffer_fullness
    buf.extend_from_slice(&(elapsed_milliseconds / 1000).to_be_bytes());
    buf.extend_from_slice(&elapsed_milliseconds.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // signal_strength
    buf.extend_from_slice(&0u16.to_be_bytes()); // voltage
    buf
}
