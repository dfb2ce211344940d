//! Client Session: per-connection protocol state machine.
//!
//! A session owns one TCP connection's write half behind a mutex (mirrors
//! the send-mutex pattern used for `WsConnectionManager`'s outbound frames
//! in this workspace) and exposes command methods that encode and send a
//! single frame each. The read side runs as a loop that decodes inbound
//! frames and forwards them, translated into [`SessionMessage`]s, to a
//! single channel drained by the Command Orchestrator — this keeps every
//! read loop non-reentrant with respect to the Player Registry and Sync
//! Group Manager.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::error::{FrameError, SessionError};
use crate::frame::{
    encode_aude, encode_audg, encode_setd_name, encode_strm, FrameDecoder, Helo, Stat, StatEvent,
    StrmCommand, StrmSubcommand, Transition,
};
use crate::protocol_constants::HELO_WAIT_TIMEOUT_SECS;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for the client's first `HELO`.
    HeloWait,
    /// `HELO` received; player id known, commands may be sent.
    Registered,
    /// Socket closed; no further commands will be sent.
    Closed,
}

/// One connected SlimProto client.
///
/// Holds the write half of the TCP connection behind a mutex so command
/// methods may be called concurrently (by the orchestrator and the drift
/// controller) without interleaving partial frames on the wire.
pub struct Session {
    player_id: RwLock<Option<String>>,
    state: RwLock<SessionState>,
    write_half: Mutex<Box<dyn AsyncWrite + Unpin + Send>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(write_half: Box<dyn AsyncWrite + Unpin + Send>) -> Self {
        Self {
            player_id: RwLock::new(None),
            state: RwLock::new(SessionState::HeloWait),
            write_half: Mutex::new(write_half),
            closed: AtomicBool::new(false),
        }
    }

    /// The player id this session has registered as, if `HELO` has arrived.
    #[must_use]
    pub fn player_id(&self) -> Option<String> {
        self.player_id.read().clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn send_raw(&self, frame: bytes::Bytes) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"));
        }
        let mut w = self.write_half.lock().await;
        w.write_all(&frame).await?;
        w.flush().await
    }

    /// Sends a raw `strm` command, the catch-all used by the orchestrator
    /// and drift controller for transport control and correction.
    pub async fn send_strm(&self, command: &StrmCommand) -> io::Result<()> {
        self.send_raw(encode_strm(command)).await
    }

    /// Starts streaming `url`. `flush` should be `false` for a gapless
    /// decoder-ready handoff into an already-open output chain, `true` for
    /// every other `play_url` (a fresh track always flushes stale buffers).
    pub async fn play_url(
        &self,
        url: &str,
        flush: bool,
        transition: Transition,
        transition_duration_secs: u32,
        autostart: bool,
    ) -> io::Result<()> {
        let command = StrmCommand {
            subcommand: Some(StrmSubcommand::Start),
            http_request: Some(url.to_string()),
            autostart,
            flush,
            transition,
            transition_duration_secs,
            ..Default::default()
        };
        self.send_strm(&command).await
    }

    /// Stops playback unconditionally. Idempotency (no-op if already idle)
    /// is the orchestrator's job, not this method's — this always sends.
    pub async fn stop(&self) -> io::Result<()> {
        self.send_strm(&StrmCommand::stop()).await
    }

    /// Pauses playback indefinitely.
    pub async fn pause(&self) -> io::Result<()> {
        self.send_strm(&StrmCommand::correction(StrmSubcommand::Pause, 0))
            .await
    }

    /// Resumes playback immediately (no buffer-coordinated offset).
    pub async fn resume(&self) -> io::Result<()> {
        self.send_strm(&StrmCommand::unpause_at(0)).await
    }

    /// Toggles audio output power.
    pub async fn power(&self, on: bool) -> io::Result<()> {
        self.send_raw(encode_aude(on)).await
    }

    /// Sets output volume, 0-100.
    pub async fn volume_set(&self, volume: u8) -> io::Result<()> {
        self.send_raw(encode_audg(volume)).await
    }

    /// Mutes or unmutes by forcing the gain to zero or restoring `volume`.
    pub async fn mute(&self, muted: bool, volume: u8) -> io::Result<()> {
        self.send_raw(encode_audg(if muted { 0 } else { volume }))
            .await
    }

    /// Pushes a new display/device name.
    pub async fn set_name(&self, name: &str) -> io::Result<()> {
        self.send_raw(encode_setd_name(name)).await
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write() = SessionState::Closed;
        let mut w = self.write_half.lock().await;
        let _ = w.shutdown().await;
    }
}

/// A translated inbound event, carrying the originating session handle so
/// the Command Orchestrator can register it, look up its player id, or
/// issue commands back to it.
pub enum SessionMessage {
    Connected { session: Arc<Session>, helo: Helo },
    Disconnected { session: Arc<Session> },
    DecoderReady { session: Arc<Session> },
    BufferReady { session: Arc<Session>, jiffies: u32 },
    Heartbeat { session: Arc<Session>, stat: Stat },
    OutputUnderrun { session: Arc<Session> },
}

/// Drives one connection end-to-end: waits for `HELO`, then loops decoding
/// `STAT` frames until the socket closes or the wait for `HELO` times out.
/// Intended to be spawned as its own task per accepted connection.
pub async fn run_connection<R>(
    read_half: R,
    write_half: Box<dyn AsyncWrite + Unpin + Send>,
    tx: mpsc::Sender<SessionMessage>,
) where
    R: AsyncRead + Unpin + Send,
{
    let session = Arc::new(Session::new(write_half));
    let mut reader = read_half;
    let mut decoder = FrameDecoder::new();
    let mut scratch = [0u8; 4096];

    let helo = match timeout(
        Duration::from_secs(HELO_WAIT_TIMEOUT_SECS),
        wait_for_helo(&mut reader, &mut decoder, &mut scratch),
    )
    .await
    {
        Ok(Ok(Some(helo))) => helo,
        Ok(Ok(None)) => {
            session.disconnect().await;
            return;
        }
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "session closed before HELO");
            session.disconnect().await;
            return;
        }
        Err(_) => {
            let err = SessionError::HeloTimeout(Duration::from_secs(HELO_WAIT_TIMEOUT_SECS));
            tracing::warn!(error = %err, "session closed before HELO");
            session.disconnect().await;
            return;
        }
    };

    *session.player_id.write() = Some(crate::utils::mac_to_player_id(&helo.mac));
    *session.state.write() = SessionState::Registered;

    if tx
        .send(SessionMessage::Connected {
            session: Arc::clone(&session),
            helo,
        })
        .await
        .is_err()
    {
        session.disconnect().await;
        return;
    }

    loop {
        let frame = match decoder.try_decode() {
            Ok(Some(frame)) => frame,
            Ok(None) => match reader.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    decoder.feed(&scratch[..n]);
                    continue;
                }
            },
            Err(_) => break,
        };

        match frame.op.as_str() {
            "STAT" => {
                let Ok(stat) = Stat::parse(&frame.payload) else {
                    continue;
                };
                let message = match stat.event {
                    StatEvent::DecoderReady => SessionMessage::DecoderReady {
                        session: Arc::clone(&session),
                    },
                    StatEvent::BufferReady => SessionMessage::BufferReady {
                        session: Arc::clone(&session),
                        jiffies: stat.jiffies,
                    },
                    StatEvent::OutputUnderrun => SessionMessage::OutputUnderrun {
                        session: Arc::clone(&session),
                    },
                    _ => SessionMessage::Heartbeat {
                        session: Arc::clone(&session),
                        stat,
                    },
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            "BYE!" => break,
            _ => continue,
        }
    }

    session.disconnect().await;
    let _ = tx
        .send(SessionMessage::Disconnected {
            session: Arc::clone(&session),
        })
        .await;
}

async fn wait_for_helo<R: AsyncRead + Unpin>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    scratch: &mut [u8],
) -> Result<Option<Helo>, SessionError> {
    loop {
        if let Some(frame) = decoder.try_decode()? {
            if frame.op == "HELO" {
                return Ok(Some(Helo::parse(&frame.payload)?));
            }
            return Err(SessionError::Frame(FrameError::UnexpectedBeforeHelo(frame.op)));
        }
        let n = reader.read(scratch).await?;
        if n == 0 {
            return Ok(None);
        }
        decoder.feed(&scratch[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_stat_payload;

    fn helo_bytes() -> Vec<u8> {
        let mut payload = vec![7u8, 1];
        payload.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        payload.extend_from_slice(&[0u8; 16]);
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(&0u64.to_be_bytes());
        payload.extend_from_slice(b"en");
        let mut frame = Vec::new();
        frame.extend_from_slice(b"HELO");
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    fn client_stat_frame(event_tag: &str, jiffies: u32, elapsed_ms: u32) -> Vec<u8> {
        let payload = build_stat_payload(event_tag, jiffies, elapsed_ms);
        let mut frame = Vec::new();
        frame.extend_from_slice(b"STAT");
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    #[tokio::test]
    async fn connection_emits_connected_then_heartbeat_then_disconnected() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(server);
        let (tx, mut rx) = mpsc::channel(8);

        let handle = tokio::spawn(run_connection(
            read_half,
            Box::new(write_half),
            tx,
        ));

        client.write_all(&helo_bytes()).await.unwrap();
        client
            .write_all(&client_stat_frame("STMt", 500, 480))
            .await
            .unwrap();
        drop(client);

        let connected = rx.recv().await.unwrap();
        let SessionMessage::Connected { session, helo } = connected else {
            panic!("expected Connected");
        };
        assert_eq!(helo.mac, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert_eq!(session.player_id().unwrap(), "aa:bb:cc:dd:ee:01");

        let heartbeat = rx.recv().await.unwrap();
        let SessionMessage::Heartbeat { stat, .. } = heartbeat else {
            panic!("expected Heartbeat");
        };
        assert_eq!(stat.jiffies, 500);
        assert_eq!(stat.elapsed_milliseconds, 480);

        let disconnected = rx.recv().await.unwrap();
        assert!(matches!(disconnected, SessionMessage::Disconnected { .. }));

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn decoder_ready_and_buffer_ready_are_distinguished() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(server);
        let (tx, mut rx) = mpsc::channel(8);

        let handle = tokio::spawn(run_connection(read_half, Box::new(write_half), tx));

        client.write_all(&helo_bytes()).await.unwrap();
        client
            .write_all(&client_stat_frame("STMd", 0, 0))
            .await
            .unwrap();
        client
            .write_all(&client_stat_frame("STMl", 0, 0))
            .await
            .unwrap();
        drop(client);

        let _ = rx.recv().await.unwrap(); // Connected
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionMessage::DecoderReady { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionMessage::BufferReady { .. }
        ));

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn non_helo_frame_before_helo_is_fatal() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(server);
        let (tx, mut rx) = mpsc::channel(8);

        let handle = tokio::spawn(run_connection(read_half, Box::new(write_half), tx));

        client
            .write_all(&client_stat_frame("STMt", 0, 0))
            .await
            .unwrap();
        drop(client);

        assert!(rx.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (_client, server) = tokio::io::duplex(64);
        let (_read_half, write_half) = tokio::io::split(server);
        let session = Session::new(Box::new(write_half));
        session.disconnect().await;
        session.disconnect().await;
        assert!(session.is_closed());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn commands_after_disconnect_fail() {
        let (_client, server) = tokio::io::duplex(64);
        let (_read_half, write_half) = tokio::io::split(server);
        let session = Session::new(Box::new(write_half));
        session.disconnect().await;
        assert!(session.stop().await.is_err());
    }
}
