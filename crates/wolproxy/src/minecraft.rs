//! Minecraft protocol surface.
//!
//! While the host is down this module answers server-list pings with a
//! synthetic status so launchers show the server as present, and turns
//! login attempts into wake triggers plus a polite kick. Once the host is
//! up, connections are spliced through byte-for-byte.

use crate::config::MinecraftConfig;
use crate::proxy::{ProxyEvent, ProxyState};
use crate::stats::Stats;
use bytes::{Bytes, BytesMut};
use log::{debug, info};
use serde_json::json;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use wolproxy_binary::error::BinaryError;
use wolproxy_binary::io::{BinaryReader, BinaryWriter, split_frame};
use wolproxy_binary::traits::Readable;

pub const HANDSHAKE_PACKET: i32 = 0x00;
pub const STATUS_RESPONSE_PACKET: i32 = 0x00;
pub const PING_PACKET: i32 = 0x01;
pub const LOGIN_DISCONNECT_PACKET: i32 = 0x00;

pub const NEXT_STATE_STATUS: i32 = 1;
pub const NEXT_STATE_LOGIN: i32 = 2;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(5);
const FORWARD_BUFFER_SIZE: usize = 8192;

/// Version label shown in the server list while the host sleeps.
const OFFLINE_VERSION_NAME: &str = "WoL Proxy";

#[derive(Error, Debug)]
enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] BinaryError),
    #[error("timed out waiting for handshake")]
    HandshakeTimeout,
    #[error("connection closed before a complete frame arrived")]
    Closed,
    #[error("unsupported next state {0}")]
    UnsupportedNextState(i32),
}

/// First frame every client sends: who it thinks it is talking to, and
/// whether it wants status (1) or login (2).
#[derive(Debug, Clone)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl Readable for Handshake {
    fn read(reader: &mut BinaryReader) -> Result<Self, BinaryError> {
        let protocol_version = reader.read_var_i32()?;
        let server_address = reader.read_string()?;
        let server_port = reader.read_u16()?;
        let next_state = reader.read_var_i32()?;
        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }
}

pub struct MinecraftHandler {
    config: MinecraftConfig,
    target_ip: Ipv4Addr,
    state_rx: watch::Receiver<ProxyState>,
    events: mpsc::Sender<ProxyEvent>,
    stats: Arc<Stats>,
}

impl MinecraftHandler {
    pub fn new(
        config: MinecraftConfig,
        target_ip: Ipv4Addr,
        state_rx: watch::Receiver<ProxyState>,
        events: mpsc::Sender<ProxyEvent>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            config,
            target_ip,
            state_rx,
            events,
            stats,
        }
    }

    /// Status document for the server list, compact separators.
    pub fn status_json(&self, starting: bool) -> String {
        let (version_name, description) = if starting {
            (
                self.config.version_text_starting.as_str(),
                self.config.motd_starting.as_str(),
            )
        } else {
            (OFFLINE_VERSION_NAME, self.config.motd_offline.as_str())
        };

        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        json!({
            "version": {
                "name": version_name,
                "protocol": self.config.protocol_version,
            },
            "players": {
                "max": self.config.max_players_display,
                "online": 0,
            },
            "description": description,
            "favicon": null,
            "time": unix_ms,
        })
        .to_string()
    }

    fn status_packet(&self, starting: bool) -> Result<Bytes, BinaryError> {
        let mut writer = BinaryWriter::new();
        writer.write_string(&self.status_json(starting))?;
        writer.into_packet(STATUS_RESPONSE_PACKET)
    }

    fn pong_packet(payload: i64) -> Result<Bytes, BinaryError> {
        let mut writer = BinaryWriter::new();
        writer.write_i64(payload)?;
        writer.into_packet(PING_PACKET)
    }

    fn disconnect_packet(&self) -> Result<Bytes, BinaryError> {
        let reason = json!({"text": self.config.kick_message}).to_string();
        let mut writer = BinaryWriter::new();
        writer.write_string(&reason)?;
        writer.into_packet(LOGIN_DISCONNECT_PACKET)
    }

    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.port)).await?;
        info!("Minecraft listener started on port {}", self.config.port);

        loop {
            let (stream, peer) = listener.accept().await?;
            self.stats.record_minecraft_connection();

            let handler = Arc::clone(&self);
            tokio::spawn(async move {
                handler.handle_connection(stream, peer).await;
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let state = *self.state_rx.borrow();
        debug!("Minecraft connection from {} (state: {})", peer, state);

        if state == ProxyState::Proxying {
            if let Err(e) = self.forward(stream).await {
                info!("Forwarding for {} ended: {}", peer, e);
            }
        } else if let Err(e) = self.simulate(stream, peer, state).await {
            debug!("Connection from {} dropped: {}", peer, e);
        }
    }

    /// Impersonation path: parse the handshake, answer a status probe or
    /// kick a joiner while signalling the wake intent.
    async fn simulate(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        state: ProxyState,
    ) -> Result<(), ClientError> {
        let starting = matches!(state, ProxyState::Waking | ProxyState::Starting);
        let mut buf = BytesMut::with_capacity(256);

        let frame = match timeout(HANDSHAKE_TIMEOUT, read_frame(&mut stream, &mut buf)).await {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::HandshakeTimeout),
        };

        let mut reader = BinaryReader::new(frame);
        let packet_id = reader.read_var_i32()?;
        if packet_id != HANDSHAKE_PACKET {
            return Err(ClientError::Protocol(BinaryError::InvalidData(format!(
                "expected handshake, got packet {packet_id}"
            ))));
        }

        let handshake = Handshake::read(&mut reader)?;
        debug!(
            "Handshake from {}: protocol={}, address={}:{}, next_state={}",
            peer,
            handshake.protocol_version,
            handshake.server_address,
            handshake.server_port,
            handshake.next_state
        );

        match handshake.next_state {
            NEXT_STATE_STATUS => self.serve_status(&mut stream, &mut buf, peer, starting).await,
            NEXT_STATE_LOGIN => {
                info!("Login attempt detected from {}", peer);
                let packet = self.disconnect_packet()?;
                stream.write_all(&packet).await?;

                let _ = self.events.send(ProxyEvent::JoinIntent { source: peer }).await;
                Ok(())
            }
            other => Err(ClientError::UnsupportedNextState(other)),
        }
    }

    async fn serve_status(
        &self,
        stream: &mut TcpStream,
        buf: &mut BytesMut,
        peer: SocketAddr,
        starting: bool,
    ) -> Result<(), ClientError> {
        debug!("Status request from {}", peer);
        let packet = self.status_packet(starting)?;
        stream.write_all(&packet).await?;

        // Launchers usually follow up with a ping to measure latency;
        // closing instead is fine.
        let frame = match timeout(PING_TIMEOUT, read_frame(stream, buf)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) | Err(_) => {
                debug!("No ping received from {} after status response", peer);
                return Ok(());
            }
        };

        let mut reader = BinaryReader::new(frame);
        if reader.read_var_i32()? == PING_PACKET && reader.remaining() >= 8 {
            let payload = reader.read_i64()?;
            stream.write_all(&Self::pong_packet(payload)?).await?;
            debug!("Status request from {} completed with ping/pong", peer);
        }
        Ok(())
    }

    /// Transparent splice to the real host. No handshake parsing; the
    /// first side to finish tears down both directions.
    async fn forward(&self, client: TcpStream) -> std::io::Result<()> {
        let server = TcpStream::connect((self.target_ip, self.config.port)).await?;

        let (client_read, client_write) = client.into_split();
        let (server_read, server_write) = server.into_split();

        let mut client_to_server = tokio::spawn(pump(client_read, server_write));
        let mut server_to_client = tokio::spawn(pump(server_read, client_write));

        tokio::select! {
            _ = &mut client_to_server => server_to_client.abort(),
            _ = &mut server_to_client => client_to_server.abort(),
        }

        debug!("Minecraft connection forwarding completed");
        Ok(())
    }
}

async fn pump(mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf) -> std::io::Result<()> {
    let mut buf = [0u8; FORWARD_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
    }
    writer.shutdown().await
}

/// Reads from the stream until the buffer holds one complete frame.
async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> Result<Bytes, ClientError> {
    loop {
        if let Some(frame) = split_frame(buf)? {
            return Ok(frame);
        }
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(ClientError::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wolproxy_binary::traits::Writable;

    impl Writable for Handshake {
        fn write(&self, writer: &mut BinaryWriter) -> Result<(), BinaryError> {
            writer.write_var_i32(self.protocol_version)?;
            writer.write_string(&self.server_address)?;
            writer.write_u16(self.server_port)?;
            writer.write_var_i32(self.next_state)?;
            Ok(())
        }
    }

    fn test_handler() -> (MinecraftHandler, mpsc::Receiver<ProxyEvent>) {
        let (_state_tx, state_rx) = watch::channel(ProxyState::Offline);
        let (events_tx, events_rx) = mpsc::channel(8);
        let handler = MinecraftHandler::new(
            MinecraftConfig::default(),
            Ipv4Addr::new(192, 168, 1, 100),
            state_rx,
            events_tx,
            Arc::new(Stats::new()),
        );
        (handler, events_rx)
    }

    #[test]
    fn handshake_round_trips_through_a_frame() {
        let handshake = Handshake {
            protocol_version: 763,
            server_address: "play.example.net".to_string(),
            server_port: 25565,
            next_state: NEXT_STATE_LOGIN,
        };

        let mut writer = BinaryWriter::new();
        handshake.write(&mut writer).unwrap();
        let packet = writer.into_packet(HANDSHAKE_PACKET).unwrap();

        let mut buf = BytesMut::from(&packet[..]);
        let frame = split_frame(&mut buf).unwrap().expect("complete frame");

        let mut reader = BinaryReader::new(frame);
        assert_eq!(reader.read_var_i32().unwrap(), HANDSHAKE_PACKET);
        let parsed = Handshake::read(&mut reader).unwrap();

        assert_eq!(parsed.protocol_version, 763);
        assert_eq!(parsed.server_address, "play.example.net");
        assert_eq!(parsed.server_port, 25565);
        assert_eq!(parsed.next_state, NEXT_STATE_LOGIN);
    }

    #[test]
    fn offline_status_uses_offline_texts() {
        let (handler, _events) = test_handler();
        let status: serde_json::Value =
            serde_json::from_str(&handler.status_json(false)).unwrap();

        assert_eq!(status["version"]["name"], OFFLINE_VERSION_NAME);
        assert_eq!(status["version"]["protocol"], 763);
        assert_eq!(status["description"], "§aJoin to start server");
        assert_eq!(status["players"]["online"], 0);
        assert_eq!(status["players"]["max"], 20);
        assert!(status["favicon"].is_null());
        assert!(status["time"].is_u64());
    }

    #[test]
    fn starting_status_uses_starting_texts() {
        let (handler, _events) = test_handler();
        let status: serde_json::Value =
            serde_json::from_str(&handler.status_json(true)).unwrap();

        assert_eq!(status["version"]["name"], "Starting...");
        assert_eq!(status["description"], "§eServer is starting, please wait");
    }

    #[test]
    fn status_json_uses_compact_separators() {
        let (handler, _events) = test_handler();
        let status = handler.status_json(false);
        assert!(!status.contains(": "));
        assert!(!status.contains(", "));
    }

    #[test]
    fn disconnect_packet_carries_the_kick_message() {
        let (handler, _events) = test_handler();
        let packet = handler.disconnect_packet().unwrap();

        let mut buf = BytesMut::from(&packet[..]);
        let frame = split_frame(&mut buf).unwrap().expect("complete frame");

        let mut reader = BinaryReader::new(frame);
        assert_eq!(reader.read_var_i32().unwrap(), LOGIN_DISCONNECT_PACKET);

        let reason: serde_json::Value =
            serde_json::from_str(&reader.read_string().unwrap()).unwrap();
        assert_eq!(
            reason["text"],
            "§eServer is starting up, try joining again in a minute."
        );
    }

    #[test]
    fn pong_echoes_the_ping_payload() {
        let payload = 0x0123456789ABCDEFi64;
        let packet = MinecraftHandler::pong_packet(payload).unwrap();

        let mut buf = BytesMut::from(&packet[..]);
        let frame = split_frame(&mut buf).unwrap().expect("complete frame");

        let mut reader = BinaryReader::new(frame);
        assert_eq!(reader.read_var_i32().unwrap(), PING_PACKET);
        assert_eq!(reader.read_i64().unwrap(), payload);
        assert_eq!(reader.remaining(), 0);
    }

    async fn send_handshake(client: &mut TcpStream, next_state: i32) {
        let handshake = Handshake {
            protocol_version: 763,
            server_address: "localhost".to_string(),
            server_port: 25565,
            next_state,
        };
        let mut writer = BinaryWriter::new();
        handshake.write(&mut writer).unwrap();
        let packet = writer.into_packet(HANDSHAKE_PACKET).unwrap();
        client.write_all(&packet).await.unwrap();
    }

    #[tokio::test]
    async fn status_probe_over_a_socket_gets_status_and_pong() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (handler, _events) = test_handler();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handler.simulate(stream, peer, ProxyState::Offline).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        send_handshake(&mut client, NEXT_STATE_STATUS).await;

        let mut buf = BytesMut::new();
        let frame = read_frame(&mut client, &mut buf).await.unwrap();
        let mut reader = BinaryReader::new(frame);
        assert_eq!(reader.read_var_i32().unwrap(), STATUS_RESPONSE_PACKET);

        let status: serde_json::Value =
            serde_json::from_str(&reader.read_string().unwrap()).unwrap();
        assert_eq!(status["description"], "§aJoin to start server");
        assert_eq!(status["version"]["name"], OFFLINE_VERSION_NAME);

        let payload = 0x0123456789ABCDEFi64;
        let mut writer = BinaryWriter::new();
        writer.write_i64(payload).unwrap();
        let ping = writer.into_packet(PING_PACKET).unwrap();
        client.write_all(&ping).await.unwrap();

        let frame = read_frame(&mut client, &mut buf).await.unwrap();
        let mut reader = BinaryReader::new(frame);
        assert_eq!(reader.read_var_i32().unwrap(), PING_PACKET);
        assert_eq!(reader.read_i64().unwrap(), payload);

        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn join_attempt_is_kicked_and_signalled() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (handler, mut events) = test_handler();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handler.simulate(stream, peer, ProxyState::Offline).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        send_handshake(&mut client, NEXT_STATE_LOGIN).await;

        let mut buf = BytesMut::new();
        let frame = read_frame(&mut client, &mut buf).await.unwrap();
        let mut reader = BinaryReader::new(frame);
        assert_eq!(reader.read_var_i32().unwrap(), LOGIN_DISCONNECT_PACKET);

        let reason: serde_json::Value =
            serde_json::from_str(&reader.read_string().unwrap()).unwrap();
        assert!(reason["text"].as_str().unwrap().contains("starting up"));

        match events.recv().await {
            Some(ProxyEvent::JoinIntent { .. }) => {}
            other => panic!("expected a join intent event, got {:?}", other),
        }

        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn starting_state_serves_the_starting_status() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (handler, _events) = test_handler();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handler.simulate(stream, peer, ProxyState::Starting).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        send_handshake(&mut client, NEXT_STATE_STATUS).await;

        let mut buf = BytesMut::new();
        let frame = read_frame(&mut client, &mut buf).await.unwrap();
        let mut reader = BinaryReader::new(frame);
        reader.read_var_i32().unwrap();

        let status: serde_json::Value =
            serde_json::from_str(&reader.read_string().unwrap()).unwrap();
        assert_eq!(status["description"], "§eServer is starting, please wait");
        assert_eq!(status["version"]["name"], "Starting...");

        // No ping; closing after the status is a legal client move.
        drop(client);
        server.await.unwrap().unwrap();
    }
}
