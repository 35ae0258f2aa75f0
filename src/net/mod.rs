use crate::protocol::{decode_frame, encode_frame, Frame, FrameHeader, Payload};
use crate::util::now_ms;
use dashmap::DashMap;
use log::*;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strum::Display;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const RECV_BUFFER_SIZE: usize = 8192;
const UNKNOWN_WARN_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    FailedAck,
    ServerShutdown,
    ServerFull,
    VersionMismatch,
    Kicked,
}

/// Logical events the transport surfaces to the orchestrator. Pings and
/// acks are absorbed below this line.
#[derive(Debug)]
pub enum TransportEvent {
    Connect {
        client_id: String,
        username: String,
        version: String,
        addr: SocketAddr,
    },
    Message {
        client_id: String,
        frame: Frame,
    },
    Disconnect {
        client_id: String,
        reason: DisconnectReason,
    },
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub resend_interval_ms: u64,
    pub max_attempts: u32,
    pub disconnect_timeout_ms: u64,
    pub retransmit_scan_ms: u64,
    pub timeout_scan_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            resend_interval_ms: 1000,
            max_attempts: 5,
            disconnect_timeout_ms: 30000,
            retransmit_scan_ms: 1000,
            timeout_scan_ms: 10000,
        }
    }
}

struct PendingReliable {
    bytes: Vec<u8>,
    sent_ms: u64,
    attempts: u32,
}

struct ClientInfo {
    endpoint: SocketAddr,
    username: String,
    last_activity_ms: u64,
    seq_in: u32,
    seq_out: u32,
    pending_reliable: BTreeMap<u32, PendingReliable>,
}

/// UDP datagram transport: client tracking, sequencing, selective
/// reliability with retransmission, and idle timeouts. Mutation of a
/// client entry happens under its DashMap shard lock; sends never hold
/// a lock across an await.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    clients: Arc<DashMap<String, ClientInfo>>,
    endpoints: Arc<DashMap<SocketAddr, String>>,
    events: mpsc::Sender<TransportEvent>,
    settings: Arc<TransportSettings>,
    unknown_warn: Arc<Mutex<(u64, u64)>>,
}

impl UdpTransport {
    pub async fn bind(
        port: u16,
        settings: TransportSettings,
        events: mpsc::Sender<TransportEvent>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        info!("UDP transport bound on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            clients: Arc::new(DashMap::new()),
            endpoints: Arc::new(DashMap::new()),
            events,
            settings: Arc::new(settings),
            unknown_warn: Arc::new(Mutex::new((0, 0))),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.key().clone()).collect()
    }

    pub fn client_username(&self, client_id: &str) -> Option<String> {
        self.clients.get(client_id).map(|c| c.username.clone())
    }

    pub fn client_endpoint(&self, client_id: &str) -> Option<SocketAddr> {
        self.clients.get(client_id).map(|c| c.endpoint)
    }

    #[cfg(test)]
    fn pending_count(&self, client_id: &str) -> usize {
        self.clients
            .get(client_id)
            .map(|c| c.pending_reliable.len())
            .unwrap_or(0)
    }

    /// Spawn the receive loop and the two periodic scans.
    pub fn start(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let recv = {
            let transport = self.clone();
            tokio::spawn(async move { transport.recv_loop().await })
        };
        let retransmit = {
            let transport = self.clone();
            tokio::spawn(async move { transport.retransmit_loop().await })
        };
        let timeout = {
            let transport = self.clone();
            tokio::spawn(async move { transport.timeout_loop().await })
        };
        vec![recv, retransmit, timeout]
    }

    async fn recv_loop(&self) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("UDP recv error: {}", e);
                    continue;
                }
            };
            let frame = match decode_frame(&buf[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Dropping malformed datagram from {}: {}", addr, e);
                    continue;
                }
            };
            self.handle_frame(addr, frame).await;
        }
    }

    async fn handle_frame(&self, addr: SocketAddr, frame: Frame) {
        let known_client_id = self.endpoints.get(&addr).map(|id| id.clone());

        let Some(client_id) = known_client_id else {
            if let Payload::ClientConnect { username, version } = &frame.payload {
                let client_id = uuid::Uuid::new_v4().to_string();
                self.clients.insert(
                    client_id.clone(),
                    ClientInfo {
                        endpoint: addr,
                        username: username.clone(),
                        last_activity_ms: now_ms(),
                        seq_in: frame.header.sequence,
                        seq_out: 0,
                        pending_reliable: BTreeMap::new(),
                    },
                );
                self.endpoints.insert(addr, client_id.clone());
                debug!("New client {} from {} ({})", client_id, addr, username);
                let event = TransportEvent::Connect {
                    client_id,
                    username: username.clone(),
                    version: version.clone(),
                    addr,
                };
                if self.events.send(event).await.is_err() {
                    warn!("Event channel closed, dropping connect from {}", addr);
                }
            } else {
                self.warn_unknown(addr, &frame);
            }
            return;
        };

        self.touch(&client_id, frame.header.sequence);
        match frame.payload {
            Payload::ClientConnect { .. } => {
                // duplicate connect from a mapped endpoint: the accept
                // already went out, activity refresh is enough
            }
            Payload::ClientPing { ping_id } => {
                self.send(&client_id, Payload::ServerPong { ping_id }).await;
            }
            Payload::ClientReliableAck { ack_sequence } => {
                if let Some(mut client) = self.clients.get_mut(&client_id) {
                    client.pending_reliable.remove(&ack_sequence);
                }
            }
            Payload::ClientDisconnect { reason } => {
                debug!("Client {} disconnecting: {}", client_id, reason);
                self.drop_client(&client_id, DisconnectReason::Graceful).await;
            }
            payload => {
                let frame = Frame {
                    header: frame.header,
                    payload,
                };
                let event = TransportEvent::Message { client_id, frame };
                if self.events.send(event).await.is_err() {
                    warn!("Event channel closed, dropping message");
                }
            }
        }
    }

    fn touch(&self, client_id: &str, sequence: u32) {
        if let Some(mut client) = self.clients.get_mut(client_id) {
            client.last_activity_ms = now_ms();
            client.seq_in = sequence;
        }
    }

    fn warn_unknown(&self, addr: SocketAddr, frame: &Frame) {
        let now = now_ms();
        let mut state = self.unknown_warn.lock().unwrap();
        state.1 += 1;
        if now.saturating_sub(state.0) >= UNKNOWN_WARN_INTERVAL_MS {
            warn!(
                "Dropping {} from unknown endpoint {} ({} dropped since last warning)",
                frame.payload.message_type(),
                addr,
                state.1
            );
            *state = (now, 0);
        }
    }

    /// Serialize and send, assigning the next outbound sequence number.
    pub async fn send(&self, client_id: &str, payload: Payload) {
        self.send_inner(client_id, payload, false).await;
    }

    /// Like `send`, but retained for retransmission until acked.
    pub async fn send_reliable(&self, client_id: &str, payload: Payload) {
        self.send_inner(client_id, payload, true).await;
    }

    async fn send_inner(&self, client_id: &str, payload: Payload, reliable: bool) {
        // sequence assignment, encode and pending bookkeeping under the
        // entry lock; the actual send after it is released
        let (endpoint, bytes) = {
            let Some(mut client) = self.clients.get_mut(client_id) else {
                debug!("send to unknown client {}", client_id);
                return;
            };
            let sequence = client.seq_out;
            client.seq_out = client.seq_out.wrapping_add(1);
            let frame = Frame {
                header: FrameHeader {
                    sequence,
                    timestamp_ms: now_ms(),
                    client_id: client_id.to_string(),
                },
                payload,
            };
            let bytes = encode_frame(&frame);
            if reliable {
                client.pending_reliable.insert(
                    sequence,
                    PendingReliable {
                        bytes: bytes.clone(),
                        sent_ms: now_ms(),
                        attempts: 1,
                    },
                );
            }
            (client.endpoint, bytes)
        };
        if let Err(e) = self.socket.send_to(&bytes, endpoint).await {
            warn!("UDP send to {} failed: {}", endpoint, e);
        }
    }

    /// Kick with a reason the client can display: SERVER_REJECT first,
    /// then removal and the disconnect event.
    pub async fn disconnect_client(&self, client_id: &str, reason: DisconnectReason) {
        self.send(
            client_id,
            Payload::ServerReject {
                reason: reason.to_string(),
            },
        )
        .await;
        self.drop_client(client_id, reason).await;
    }

    /// Remove a client and emit exactly one disconnect event. The map
    /// removal is the gate: losers of the race emit nothing.
    async fn drop_client(&self, client_id: &str, reason: DisconnectReason) {
        let Some((_, client)) = self.clients.remove(client_id) else {
            return;
        };
        self.endpoints.remove(&client.endpoint);
        info!("Client {} disconnected: {}", client_id, reason);
        let event = TransportEvent::Disconnect {
            client_id: client_id.to_string(),
            reason,
        };
        if self.events.send(event).await.is_err() {
            warn!("Event channel closed, dropping disconnect event");
        }
    }

    async fn retransmit_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.settings.retransmit_scan_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let now = now_ms();
            let mut resends: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
            let mut exhausted: Vec<String> = Vec::new();

            for mut client in self.clients.iter_mut() {
                let endpoint = client.endpoint;
                let mut dead = false;
                for pending in client.pending_reliable.values_mut() {
                    if now.saturating_sub(pending.sent_ms) < self.settings.resend_interval_ms {
                        continue;
                    }
                    if pending.attempts >= self.settings.max_attempts {
                        dead = true;
                        break;
                    }
                    pending.attempts += 1;
                    pending.sent_ms = now;
                    resends.push((endpoint, pending.bytes.clone()));
                }
                if dead {
                    exhausted.push(client.key().clone());
                }
            }

            for (endpoint, bytes) in resends {
                if let Err(e) = self.socket.send_to(&bytes, endpoint).await {
                    warn!("UDP retransmit to {} failed: {}", endpoint, e);
                }
            }
            for client_id in exhausted {
                warn!("Client {} exhausted reliable resends", client_id);
                self.drop_client(&client_id, DisconnectReason::FailedAck).await;
            }
        }
    }

    async fn timeout_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.settings.timeout_scan_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let now = now_ms();
            let idle: Vec<String> = self
                .clients
                .iter()
                .filter(|c| {
                    now.saturating_sub(c.last_activity_ms) > self.settings.disconnect_timeout_ms
                })
                .map(|c| c.key().clone())
                .collect();
            for client_id in idle {
                self.drop_client(&client_id, DisconnectReason::Timeout).await;
            }
        }
    }
}

/// Client-side frame builder used by tests and tooling.
pub fn client_frame(client_id: &str, sequence: u32, payload: Payload) -> Vec<u8> {
    encode_frame(&Frame {
        header: FrameHeader {
            sequence,
            timestamp_ms: now_ms(),
            client_id: client_id.to_string(),
        },
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Quaternion, Vector3};
    use tokio::time::timeout;

    async fn test_transport(
        settings: TransportSettings,
    ) -> (UdpTransport, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let transport = UdpTransport::bind(0, settings, tx).await.unwrap();
        transport.start();
        (transport, rx)
    }

    async fn connect_client(
        transport: &UdpTransport,
        rx: &mut mpsc::Receiver<TransportEvent>,
        username: &str,
    ) -> (UdpSocket, String) {
        let server_addr = transport.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .connect(("127.0.0.1", server_addr.port()))
            .await
            .unwrap();
        let connect = client_frame(
            "",
            0,
            Payload::ClientConnect {
                username: username.to_string(),
                version: "1.0.0".to_string(),
            },
        );
        client.send(&connect).await.unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no connect event")
            .unwrap();
        let client_id = match event {
            TransportEvent::Connect {
                client_id,
                username: event_username,
                version,
                ..
            } => {
                assert_eq!(event_username, username);
                assert_eq!(version, "1.0.0");
                client_id
            }
            other => panic!("expected connect, got {:?}", other),
        };
        (client, client_id)
    }

    async fn recv_frame(client: &UdpSocket) -> Frame {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let len = timeout(Duration::from_secs(2), client.recv(&mut buf))
            .await
            .expect("no datagram")
            .unwrap();
        decode_frame(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_connect_assigns_client_id_and_pong() {
        let (transport, mut rx) = test_transport(TransportSettings::default()).await;
        let (client, client_id) = connect_client(&transport, &mut rx, "A").await;
        assert!(!client_id.is_empty());
        assert_eq!(transport.client_count(), 1);

        // ping is answered below the event layer
        let ping = client_frame(&client_id, 1, Payload::ClientPing { ping_id: 42 });
        client.send(&ping).await.unwrap();
        let frame = recv_frame(&client).await;
        assert_eq!(frame.payload, Payload::ServerPong { ping_id: 42 });
        // and produced no upward event
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_messages_dropped() {
        let (transport, mut rx) = test_transport(TransportSettings::default()).await;
        let server_addr = transport.local_addr().unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stranger
            .connect(("127.0.0.1", server_addr.port()))
            .await
            .unwrap();
        let ping = client_frame("nobody", 0, Payload::ClientPing { ping_id: 1 });
        stranger.send(&ping).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.client_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_state_update_forwarded() {
        let (transport, mut rx) = test_transport(TransportSettings::default()).await;
        let (client, client_id) = connect_client(&transport, &mut rx, "B").await;
        let update = client_frame(
            &client_id,
            1,
            Payload::ClientStateUpdate {
                position: Vector3::new(1.0, 2.0, 3.0),
                velocity: Vector3::ZERO,
                rotation: Quaternion::IDENTITY,
                input_sequence: 5,
            },
        );
        client.send(&update).await.unwrap();
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TransportEvent::Message {
                client_id: event_client,
                frame,
            } => {
                assert_eq!(event_client, client_id);
                assert!(matches!(
                    frame.payload,
                    Payload::ClientStateUpdate {
                        input_sequence: 5,
                        ..
                    }
                ));
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ack_clears_pending() {
        let (transport, mut rx) = test_transport(TransportSettings::default()).await;
        let (client, client_id) = connect_client(&transport, &mut rx, "C").await;

        transport
            .send_reliable(&client_id, Payload::ServerReject { reason: "x".into() })
            .await;
        assert_eq!(transport.pending_count(&client_id), 1);

        let frame = recv_frame(&client).await;
        let sequence = frame.header.sequence;
        let ack = client_frame(
            &client_id,
            1,
            Payload::ClientReliableAck {
                ack_sequence: sequence,
            },
        );
        client.send(&ack).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.pending_count(&client_id), 0);
    }

    #[tokio::test]
    async fn test_reliable_exhaustion_disconnects_once() {
        let settings = TransportSettings {
            resend_interval_ms: 30,
            max_attempts: 3,
            retransmit_scan_ms: 20,
            ..TransportSettings::default()
        };
        let (transport, mut rx) = test_transport(settings).await;
        let (_client, client_id) = connect_client(&transport, &mut rx, "D").await;

        transport
            .send_reliable(&client_id, Payload::ServerPong { ping_id: 1 })
            .await;
        // never ack; wait for the retransmitter to give up
        let event = timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("no disconnect")
            .unwrap();
        match event {
            TransportEvent::Disconnect {
                client_id: event_client,
                reason,
            } => {
                assert_eq!(event_client, client_id);
                assert_eq!(reason, DisconnectReason::FailedAck);
            }
            other => panic!("expected disconnect, got {:?}", other),
        }
        assert_eq!(transport.client_count(), 0);
        // exactly one disconnect: nothing further arrives
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_graceful_disconnect_event() {
        let (transport, mut rx) = test_transport(TransportSettings::default()).await;
        let (client, client_id) = connect_client(&transport, &mut rx, "E").await;
        let bye = client_frame(
            &client_id,
            1,
            Payload::ClientDisconnect {
                reason: "quit".to_string(),
            },
        );
        client.send(&bye).await.unwrap();
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            TransportEvent::Disconnect {
                reason: DisconnectReason::Graceful,
                ..
            }
        ));
        assert_eq!(transport.client_count(), 0);
    }

    #[tokio::test]
    async fn test_outbound_sequences_monotonic() {
        let (transport, mut rx) = test_transport(TransportSettings::default()).await;
        let (client, client_id) = connect_client(&transport, &mut rx, "F").await;
        for _ in 0..3 {
            transport
                .send(&client_id, Payload::ServerPong { ping_id: 0 })
                .await;
        }
        let mut last = None;
        for _ in 0..3 {
            let frame = recv_frame(&client).await;
            if let Some(last) = last {
                assert_eq!(frame.header.sequence, last + 1);
            }
            last = Some(frame.header.sequence);
        }
    }
}
