//! Forwards one connected client/server pair: each side runs the server-side
//! transport state machine from spec §4 independently (see `DESIGN.md` for
//! why the upstream-facing side also runs the server role), and once both
//! sides are open every decoded packet from one side is re-queued verbatim
//! on the other, the interception point spec §5 calls out for a future
//! tamper hook.

use std::collections::VecDeque;

use cluelessh_transport::server::{ServerConfig, ServerConnection};
use cluelessh_transport::{OsRng, SshStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::registry::SessionRegistry;

/// One direction of the proxied connection: its socket, its own transport
/// state machine, and whatever bytes are queued to go out but haven't been
/// written yet (a short write on a slow peer must not drop data).
struct Side {
    name: &'static str,
    stream: TcpStream,
    conn: ServerConnection,
    out: VecDeque<u8>,
}

impl Side {
    fn new(name: &'static str, stream: TcpStream, config: ServerConfig) -> Self {
        Self {
            name,
            stream,
            conn: ServerConnection::new(config),
            out: VecDeque::new(),
        }
    }

    /// Moves whatever the transport state machine wants sent into our
    /// outbound buffer.
    fn collect_outgoing(&mut self) {
        let bytes = self.conn.next_bytes_to_send();
        self.out.extend(bytes);
    }

    /// Writes as much of the outbound buffer as the socket accepts right
    /// now. Never calls `write_all`: a partial write just shrinks the queue
    /// by however many bytes actually went out, matching scenario S5 in
    /// spec §8 (a congested peer must not stall the other side's reads).
    async fn try_write(&mut self) -> std::io::Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        self.out.make_contiguous();
        let (front, _) = self.out.as_slices();
        let n = self.stream.write(front).await?;
        self.out.drain(..n);
        Ok(())
    }

    /// Best-effort flush of whatever `recv_bytes` just queued — in
    /// particular the `SSH_MSG_DISCONNECT` a `PeerError` triggers (see
    /// `ServerConnection::recv_bytes`) — before the caller tears the
    /// session down. Bounded: a peer that won't drain its socket must not
    /// hang the session forever over a goodbye message it'll never read.
    async fn flush_pending_disconnect(&mut self) {
        self.collect_outgoing();
        for _ in 0..8 {
            if self.out.is_empty() {
                return;
            }
            if self.try_write().await.is_err() {
                return;
            }
        }
    }
}

pub struct Session {
    id: u64,
    client: Side,
    server: Side,
}

impl Session {
    pub fn new(
        registry: &SessionRegistry,
        client_stream: TcpStream,
        server_stream: TcpStream,
        client_host_key: ServerConfig,
        server_host_key: ServerConfig,
    ) -> Self {
        let id = registry.insert();
        Self {
            id,
            client: Side::new("client", client_stream, client_host_key),
            server: Side::new("server", server_stream, server_host_key),
        }
    }

    /// Drives both sides until either one closes or errors. Forwards every
    /// application packet received on an open side to the other once both
    /// have completed their handshake.
    pub async fn pump(&mut self) {
        let mut rng = OsRng;
        let mut read_buf = [0u8; 16 * 1024];

        loop {
            self.client.collect_outgoing();
            self.server.collect_outgoing();

            let client_has_out = !self.client.out.is_empty();
            let server_has_out = !self.server.out.is_empty();

            tokio::select! {
                res = self.client.stream.read(&mut read_buf) => {
                    match res {
                        Ok(0) => { debug!(id = self.id, "client closed"); break; }
                        Ok(n) => {
                            if let Err(status) = self.client.conn.recv_bytes(&read_buf[..n], &mut rng) {
                                log_status(self.id, self.client.name, &status);
                                self.client.flush_pending_disconnect().await;
                                break;
                            }
                        }
                        Err(err) => { warn!(id = self.id, %err, "client read error"); break; }
                    }
                }
                res = self.server.stream.read(&mut read_buf) => {
                    match res {
                        Ok(0) => { debug!(id = self.id, "server closed"); break; }
                        Ok(n) => {
                            if let Err(status) = self.server.conn.recv_bytes(&read_buf[..n], &mut rng) {
                                log_status(self.id, self.server.name, &status);
                                self.server.flush_pending_disconnect().await;
                                break;
                            }
                        }
                        Err(err) => { warn!(id = self.id, %err, "server read error"); break; }
                    }
                }
                res = self.client.try_write(), if client_has_out => {
                    if let Err(err) = res {
                        warn!(id = self.id, %err, "client write error");
                        break;
                    }
                }
                res = self.server.try_write(), if server_has_out => {
                    if let Err(err) = res {
                        warn!(id = self.id, %err, "server write error");
                        break;
                    }
                }
            }

            if self.client.conn.is_open() && self.server.conn.is_open() {
                for packet in self.client.conn.next_packets() {
                    self.server.conn.queue_packet(&packet.payload);
                }
                for packet in self.server.conn.next_packets() {
                    self.client.conn.queue_packet(&packet.payload);
                }
            }
        }
    }

    pub fn close(&self, registry: &SessionRegistry) {
        info!(id = self.id, "closing session");
        registry.remove(self.id);
    }
}

fn log_status(id: u64, side: &str, status: &SshStatus) {
    match status {
        SshStatus::PeerError(reason, message) => {
            warn!(id, side, reason, message, "transport error, sending disconnect")
        }
        SshStatus::Disconnect => debug!(id, side, "peer disconnected"),
    }
}
