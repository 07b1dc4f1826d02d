//! Replication: replica tracking on the master side, the upstream link on
//! the replica side.
//!
//! A master fans mutating commands out to every registered replica and
//! tallies REPLCONF ACK offsets for WAIT. A replica performs the PSYNC
//! handshake against its master and then executes the command stream it
//! receives.

pub mod client;

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A registered replica, shared between the replica's serving thread and
/// any thread that propagates commands
pub struct ReplicaHandle {
    /// Connection ID of the replica
    pub conn_id: u64,

    /// Address of the replica
    pub addr: SocketAddr,

    /// Outbound half of the replica's socket. Its own lock keeps
    /// concurrently propagated frames from interleaving.
    writer: Mutex<TcpStream>,

    /// Replication offset acknowledged by the replica
    ack_offset: AtomicU64,
}

impl ReplicaHandle {
    pub fn new(conn_id: u64, addr: SocketAddr, writer: TcpStream) -> Arc<Self> {
        Arc::new(ReplicaHandle {
            conn_id,
            addr,
            writer: Mutex::new(writer),
            ack_offset: AtomicU64::new(0),
        })
    }

    /// Write one serialized command frame to this replica
    pub fn send(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(data)?;
        writer.flush()
    }

    /// Offset this replica has acknowledged so far
    pub fn ack_offset(&self) -> u64 {
        self.ack_offset.load(Ordering::SeqCst)
    }

    /// Credit an acknowledged byte count reported via REPLCONF ACK
    pub fn add_ack(&self, n: u64) {
        self.ack_offset.fetch_add(n, Ordering::SeqCst);
    }
}

/// Generate a unique 40-character hex-style replication ID
pub fn generate_repl_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..40)
        .map(|_| {
            let n = rng.gen_range(0..16);
            match n {
                0..=9 => b'0' + n,
                _ => b'a' + n - 10,
            }
        })
        .collect();

    String::from_utf8(bytes).unwrap()
}
