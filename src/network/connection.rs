//! Connection management for individual peers
//!
//! Each connection owns its socket and runs a framed command loop on its
//! own thread: decode one argument vector, dispatch it, write the reply.
//! The same type serves ordinary clients, replicas that promoted themselves
//! via PSYNC, and the upstream master link on a replica server.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use crate::commands::{Command, CommandKind, Transaction};
use crate::error::{CinnabarError, Result};
use crate::protocol::{serialize_resp_frame, RespFrame, RespParser};
use crate::replication;
use crate::replication::ReplicaHandle;
use crate::network::server::Server;

/// Who is on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// An ordinary client
    Client,

    /// The upstream master this replica server follows
    Master,

    /// A downstream replica that completed PSYNC
    Replica,
}

/// A single peer connection
pub struct Connection {
    /// Unique connection ID
    pub id: u64,

    /// TCP stream
    stream: TcpStream,

    /// Peer address
    pub addr: SocketAddr,

    /// RESP protocol parser
    parser: RespParser,

    /// Transaction queue owned by this connection
    pub transaction: Transaction,

    /// Bytes of mutating commands this connection caused to be propagated
    pub propagate_offset: u64,

    /// Whether this is the upstream master link
    is_master_link: bool,

    /// Our own listening port, reported during the master handshake
    listening_port: u16,

    /// Set once this connection registers as a replica
    replica: Option<Arc<ReplicaHandle>>,
}

impl Connection {
    /// Create a connection for an accepted client
    pub fn new(id: u64, stream: TcpStream, addr: SocketAddr) -> Result<Self> {
        stream.set_nodelay(true)?;

        Ok(Connection {
            id,
            stream,
            addr,
            parser: RespParser::new(),
            transaction: Transaction::new(),
            propagate_offset: 0,
            is_master_link: false,
            listening_port: 0,
            replica: None,
        })
    }

    /// Create the connection that follows the upstream master.
    /// `listening_port` is this server's own port, reported during the
    /// handshake.
    pub fn master_link(
        id: u64,
        stream: TcpStream,
        addr: SocketAddr,
        listening_port: u16,
    ) -> Result<Self> {
        let mut conn = Connection::new(id, stream, addr)?;
        conn.is_master_link = true;
        conn.listening_port = listening_port;
        Ok(conn)
    }

    /// Classify this connection: the upstream master link, a registered
    /// replica, or an ordinary client
    pub fn role(&self) -> ConnectionRole {
        if self.is_master_link {
            ConnectionRole::Master
        } else if self.replica.is_some() {
            ConnectionRole::Replica
        } else {
            ConnectionRole::Client
        }
    }

    /// Credit an acknowledged offset reported via REPLCONF ACK
    pub fn record_ack(&self, n: u64) {
        if let Some(replica) = &self.replica {
            replica.add_ack(n);
        }
    }

    /// Serve this connection until the peer disconnects or fails.
    ///
    /// Consumes the connection; on exit the replica registration (if any)
    /// is dropped from the server.
    pub fn serve(mut self, server: &Arc<Server>) {
        if let Err(e) = self.serve_loop(server) {
            if !e.is_eof() {
                eprintln!("Connection {}: {}", self.addr, e);
            }
        }
        server.remove_replica(self.id);
    }

    fn serve_loop(&mut self, server: &Arc<Server>) -> Result<()> {
        if self.is_master_link {
            let listening_port = self.listening_port;
            replication::client::perform_handshake(self, listening_port)?;
            println!("Replication client: handshake with {} completed", self.addr);
        }

        loop {
            let argv = match self.read_command() {
                Ok(argv) => argv,
                Err(CinnabarError::Eof) => return Ok(()),
                Err(e) => return Err(e),
            };

            let command = match Command::from_argv(argv) {
                Ok(command) => command,
                Err(e) => {
                    // Unknown or malformed command names get a visible
                    // error; the connection stays usable.
                    self.send_frame(&RespFrame::error(e.to_string()))?;
                    continue;
                }
            };

            let is_psync = command.kind() == CommandKind::Psync;

            if let Some(response) = command.run(self, server)? {
                self.send_frame(&response)?;
            }

            if is_psync {
                self.send_snapshot(server)?;
                self.register_replica(server)?;
            }
        }
    }

    /// Decode exactly one inbound argument vector: a non-null array of
    /// non-null bulk strings holding UTF-8
    fn read_command(&mut self) -> Result<Vec<String>> {
        let frame = self.read_frame()?;

        let RespFrame::Array(Some(items)) = frame else {
            return Err(CinnabarError::Protocol(
                "expected array of bulk strings".into(),
            ));
        };

        let mut argv = Vec::with_capacity(items.len());
        for item in items {
            let RespFrame::BulkString(Some(bytes)) = item else {
                return Err(CinnabarError::Protocol(
                    "expected array of bulk strings".into(),
                ));
            };
            let arg = std::str::from_utf8(&bytes)
                .map_err(|_| CinnabarError::Protocol("invalid UTF-8 in argument".into()))?;
            argv.push(arg.to_string());
        }

        Ok(argv)
    }

    /// Read one complete frame, blocking for more bytes as needed
    pub fn read_frame(&mut self) -> Result<RespFrame> {
        loop {
            if let Some(frame) = self.parser.parse()? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Read one CRLF-terminated line, without the CRLF
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(line) = self.parser.read_line() {
                return Ok(line);
            }
            self.fill()?;
        }
    }

    /// Read exactly `n` raw bytes, honoring anything already buffered
    pub fn read_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(n);
        loop {
            let remaining = n - payload.len();
            self.parser.drain_raw(&mut payload, remaining);
            if payload.len() == n {
                return Ok(payload);
            }
            self.fill()?;
        }
    }

    /// Pull more bytes off the socket into the parser
    fn fill(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(CinnabarError::Eof),
            Ok(n) => {
                self.parser.feed(&buf[..n]);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send a frame to the peer
    pub fn send_frame(&mut self, frame: &RespFrame) -> Result<()> {
        let mut buffer = Vec::with_capacity(256);
        serialize_resp_frame(frame, &mut buffer)?;
        self.send_raw(&buffer)
    }

    /// Send raw bytes to the peer.
    ///
    /// Once this connection is a replica, replies share the socket with
    /// propagated frames, so they go through the handle's writer lock.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        if let Some(replica) = &self.replica {
            replica.send(data)?;
            return Ok(());
        }
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Ship the snapshot that follows a FULLRESYNC reply: a bulk-string
    /// header, then the raw bytes with no trailing CRLF
    fn send_snapshot(&mut self, server: &Server) -> Result<()> {
        let snapshot = server.store().dump();
        self.send_raw(format!("${}\r\n", snapshot.len()).as_bytes())?;
        self.send_raw(&snapshot)
    }

    /// Enter the server's replica set. Registration happens only after the
    /// snapshot went out, so propagated frames can never precede it.
    fn register_replica(&mut self, server: &Server) -> Result<()> {
        let writer = self.stream.try_clone()?;
        let handle = ReplicaHandle::new(self.id, self.addr, writer);
        server.add_replica(Arc::clone(&handle));
        self.replica = Some(handle);
        println!("Replica at {} registered", self.addr);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Best effort; the peer may already be gone.
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
