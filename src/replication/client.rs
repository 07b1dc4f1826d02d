//! Replication client - the replica side of the master link
//!
//! Connects to the configured master, performs the PSYNC handshake, then
//! hands the connection over to the ordinary command loop with the MASTER
//! role, so the replicated stream executes locally with replies suppressed.

use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{CinnabarError, Result};
use crate::network::connection::Connection;
use crate::network::server::{next_conn_id, Server};
use crate::protocol::RespFrame;

/// Delay between reconnection attempts after the link drops
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Spawn the thread that maintains the link to the master at
/// `host:port`. `listening_port` is this server's own bound port,
/// reported during the handshake.
pub fn start_master_link(server: Arc<Server>, host: String, port: u16, listening_port: u16) {
    thread::spawn(move || loop {
        match connect_and_follow(&server, &host, port, listening_port) {
            Ok(()) => {
                println!("Replication client: master {}:{} closed the link", host, port);
            }
            Err(e) => {
                eprintln!("Replication client: {}", e);
            }
        }
        thread::sleep(RETRY_DELAY);
        println!("Replication client: reconnecting to {}:{}", host, port);
    });
}

fn connect_and_follow(
    server: &Arc<Server>,
    host: &str,
    port: u16,
    listening_port: u16,
) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr)
        .map_err(|e| CinnabarError::Connection(format!("failed to connect to master: {}", e)))?;
    let peer = stream.peer_addr()?;

    println!("Replication client: connected to master at {}", addr);

    let conn = Connection::master_link(next_conn_id(), stream, peer, listening_port)?;
    conn.serve(server);
    Ok(())
}

/// Perform the replica-side handshake over an established master link.
///
/// Each step sends one command and reads one reply line; after FULLRESYNC
/// the master ships a bulk-string-framed snapshot with no trailing CRLF.
pub(crate) fn perform_handshake(
    conn: &mut Connection,
    listening_port: u16,
) -> Result<()> {
    send_command(conn, &["PING"])?;
    conn.read_line()?;

    send_command(conn, &["REPLCONF", "listening-port", &listening_port.to_string()])?;
    conn.read_line()?;

    send_command(conn, &["REPLCONF", "capa", "psync2"])?;
    conn.read_line()?;

    send_command(conn, &["PSYNC", "?", "-1"])?;
    let reply = conn.read_line()?;
    println!(
        "Replication client: master replied {}",
        String::from_utf8_lossy(&reply)
    );

    // Snapshot header: $<n>, then exactly n raw bytes.
    let header = conn.read_line()?;
    let size = parse_snapshot_header(&header)?;
    let snapshot = conn.read_raw(size)?;
    println!(
        "Replication client: received {} byte snapshot",
        snapshot.len()
    );

    Ok(())
}

/// Encode and send one handshake command as an array of bulk strings
fn send_command(conn: &mut Connection, args: &[&str]) -> Result<()> {
    let frames = args
        .iter()
        .map(|arg| RespFrame::bulk_string(arg.as_bytes()))
        .collect();
    conn.send_frame(&RespFrame::array(frames))
}

fn parse_snapshot_header(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| CinnabarError::Protocol("invalid snapshot header".into()))?;
    let size = text
        .strip_prefix('$')
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| {
            CinnabarError::Protocol(format!("invalid snapshot header: {}", text))
        })?;
    Ok(size)
}
