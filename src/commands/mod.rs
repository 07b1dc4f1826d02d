//! Command layer
//!
//! Every command the server understands is one variant of a closed set,
//! with a uniform execution contract: a command may be queued into a
//! transaction, is executed against the server state, may be propagated to
//! replicas, and may have its response suppressed depending on who sent it.

pub mod transaction;

pub use transaction::Transaction;

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;

use crate::error::{CommandError, Result};
use crate::network::connection::{Connection, ConnectionRole};
use crate::network::server::Server;
use crate::protocol::{serialize_to_vec, RespFrame};
use crate::storage::now_ms;
use crate::storage::store::{Expiry, StreamReadError, StreamWriteError, WrongType};
use crate::storage::stream::StreamEntry;

/// The closed set of commands the server speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    Echo,
    Get,
    Set,
    Incr,
    Type,
    Keys,
    Info,
    Config,
    Multi,
    Exec,
    Discard,
    Replconf,
    Psync,
    Wait,
    Xadd,
    Xrange,
    Xread,
}

lazy_static! {
    /// Command descriptor table: uppercase name to (kind, minimum arity)
    static ref COMMAND_TABLE: HashMap<&'static str, (CommandKind, usize)> = {
        let mut table = HashMap::new();
        table.insert("PING", (CommandKind::Ping, 1));
        table.insert("ECHO", (CommandKind::Echo, 2));
        table.insert("GET", (CommandKind::Get, 2));
        table.insert("SET", (CommandKind::Set, 3));
        table.insert("INCR", (CommandKind::Incr, 2));
        table.insert("TYPE", (CommandKind::Type, 2));
        table.insert("KEYS", (CommandKind::Keys, 2));
        table.insert("INFO", (CommandKind::Info, 1));
        table.insert("CONFIG", (CommandKind::Config, 3));
        table.insert("MULTI", (CommandKind::Multi, 1));
        table.insert("EXEC", (CommandKind::Exec, 1));
        table.insert("DISCARD", (CommandKind::Discard, 1));
        table.insert("REPLCONF", (CommandKind::Replconf, 2));
        table.insert("PSYNC", (CommandKind::Psync, 3));
        table.insert("WAIT", (CommandKind::Wait, 3));
        table.insert("XADD", (CommandKind::Xadd, 5));
        table.insert("XRANGE", (CommandKind::Xrange, 4));
        table.insert("XREAD", (CommandKind::Xread, 4));
        table
    };
}

/// A parsed command: its kind plus the argument vector as received.
///
/// The argument vector is kept verbatim because its RESP serialization is
/// the unit of replication: propagated bytes and offset accounting both
/// come from re-encoding it.
#[derive(Debug, Clone)]
pub struct Command {
    kind: CommandKind,
    argv: Vec<String>,
}

impl Command {
    /// Resolve an argument vector into a command. The name is matched
    /// case-insensitively; arity is checked against the descriptor table.
    pub fn from_argv(argv: Vec<String>) -> std::result::Result<Self, CommandError> {
        let name = match argv.first() {
            Some(name) => name.to_uppercase(),
            None => return Err(CommandError::UnknownCommand(String::new())),
        };

        let (kind, min_arity) = *COMMAND_TABLE
            .get(name.as_str())
            .ok_or(CommandError::UnknownCommand(name.clone()))?;

        if argv.len() < min_arity {
            return Err(CommandError::WrongNumberOfArgs(name.to_lowercase()));
        }

        Ok(Command { kind, argv })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Encode as a RESP array of bulk strings, byte-identical to how a
    /// client would have sent it
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let frames = self
            .argv
            .iter()
            .map(|arg| RespFrame::bulk_string(arg.as_bytes()))
            .collect();
        serialize_to_vec(&RespFrame::array(frames))
    }

    /// Whether this command goes onto the transaction queue instead of
    /// executing. Transaction-control commands never queue themselves.
    fn should_queue(&self, conn: &Connection) -> bool {
        if matches!(
            self.kind,
            CommandKind::Multi | CommandKind::Exec | CommandKind::Discard
        ) {
            return false;
        }
        conn.transaction.is_active()
    }

    /// Whether this command is replicated to connected replicas
    fn should_propagate(&self) -> bool {
        self.kind == CommandKind::Set
    }

    /// Whether the sender gets a reply. Commands arriving over the
    /// replication stream are answered only for REPLCONF GETACK.
    fn has_response(&self, conn: &Connection) -> bool {
        if self.kind == CommandKind::Replconf {
            return !self.subcommand_is("ACK");
        }
        conn.role() != ConnectionRole::Master
    }

    fn subcommand_is(&self, name: &str) -> bool {
        self.argv
            .get(1)
            .map(|sub| sub.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    }

    /// Run the command-execution protocol: queue or execute, account the
    /// replication offset for commands from the master, fan out mutating
    /// commands, then suppress the response if the sender gets none.
    pub fn run(self, conn: &mut Connection, server: &Server) -> Result<Option<RespFrame>> {
        if self.should_queue(conn) {
            let has_response = self.has_response(conn);
            conn.transaction.push(self);
            let queued = RespFrame::simple_string("QUEUED");
            return Ok(has_response.then_some(queued));
        }

        // A propagated command holds the propagation lock across execution
        // and fan-out, so every replica observes mutations in local-effect
        // order.
        let propagate = self.should_propagate();
        let _ordering = propagate.then(|| server.lock_propagation());

        let response = self.execute_body(conn, server)?;

        if conn.role() == ConnectionRole::Master {
            let wire = self.serialize()?;
            server.add_master_offset(wire.len() as u64);
        }

        if propagate {
            let wire = self.serialize()?;
            server.send_command_to_replicas(&wire);
            conn.propagate_offset += wire.len() as u64;
        }

        let has_response = self.has_response(conn);
        Ok(has_response.then_some(response))
    }

    /// Execute the command against the server state and build its reply.
    /// Semantic failures come back as RESP error frames, never as `Err`.
    fn execute_body(&self, conn: &mut Connection, server: &Server) -> Result<RespFrame> {
        match self.kind {
            CommandKind::Ping => Ok(RespFrame::simple_string("PONG")),

            CommandKind::Echo => Ok(RespFrame::bulk_string(self.argv[1].as_bytes())),

            CommandKind::Get => Ok(match server.store().get_string(&self.argv[1]) {
                Ok(Some(value)) => RespFrame::bulk_string(value.as_bytes()),
                Ok(None) => RespFrame::null_bulk(),
                Err(WrongType) => RespFrame::error(CommandError::WrongType.to_string()),
            }),

            CommandKind::Set => self.set(server),

            CommandKind::Incr => Ok(match server.store().increment(&self.argv[1]) {
                Some(value) => RespFrame::Integer(value),
                None => RespFrame::error(CommandError::NotInteger.to_string()),
            }),

            CommandKind::Type => {
                let kind = server.store().kind(&self.argv[1]);
                let name = kind.map(|k| k.as_str()).unwrap_or("none");
                Ok(RespFrame::simple_string(name))
            }

            CommandKind::Keys => {
                let keys = server
                    .store()
                    .keys()
                    .into_iter()
                    .map(|key| RespFrame::bulk_string(key.as_bytes()))
                    .collect();
                Ok(RespFrame::array(keys))
            }

            CommandKind::Info => {
                let info = format!(
                    "role:{}\nmaster_replid:{}\nmaster_repl_offset:{}",
                    server.role(),
                    server.replid(),
                    server.master_repl_offset()
                );
                Ok(RespFrame::bulk_string(info.as_bytes()))
            }

            CommandKind::Config => self.config_get(server),

            CommandKind::Multi => Ok(if conn.transaction.activate() {
                RespFrame::ok()
            } else {
                RespFrame::error("ERR MULTI calls can not be nested")
            }),

            CommandKind::Exec => self.exec(conn, server),

            CommandKind::Discard => Ok(if conn.transaction.discard() {
                RespFrame::ok()
            } else {
                RespFrame::error("ERR DISCARD without MULTI")
            }),

            CommandKind::Replconf => self.replconf(conn, server),

            CommandKind::Psync => Ok(RespFrame::simple_string(format!(
                "FULLRESYNC {} 0",
                server.replid()
            ))),

            CommandKind::Wait => self.wait(conn, server),

            CommandKind::Xadd => self.xadd(server),

            CommandKind::Xrange => self.xrange(server),

            CommandKind::Xread => self.xread(server),
        }
    }

    fn set(&self, server: &Server) -> Result<RespFrame> {
        let key = &self.argv[1];
        let value = &self.argv[2];

        let expiry = if self.argv.len() > 3 {
            // The trailing argument is a relative TTL in milliseconds.
            match self.argv[self.argv.len() - 1].parse::<u64>() {
                Ok(ms) => Expiry::RelativeMs(ms),
                Err(_) => {
                    return Ok(RespFrame::error(CommandError::NotInteger.to_string()));
                }
            }
        } else {
            Expiry::Never
        };

        server.store().set_string(key.clone(), value.clone(), expiry);
        Ok(RespFrame::ok())
    }

    fn config_get(&self, server: &Server) -> Result<RespFrame> {
        if !self.subcommand_is("GET") {
            return Ok(RespFrame::error(format!(
                "ERR Unknown CONFIG subcommand or wrong number of arguments for '{}'",
                self.argv[1]
            )));
        }

        let name = &self.argv[2];
        let value = match server.config_param(name) {
            Some(value) => RespFrame::bulk_string(value.as_bytes()),
            None => RespFrame::null_bulk(),
        };
        Ok(RespFrame::array(vec![
            RespFrame::bulk_string(name.as_bytes()),
            value,
        ]))
    }

    fn exec(&self, conn: &mut Connection, server: &Server) -> Result<RespFrame> {
        let queued = match conn.transaction.take() {
            Some(queued) => queued,
            None => return Ok(RespFrame::error("ERR EXEC without MULTI")),
        };

        let mut responses = Vec::with_capacity(queued.len());
        for command in queued {
            if let Some(response) = command.run(conn, server)? {
                responses.push(response);
            }
        }
        Ok(RespFrame::array(responses))
    }

    fn replconf(&self, conn: &mut Connection, server: &Server) -> Result<RespFrame> {
        if self.subcommand_is("GETACK") {
            // Reply with our offset as it stood before this GETACK frame
            // itself is accounted.
            let ack = Command {
                kind: CommandKind::Replconf,
                argv: vec![
                    "REPLCONF".to_string(),
                    "ACK".to_string(),
                    server.master_repl_offset().to_string(),
                ],
            };
            let frames = ack
                .argv
                .iter()
                .map(|arg| RespFrame::bulk_string(arg.as_bytes()))
                .collect();
            return Ok(RespFrame::array(frames));
        }

        if self.subcommand_is("ACK") {
            match self.argv.get(2).and_then(|n| n.parse::<u64>().ok()) {
                Some(n) => conn.record_ack(n),
                None => {
                    return Ok(RespFrame::error(CommandError::NotInteger.to_string()));
                }
            }
        }

        // listening-port, capa and an accounted ACK all acknowledge with OK
        // (the ACK reply is suppressed by has_response).
        Ok(RespFrame::ok())
    }

    fn wait(&self, conn: &mut Connection, server: &Server) -> Result<RespFrame> {
        let required = match self.argv[1].parse::<usize>() {
            Ok(n) => n,
            Err(_) => return Ok(RespFrame::error(CommandError::NotInteger.to_string())),
        };
        let timeout_ms = match self.argv[2].parse::<u64>() {
            Ok(n) => n,
            Err(_) => return Ok(RespFrame::error(CommandError::NotInteger.to_string())),
        };

        let target = conn.propagate_offset;

        // Solicit fresh ACKs only if this client has caused propagation.
        if target > 0 {
            let getack = Command {
                kind: CommandKind::Replconf,
                argv: vec![
                    "REPLCONF".to_string(),
                    "GETACK".to_string(),
                    "*".to_string(),
                ],
            };
            server.send_command_to_replicas(&getack.serialize()?);
        }

        let deadline = now_ms() + timeout_ms;
        let mut acked = server.num_acked_replicas(target);
        while acked < required && now_ms() < deadline {
            thread::sleep(Duration::from_millis(2));
            acked = server.num_acked_replicas(target);
        }

        Ok(RespFrame::Integer(acked as i64))
    }

    fn xadd(&self, server: &Server) -> Result<RespFrame> {
        let key = &self.argv[1];
        let id_text = &self.argv[2];

        let rest = &self.argv[3..];
        if rest.is_empty() || rest.len() % 2 != 0 {
            return Ok(RespFrame::error(
                CommandError::WrongNumberOfArgs("xadd".to_string()).to_string(),
            ));
        }
        let fields = rest
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        Ok(match server.store().xadd(key, id_text, fields) {
            Ok(id) => RespFrame::bulk_string(id.to_string().as_bytes()),
            Err(StreamWriteError::WrongType) => {
                RespFrame::error(CommandError::WrongType.to_string())
            }
            Err(StreamWriteError::InvalidId(e)) => RespFrame::error(format!("ERR {}", e)),
            Err(StreamWriteError::Append(e)) => RespFrame::error(format!("ERR {}", e)),
        })
    }

    fn xrange(&self, server: &Server) -> Result<RespFrame> {
        let key = &self.argv[1];

        Ok(match server.store().xrange(key, &self.argv[2], &self.argv[3]) {
            Ok(entries) => entries_frame(&entries),
            Err(StreamReadError::WrongType) => {
                RespFrame::error(CommandError::WrongType.to_string())
            }
            Err(StreamReadError::InvalidId(e)) => RespFrame::error(format!("ERR {}", e)),
        })
    }

    fn xread(&self, server: &Server) -> Result<RespFrame> {
        // Optional BLOCK <ms> prefix, then STREAMS <key...> <id...>.
        let block_ms = if self.subcommand_is("BLOCK") {
            match self.argv.get(2).and_then(|ms| ms.parse::<u64>().ok()) {
                Some(ms) => Some(ms),
                None => {
                    return Ok(RespFrame::error(CommandError::NotInteger.to_string()));
                }
            }
        } else {
            None
        };

        let streams_at = match self
            .argv
            .iter()
            .position(|arg| arg.eq_ignore_ascii_case("STREAMS"))
        {
            Some(at) => at,
            None => return Ok(RespFrame::error("ERR syntax error")),
        };

        let names_and_ids = &self.argv[streams_at + 1..];
        if names_and_ids.is_empty() || names_and_ids.len() % 2 != 0 {
            return Ok(RespFrame::error(
                "ERR Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified",
            ));
        }
        let stream_count = names_and_ids.len() / 2;
        let keys = &names_and_ids[..stream_count];
        let id_texts = &names_and_ids[stream_count..];

        // Resolve start IDs once, up front; `$` means the tail right now.
        let mut starts = Vec::with_capacity(stream_count);
        for (key, id_text) in keys.iter().zip(id_texts) {
            match server.store().resolve_read_start(key, id_text) {
                Ok(start) => starts.push(start),
                Err(e) => return Ok(RespFrame::error(format!("ERR {}", e))),
            }
        }

        // No BLOCK means a deadline already in the past: one pass, then
        // a null reply if nothing was available. BLOCK 0 waits forever.
        let deadline = match block_ms {
            Some(0) => None,
            Some(ms) => Some(now_ms() + ms),
            None => Some(0),
        };

        loop {
            let mut groups = Vec::with_capacity(stream_count);
            let mut has_data = false;

            for (key, start) in keys.iter().zip(&starts) {
                let entries = server.store().read_after(key, *start);
                if !entries.is_empty() {
                    has_data = true;
                }
                groups.push(RespFrame::array(vec![
                    RespFrame::bulk_string(key.as_bytes()),
                    entries_frame(&entries),
                ]));
            }

            if has_data {
                return Ok(RespFrame::array(groups));
            }
            if deadline.map(|at| now_ms() >= at).unwrap_or(false) {
                return Ok(RespFrame::null_bulk());
            }

            thread::sleep(Duration::from_millis(2));
        }
    }
}

/// Encode a list of stream entries as nested RESP arrays:
/// `[[id, [k1, v1, k2, v2, ...]], ...]`
fn entries_frame(entries: &[StreamEntry]) -> RespFrame {
    let frames = entries
        .iter()
        .map(|entry| {
            let mut flat = Vec::with_capacity(entry.fields.len() * 2);
            for (field, value) in &entry.fields {
                flat.push(RespFrame::bulk_string(field.as_bytes()));
                flat.push(RespFrame::bulk_string(value.as_bytes()));
            }
            RespFrame::array(vec![
                RespFrame::bulk_string(entry.id.to_string().as_bytes()),
                RespFrame::array(flat),
            ])
        })
        .collect();
    RespFrame::array(frames)
}
