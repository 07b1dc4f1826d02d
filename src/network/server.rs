//! Main server implementation
//!
//! Owns the store, the replica set and the replication identity, accepts
//! connections and spawns one serving thread per peer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::config::Config;
use crate::error::Result;
use crate::replication::{self, ReplicaHandle};
use crate::storage::rdb;
use crate::storage::store::Store;
use super::connection::Connection;
use super::listener::Listener;

/// Connection ID generator
static CONN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique connection ID
pub fn next_conn_id() -> u64 {
    CONN_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Main server struct
pub struct Server {
    /// Server configuration
    config: Config,

    /// The keyspace
    store: Store,

    /// Connected replicas, by connection ID
    replicas: Mutex<HashMap<u64, Arc<ReplicaHandle>>>,

    /// Replication ID, fixed for the lifetime of the process
    master_replid: String,

    /// Bytes of commands processed over the replication stream
    master_repl_offset: AtomicU64,

    /// Serializes a mutating command's execution with its fan-out, so
    /// replicas see mutations in local-effect order
    propagation: Mutex<()>,
}

impl Server {
    /// Create a server, loading the snapshot file if one is usable
    pub fn new(config: Config) -> Arc<Self> {
        let store = Self::try_load_database(&config);

        Arc::new(Server {
            config,
            store,
            replicas: Mutex::new(HashMap::new()),
            master_replid: replication::generate_repl_id(),
            master_repl_offset: AtomicU64::new(0),
            propagation: Mutex::new(()),
        })
    }

    /// Bind the configured address and serve forever
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let listener = Listener::bind(&self.config.bind_addr, self.config.port)?;
        self.run_with_listener(listener)
    }

    /// Serve on an already-bound listener. Split out so tests can bind an
    /// ephemeral port first.
    pub fn run_with_listener(self: &Arc<Self>, listener: Listener) -> Result<()> {
        let port = listener.local_addr()?.port();

        if let Some((host, master_port)) = self.config.replicaof.clone() {
            replication::client::start_master_link(
                Arc::clone(self),
                host,
                master_port,
                port,
            );
        }

        loop {
            let (stream, addr) = listener.accept()?;
            let server = Arc::clone(self);

            thread::spawn(move || match Connection::new(next_conn_id(), stream, addr) {
                Ok(conn) => conn.serve(&server),
                Err(e) => eprintln!("Connection {}: setup failed: {}", addr, e),
            });
        }
    }

    /// The store owned by this server
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Look up a configuration parameter for CONFIG GET
    pub fn config_param(&self, name: &str) -> Option<String> {
        self.config.get(name)
    }

    /// "master" when replica of no one, "slave" otherwise
    pub fn role(&self) -> &'static str {
        if self.config.replicaof.is_none() {
            "master"
        } else {
            "slave"
        }
    }

    /// The server's replication ID
    pub fn replid(&self) -> &str {
        &self.master_replid
    }

    /// Current replication offset
    pub fn master_repl_offset(&self) -> u64 {
        self.master_repl_offset.load(Ordering::SeqCst)
    }

    /// Advance the replication offset by a command's serialized length
    pub fn add_master_offset(&self, n: u64) {
        self.master_repl_offset.fetch_add(n, Ordering::SeqCst);
    }

    /// Hold this guard across a mutation and its fan-out
    pub fn lock_propagation(&self) -> MutexGuard<'_, ()> {
        self.propagation.lock().unwrap()
    }

    /// Register a replica connection
    pub fn add_replica(&self, replica: Arc<ReplicaHandle>) {
        let mut replicas = self.replicas.lock().unwrap();
        replicas.insert(replica.conn_id, replica);
    }

    /// Drop a replica, if registered. Safe to call repeatedly.
    pub fn remove_replica(&self, conn_id: u64) {
        let mut replicas = self.replicas.lock().unwrap();
        replicas.remove(&conn_id);
    }

    /// Number of currently registered replicas
    pub fn replica_count(&self) -> usize {
        self.replicas.lock().unwrap().len()
    }

    /// Write an already-serialized command frame to every replica.
    ///
    /// Writes are independent; a replica that fails is evicted without
    /// disturbing the rest, and the failure never reaches the caller.
    pub fn send_command_to_replicas(&self, data: &[u8]) {
        let targets: Vec<Arc<ReplicaHandle>> = {
            let replicas = self.replicas.lock().unwrap();
            replicas.values().cloned().collect()
        };

        for replica in targets {
            if let Err(e) = replica.send(data) {
                eprintln!("Replica at {} dropped: {}", replica.addr, e);
                self.remove_replica(replica.conn_id);
            }
        }
    }

    /// Count replicas whose acknowledged offset has reached `target`
    pub fn num_acked_replicas(&self, target: u64) -> usize {
        let replicas = self.replicas.lock().unwrap();
        replicas
            .values()
            .filter(|replica| replica.ack_offset() >= target)
            .count()
    }

    /// Load `<dir>/<dbfilename>`; any failure means an empty store
    fn try_load_database(config: &Config) -> Store {
        let mut path = PathBuf::from(&config.dir);
        path.push(&config.dbfilename);

        match rdb::load_file(&path) {
            Ok(store) => {
                println!("RDB: loaded {} keys from {}", store.len(), path.display());
                store
            }
            Err(e) => {
                println!("RDB: starting empty ({})", e);
                Store::new()
            }
        }
    }
}
