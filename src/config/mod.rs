//! Configuration module for Cinnabar
//!
//! Holds the server's runtime parameters and backs the CONFIG GET command.

mod cli;

pub use cli::{parse_cli_args, CliArgs, ConfigParseError};

/// Main configuration structure for Cinnabar
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind to
    pub bind_addr: String,

    /// Port to listen on
    pub port: u16,

    /// Working directory for the snapshot file
    pub dir: String,

    /// Snapshot filename
    pub dbfilename: String,

    /// Master to replicate from - (host, port)
    pub replicaof: Option<(String, u16)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1".to_string(),
            port: 6379,
            dir: ".".to_string(),
            dbfilename: "dump.rdb".to_string(),
            replicaof: None,
        }
    }
}

impl Config {
    /// Apply command-line arguments to override config
    pub fn apply_cli_args(&mut self, args: CliArgs) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(bind_addr) = args.bind {
            self.bind_addr = bind_addr;
        }
        if let Some(replicaof) = args.replicaof {
            self.replicaof = Some(replicaof);
        }
        if let Some(dir) = args.dir {
            self.dir = dir;
        }
        if let Some(dbfilename) = args.dbfilename {
            self.dbfilename = dbfilename;
        }
    }

    /// Get a configuration parameter by name
    pub fn get(&self, param: &str) -> Option<String> {
        match param {
            "port" => Some(self.port.to_string()),
            "bind" => Some(self.bind_addr.clone()),
            "dir" => Some(self.dir.clone()),
            "dbfilename" => Some(self.dbfilename.clone()),
            "replicaof" => self
                .replicaof
                .as_ref()
                .map(|(host, port)| format!("{} {}", host, port)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 6379);
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.dbfilename, "dump.rdb");
        assert!(config.replicaof.is_none());
    }

    #[test]
    fn test_get_parameters() {
        let mut config = Config::default();
        config.dir = "/data".to_string();
        config.replicaof = Some(("primary.local".to_string(), 7000));

        assert_eq!(config.get("dir"), Some("/data".to_string()));
        assert_eq!(config.get("dbfilename"), Some("dump.rdb".to_string()));
        assert_eq!(config.get("port"), Some("6379".to_string()));
        assert_eq!(config.get("replicaof"), Some("primary.local 7000".to_string()));
        assert_eq!(config.get("no-such-param"), None);
    }

    #[test]
    fn test_apply_cli_args() {
        let mut config = Config::default();
        let mut args = CliArgs::default();
        args.port = Some(7777);
        args.dir = Some("/tmp".to_string());
        args.replicaof = Some(("localhost".to_string(), 6380));

        config.apply_cli_args(args);
        assert_eq!(config.port, 7777);
        assert_eq!(config.dir, "/tmp");
        assert_eq!(config.replicaof, Some(("localhost".to_string(), 6380)));
    }
}
