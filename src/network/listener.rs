//! TCP listener for accepting client connections

use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::error::{CinnabarError, Result};

/// TCP listener wrapper
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Create a new listener bound to the given address
    pub fn bind(bind_addr: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", bind_addr, port);
        let listener = TcpListener::bind(&addr)
            .map_err(|e| CinnabarError::Io(format!("Failed to bind to {}: {}", addr, e)))?;

        println!("Cinnabar listening on {}", addr);

        Ok(Listener { listener })
    }

    /// Block until the next connection arrives
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        self.listener.accept().map_err(Into::into)
    }

    /// Get the local address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = Listener::bind("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }
}
