//! Listener binding.
//!
//! # Responsibilities
//! - Resolve and bind the configured address synchronously, so `start`
//!   fails fast and `local_addr` is known before serving begins
//! - Hand engines a non-blocking std listener they can adopt

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use crate::error::{Result, RouterError};

/// Resolve `addr` to its first socket address.
pub fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|source| RouterError::Bind {
            addr: addr.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| RouterError::Bind {
            addr: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "address resolved to nothing"),
        })
}

/// Bind a non-blocking std listener on `addr`.
pub fn bind_listener(addr: &str) -> Result<TcpListener> {
    let socket_addr = resolve(addr)?;
    let bind_err = |source| RouterError::Bind {
        addr: addr.to_string(),
        source,
    };
    let listener = TcpListener::bind(socket_addr).map_err(bind_err)?;
    listener.set_nonblocking(true).map_err(bind_err)?;

    tracing::info!(address = %listener.local_addr().map_err(bind_err)?, "listener bound");
    Ok(listener)
}

/// Bind a tokio listener on `addr`. Must run inside a tokio runtime.
pub fn bind_tokio_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    let listener = bind_listener(addr)?;
    tokio::net::TcpListener::from_std(listener).map_err(|source| RouterError::Bind {
        addr: addr.to_string(),
        source,
    })
}
