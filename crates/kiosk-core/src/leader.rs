use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener};

use tracing::{info, warn};

#[derive(Debug)]
pub struct LeaderGuard {
    listener: TcpListener,
}

impl LeaderGuard {
    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }
}

pub fn try_acquire(port: u16) -> Option<LeaderGuard> {
    match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
        Ok(listener) => {
            let guard = LeaderGuard { listener };
            info!(port = guard.port(), "acquired scheduler leadership");
            Some(guard)
        }
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            info!(port, "another instance holds leadership, periodic jobs disabled");
            None
        }
        Err(err) => {
            warn!(port, error=%err, "leader port bind failed, periodic jobs disabled");
            None
        }
    }
}
