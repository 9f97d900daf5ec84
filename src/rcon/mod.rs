//! Remote-console transport.
//!
//! [`RconTransport`] is the blocking seam between the gateway and the wire.
//! The gateway always calls it from a blocking worker, never from an async task.
//! With the `rcon` feature enabled, [`SourceRcon`] speaks the Source RCON
//! protocol over TCP; tests plug in scripted transports instead.

pub mod packet;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::logutil::redact;

/// Where and how to reach one server. Cloned out of the registry per call so
/// no registry lock is held while the transport runs.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub server_id: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Inner (socket-level) timeout.
    pub timeout: Duration,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("server_id", &self.server_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &redact(&self.password))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Endpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(String),

    #[error("authentication rejected")]
    AuthRejected,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportError::Timeout,
            _ => TransportError::Io(e.to_string()),
        }
    }
}

/// Blocking remote-console call: connect, authenticate, run one command, return its text.
pub trait RconTransport: Send + Sync + 'static {
    fn execute(&self, endpoint: &Endpoint, command: &str) -> Result<String, TransportError>;
}

#[cfg(feature = "rcon")]
pub use source::SourceRcon;

/// The transport compiled into this build, if any.
pub fn default_transport() -> Option<std::sync::Arc<dyn RconTransport>> {
    #[cfg(feature = "rcon")]
    {
        Some(std::sync::Arc::new(SourceRcon::default()))
    }
    #[cfg(not(feature = "rcon"))]
    {
        None
    }
}

#[cfg(feature = "rcon")]
mod source {
    use std::io::{Read, Write};
    use std::net::{TcpStream, ToSocketAddrs};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    use log::{debug, trace};

    use super::packet::{
        Packet, RconFramer, AUTH_FAILED_ID, MAX_BODY, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE,
        SERVERDATA_EXECCOMMAND,
    };
    use super::{Endpoint, RconTransport, TransportError};
    use crate::logutil::redact;

    /// How long to wait for a continuation packet after a full-size body.
    const CONTINUATION_WAIT: Duration = Duration::from_millis(250);

    /// One TCP connection per command, closed when the call returns.
    #[derive(Debug, Default)]
    pub struct SourceRcon {
        next_id: AtomicI32,
    }

    impl SourceRcon {
        fn request_id(&self) -> i32 {
            // Keep ids positive; -1 is the server's auth-failure marker.
            (self.next_id.fetch_add(1, Ordering::Relaxed) & 0x3fff_ffff) + 1
        }
    }

    struct Conn {
        stream: TcpStream,
        framer: RconFramer,
    }

    impl Conn {
        fn send(&mut self, pkt: &Packet) -> Result<(), TransportError> {
            self.stream.write_all(&pkt.encode())?;
            Ok(())
        }

        fn recv(&mut self) -> Result<Packet, TransportError> {
            let mut chunk = [0u8; 4096];
            loop {
                if let Some(pkt) = self
                    .framer
                    .next_packet()
                    .map_err(|e| TransportError::Protocol(e.to_string()))?
                {
                    trace!("rcon recv id={} type={} len={}", pkt.id, pkt.kind, pkt.body.len());
                    return Ok(pkt);
                }
                let n = self.stream.read(&mut chunk)?;
                if n == 0 {
                    return Err(TransportError::Io("connection closed by server".into()));
                }
                self.framer.push(&chunk[..n]);
            }
        }
    }

    impl RconTransport for SourceRcon {
        fn execute(&self, endpoint: &Endpoint, command: &str) -> Result<String, TransportError> {
            let addr = endpoint
                .address()
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| TransportError::Io(format!("cannot resolve {}", endpoint.address())))?;
            debug!(
                "rcon connecting to {} at {} (password {})",
                endpoint.server_id,
                addr,
                redact(&endpoint.password)
            );
            let stream = TcpStream::connect_timeout(&addr, endpoint.timeout)?;
            stream.set_read_timeout(Some(endpoint.timeout))?;
            stream.set_write_timeout(Some(endpoint.timeout))?;
            let mut conn = Conn {
                stream,
                framer: RconFramer::new(),
            };

            let auth_id = self.request_id();
            conn.send(&Packet::new(auth_id, SERVERDATA_AUTH, endpoint.password.clone()))?;
            loop {
                let pkt = conn.recv()?;
                if pkt.id == AUTH_FAILED_ID {
                    return Err(TransportError::AuthRejected);
                }
                // Some servers send an empty response value before the auth response.
                if pkt.kind == SERVERDATA_AUTH_RESPONSE && pkt.id == auth_id {
                    break;
                }
            }
            debug!("rcon authenticated to {}", endpoint.server_id);

            let cmd_id = self.request_id();
            conn.send(&Packet::new(cmd_id, SERVERDATA_EXECCOMMAND, command))?;
            let first = conn.recv()?;
            let mut body = first.body;
            let mut last_len = body.len();
            if last_len >= MAX_BODY {
                conn.stream.set_read_timeout(Some(CONTINUATION_WAIT))?;
                while last_len >= MAX_BODY {
                    match conn.recv() {
                        Ok(next) => {
                            last_len = next.body.len();
                            body.push_str(&next.body);
                        }
                        Err(TransportError::Timeout) => break,
                        Err(e) => return Err(e),
                    }
                }
            }
            Ok(body)
        }
    }
}

#[cfg(all(test, feature = "rcon"))]
mod tests {
    use super::packet::{Packet, RconFramer, SERVERDATA_AUTH_RESPONSE, SERVERDATA_RESPONSE_VALUE};
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn read_packet(stream: &mut std::net::TcpStream, framer: &mut RconFramer) -> Packet {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(p) = framer.next_packet().unwrap() {
                return p;
            }
            let n = stream.read(&mut buf).unwrap();
            framer.push(&buf[..n]);
        }
    }

    #[test]
    fn debug_output_hides_password() {
        let ep = Endpoint {
            server_id: "main".into(),
            host: "127.0.0.1".into(),
            port: 27020,
            password: "hunter2".into(),
            timeout: Duration::from_secs(1),
        };
        let shown = format!("{:?}", ep);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn source_rcon_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut framer = RconFramer::new();
            let auth = read_packet(&mut s, &mut framer);
            assert_eq!(auth.body, "secret");
            s.write_all(&Packet::new(auth.id, SERVERDATA_RESPONSE_VALUE, "").encode())
                .unwrap();
            s.write_all(&Packet::new(auth.id, SERVERDATA_AUTH_RESPONSE, "").encode())
                .unwrap();
            let cmd = read_packet(&mut s, &mut framer);
            assert_eq!(cmd.body, "ListPlayers");
            s.write_all(&Packet::new(cmd.id, SERVERDATA_RESPONSE_VALUE, "No Players Connected").encode())
                .unwrap();
        });

        let ep = Endpoint {
            server_id: "local".into(),
            host: "127.0.0.1".into(),
            port,
            password: "secret".into(),
            timeout: Duration::from_secs(2),
        };
        let out = SourceRcon::default().execute(&ep, "ListPlayers").unwrap();
        assert_eq!(out, "No Players Connected");
        server.join().unwrap();
    }

    #[test]
    fn source_rcon_reports_rejected_auth() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut framer = RconFramer::new();
            let _ = read_packet(&mut s, &mut framer);
            s.write_all(&Packet::new(-1, SERVERDATA_AUTH_RESPONSE, "").encode())
                .unwrap();
        });
        let ep = Endpoint {
            server_id: "local".into(),
            host: "127.0.0.1".into(),
            port,
            password: "wrong".into(),
            timeout: Duration::from_secs(2),
        };
        let err = SourceRcon::default().execute(&ep, "ListPlayers").unwrap_err();
        assert_eq!(err, TransportError::AuthRejected);
        server.join().unwrap();
    }
}
