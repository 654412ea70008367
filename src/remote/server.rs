use crate::builtins::Surface;
use crate::config::ServerConfig;
use crate::error::{Control, ShellError};
use crate::exec::{Endpoints, Executor};
use crate::remote::protocol::{send_message_eof, RequestReader};
use std::io::{ErrorKind, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// How a client connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The client closed its side.
    Disconnected,
    /// The client sent `exit`.
    Exit,
    /// The client sent `stop-server`.
    StopServer,
}

pub struct Server {
    listener: TcpListener,
    executor: Executor,
    threaded: bool,
    stop: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(config: &ServerConfig) -> Result<Self, ShellError> {
        let listener = TcpListener::bind(config.addr())?;
        info!(addr = %listener.local_addr()?, threaded = config.threaded, "server.listen");
        Ok(Self {
            listener,
            executor: Executor::new(Surface::Remote).with_limits(config.limits),
            threaded: config.threaded,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ShellError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until one of them sends `stop-server`.
    ///
    /// A failing connection is logged and dropped; it never stops the server.
    pub fn serve(self) -> Result<(), ShellError> {
        let wake = wake_addr(self.local_addr()?);

        while !self.stop.load(Ordering::SeqCst) {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "server.accept failed");
                    continue;
                }
            };
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            info!(%peer, "client connected");

            if self.threaded {
                let executor = self.executor;
                let stop = Arc::clone(&self.stop);
                thread::spawn(move || {
                    if handle_client(stream, peer, &executor) == Some(ConnectionEnd::StopServer) {
                        stop.store(true, Ordering::SeqCst);
                        // unblock the accept loop
                        let _ = TcpStream::connect(wake);
                    }
                });
            } else if handle_client(stream, peer, &self.executor) == Some(ConnectionEnd::StopServer) {
                break;
            }
        }

        info!("server stopped");
        Ok(())
    }
}

fn handle_client(stream: TcpStream, peer: SocketAddr, executor: &Executor) -> Option<ConnectionEnd> {
    match serve_connection(stream, executor) {
        Ok(end) => {
            info!(%peer, ?end, "client disconnected");
            Some(end)
        }
        Err(e) => {
            warn!(%peer, error = %e, "client connection failed");
            None
        }
    }
}

/// Run requests from one client until it leaves.
///
/// Every request gets exactly one end marker, after all of its output.
/// Programs read from and write straight to the socket.
pub fn serve_connection(stream: TcpStream, executor: &Executor) -> Result<ConnectionEnd, ShellError> {
    let mut requests = RequestReader::new(stream.try_clone()?);
    let mut out = &stream;
    let mut err = &stream;

    loop {
        let Some(line) = requests.next_request()? else {
            return Ok(ConnectionEnd::Disconnected);
        };
        debug!(request = %line, "rdsh.exec");

        let result = executor.execute_line(&line, Endpoints::all(stream.as_fd()), &mut out, &mut err);
        let control = match result {
            Ok(outcome) => {
                if let Some(msg) = outcome.message() {
                    writeln!(out, "{}", msg)?;
                }
                outcome.control()
            }
            Err(e) => {
                writeln!(out, "{}", e)?;
                None
            }
        };
        send_message_eof(&mut out)?;

        match control {
            Some(Control::Exit) => return Ok(ConnectionEnd::Exit),
            Some(Control::StopServer) => return Ok(ConnectionEnd::StopServer),
            None => {}
        }
    }
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}
