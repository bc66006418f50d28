//! Socket transport of the command service
//!
//! Each accepted connection gets its own thread which reads exactly one JSON
//! request, writes one JSON response and closes the connection.

use super::{CommandRegistry, Response};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::fmt;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::net::TcpListener;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use syshook_core::{InterceptError, Result};

/// Where the command service listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = InterceptError;

    /// Accepts `unix:<path>`, `<host>:<port>` or a bare socket path
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InterceptError::InvalidConfig("empty socket address".to_string()));
        }
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(InterceptError::InvalidConfig(format!("missing socket path in {}", s)));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.contains('/') && port.parse::<u16>().is_ok() => {
                Ok(Endpoint::Tcp(s.to_string()))
            }
            _ => Ok(Endpoint::Unix(PathBuf::from(s))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => f.write_str(addr),
        }
    }
}

pub enum Listener {
    Unix { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

impl Listener {
    /// Bind `endpoint`, replacing a stale socket file if one is left over
    ///
    /// Anything other than a socket at the path is left alone and fails the bind.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Unix(path) => {
                match std::fs::symlink_metadata(path) {
                    Ok(meta) if meta.file_type().is_socket() => {
                        warn!("Removing stale socket {}", path.display());
                        std::fs::remove_file(path)?;
                    }
                    Ok(_) => {
                        return Err(InterceptError::InvalidConfig(format!(
                            "{} exists and is not a socket",
                            path.display()
                        )));
                    }
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                let listener = UnixListener::bind(path)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr.as_str())?)),
        }
    }

    /// The bound address; for TCP this resolves an ephemeral port
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            Listener::Unix { path, .. } => Ok(Endpoint::Unix(path.clone())),
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
        }
    }

    /// Accept connections until the listener fails
    pub fn serve(self, commands: Arc<CommandRegistry>) -> Result<()> {
        info!("Command service listening on {}", self.local_endpoint()?);
        match &self {
            Listener::Unix { listener, .. } => {
                for stream in listener.incoming() {
                    match stream {
                        Ok(stream) => spawn_connection(stream, Arc::clone(&commands)),
                        Err(err) => error!("Failed to accept connection: {}", err),
                    }
                }
            }
            Listener::Tcp(listener) => {
                for stream in listener.incoming() {
                    match stream {
                        Ok(stream) => spawn_connection(stream, Arc::clone(&commands)),
                        Err(err) => error!("Failed to accept connection: {}", err),
                    }
                }
            }
        }
        Ok(())
    }

    /// [`Listener::serve`] on a background thread
    pub fn spawn(self, commands: Arc<CommandRegistry>) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Err(err) = self.serve(commands) {
                error!("Command service stopped: {}", err);
            }
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            if let Err(err) = std::fs::remove_file(&*path) {
                debug!("Could not remove socket {}: {}", path.display(), err);
            }
        }
    }
}

fn spawn_connection<S>(stream: S, commands: Arc<CommandRegistry>)
where
    S: Read + Write + Send + 'static,
{
    thread::spawn(move || {
        if let Err(err) = handle_connection(stream, &commands) {
            warn!("Command connection failed: {}", err);
        }
    });
}

/// Serve one request on `stream`
pub fn handle_connection<S: Read + Write>(mut stream: S, commands: &CommandRegistry) -> Result<()> {
    let response = match read_request(&mut stream) {
        Ok(raw) => commands.dispatch_json(raw),
        Err(err) => Response::from(err),
    };
    serde_json::to_writer(&mut stream, &response)?;
    stream.flush()?;
    Ok(())
}

/// Read exactly one JSON value; trailing bytes are left unread
pub fn read_request<R: Read>(reader: R) -> Result<Value> {
    let reader = BufReader::new(reader);
    match serde_json::Deserializer::from_reader(reader)
        .into_iter::<Value>()
        .next()
    {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => Err(InterceptError::Protocol(format!("malformed request: {}", err))),
        None => Err(InterceptError::Protocol("empty request".to_string())),
    }
}
