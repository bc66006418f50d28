//! Controller side of the command protocol

use crate::command::{Endpoint, Request, Response};
use log::debug;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use syshook_core::Result;

/// Send one request and wait for its response
pub fn send(endpoint: &Endpoint, request: &Request) -> Result<Response> {
    debug!("Sending {} to {}", request.command, endpoint);
    match endpoint {
        Endpoint::Unix(path) => {
            let mut stream = UnixStream::connect(path)?;
            write_request(&mut stream, request)?;
            stream.shutdown(Shutdown::Write)?;
            read_response(stream)
        }
        Endpoint::Tcp(addr) => {
            let mut stream = TcpStream::connect(addr.as_str())?;
            write_request(&mut stream, request)?;
            stream.shutdown(Shutdown::Write)?;
            read_response(stream)
        }
    }
}

fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    serde_json::to_writer(&mut *writer, request)?;
    writer.flush()?;
    Ok(())
}

fn read_response<R: Read>(reader: R) -> Result<Response> {
    Ok(serde_json::from_reader(reader)?)
}
