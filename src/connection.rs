//! Per-connection glue (C8): reads bytes off one socket, frames them,
//! dispatches each command, and writes the reply back -- one OS thread per
//! connection, no shared per-connection state beyond what's registered in
//! `PubSub`.
//!
//! A bare escape hatch answers plain HTTP GETs on the same port so a load
//! balancer's health check doesn't need its own listener: any request whose
//! first bytes are `GET ` gets a trivial `200`/`404` and the connection is
//! closed, without attempting RESP framing.

use crate::buffer::{ConnBuffer, MAX_COMMAND_SIZE};
use crate::conn_id::ConnId;
use crate::dispatch::{self, Shared};
use crate::error::ProtocolError;
use crate::resp;
use log::{debug, warn};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

const READ_CHUNK: usize = 16 * 1024;

pub fn handle(shared: Arc<Shared>, conn: ConnId, mut stream: TcpStream) {
    let registered = match stream.try_clone() {
        Ok(clone) => {
            shared.pubsub.register_socket(conn, clone);
            true
        }
        Err(e) => {
            warn!("conn {conn:?}: failed to clone socket for pub/sub registration: {e}");
            false
        }
    };

    let result = serve(&shared, conn, &mut stream);
    if let Err(e) = result {
        debug!("conn {conn:?}: closed: {e}");
    }

    if registered {
        shared.pubsub.unsubscribe_all(conn);
        shared.pubsub.deregister_socket(conn);
    }
}

fn serve(shared: &Shared, conn: ConnId, stream: &mut TcpStream) -> std::io::Result<()> {
    let mut buffer = ConnBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut checked_for_http = false;

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(()); // peer closed
        }
        if buffer.append(&chunk[..n]).is_err() {
            write_all_best_effort(
                stream,
                &resp::error(ProtocolError::CommandTooLarge.wire_message()),
            );
            return Ok(());
        }

        if !checked_for_http {
            checked_for_http = true;
            if buffer.as_slice().starts_with(b"GET ") {
                return serve_http_health_check(stream, &mut buffer);
            }
        }

        loop {
            match resp::parse_frame(buffer.as_slice()) {
                Ok(None) => break,
                Ok(Some(frame)) => {
                    if frame.consumed > MAX_COMMAND_SIZE {
                        write_all_best_effort(
                            stream,
                            &resp::error(ProtocolError::CommandTooLarge.wire_message()),
                        );
                        return Ok(());
                    }
                    let consumed = frame.consumed;
                    let should_close = if frame.tokens.is_empty() {
                        false
                    } else {
                        let reply = dispatch::dispatch(shared, conn, &frame.tokens);
                        for out in &reply.frames {
                            stream.write_all(out)?;
                        }
                        reply.close
                    };
                    buffer.consume(consumed);
                    if should_close {
                        return Ok(());
                    }
                }
                Err(e) => {
                    write_all_best_effort(stream, &resp::error(e.wire_message()));
                    return Ok(());
                }
            }
        }
    }
}

fn serve_http_health_check(stream: &mut TcpStream, buffer: &mut ConnBuffer) -> std::io::Result<()> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(pos) = find_subslice(buffer.as_slice(), b"\r\n") {
            let line = &buffer.as_slice()[..pos];
            let path = line
                .split(|b| *b == b' ')
                .nth(1)
                .unwrap_or(b"")
                .to_vec();
            let ok = path.as_slice() == b"/" || path.as_slice() == b"/health";
            let body = if ok { "OK" } else { "not found" };
            let status = if ok { "200 OK" } else { "404 Not Found" };
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            write_all_best_effort(stream, response.as_bytes());
            return Ok(());
        }
        if buffer.len() > MAX_COMMAND_SIZE {
            return Ok(()); // give up on an absurdly long request line
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        if buffer.append(&chunk[..n]).is_err() {
            return Ok(());
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn write_all_best_effort(stream: &mut TcpStream, bytes: &[u8]) {
    let _ = stream.write_all(bytes);
}
