//! Black-box protocol tests (C12): drive a real listener on an ephemeral
//! port through plain `TcpStream`s, exactly as an external client would.

use kvstored::config::Config;
use rand::Rng;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

fn start_server() -> SocketAddr {
    let config = Config {
        port: 0,
        ..Config::default()
    };
    let (server, addr) = kvstored::bind(config).expect("bind should succeed on an ephemeral port");
    std::thread::spawn(move || {
        let _ = server.run();
    });
    addr
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect should succeed");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

fn encode_command(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read until at least `min_len` bytes are available or the stream times
/// out / closes.
fn read_some(stream: &mut TcpStream, min_len: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() >= min_len {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    buf
}

#[test]
fn ping_set_get_roundtrip() {
    let addr = start_server();
    let mut stream = connect(addr);

    stream.write_all(&encode_command(&["PING"])).unwrap();
    assert_eq!(read_some(&mut stream, 7), b"+PONG\r\n");

    stream
        .write_all(&encode_command(&["SET", "greeting", "hello"]))
        .unwrap();
    assert_eq!(read_some(&mut stream, 5), b"+OK\r\n");

    stream
        .write_all(&encode_command(&["GET", "greeting"]))
        .unwrap();
    assert_eq!(read_some(&mut stream, 5), b"$5\r\nhello\r\n");
}

#[test]
fn unknown_command_gets_error_reply_without_closing() {
    let addr = start_server();
    let mut stream = connect(addr);

    stream.write_all(&encode_command(&["BOGUS"])).unwrap();
    let reply = read_some(&mut stream, 1);
    assert!(reply.starts_with(b"-ERR"));

    // connection should still be usable afterward
    stream.write_all(&encode_command(&["PING"])).unwrap();
    assert_eq!(read_some(&mut stream, 7), b"+PONG\r\n");
}

#[test]
fn byte_by_byte_split_frame_still_completes() {
    let addr = start_server();
    let mut stream = connect(addr);

    let cmd = encode_command(&["SET", "k", "v"]);
    for &b in &cmd {
        stream.write_all(&[b]).unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(read_some(&mut stream, 5), b"+OK\r\n");
}

#[test]
fn quit_closes_the_connection() {
    let addr = start_server();
    let mut stream = connect(addr);

    stream.write_all(&encode_command(&["QUIT"])).unwrap();
    assert_eq!(read_some(&mut stream, 5), b"+OK\r\n");

    // the server should close its end; a further read returns EOF (0 bytes)
    let mut buf = [0u8; 8];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn oversized_single_command_is_rejected() {
    let addr = start_server();
    let mut stream = connect(addr);

    // A single SET value past the 512 KiB single-command cap, well under
    // the 1 MiB connection buffer ceiling -- this must trip the per-command
    // limit specifically, not the buffer-overflow path.
    let oversized_value = "x".repeat(600 * 1024);
    let cmd = encode_command(&["SET", "k", &oversized_value]);
    stream.write_all(&cmd).unwrap();

    let reply = read_some(&mut stream, 1);
    assert!(reply.starts_with(b"-ERR"));
}

#[test]
fn http_health_check_escape_hatch() {
    let addr = start_server();
    let mut stream = connect(addr);

    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let reply = read_some(&mut stream, 12);
    let text = String::from_utf8_lossy(&reply);
    assert!(text.starts_with("HTTP/1.1 200"));
}

#[test]
fn http_health_check_unknown_path_is_404() {
    let addr = start_server();
    let mut stream = connect(addr);

    stream.write_all(b"GET /nope HTTP/1.1\r\n\r\n").unwrap();
    let reply = read_some(&mut stream, 12);
    let text = String::from_utf8_lossy(&reply);
    assert!(text.starts_with("HTTP/1.1 404"));
}

#[test]
fn publish_delivers_to_a_subscribed_connection() {
    let addr = start_server();
    let mut subscriber = connect(addr);
    let mut publisher = connect(addr);

    subscriber
        .write_all(&encode_command(&["SUBSCRIBE", "alerts"]))
        .unwrap();
    let ack = read_some(&mut subscriber, 1);
    assert!(ack.starts_with(b"*3\r\n$9\r\nsubscribe"));

    publisher
        .write_all(&encode_command(&["PUBLISH", "alerts", "fire"]))
        .unwrap();
    assert_eq!(read_some(&mut publisher, 4), b":1\r\n");

    let message = read_some(&mut subscriber, 1);
    assert_eq!(
        message,
        b"*3\r\n$7\r\nmessage\r\n$6\r\nalerts\r\n$4\r\nfire\r\n"
    );
}

#[test]
fn concurrent_incr_is_linearizable() {
    let addr = start_server();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    // A random key name, so re-running this test against a long-lived
    // server wouldn't pick up a stale counter from a previous run.
    let counter_key = format!("counter-{}", rand::thread_rng().gen::<u32>());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter_key = counter_key.clone();
            std::thread::spawn(move || {
                let mut stream = connect(addr);
                for _ in 0..PER_THREAD {
                    stream
                        .write_all(&encode_command(&["INCR", counter_key.as_str()]))
                        .unwrap();
                    let _ = read_some(&mut stream, 1);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut stream = connect(addr);
    stream
        .write_all(&encode_command(&["GET", counter_key.as_str()]))
        .unwrap();
    let reply = read_some(&mut stream, 1);
    let text = String::from_utf8_lossy(&reply);
    assert!(text.contains(&(THREADS * PER_THREAD).to_string()));
}
