//! The command dispatcher (C5): resolves a parsed token array to a
//! handler, validates arity before touching any shared state, and
//! synthesizes the RESP reply.

use crate::conn_id::ConnId;
use crate::error::CommandError;
use crate::keyspace::Keyspace;
use crate::persistence;
use crate::pubsub::PubSub;
use crate::resp;
use log::{debug, warn};
use parking_lot::Mutex;
use std::time::Instant;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// State shared across every connection worker.
pub struct Shared {
    pub keyspace: Mutex<Keyspace>,
    pub pubsub: PubSub,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::new()),
            pubsub: PubSub::new(),
        }
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

/// The result of executing one command: zero or more frames to write back
/// (SUBSCRIBE/UNSUBSCRIBE can emit several), and whether the connection
/// should be closed afterward (QUIT/EXIT, or an unrecoverable protocol
/// error upstream of here).
pub struct Reply {
    pub frames: Vec<Vec<u8>>,
    pub close: bool,
}

impl Reply {
    fn one(frame: Vec<u8>) -> Self {
        Reply {
            frames: vec![frame],
            close: false,
        }
    }

    fn one_closing(frame: Vec<u8>) -> Self {
        Reply {
            frames: vec![frame],
            close: true,
        }
    }

    fn many(frames: Vec<Vec<u8>>) -> Self {
        Reply {
            frames,
            close: false,
        }
    }

    fn error(e: CommandError) -> Self {
        Reply::one(resp::error(&e.wire_message()))
    }
}

/// `(min_arity, max_arity)`, both inclusive, counting the command token
/// itself. `None` for max means unbounded.
fn arity_bounds(command: &str) -> Option<(usize, Option<usize>)> {
    Some(match command {
        "PING" => (1, Some(2)),
        "INFO" => (1, Some(1)),
        "COMMAND" => (1, None),
        "QUIT" | "EXIT" => (1, Some(1)),
        "SET" => (3, Some(3)),
        "GET" => (2, Some(2)),
        "DEL" => (2, Some(2)),
        "EXISTS" => (2, Some(2)),
        "INCR" | "DECR" => (2, Some(2)),
        "EXPIRE" => (3, Some(3)),
        "TTL" => (2, Some(2)),
        "PERSIST" => (2, Some(2)),
        "LPUSH" | "RPUSH" => (3, Some(3)),
        "LPOP" | "RPOP" => (2, Some(2)),
        "LLEN" => (2, Some(2)),
        "LRANGE" => (4, Some(4)),
        "HSET" => (4, Some(4)),
        "HGET" => (3, Some(3)),
        "HDEL" => (3, Some(3)),
        "HEXISTS" => (3, Some(3)),
        "HGETALL" => (2, Some(2)),
        "SUBSCRIBE" => (2, None),
        "UNSUBSCRIBE" => (1, None),
        "PUBLISH" => (3, Some(3)),
        "PUBSUB" => (2, None),
        "SAVE" => (2, Some(2)),
        "LOAD" => (2, Some(2)),
        "DBSIZE" => (1, Some(1)),
        "FLUSHALL" => (1, Some(1)),
        _ => return None,
    })
}

const KNOWN_COMMANDS: &[&str] = &[
    "PING", "INFO", "COMMAND", "QUIT", "EXIT", "SET", "GET", "DEL", "EXISTS", "INCR", "DECR",
    "EXPIRE", "TTL", "PERSIST", "LPUSH", "RPUSH", "LPOP", "RPOP", "LLEN", "LRANGE", "HSET",
    "HGET", "HDEL", "HEXISTS", "HGETALL", "SUBSCRIBE", "UNSUBSCRIBE", "PUBLISH", "PUBSUB",
    "SAVE", "LOAD", "DBSIZE", "FLUSHALL",
];

/// Execute one already-framed command and produce its reply.
pub fn dispatch(shared: &Shared, conn: ConnId, tokens: &[Vec<u8>]) -> Reply {
    let Some(first) = tokens.first() else {
        return Reply::error(CommandError::Unknown {
            command: String::new(),
        });
    };
    let upper = String::from_utf8_lossy(first).to_ascii_uppercase();

    let Some((min_arity, max_arity)) = arity_bounds(&upper) else {
        return Reply::error(CommandError::Unknown {
            command: String::from_utf8_lossy(first).into_owned(),
        });
    };
    let n = tokens.len();
    if n < min_arity || max_arity.is_some_and(|max| n > max) {
        return Reply::error(CommandError::Arity { command: upper });
    }

    debug!("dispatch conn={conn:?} cmd={upper}");

    let now = Instant::now();
    match upper.as_str() {
        "PING" => Reply::one(if n == 2 {
            resp::bulk_string(&tokens[1])
        } else {
            resp::simple_string("PONG")
        }),
        "INFO" => Reply::one(resp::bulk_string(
            format!("kvstored_version:{VERSION}\r\n").as_bytes(),
        )),
        "COMMAND" => Reply::one(resp::bulk_array(KNOWN_COMMANDS)),
        "QUIT" | "EXIT" => Reply::one_closing(resp::simple_string("OK")),
        "SET" => {
            shared.keyspace.lock().set(&tokens[1], tokens[2].clone());
            Reply::one(resp::simple_string("OK"))
        }
        "GET" => Reply::one(match shared.keyspace.lock().get(&tokens[1], now) {
            Some(v) => resp::bulk_string(&v),
            None => resp::null_bulk(),
        }),
        "DEL" => Reply::one(resp::integer(
            shared.keyspace.lock().delete(&tokens[1], now) as i64,
        )),
        "EXISTS" => Reply::one(resp::integer(
            shared.keyspace.lock().exists(&tokens[1], now) as i64,
        )),
        "INCR" => match shared.keyspace.lock().incr(&tokens[1], now) {
            Ok(v) => Reply::one(resp::integer(v)),
            Err(e) => Reply::error(e.into()),
        },
        "DECR" => match shared.keyspace.lock().decr(&tokens[1], now) {
            Ok(v) => Reply::one(resp::integer(v)),
            Err(e) => Reply::error(e.into()),
        },
        "EXPIRE" => match parse_i64(&tokens[2]) {
            Ok(seconds) => match shared.keyspace.lock().expire(&tokens[1], seconds, now) {
                Ok(set) => Reply::one(resp::integer(set as i64)),
                Err(e) => Reply::error(e.into()),
            },
            Err(_) => Reply::error(CommandError::InvalidExpire),
        },
        "TTL" => Reply::one(resp::integer(shared.keyspace.lock().ttl(&tokens[1], now))),
        "PERSIST" => Reply::one(resp::integer(
            shared.keyspace.lock().persist(&tokens[1], now) as i64,
        )),
        "LPUSH" => match shared.keyspace.lock().lpush(&tokens[1], tokens[2].clone(), now) {
            Ok(len) => Reply::one(resp::integer(len)),
            Err(e) => Reply::error(e.into()),
        },
        "RPUSH" => match shared.keyspace.lock().rpush(&tokens[1], tokens[2].clone(), now) {
            Ok(len) => Reply::one(resp::integer(len)),
            Err(e) => Reply::error(e.into()),
        },
        "LPOP" => match shared.keyspace.lock().lpop(&tokens[1], now) {
            Ok(Some(v)) => Reply::one(resp::bulk_string(&v)),
            Ok(None) => Reply::one(resp::null_bulk()),
            Err(e) => Reply::error(e.into()),
        },
        "RPOP" => match shared.keyspace.lock().rpop(&tokens[1], now) {
            Ok(Some(v)) => Reply::one(resp::bulk_string(&v)),
            Ok(None) => Reply::one(resp::null_bulk()),
            Err(e) => Reply::error(e.into()),
        },
        "LLEN" => match shared.keyspace.lock().llen(&tokens[1], now) {
            Ok(len) => Reply::one(resp::integer(len)),
            Err(e) => Reply::error(e.into()),
        },
        "LRANGE" => match (parse_i64(&tokens[2]), parse_i64(&tokens[3])) {
            (Ok(start), Ok(stop)) => {
                match shared.keyspace.lock().lrange(&tokens[1], start, stop, now) {
                    Ok(items) => Reply::one(resp::bulk_array(items)),
                    Err(e) => Reply::error(e.into()),
                }
            }
            _ => Reply::error(CommandError::NotAnInteger),
        },
        "HSET" => {
            match shared
                .keyspace
                .lock()
                .hset(&tokens[1], &tokens[2], tokens[3].clone(), now)
            {
                Ok(new) => Reply::one(resp::integer(new as i64)),
                Err(e) => Reply::error(e.into()),
            }
        }
        "HGET" => match shared.keyspace.lock().hget(&tokens[1], &tokens[2], now) {
            Ok(Some(v)) => Reply::one(resp::bulk_string(&v)),
            Ok(None) => Reply::one(resp::null_bulk()),
            Err(e) => Reply::error(e.into()),
        },
        "HDEL" => match shared.keyspace.lock().hdel(&tokens[1], &tokens[2], now) {
            Ok(removed) => Reply::one(resp::integer(removed as i64)),
            Err(e) => Reply::error(e.into()),
        },
        "HEXISTS" => match shared.keyspace.lock().hexists(&tokens[1], &tokens[2], now) {
            Ok(exists) => Reply::one(resp::integer(exists as i64)),
            Err(e) => Reply::error(e.into()),
        },
        "HGETALL" => match shared.keyspace.lock().hgetall(&tokens[1], now) {
            Ok(pairs) => {
                let flat: Vec<Vec<u8>> = pairs
                    .into_iter()
                    .flat_map(|(f, v)| [f, v])
                    .collect();
                Reply::one(resp::bulk_array(flat))
            }
            Err(e) => Reply::error(e.into()),
        },
        "SUBSCRIBE" => {
            let frames = tokens[1..]
                .iter()
                .map(|channel| {
                    let count = shared.pubsub.subscribe(conn, channel);
                    subscribe_ack("subscribe", Some(channel.as_slice()), count)
                })
                .collect();
            Reply::many(frames)
        }
        "UNSUBSCRIBE" => {
            if tokens.len() == 1 {
                let current = shared.pubsub.get_subscribed(conn);
                if current.is_empty() {
                    return Reply::one(subscribe_ack("unsubscribe", None, 0));
                }
                let frames = current
                    .iter()
                    .map(|channel| {
                        let count = shared.pubsub.unsubscribe(conn, channel);
                        subscribe_ack("unsubscribe", Some(channel.as_slice()), count)
                    })
                    .collect();
                Reply::many(frames)
            } else {
                let frames = tokens[1..]
                    .iter()
                    .map(|channel| {
                        let count = shared.pubsub.unsubscribe(conn, channel);
                        subscribe_ack("unsubscribe", Some(channel.as_slice()), count)
                    })
                    .collect();
                Reply::many(frames)
            }
        }
        "PUBLISH" => {
            let delivered = shared.pubsub.publish(&tokens[1], &tokens[2]);
            Reply::one(resp::integer(delivered as i64))
        }
        "PUBSUB" => dispatch_pubsub(shared, tokens),
        "SAVE" => {
            let path_arg = String::from_utf8_lossy(&tokens[1]).into_owned();
            let path = persistence::resolve_snapshot_path(&path_arg);
            let result = {
                let ks = shared.keyspace.lock();
                persistence::save(&ks, &path, now)
            };
            match result {
                Ok(()) => Reply::one(resp::simple_string("OK")),
                Err(e) => {
                    warn!("conn {conn:?}: SAVE to {} failed: {e}", path.display());
                    Reply::error(CommandError::Persistence(e))
                }
            }
        }
        "LOAD" => {
            let path_arg = String::from_utf8_lossy(&tokens[1]).into_owned();
            let path = persistence::resolve_snapshot_path(&path_arg);
            match persistence::load(&path, now) {
                Ok(loaded) => {
                    *shared.keyspace.lock() = loaded;
                    Reply::one(resp::simple_string("OK"))
                }
                Err(e) => {
                    warn!("conn {conn:?}: LOAD from {} failed: {e}", path.display());
                    Reply::error(CommandError::Persistence(e))
                }
            }
        }
        "DBSIZE" => Reply::one(resp::integer(shared.keyspace.lock().dbsize(now) as i64)),
        "FLUSHALL" => {
            shared.keyspace.lock().flushall();
            Reply::one(resp::simple_string("OK"))
        }
        _ => unreachable!("arity_bounds and the match above must stay in sync"),
    }
}

fn dispatch_pubsub(shared: &Shared, tokens: &[Vec<u8>]) -> Reply {
    let sub = String::from_utf8_lossy(&tokens[1]).to_ascii_uppercase();
    match sub.as_str() {
        "CHANNELS" => Reply::one(resp::bulk_array(shared.pubsub.active_channels())),
        "NUMSUB" => {
            let mut frames = Vec::new();
            for channel in &tokens[2..] {
                frames.push(resp::bulk_string(channel));
                frames.push(resp::integer(shared.pubsub.num_subscribers(channel) as i64));
            }
            Reply::one(resp::array_of_frames(&frames))
        }
        _ => Reply::error(CommandError::Unknown {
            command: format!("PUBSUB {sub}"),
        }),
    }
}

fn subscribe_ack(verb: &str, channel: Option<&[u8]>, count: usize) -> Vec<u8> {
    let channel_frame = match channel {
        Some(c) => resp::bulk_string(c),
        None => resp::null_bulk(),
    };
    resp::array_of_frames(&[
        resp::bulk_string(verb.as_bytes()),
        channel_frame,
        resp::integer(count as i64),
    ])
}

fn parse_i64(bytes: &[u8]) -> Result<i64, ()> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(strs: &[&str]) -> Vec<Vec<u8>> {
        strs.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn set_then_get() {
        let shared = Shared::new();
        let conn = ConnId::for_test(1);
        let reply = dispatch(&shared, conn, &tokens(&["SET", "k", "v"]));
        assert_eq!(reply.frames[0], b"+OK\r\n");
        let reply = dispatch(&shared, conn, &tokens(&["GET", "k"]));
        assert_eq!(reply.frames[0], b"$1\r\nv\r\n");
    }

    #[test]
    fn unknown_command() {
        let shared = Shared::new();
        let conn = ConnId::for_test(1);
        let reply = dispatch(&shared, conn, &tokens(&["NOPE"]));
        assert_eq!(reply.frames[0], b"-ERR unknown command 'NOPE'\r\n");
    }

    #[test]
    fn arity_error() {
        let shared = Shared::new();
        let conn = ConnId::for_test(1);
        let reply = dispatch(&shared, conn, &tokens(&["SET", "k"]));
        assert_eq!(
            reply.frames[0],
            b"-ERR wrong number of arguments for 'SET' command\r\n".to_vec()
        );
    }

    #[test]
    fn quit_closes_connection() {
        let shared = Shared::new();
        let conn = ConnId::for_test(1);
        let reply = dispatch(&shared, conn, &tokens(&["QUIT"]));
        assert!(reply.close);
    }

    #[test]
    fn subscribe_then_publish() {
        let shared = Shared::new();
        let a = ConnId::for_test(1);
        let reply = dispatch(&shared, a, &tokens(&["SUBSCRIBE", "news"]));
        assert_eq!(
            reply.frames[0],
            b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n".to_vec()
        );
        // No socket is registered against `a` in this unit test (that only
        // happens in the real connection loop), so delivery count is zero;
        // the actual fan-out mechanics are covered in pubsub.rs.
        let b = ConnId::for_test(2);
        let reply = dispatch(&shared, b, &tokens(&["PUBLISH", "news", "hi"]));
        assert_eq!(reply.frames[0], b":0\r\n".to_vec());
    }

    #[test]
    fn unsubscribe_with_no_channels_and_none_subscribed() {
        let shared = Shared::new();
        let conn = ConnId::for_test(1);
        let reply = dispatch(&shared, conn, &tokens(&["UNSUBSCRIBE"]));
        assert_eq!(
            reply.frames[0],
            b"*3\r\n$11\r\nunsubscribe\r\n$-1\r\n:0\r\n".to_vec()
        );
    }

    #[test]
    fn lrange_last_element_via_dispatch() {
        let shared = Shared::new();
        let conn = ConnId::for_test(1);
        dispatch(&shared, conn, &tokens(&["RPUSH", "q", "a"]));
        let reply = dispatch(&shared, conn, &tokens(&["LRANGE", "q", "-1", "-1"]));
        assert_eq!(reply.frames[0], b"*1\r\n$1\r\na\r\n".to_vec());
    }
}
