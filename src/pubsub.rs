//! The pub/sub fan-out registry (C6).
//!
//! Channel membership and each connection's subscription set are kept in
//! the same `Mutex`-guarded state so the two views can never drift apart
//! (§4.5 invariant). A connection's writable socket handle is registered
//! here too, under its connection id rather than its raw fd, so `publish`
//! can hand off bytes without reaching back into the accept loop or the
//! connection thread (§9 "cyclic state" note).

use crate::conn_id::ConnId;
use crate::sockwrite::best_effort_send;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::TcpStream;

#[derive(Default)]
struct State {
    channels: HashMap<Vec<u8>, HashSet<ConnId>>,
    subscriptions: HashMap<ConnId, HashSet<Vec<u8>>>,
    sockets: HashMap<ConnId, TcpStream>,
}

pub struct PubSub {
    state: Mutex<State>,
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Register the writable half of a connection's socket so `publish`
    /// can reach it later. Called once, at connection accept time.
    pub fn register_socket(&self, conn: ConnId, stream: TcpStream) {
        self.state.lock().sockets.insert(conn, stream);
    }

    /// Drop the socket handle; called on disconnect, after
    /// `unsubscribe_all`.
    pub fn deregister_socket(&self, conn: ConnId) {
        self.state.lock().sockets.remove(&conn);
    }

    /// Idempotent: subscribing twice yields exactly one subscriber record.
    /// Returns the connection's total subscription count after this call.
    pub fn subscribe(&self, conn: ConnId, channel: &[u8]) -> usize {
        let mut state = self.state.lock();
        state
            .channels
            .entry(channel.to_vec())
            .or_default()
            .insert(conn);
        let subs = state.subscriptions.entry(conn).or_default();
        subs.insert(channel.to_vec());
        subs.len()
    }

    /// Returns the connection's total subscription count after this call.
    pub fn unsubscribe(&self, conn: ConnId, channel: &[u8]) -> usize {
        let mut state = self.state.lock();
        if let Some(members) = state.channels.get_mut(channel) {
            members.remove(&conn);
            if members.is_empty() {
                state.channels.remove(channel);
            }
        }
        if let Some(subs) = state.subscriptions.get_mut(&conn) {
            subs.remove(channel);
            let remaining = subs.len();
            if subs.is_empty() {
                state.subscriptions.remove(&conn);
            }
            remaining
        } else {
            0
        }
    }

    /// Snapshot `conn`'s channel set, release the lock, then unsubscribe
    /// each entry -- keeps the lock-hold window short (§4.5). A concurrent
    /// publish may still observe `conn` as subscribed to one of these
    /// channels in between; that's acceptable.
    pub fn unsubscribe_all(&self, conn: ConnId) {
        let channels = self.get_subscribed(conn);
        for channel in channels {
            self.unsubscribe(conn, &channel);
        }
    }

    pub fn get_subscribed(&self, conn: ConnId) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .subscriptions
            .get(&conn)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot subscriber sockets under the lock, then release it before
    /// writing -- a slow subscriber must never stall other commands
    /// (§4.5, §5 back-pressure). Returns the number of successful sends.
    pub fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        let targets: Vec<TcpStream> = {
            let state = self.state.lock();
            match state.channels.get(channel) {
                None => return 0,
                Some(members) => members
                    .iter()
                    .filter_map(|id| state.sockets.get(id))
                    .filter_map(|s| s.try_clone().ok())
                    .collect(),
            }
        };
        let frame = encode_message(channel, message);
        targets
            .iter()
            .filter(|stream| best_effort_send(stream, &frame))
            .count()
    }

    pub fn active_channels(&self) -> Vec<Vec<u8>> {
        self.state.lock().channels.keys().cloned().collect()
    }

    pub fn num_subscribers(&self, channel: &[u8]) -> usize {
        self.state
            .lock()
            .channels
            .get(channel)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_message(channel: &[u8], message: &[u8]) -> Vec<u8> {
    crate::resp::array_of_frames(&[
        crate::resp::bulk_string(b"message"),
        crate::resp::bulk_string(channel),
        crate::resp::bulk_string(message),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let pubsub = PubSub::new();
        let conn = ConnId::for_test(1);
        assert_eq!(pubsub.subscribe(conn, b"news"), 1);
        assert_eq!(pubsub.subscribe(conn, b"news"), 1);
        assert_eq!(pubsub.num_subscribers(b"news"), 1);
    }

    #[test]
    fn unsubscribe_removes_empty_channel() {
        let pubsub = PubSub::new();
        let conn = ConnId::for_test(1);
        pubsub.subscribe(conn, b"news");
        pubsub.unsubscribe(conn, b"news");
        assert!(pubsub.active_channels().is_empty());
    }

    #[test]
    fn unsubscribe_all_clears_every_channel() {
        let pubsub = PubSub::new();
        let conn = ConnId::for_test(1);
        pubsub.subscribe(conn, b"a");
        pubsub.subscribe(conn, b"b");
        pubsub.unsubscribe_all(conn);
        assert!(pubsub.get_subscribed(conn).is_empty());
        assert!(pubsub.active_channels().is_empty());
    }

    #[test]
    fn publish_with_no_subscribers_delivers_zero() {
        let pubsub = PubSub::new();
        assert_eq!(pubsub.publish(b"nobody", b"msg"), 0);
    }
}
