//! Outbound RESP reply encoders.

/// `+<s>\r\n`
pub fn simple_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 3);
    out.push(b'+');
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// `-<msg>\r\n`
pub fn error(msg: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.len() + 3);
    out.push(b'-');
    out.extend_from_slice(msg.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// `:<n>\r\n`
pub fn integer(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

/// `$<len>\r\n<bytes>\r\n`
pub fn bulk_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 16);
    out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
    out.extend_from_slice(bytes);
    out.extend_from_slice(b"\r\n");
    out
}

/// `$-1\r\n`
pub fn null_bulk() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// `*<N>\r\n` followed by each already-encoded element frame, verbatim.
/// Used when an array holds a mix of element types (e.g. a subscribe ack:
/// bulk string, bulk string, integer).
pub fn array_of_frames(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", frames.len()).into_bytes();
    for frame in frames {
        out.extend_from_slice(frame);
    }
    out
}

/// `*<N>\r\n` where every element is a bulk string.
pub fn bulk_array<I, B>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let frames: Vec<Vec<u8>> = items
        .into_iter()
        .map(|item| bulk_string(item.as_ref()))
        .collect();
    array_of_frames(&frames)
}
