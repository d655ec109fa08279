//! Inbound frame detection and parsing.

use crate::error::ProtocolError;

/// A header line (the decimal count before `\r\n`) is rejected once its
/// digit count passes this length -- guards against a client trying to
/// walk us into an absurdly large allocation one digit at a time.
const MAX_HEADER_DIGITS: usize = 15;

/// One fully parsed inbound command.
pub struct Frame {
    /// The command tokens, already split out of the wire bytes -- bulk
    /// strings for the array form, whitespace-split tokens for the inline
    /// form.
    pub tokens: Vec<Vec<u8>>,
    /// How many bytes of the connection buffer this frame consumed.
    pub consumed: usize,
}

/// Find the next `\r\n`, if any, starting at `from`.
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| p + from)
}

/// Parse one `<decimal>\r\n` header starting at `start`. Returns
/// `(value, offset just past the CRLF)`, or `None` if more bytes are
/// needed.
fn parse_decimal_line(buf: &[u8], start: usize) -> Result<Option<(i64, usize)>, ProtocolError> {
    let Some(pos) = find_crlf(buf, start) else {
        return Ok(None);
    };
    let line = &buf[start..pos];
    if line.is_empty() || line.len() > MAX_HEADER_DIGITS {
        return Err(ProtocolError::Malformed);
    }
    let s = std::str::from_utf8(line).map_err(|_| ProtocolError::Malformed)?;
    let value = s.parse::<i64>().map_err(|_| ProtocolError::Malformed)?;
    Ok(Some((value, pos + 2)))
}

fn parse_inline(buf: &[u8]) -> Result<Option<Frame>, ProtocolError> {
    let Some(pos) = find_crlf(buf, 0) else {
        return Ok(None);
    };
    let line = &buf[..pos];
    let tokens = line
        .split(|b: &u8| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_vec())
        .collect();
    Ok(Some(Frame {
        tokens,
        consumed: pos + 2,
    }))
}

fn parse_array(buf: &[u8]) -> Result<Option<Frame>, ProtocolError> {
    let Some((count, mut cursor)) = parse_decimal_line(buf, 1)? else {
        return Ok(None);
    };
    if count < 0 {
        return Err(ProtocolError::Malformed);
    }
    let count = count as usize;
    let mut tokens = Vec::with_capacity(count);
    for _ in 0..count {
        if cursor >= buf.len() {
            return Ok(None);
        }
        if buf[cursor] != b'$' {
            return Err(ProtocolError::Malformed);
        }
        let Some((len, data_start)) = parse_decimal_line(buf, cursor + 1)? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(ProtocolError::Malformed);
        }
        let len = len as usize;
        let data_end = data_start + len;
        if data_end + 2 > buf.len() {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(ProtocolError::Malformed);
        }
        tokens.push(buf[data_start..data_end].to_vec());
        cursor = data_end + 2;
    }
    Ok(Some(Frame {
        tokens,
        consumed: cursor,
    }))
}

/// Detect and parse the next complete frame in `buf`, if any.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some(frame))` when a
/// full command was parsed, and `Err` when the bytes present so far are
/// already structurally invalid.
pub fn parse_frame(buf: &[u8]) -> Result<Option<Frame>, ProtocolError> {
    match buf.first() {
        None => Ok(None),
        Some(b'*') => parse_array(buf),
        // These sigils are reply-only; seeing one as the first byte of an
        // inbound command is always malformed, never a valid inline command.
        Some(b'$') | Some(b'+') | Some(b'-') | Some(b':') => Err(ProtocolError::Malformed),
        Some(_) => parse_inline(buf),
    }
}
