//! Best-effort, non-blocking-in-spirit socket writes for pub/sub fan-out
//! (§5 back-pressure). A publish must never let one stalled subscriber
//! block the publisher or take down the process; on unix we mirror the
//! reference implementation's use of `MSG_NOSIGNAL` so a write to an
//! already-closed peer returns `EPIPE` instead of raising `SIGPIPE`.

use std::net::TcpStream;

/// Write `bytes` to `stream`, treating any error (including a reset or
/// broken pipe) as "delivery failed" rather than propagating it.
pub fn best_effort_send(stream: &TcpStream, bytes: &[u8]) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = stream.as_raw_fd();
        let mut total = 0usize;
        while total < bytes.len() {
            let ret = unsafe {
                libc::send(
                    fd,
                    bytes[total..].as_ptr() as *const libc::c_void,
                    bytes.len() - total,
                    libc::MSG_NOSIGNAL,
                )
            };
            if ret < 0 {
                return false;
            }
            total += ret as usize;
        }
        true
    }
    #[cfg(not(unix))]
    {
        use std::io::Write;
        match stream.try_clone() {
            Ok(mut cloned) => cloned.write_all(bytes).is_ok(),
            Err(_) => false,
        }
    }
}
