//! Reliable byte transport.
//!
//! Blocking, interruption-tolerant primitives that move an exact number of bytes across a
//! [`Channel`]. Both the plaintext socket and the secure channel go through the same two loops:
//!
//! - [`write_all`] keeps writing until the whole buffer is accepted, retrying interrupted calls.
//!   Any other failure stops the loop and the partial count is returned; the caller compares
//!   it against the requested length. Writes never time out.
//! - [`read_all`] keeps reading with the same retry policy and optionally waits for readability
//!   against a deadline. A deadline that passes before any byte arrives is reported as
//!   [`TransportError::TimedOut`]; after at least one byte it yields the partial count instead.
//!
//! Neither function logs; callers decide whether a short transfer is worth a warning.
use std::{
    io::{self, ErrorKind, Read, Write},
    net::TcpStream,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::error::status;

/// Smallest wait handed to the OS; zero read timeouts are rejected by the socket API.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out waiting for data from the peer")]
    TimedOut,

    #[error("failed to poll socket for reading: {0}")]
    Poll(#[source] io::Error),

    #[error("short write: {written} of {expected} bytes sent")]
    ShortWrite { written: usize, expected: usize },

    #[error("short read: {read} of {expected} bytes received")]
    ShortRead { read: usize, expected: usize },

    #[error("message length {0} exceeds the frame limit")]
    MessageTooLarge(usize),

    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),

    #[error("failed to decode message: {0}")]
    Deserialize(#[from] bincode::error::DecodeError),
}

impl TransportError {
    pub fn status(&self) -> i32 {
        match self {
            TransportError::TimedOut => status::transport::SYS_SOCK_READ_TIMEDOUT,
            TransportError::Poll(e) => {
                status::transport::SYS_SOCK_READ_ERR - e.raw_os_error().unwrap_or(0)
            }
            TransportError::ShortWrite { .. } => status::transport::SYS_HEADER_WRITE_LEN_ERR,
            TransportError::ShortRead { .. } | TransportError::MessageTooLarge(_) => {
                status::transport::SYS_HEADER_READ_LEN_ERR
            }
            TransportError::Serialize(_) | TransportError::Deserialize(_) => {
                status::transport::SYS_PACK_INSTRUCT_FORMAT_ERR
            }
        }
    }
}

/// A connected, blocking byte stream that can wait for incoming data.
pub trait Channel: Read + Write {
    /// Blocks until data (or end-of-stream) is available, or `timeout` elapses.
    ///
    /// Returns `Ok(false)` when the timeout elapsed with nothing to read.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;
}

impl Channel for TcpStream {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        self.set_read_timeout(Some(timeout.max(MIN_WAIT)))?;
        let mut probe = [0u8; 1];
        let ready = match self.peek(&mut probe) {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) => Err(e),
        };
        self.set_read_timeout(None)?;
        ready
    }
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        (**self).wait_readable(timeout)
    }
}

/// Writes `buf` to `writer`, returning how many bytes were accepted.
///
/// A return value smaller than `buf.len()` means the peer or the socket failed part-way.
pub fn write_all<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> usize {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    written
}

/// Fills `buf` from `channel`, returning how many bytes were read.
///
/// With a `timeout`, every read first waits for readability until the deadline.
pub fn read_all<C: Channel + ?Sized>(
    channel: &mut C,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize, TransportError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut read = 0;

    while read < buf.len() {
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match channel.wait_readable(remaining) {
                Ok(true) => {}
                Ok(false) if read > 0 => return Ok(read),
                Ok(false) => return Err(TransportError::TimedOut),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Poll(e)),
            }
        }

        match channel.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    Ok(read)
}


#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use super::testing::{ScriptedSocket, Step};
    use super::*;

    #[test]
    fn write_all_survives_fragmentation_and_interrupts() {
        let mut socket = ScriptedSocket::new(vec![])
            .write_chunk(7)
            .interrupted_writes(3);
        let payload: Vec<u8> = (0..=255).collect();

        let written = write_all(&mut socket, &payload);

        assert_eq!(written, payload.len());
        assert_eq!(socket.written, payload);
    }

    #[test]
    fn write_all_reports_partial_count_when_peer_goes_away() {
        let mut socket = ScriptedSocket::new(vec![]).write_chunk(100).write_limit(400);
        let payload = vec![0xAB; 1000];

        let written = write_all(&mut socket, &payload);

        assert_eq!(written, 400);
        assert_eq!(socket.written.len(), 400);
    }

    #[test]
    fn read_all_reassembles_fragments() {
        let mut socket = ScriptedSocket::new(vec![
            Step::Data(b"hello ".to_vec()),
            Step::Interrupted,
            Step::Data(b"catalog".to_vec()),
        ])
        .read_chunk(3);
        let mut buf = [0u8; 13];

        let read = read_all(&mut socket, &mut buf, None).unwrap();

        assert_eq!(read, 13);
        assert_eq!(&buf, b"hello catalog");
    }

    #[test]
    fn read_all_stops_on_hard_error() {
        let mut socket = ScriptedSocket::new(vec![
            Step::Data(vec![1, 2, 3]),
            Step::Fail(ErrorKind::ConnectionReset),
        ]);
        let mut buf = [0u8; 8];

        let read = read_all(&mut socket, &mut buf, None).unwrap();
        assert_eq!(read, 3);
    }

    #[test]
    fn read_all_stops_on_end_of_stream() {
        let mut socket = ScriptedSocket::new(vec![Step::Data(vec![9; 5])]);
        let mut buf = [0u8; 10];

        let read = read_all(&mut socket, &mut buf, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(read, 5);
    }

    #[test]
    fn read_all_times_out_before_any_data() {
        let mut socket = ScriptedSocket::new(vec![Step::Idle]);
        let mut buf = [0u8; 4];

        let err = read_all(&mut socket, &mut buf, Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, TransportError::TimedOut));
        assert_eq!(err.status(), status::transport::SYS_SOCK_READ_TIMEDOUT);
    }

    #[test]
    fn read_all_returns_partial_count_on_late_timeout() {
        let mut socket = ScriptedSocket::new(vec![Step::Data(vec![1, 2]), Step::Idle]);
        let mut buf = [0u8; 4];

        let read = read_all(&mut socket, &mut buf, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(read, 2);
    }

    #[test]
    fn read_all_retries_interrupted_wait() {
        let mut socket =
            ScriptedSocket::new(vec![Step::WaitInterrupted, Step::Data(vec![4, 5, 6])]);
        let mut buf = [0u8; 3];

        let read = read_all(&mut socket, &mut buf, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(read, 3);
        assert_eq!(buf, [4, 5, 6]);
    }

    #[test]
    fn read_all_reports_failed_wait_with_errno() {
        const EBADF: i32 = 9;
        let mut socket = ScriptedSocket::new(vec![Step::WaitFail(EBADF), Step::Data(vec![1])]);
        let mut buf = [0u8; 1];

        let err = read_all(&mut socket, &mut buf, Some(Duration::from_millis(10))).unwrap_err();

        assert!(matches!(err, TransportError::Poll(_)));
        assert_eq!(err.status(), status::transport::SYS_SOCK_READ_ERR - EBADF);
        assert_eq!(err.status(), -116000 - EBADF);
    }

    #[test]
    fn tcp_round_trip_and_timeouts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
            assert_eq!(write_all(&mut stream, &payload), payload.len());

            // One byte, then silence until the client gives up.
            let mut ack = [0u8; 1];
            read_all(&mut stream, &mut ack, None).unwrap();
            write_all(&mut stream, &[42]);
            read_all(&mut stream, &mut ack, None).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let mut buf = vec![0u8; 50_000];
        let read = read_all(&mut client, &mut buf, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(read, buf.len());
        assert!(buf.iter().enumerate().all(|(i, b)| *b == (i % 251) as u8));

        let mut nothing = [0u8; 4];
        write_all(&mut client, &[1]);
        let partial = read_all(&mut client, &mut nothing, Some(Duration::from_millis(200))).unwrap();
        assert_eq!(partial, 1);
        assert_eq!(nothing[0], 42);

        let err = read_all(&mut client, &mut nothing, Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, TransportError::TimedOut));

        write_all(&mut client, &[2]);
        peer.join().unwrap();
    }
}
