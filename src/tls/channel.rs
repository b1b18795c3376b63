use std::{
    io::{self, ErrorKind, Read, Write},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, warn};
use rustls::{ClientConfig, ClientConnection};
use rustls_pki_types::ServerName;

use super::{TlsError, config::VerifyServer, verifier::post_connection_check};
use crate::transport::Channel;

/// TLS state layered over a borrowed, already-connected socket.
///
/// While a `SecureChannel` exists the socket must only be used through [`SecureChannel::stream`];
/// plaintext bytes written around it would corrupt the record layer.
#[derive(Debug)]
pub struct SecureChannel {
    conn: ClientConnection,
}

impl SecureChannel {
    /// Runs the client handshake over `socket` and checks the peer against `host`.
    ///
    /// On failure nothing is retained and the socket stays usable for plaintext only if the
    /// peer agrees; the caller decides whether to tear it down.
    pub fn handshake<S: Read + Write>(
        config: Arc<ClientConfig>,
        socket: &mut S,
        host: &str,
        mode: VerifyServer,
    ) -> Result<Self, TlsError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TlsError::Handshake(format!("invalid server name '{host}': {e}")))?;
        let mut conn = ClientConnection::new(config, server_name).map_err(|e| {
            error!("couldn't create TLS connection: {e}");
            TlsError::Context(e.to_string())
        })?;

        while conn.is_handshaking() {
            match conn.complete_io(socket) {
                Ok((0, 0)) => {
                    error!("TLS handshake with {host} failed: connection closed by peer");
                    return Err(TlsError::Handshake("connection closed by peer".into()));
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("TLS handshake with {host} failed: {e}");
                    return Err(TlsError::Handshake(e.to_string()));
                }
            }
        }
        flush_records(&mut conn, socket)
            .map_err(|e| TlsError::Handshake(format!("failed to send final flight: {e}")))?;

        post_connection_check(mode, conn.peer_certificates(), host)?;

        debug!(
            "TLS established with {host}: {:?} {:?}",
            conn.protocol_version(),
            conn.negotiated_cipher_suite().map(|s| s.suite())
        );
        Ok(Self { conn })
    }

    /// Pairs this channel with its socket for encrypted I/O.
    pub fn stream<'a, S: Channel>(&'a mut self, socket: &'a mut S) -> SecureStream<'a, S> {
        SecureStream {
            conn: &mut self.conn,
            socket,
        }
    }

    /// Sends close_notify and waits for the peer's, leaving the socket in plaintext mode.
    ///
    /// Plaintext the peer sent before its close_notify is discarded.
    pub fn shutdown<S: Read + Write>(&mut self, socket: &mut S) -> Result<(), TlsError> {
        self.conn.send_close_notify();
        flush_records(&mut self.conn, socket).map_err(|e| TlsError::Shutdown(e.to_string()))?;

        loop {
            let state = self
                .conn
                .process_new_packets()
                .map_err(|e| TlsError::Shutdown(e.to_string()))?;
            if state.peer_has_closed() {
                return Ok(());
            }
            if state.plaintext_bytes_to_read() > 0 {
                warn!(
                    "discarding {} unread bytes at TLS shutdown",
                    state.plaintext_bytes_to_read()
                );
                let _ = io::copy(&mut self.conn.reader(), &mut io::sink());
            }

            match self.conn.read_tls(socket) {
                Ok(0) => {
                    return Err(TlsError::Shutdown(
                        "peer closed the connection before close_notify".into(),
                    ));
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TlsError::Shutdown(e.to_string())),
            }
        }
    }
}

fn flush_records<S: Write>(conn: &mut ClientConnection, socket: &mut S) -> io::Result<()> {
    while conn.wants_write() {
        match conn.write_tls(socket) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    socket.flush()
}

/// Encrypted view of a socket for the duration of one exchange.
pub struct SecureStream<'a, S> {
    conn: &'a mut ClientConnection,
    socket: &'a mut S,
}

impl<S: Read + Write> SecureStream<'_, S> {
    /// Decrypts whatever records have arrived and reports whether `read` can return at once.
    fn plaintext_ready(&mut self) -> io::Result<bool> {
        let state = self
            .conn
            .process_new_packets()
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        if self.conn.wants_write() {
            flush_records(self.conn, self.socket)?;
        }
        Ok(state.plaintext_bytes_to_read() > 0 || state.peer_has_closed())
    }
}

impl<S: Read + Write> Read for SecureStream<'_, S> {
    /// Returns buffered plaintext, pulling records off the socket only while none is buffered.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while !self.plaintext_ready()? {
            if self.conn.read_tls(&mut *self.socket)? == 0 {
                return Ok(0);
            }
        }
        self.conn.reader().read(buf)
    }
}

impl<S: Read + Write> Write for SecureStream<'_, S> {
    /// Accepts plaintext and pushes the resulting records onto the socket before returning.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        flush_records(self.conn, self.socket)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        flush_records(self.conn, self.socket)
    }
}

impl<S: Channel> Channel for SecureStream<'_, S> {
    /// Waits until a whole record of plaintext is decrypted, not merely until bytes arrive.
    ///
    /// Handshake leftovers such as session tickets are consumed here without ending the wait.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.plaintext_ready()? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.socket.wait_readable(remaining)? {
                return Ok(false);
            }
            if self.conn.read_tls(&mut *self.socket)? == 0 {
                // End of stream; `read` reports it.
                return Ok(true);
            }
        }
    }
}
