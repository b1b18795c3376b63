#![allow(dead_code)]

use std::{
    error::Error,
    fs,
    io::{self, Read, Write},
    net::{TcpListener, TcpStream},
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use catalink::{
    ClientEnv, TlsSettings, VerifyServer,
    auth::{challenge_response, password_proof},
    error::status,
    protocol::{Request, Response, read_message, write_message},
    transport::Channel,
};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::{ServerConfig, ServerConnection};
use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tempdir::TempDir;

type ServeResult<T> = Result<T, Box<dyn Error>>;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "rods";
pub const EXTERNAL_PASSWORD: &str = "ldap-secret";
pub const GENERATED_PASSWORD: &str = "generated-by-server";

/// Certificate authority that issues server certificates for one test.
pub struct TestCa {
    cert: Certificate,
    key: KeyPair,
    pub dir: TempDir,
    pub ca_file: PathBuf,
}

impl TestCa {
    pub fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, "catalink test CA");
        let cert = params.self_signed(&key).unwrap();

        let dir = TempDir::new("catalink-ca").unwrap();
        let ca_file = dir.path().join("ca.pem");
        fs::write(&ca_file, cert.pem()).unwrap();

        Self {
            cert,
            key,
            dir,
            ca_file,
        }
    }

    /// Server config presenting a leaf with the given DNS SANs and optional common name.
    pub fn server_config(&self, sans: &[&str], common_name: Option<&str>) -> Arc<ServerConfig> {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.distinguished_name = DistinguishedName::new();
        if let Some(cn) = common_name {
            params.distinguished_name.push(DnType::CommonName, cn);
        }
        let leaf = params.signed_by(&key, &self.cert, &self.key).unwrap();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![leaf.der().clone()], key_der)
            .unwrap();
        Arc::new(config)
    }

    /// Client environment trusting this CA.
    pub fn client_env(&self, verify_server: VerifyServer) -> ClientEnv {
        ClientEnv {
            tls: TlsSettings {
                ca_certificate_file: Some(self.ca_file.clone()),
                verify_server,
                ..TlsSettings::default()
            },
            ..client_env()
        }
    }
}

pub fn client_env() -> ClientEnv {
    ClientEnv {
        user_name: USER.to_string(),
        password: Some(PASSWORD.to_string()),
        host: "localhost".to_string(),
        response_timeout: Some(Duration::from_secs(10)),
        ..ClientEnv::default()
    }
}

/// How the loopback server behaves.
pub struct ServerScript {
    pub policy: &'static str,
    pub challenge: Vec<u8>,
    pub tls: Option<Arc<ServerConfig>>,
    /// Stay silent this long after a requested TLS start, then hang up.
    pub silent_after_tls_start: Option<Duration>,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            policy: "CS_NEG_REFUSE",
            challenge: (0..64u8).map(|b| b.wrapping_mul(7)).collect(),
            tls: None,
            silent_after_tls_start: None,
        }
    }
}

/// A request as the server received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub request: Request,
    pub over_tls: bool,
}

/// Single-connection catalog server on a loopback port.
pub struct TestServer {
    pub port: u16,
    handle: JoinHandle<Vec<Seen>>,
}

impl TestServer {
    pub fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            if let Err(e) = serve(socket, &script, &mut seen) {
                log::debug!("test server stopped: {e}");
            }
            seen
        });
        Self { port, handle }
    }

    /// Waits for the client to go away and returns what the server saw.
    pub fn finish(self) -> Vec<Seen> {
        self.handle.join().unwrap()
    }
}

/// Server-side channel that never waits.
struct Blocking<T>(T);

impl<T: Read> Read for Blocking<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<T: Write> Write for Blocking<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<T: Read + Write> Channel for Blocking<T> {
    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }
}

fn receive(socket: &mut TcpStream, tls: &mut Option<ServerConnection>) -> ServeResult<Request> {
    let request = match tls {
        Some(conn) => read_message(&mut Blocking(rustls::Stream::new(conn, socket)), None)?,
        None => read_message(&mut Blocking(socket), None)?,
    };
    Ok(request)
}

fn reply(
    socket: &mut TcpStream,
    tls: &mut Option<ServerConnection>,
    response: &Response,
) -> ServeResult<()> {
    match tls {
        Some(conn) => write_message(&mut Blocking(rustls::Stream::new(conn, socket)), response)?,
        None => write_message(&mut Blocking(socket), response)?,
    }
    Ok(())
}

fn accept(socket: &mut TcpStream, script: &ServerScript) -> ServeResult<ServerConnection> {
    let config = script.tls.clone().ok_or("server has no TLS identity")?;
    let mut conn = ServerConnection::new(config)?;
    while conn.is_handshaking() {
        conn.complete_io(socket)?;
    }
    Ok(conn)
}

/// Reads exactly one TLS record so plaintext that follows stays on the socket.
fn read_record(socket: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut record = vec![0u8; 5];
    socket.read_exact(&mut record)?;
    let len = u16::from_be_bytes([record[3], record[4]]) as usize;
    record.resize(5 + len, 0);
    socket.read_exact(&mut record[5..])?;
    Ok(record)
}

fn close(conn: &mut ServerConnection, socket: &mut TcpStream) -> ServeResult<()> {
    while !conn.process_new_packets()?.peer_has_closed() {
        let record = read_record(socket)?;
        conn.read_tls(&mut record.as_slice())?;
    }
    conn.send_close_notify();
    while conn.wants_write() {
        conn.write_tls(socket)?;
    }
    Ok(())
}

fn serve(mut socket: TcpStream, script: &ServerScript, seen: &mut Vec<Seen>) -> ServeResult<()> {
    let mut tls: Option<ServerConnection> = None;

    loop {
        let request = receive(&mut socket, &mut tls)?;
        seen.push(Seen {
            request: request.clone(),
            over_tls: tls.is_some(),
        });

        let response = match request {
            Request::Negotiate { .. } => {
                let policy = script.policy.to_string();
                reply(&mut socket, &mut tls, &Response::Negotiation { policy })?;

                let result = receive(&mut socket, &mut tls)?;
                seen.push(Seen {
                    request: result.clone(),
                    over_tls: tls.is_some(),
                });
                if let Request::NegotiationResult { result } = result {
                    if result == "CS_NEG_USE_SSL" {
                        tls = Some(accept(&mut socket, script)?);
                    }
                }
                continue;
            }
            Request::SslStart { .. } => {
                if script.tls.is_none() {
                    Response::Err {
                        code: status::tls::SSL_INIT_ERROR,
                        description: "TLS not configured".to_string(),
                    }
                } else {
                    reply(&mut socket, &mut tls, &Response::Ok)?;
                    tls = Some(accept(&mut socket, script)?);
                    if let Some(pause) = script.silent_after_tls_start {
                        thread::sleep(pause);
                        return Ok(());
                    }
                    continue;
                }
            }
            Request::SslEnd => {
                reply(&mut socket, &mut tls, &Response::Ok)?;
                if let Some(mut conn) = tls.take() {
                    close(&mut conn, &mut socket)?;
                }
                continue;
            }
            Request::AuthRequest => Response::AuthChallenge {
                challenge: script.challenge.clone(),
            },
            Request::AuthResponse { username, response } => {
                let native = challenge_response(&script.challenge, PASSWORD)?;
                let valid_user = username == format!("{USER}#tempZone");
                if valid_user && (response == native || response == password_proof(GENERATED_PASSWORD)) {
                    Response::Ok
                } else {
                    Response::Err {
                        code: status::auth::CAT_INVALID_AUTHENTICATION,
                        description: "invalid credentials".to_string(),
                    }
                }
            }
            Request::PamAuthRequest { password, .. } => {
                if tls.is_some() && password == EXTERNAL_PASSWORD {
                    Response::PamPassword {
                        password: GENERATED_PASSWORD.to_string(),
                    }
                } else {
                    Response::Err {
                        code: status::auth::CAT_INVALID_AUTHENTICATION,
                        description: "PAM authentication failed".to_string(),
                    }
                }
            }
            Request::NegotiationResult { .. } => Response::Err {
                code: status::tls::CLIENT_NEGOTIATION_ERROR,
                description: "negotiation result without negotiation".to_string(),
            },
            Request::Disconnect => return Ok(()),
        };
        reply(&mut socket, &mut tls, &response)?;
    }
}
