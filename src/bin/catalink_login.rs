use std::{error::Error, net::Shutdown, path::PathBuf, process::ExitCode, time::Duration};

use catalink::{
    ClientEnv, NegotiationPolicy, Session, TlsSettings, VerifyServer, error::report_failure,
    last_session_signature,
};
use clap::Parser;
use log::{info, warn};

/// Log in to a catalog server and print the session signature.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Catalog server host
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Catalog server port
    #[arg(long, default_value_t = catalink::session::DEFAULT_PORT)]
    port: u16,
    /// User name
    #[arg(long)]
    user: String,
    /// Zone the user belongs to
    #[arg(long, default_value = catalink::session::DEFAULT_ZONE)]
    zone: String,
    /// Authentication scheme override (e.g. native, pam)
    #[arg(long)]
    scheme: Option<String>,
    /// Password; falls back to the cached auth file
    #[arg(long)]
    password: Option<String>,
    /// Cached password file
    #[arg(long)]
    auth_file: Option<PathBuf>,
    /// Transport-security policy: require, dont_care or refuse
    #[arg(long, default_value = "refuse")]
    negotiation: NegotiationPolicy,
    /// Server certificate checks: none, cert or hostname
    #[arg(long, default_value = "hostname")]
    verify_server: VerifyServer,
    /// CA certificate file used to verify the server
    #[arg(long)]
    ca_file: Option<PathBuf>,
    /// Seconds to wait for each server response
    #[arg(long)]
    timeout: Option<u64>,
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let env = ClientEnv {
        user_name: cli.user,
        zone_name: cli.zone,
        host: cli.host,
        port: cli.port,
        password: cli.password,
        auth_file: cli.auth_file,
        negotiation_policy: cli.negotiation,
        response_timeout: cli.timeout.map(Duration::from_secs),
        tls: TlsSettings {
            verify_server: cli.verify_server,
            ca_certificate_file: cli.ca_file,
            ..TlsSettings::default()
        },
        ..ClientEnv::default()
    };

    let mut session = Session::connect(env)?;

    // Closing the socket is the only way to abandon a blocked exchange.
    let handle = session.try_clone_socket()?;
    ctrlc::set_handler(move || {
        warn!("interrupted, closing the connection");
        let _ = handle.shutdown(Shutdown::Both);
    })?;

    let outcome = session
        .negotiate()
        .and_then(|result| {
            info!("transport: {result}");
            session.login(None, cli.scheme.as_deref())
        });

    if let Err(e) = outcome {
        report_failure(std::io::stderr().lock(), session.errors(), e.status(), "login")?;
        return Ok(ExitCode::FAILURE);
    }

    println!("logged in as {}", session.env().qualified_user());
    println!("session signature: {}", last_session_signature());
    session.disconnect()?;
    Ok(ExitCode::SUCCESS)
}
