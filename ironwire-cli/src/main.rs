//! Interactive console client.
//!
//! Connects two sessions under one identity: the application session
//! and the certificate-authority session. After the certificate
//! bootstrap, a numbered menu drives the application session: view a
//! remote file, edit-and-upload a local file, or exit.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use ironwire_client::{
    CertificateBootstrap, EventData, Identity, KeyStore, Session, SessionConfig,
};

const VIEW_TIMEOUT: Duration = Duration::from_secs(10);
const PROVISION_KEY_BITS: usize = 2048;

#[derive(Debug, Parser)]
#[command(name = "ironwire", about = "Interactive ironwire client")]
struct Args {
    /// Identity name; keys load from `<keys>/<name>_{public,private}.pem`.
    name: String,

    /// Remote host running the application server and the CA.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Application server port.
    #[arg(long, default_value_t = 5520)]
    port: u16,

    /// Certificate authority port.
    #[arg(long, default_value_t = 5521)]
    ca_port: u16,

    /// Key-pair directory.
    #[arg(long, default_value = "client_keys")]
    keys: PathBuf,

    /// Issued-certificate directory.
    #[arg(long, default_value = "certificates")]
    certs: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "client failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let store = KeyStore::new(&args.keys);

    // First run: provision a key pair for the name.
    if store.load(&args.name).await.is_err() {
        tracing::info!(name = %args.name, "no key pair found, generating");
        let fresh = Identity::generate(&args.name, PROVISION_KEY_BITS)?;
        store.store(&fresh).await?;
    }

    let ca = Session::new(
        SessionConfig::new(format!("{}:{}", args.host, args.ca_port)),
        store.load(&args.name).await?,
    );
    let session = Session::new(
        SessionConfig::new(format!("{}:{}", args.host, args.port)),
        store.load(&args.name).await?,
    );

    let bootstrap = CertificateBootstrap::new(&args.certs);

    // `view` responses flow back to the menu loop.
    let (view_tx, view_rx) = mpsc::channel::<String>(1);
    session.on("view", move |data| {
        let view_tx = view_tx.clone();
        async move {
            if let EventData::Bytes(bytes) = data {
                let text = String::from_utf8_lossy(trim_padding(&bytes)).into_owned();
                let _ = view_tx.send(text).await;
            }
        }
    });

    session.on("file_edit", |data| async move {
        if let EventData::Bytes(bytes) = data {
            let reply = String::from_utf8_lossy(trim_padding(&bytes)).into_owned();
            println!("server: {reply}");
        }
    });

    // The server presents its own certificate; forward it to the CA and
    // drop the session on a rejection.
    {
        let ca = ca.clone();
        let peer = session.clone();
        let bootstrap = bootstrap.clone();
        session.on("recv_server_cs", move |data| {
            let ca = ca.clone();
            let peer = peer.clone();
            let bootstrap = bootstrap.clone();
            async move {
                let EventData::Bytes(bytes) = data else { return };
                match bootstrap.verify_peer_certificate(&ca, &peer, &bytes).await {
                    Ok(true) => tracing::info!("server certificate verified"),
                    Ok(false) => tracing::warn!("server certificate rejected"),
                    Err(e) => tracing::error!(error = %e, "certificate verification failed"),
                }
            }
        });
    }

    ca.connect().await?;
    let certificate = bootstrap.request_certificate(&ca).await?;
    tracing::info!(issuer = %certificate.issuer, "certificate bootstrap complete");

    session.connect().await?;

    // Mutual exchange: present our certificate to the server; its own
    // arrives on `recv_server_cs` and goes to the CA above.
    bootstrap.present_certificate(&session, &certificate).await?;

    menu_loop(&session, view_rx).await?;

    if session.is_connected() {
        session.terminate().await?;
    }
    if ca.is_connected() {
        ca.terminate().await?;
    }
    Ok(())
}

async fn menu_loop(
    session: &Session,
    mut view_rx: mpsc::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        if !session.is_connected() {
            println!("connection lost");
            return Ok(());
        }

        let Some(choice) = prompt("\n1) view remote file  2) edit and upload  0) exit\n> ").await?
        else {
            return Ok(());
        };

        match choice.as_str() {
            "1" => {
                let Some(name) = prompt("remote file name: ").await? else {
                    return Ok(());
                };
                session.send("view", name.as_bytes()).await?;

                match tokio::time::timeout(VIEW_TIMEOUT, view_rx.recv()).await {
                    Ok(Some(content)) => println!("{content}"),
                    Ok(None) => println!("view channel closed"),
                    Err(_) => println!("no response from server"),
                }
            }
            "2" => {
                let Some(path) = prompt("local file path: ").await? else {
                    return Ok(());
                };
                let Some(line) = prompt("line to append: ").await? else {
                    return Ok(());
                };

                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
                drop(file);

                session.send_file("file_edit", path.as_ref()).await?;
                println!("uploaded {path}");
            }
            "0" => return Ok(()),
            other => println!("unknown choice: {other}"),
        }
    }
}

fn trim_padding(payload: &[u8]) -> &[u8] {
    let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &payload[..end]
}

/// Blocking stdin prompt, run on the blocking pool.
async fn prompt(text: &str) -> Result<Option<String>, std::io::Error> {
    let text = text.to_string();
    tokio::task::spawn_blocking(move || {
        use std::io::{BufRead, Write};
        print!("{text}");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    })
    .await?
}
