//! lockbox: command-line client for lockboxd
//!
//! Commands:
//!   register / login     - obtain a bearer token (printed to stdout)
//!   list                 - list your secrets
//!   read <id>            - print or save a secret
//!   write                - upload text or a file as a new secret
//!   delete <id>          - remove a secret
//!
//! Secret commands need a token from `--token` or LOCKBOX_TOKEN.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_stream::StreamExt;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Request;

use lockbox_core::proto::{
    identity_client::IdentityClient, secrets_client::SecretsClient, DeleteRecordRequest,
    ListRecordsRequest, LoginRequest, ReadRecordRequest, RegisterRequest, WriteRecordRequest,
};
use lockbox_core::types::content_type;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "lockbox",
    version,
    about = "lockbox secrets client",
    long_about = "lockbox: register, log in, and manage envelope-encrypted secrets on a lockboxd server"
)]
struct Cli {
    /// Server URL
    #[arg(long, short = 's', env = "LOCKBOX_SERVER", default_value = "http://127.0.0.1:3200")]
    server: String,

    /// Bearer token from `lockbox login`
    #[arg(long, short = 't', env = "LOCKBOX_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// PEM CA certificate; enables TLS
    #[arg(long, env = "LOCKBOX_CA_CERT")]
    ca_cert: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account and print a bearer token
    Register {
        #[arg(long, short = 'l')]
        login: String,
        /// Password (prompted for if omitted)
        #[arg(long, short = 'p')]
        password: Option<String>,
    },

    /// Log in and print a bearer token
    Login {
        #[arg(long, short = 'l')]
        login: String,
        /// Password (prompted for if omitted)
        #[arg(long, short = 'p')]
        password: Option<String>,
    },

    /// List your secrets
    List,

    /// Print a secret, or save it to a file
    Read {
        id: i64,
        /// Write the payload here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Upload a new secret
    #[command(group(ArgGroup::new("payload").required(true).args(["text", "file"])))]
    Write {
        #[arg(long, short = 'n')]
        name: String,
        /// Type tag stored with the secret (default: "text" for --text, "file" for --file)
        #[arg(long = "type")]
        content_type: Option<String>,
        /// Inline text payload
        #[arg(long)]
        text: Option<String>,
        /// Read the payload from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Upload chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Delete a secret
    Delete { id: i64 },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let channel = connect(&cli.server, cli.ca_cert.as_deref()).await?;

    match cli.command {
        Commands::Register { login, password } => {
            let password = password_or_prompt(password)?;
            cmd_register(channel, login, password).await
        }
        Commands::Login { login, password } => {
            let password = password_or_prompt(password)?;
            cmd_login(channel, login, password).await
        }
        Commands::List => cmd_list(channel, require_token(&cli.token)?).await,
        Commands::Read { id, out } => {
            cmd_read(channel, require_token(&cli.token)?, id, out.as_deref()).await
        }
        Commands::Write {
            name,
            content_type: type_tag,
            text,
            file,
            chunk_size,
        } => {
            let token = require_token(&cli.token)?;
            let (data, default_type) = match (text, file) {
                (Some(text), _) => (text.into_bytes(), content_type::TEXT),
                (None, Some(path)) => (
                    tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?,
                    content_type::FILE,
                ),
                (None, None) => bail!("one of --text or --file is required"),
            };
            let type_tag = type_tag.unwrap_or_else(|| default_type.to_string());
            cmd_write(channel, token, name, type_tag, data, chunk_size).await
        }
        Commands::Delete { id } => cmd_delete(channel, require_token(&cli.token)?, id).await,
    }
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("LOCKBOX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn require_token(token: &Option<String>) -> Result<&str> {
    match token.as_deref() {
        Some(t) if !t.is_empty() => Ok(t),
        _ => bail!("no token: run `lockbox login` and pass --token or set LOCKBOX_TOKEN"),
    }
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => rpassword::prompt_password("password: ").context("reading password"),
    }
}

// ── gRPC connection ───────────────────────────────────────────────────────────

async fn connect(server: &str, ca_cert: Option<&Path>) -> Result<Channel> {
    let mut endpoint = Endpoint::from_shared(server.to_string())
        .with_context(|| format!("invalid server URL: {server}"))?;

    if let Some(path) = ca_cert {
        let pem = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading CA certificate {}", path.display()))?;
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem)))
            .context("configuring TLS")?;
    }

    endpoint
        .connect()
        .await
        .with_context(|| format!("connecting to lockboxd at {server}"))
}

fn authed<T>(token: &str, message: T) -> Result<Request<T>> {
    let value: MetadataValue<Ascii> = format!("bearer {token}")
        .parse()
        .context("token contains characters not allowed in metadata")?;
    let mut request = Request::new(message);
    request.metadata_mut().insert("authorization", value);
    Ok(request)
}

fn check(op: &str, error: &str) -> Result<()> {
    if !error.is_empty() {
        bail!("{op}: {error}");
    }
    Ok(())
}

// ── `lockbox register` / `lockbox login` ──────────────────────────────────────

async fn cmd_register(channel: Channel, login: String, password: String) -> Result<()> {
    let reply = IdentityClient::new(channel)
        .register(RegisterRequest { login, password })
        .await
        .context("register RPC failed")?
        .into_inner();
    check("register", &reply.error)?;

    println!("{}", reply.token);
    Ok(())
}

async fn cmd_login(channel: Channel, login: String, password: String) -> Result<()> {
    let reply = IdentityClient::new(channel)
        .login(LoginRequest { login, password })
        .await
        .context("login RPC failed")?
        .into_inner();
    check("login", &reply.error)?;

    println!("{}", reply.token);
    Ok(())
}

// ── `lockbox list` ────────────────────────────────────────────────────────────

async fn cmd_list(channel: Channel, token: &str) -> Result<()> {
    let reply = SecretsClient::new(channel)
        .list_records(authed(token, ListRecordsRequest {})?)
        .await
        .context("list RPC failed")?
        .into_inner();
    check("list", &reply.error)?;

    if reply.units.is_empty() {
        println!("no secrets");
        return Ok(());
    }

    println!("{:>6}  {:<8}  NAME", "ID", "TYPE");
    for unit in reply.units {
        println!("{:>6}  {:<8}  {}", unit.id, unit.r#type, unit.name);
    }
    Ok(())
}

// ── `lockbox read` ────────────────────────────────────────────────────────────

async fn cmd_read(channel: Channel, token: &str, id: i64, out: Option<&Path>) -> Result<()> {
    let reply = SecretsClient::new(channel)
        .read_record(authed(token, ReadRecordRequest { id })?)
        .await
        .context("read RPC failed")?
        .into_inner();
    check("read", &reply.error)?;

    match out {
        Some(path) => {
            tokio::fs::write(path, &reply.data)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("wrote {} to {}", fmt_bytes(reply.data.len() as u64), path.display());
        }
        None if reply.r#type == content_type::TEXT => {
            println!("{}", String::from_utf8_lossy(&reply.data));
        }
        None => {
            std::io::stdout()
                .write_all(&reply.data)
                .context("writing to stdout")?;
        }
    }
    Ok(())
}

// ── `lockbox write` ───────────────────────────────────────────────────────────

/// Split a payload into upload chunks. Name and type ride on the first chunk
/// only; an empty payload still produces one chunk carrying them.
fn chunk_payload(
    name: &str,
    content_type: &str,
    data: &[u8],
    chunk_size: usize,
) -> Vec<WriteRecordRequest> {
    let chunk_size = chunk_size.max(1);
    let mut chunks: Vec<WriteRecordRequest> = data
        .chunks(chunk_size)
        .map(|piece| WriteRecordRequest {
            name: String::new(),
            r#type: String::new(),
            data: piece.to_vec(),
        })
        .collect();

    if chunks.is_empty() {
        chunks.push(WriteRecordRequest::default());
    }
    chunks[0].name = name.to_string();
    chunks[0].r#type = content_type.to_string();
    chunks
}

async fn cmd_write(
    channel: Channel,
    token: &str,
    name: String,
    content_type: String,
    data: Vec<u8>,
    chunk_size: usize,
) -> Result<()> {
    let total = data.len() as u64;
    let chunks = chunk_payload(&name, &content_type, &data, chunk_size);
    drop(data);

    let pb = make_progress_bar(total, "write");
    let progress = pb.clone();
    let stream = tokio_stream::iter(chunks).map(move |chunk| {
        progress.inc(chunk.data.len() as u64);
        chunk
    });

    let reply = SecretsClient::new(channel)
        .write_record(authed(token, stream)?)
        .await
        .context("write RPC failed");
    pb.finish_and_clear();

    let reply = reply?.into_inner();
    check("write", &reply.error)?;

    println!("{}", reply.id);
    eprintln!("stored {name:?} ({})", fmt_bytes(total));
    Ok(())
}

// ── `lockbox delete` ──────────────────────────────────────────────────────────

async fn cmd_delete(channel: Channel, token: &str, id: i64) -> Result<()> {
    let reply = SecretsClient::new(channel)
        .delete_record(authed(token, DeleteRecordRequest { id })?)
        .await
        .context("delete RPC failed")?
        .into_inner();
    check("delete", &reply.error)?;

    eprintln!("deleted {id}");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
