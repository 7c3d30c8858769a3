//! Daemon lifecycle: startup, TLS, gRPC server, graceful shutdown

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lockbox_auth::{AuthGate, TokenKeys};
use lockbox_core::config::{DatabaseConfig, LockboxConfig, ServerConfig};
use lockbox_crypto::{EnvelopeCipher, EnvelopeParams};
use lockbox_store::{MemoryStore, SqliteStore, Store};
use secrecy::ExposeSecret;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Identity as TlsIdentity, Server, ServerTlsConfig};
use tracing::{error, info, warn};

use crate::body::BodyWatchLayer;
use crate::grpc::{self, IdentityApi, SecretsApi};
use crate::ingest::IngestLimits;
use crate::service::{IdentityService, SecretService};

/// How long cancelled calls get to reply once the grace period is over.
const FORCE_STOP_WAIT: Duration = Duration::from_secs(2);

/// Shared state behind both services.
#[derive(Clone)]
pub struct Vault {
    pub store: Arc<dyn Store>,
    pub cipher: Arc<EnvelopeCipher>,
    pub keys: Arc<TokenKeys>,
    pub limits: IngestLimits,
}

impl Vault {
    /// Build the cipher, token keys and store from a validated config.
    pub async fn from_config(config: &LockboxConfig) -> Result<Self> {
        let keys = config.keys()?;

        let cipher = EnvelopeCipher::new(
            keys.master_key.expose_secret().as_bytes(),
            EnvelopeParams::default(),
        )
        .context("initialising envelope cipher")?;
        let token_keys = TokenKeys::new(keys.jwt_key.expose_secret().as_bytes())
            .context("initialising token keys")?;
        let store = open_store(&config.database).await?;

        Ok(Self {
            store,
            cipher: Arc::new(cipher),
            keys: Arc::new(token_keys),
            limits: IngestLimits {
                max_upload_bytes: config.server.max_upload_bytes,
            },
        })
    }
}

async fn open_store(database: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    if database.is_memory() {
        warn!("using in-memory store: secrets are lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = SqliteStore::connect(&database.url)
        .await
        .with_context(|| format!("opening database {}", database.url))?;
    info!(url = %database.url, "database: connected");
    Ok(Arc::new(store))
}

async fn load_tls(server: &ServerConfig) -> Result<ServerTlsConfig> {
    let (Some(cert_path), Some(key_path)) = (&server.tls_cert, &server.tls_key) else {
        anyhow::bail!("TLS needs both server.tls_cert and server.tls_key");
    };

    let cert = tokio::fs::read(cert_path)
        .await
        .with_context(|| format!("reading TLS certificate {}", cert_path.display()))?;
    let key = tokio::fs::read(key_path)
        .await
        .with_context(|| format!("reading TLS key {}", key_path.display()))?;

    Ok(ServerTlsConfig::new().identity(TlsIdentity::from_pem(cert, key)))
}

pub async fn run(config: LockboxConfig) -> Result<()> {
    info!("daemon starting");

    config.validate().context("invalid configuration")?;
    let vault = Vault::from_config(&config).await?;
    let tls = if config.tls_enabled() {
        Some(load_tls(&config.server).await?)
    } else {
        None
    };

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;

    info!(
        addr = %config.server.listen,
        tls = tls.is_some(),
        max_upload_bytes = vault.limits.max_upload_bytes,
        "gRPC: listening"
    );

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    serve(listener, vault, tls, grace, shutdown_signal()).await?;

    info!("daemon exiting cleanly");
    Ok(())
}

/// Serve both services on `listener` until `signal` resolves, then drain.
///
/// In-flight calls get `grace` to finish. After that the force-stop token is
/// cancelled, which interrupts every guarded operation.
pub async fn serve<F>(
    listener: TcpListener,
    vault: Vault,
    tls: Option<ServerTlsConfig>,
    grace: Duration,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let stop = CancellationToken::new();
    let draining = CancellationToken::new();

    let gate = AuthGate::new(vault.keys.clone(), stop.clone());
    let routes = grpc::routes(
        IdentityApi::new(IdentityService::new(vault.store.clone(), vault.keys.clone())),
        SecretsApi::new(SecretService::new(
            vault.store.clone(),
            vault.cipher.clone(),
            vault.limits,
        )),
        &gate,
    );

    let mut builder = Server::builder();
    if let Some(tls) = tls {
        builder = builder.tls_config(tls).context("configuring TLS")?;
    }

    let shutdown = {
        let draining = draining.clone();
        async move {
            signal.await;
            draining.cancel();
        }
    };
    let server = builder
        .layer(BodyWatchLayer)
        .add_routes(routes)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown);
    tokio::pin!(server);

    tokio::select! {
        res = &mut server => return res.context("gRPC server error"),
        _ = draining.cancelled() => {}
    }

    info!(grace_secs = grace.as_secs(), "shutdown: draining in-flight calls");
    if let Ok(res) = tokio::time::timeout(grace, &mut server).await {
        return res.context("gRPC server error");
    }

    warn!("shutdown: grace period elapsed, cancelling in-flight calls");
    stop.cancel();
    match tokio::time::timeout(FORCE_STOP_WAIT, &mut server).await {
        Ok(res) => res.context("gRPC server error"),
        Err(_) => {
            error!("shutdown: connections still open, exiting anyway");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("registering signal handlers: {e}");
                std::future::pending::<()>().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("waiting for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        info!("received ctrl-c");
    }
}
