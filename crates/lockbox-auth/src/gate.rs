//! Auth gate: a tonic interceptor in front of every non-identity service.
//!
//! ```text
//! Unauthenticated ──exempt──────────────────────────▶ handler
//!        │
//!        └─ authorization: bearer <jwt> ─ verify ─┬─▶ Authenticated (AuthenticatedCall in extensions)
//!                                                 └─▶ Rejected (UNAUTHENTICATED, handler never runs)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lockbox_core::UserId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::token::{Claims, TokenKeys};

/// Fully-qualified name of the token-issuing service.
pub const IDENTITY_SERVICE: &str = "lockbox.Identity";

const AUTHORIZATION: &str = "authorization";
const BEARER: &str = "bearer";
const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Why a guarded operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineExceeded,
}

impl From<Interrupted> for Status {
    fn from(i: Interrupted) -> Self {
        match i {
            Interrupted::Cancelled => Status::cancelled("call cancelled"),
            Interrupted::DeadlineExceeded => Status::deadline_exceeded("call deadline exceeded"),
        }
    }
}

/// The caller identity and call lifetime, built once by the gate and handed
/// to exactly one handler.
#[derive(Debug, Clone)]
pub struct AuthenticatedCall {
    claims: Claims,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl AuthenticatedCall {
    pub fn new(claims: Claims, deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self {
            claims,
            deadline,
            cancel,
        }
    }

    /// Remove the call context the gate attached to `request`. A second take
    /// on the same request fails.
    pub fn take<T>(request: &mut Request<T>) -> Result<Self, Status> {
        request
            .extensions_mut()
            .remove::<Self>()
            .ok_or_else(|| Status::unauthenticated("caller identity unavailable"))
    }

    /// The acting owner. Every repository access is scoped by this id.
    pub fn owner(&self) -> UserId {
        self.claims.owner()
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` unless the call is cancelled or its deadline passes first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

/// Verifies bearer tokens on incoming calls.
///
/// `stop` is the server's force-stop token; each call gets a child of it so
/// a forced shutdown interrupts every guarded operation.
#[derive(Debug, Clone)]
pub struct AuthGate {
    keys: Arc<TokenKeys>,
    stop: CancellationToken,
}

impl AuthGate {
    pub fn new(keys: Arc<TokenKeys>, stop: CancellationToken) -> Self {
        Self { keys, stop }
    }

    /// Whether calls to `service` bypass authentication. Only the identity
    /// service, which issues tokens, is exempt.
    pub fn is_exempt(service: &str) -> bool {
        service == IDENTITY_SERVICE
    }

    /// Extract and verify the bearer token from call metadata.
    pub fn authenticate(&self, metadata: &MetadataMap) -> Result<AuthenticatedCall, AuthError> {
        let token = bearer_token(metadata)?;
        let claims = self.keys.verify(token)?;
        let deadline = metadata
            .get(GRPC_TIMEOUT)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(|d| Instant::now() + d);

        Ok(AuthenticatedCall::new(
            claims,
            deadline,
            self.stop.child_token(),
        ))
    }
}

impl Interceptor for AuthGate {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        match self.authenticate(request.metadata()) {
            Ok(call) => {
                debug!(user = %call.owner(), "call authenticated");
                request.extensions_mut().insert(call);
                Ok(request)
            }
            Err(e) => {
                warn!(error = %e, "rejected unauthenticated call");
                Err(Status::unauthenticated(e.to_string()))
            }
        }
    }
}

/// Pull `<token>` out of `authorization: bearer <token>`. The scheme is
/// matched case-insensitively; the token is returned as transmitted.
fn bearer_token(metadata: &MetadataMap) -> Result<&str, AuthError> {
    let value = metadata
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::MalformedCredentials)?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MalformedCredentials)?;
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return Err(AuthError::MalformedCredentials);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedCredentials);
    }
    Ok(token)
}

/// Parse a `grpc-timeout` header value: up to 8 digits and a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;

    Some(match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    })
}
