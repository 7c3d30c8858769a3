//! tonic service implementations and route table

use lockbox_auth::{AuthGate, AuthenticatedCall};
use lockbox_core::proto::{
    identity_server::{Identity, IdentityServer},
    secrets_server::{Secrets, SecretsServer},
    *,
};
use lockbox_core::SecretId;
use tonic::server::NamedService;
use tonic::service::interceptor::InterceptedService;
use tonic::service::{Routes, RoutesBuilder};
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

use crate::body::BodyHealth;
use crate::service::{IdentityService, SecretService};

/// Implementation of the Identity gRPC service
pub struct IdentityApi {
    service: IdentityService,
}

impl IdentityApi {
    pub fn new(service: IdentityService) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl Identity for IdentityApi {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let RegisterRequest { login, password } = request.into_inner();

        let reply = match self.service.register(&login, password).await {
            Ok(token) => RegisterResponse {
                token,
                error: String::new(),
            },
            Err(e) => RegisterResponse {
                token: String::new(),
                error: e.into_reply("register")?,
            },
        };
        Ok(Response::new(reply))
    }

    async fn login(&self, request: Request<LoginRequest>) -> Result<Response<LoginResponse>, Status> {
        let LoginRequest { login, password } = request.into_inner();

        let reply = match self.service.login(&login, password).await {
            Ok(token) => LoginResponse {
                token,
                error: String::new(),
            },
            Err(e) => LoginResponse {
                token: String::new(),
                error: e.into_reply("login")?,
            },
        };
        Ok(Response::new(reply))
    }
}

/// Implementation of the Secrets gRPC service. Only reachable through the
/// auth gate, so every request carries an [`AuthenticatedCall`].
pub struct SecretsApi {
    service: SecretService,
}

impl SecretsApi {
    pub fn new(service: SecretService) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl Secrets for SecretsApi {
    async fn list_records(
        &self,
        mut request: Request<ListRecordsRequest>,
    ) -> Result<Response<ListRecordsResponse>, Status> {
        let call = AuthenticatedCall::take(&mut request)?;

        let reply = match self.service.list(&call).await {
            Ok(summaries) => ListRecordsResponse {
                units: summaries
                    .into_iter()
                    .map(|s| SecretUnit {
                        id: s.id.get(),
                        name: s.name,
                        r#type: s.content_type,
                        owner: s.owner.get(),
                    })
                    .collect(),
                error: String::new(),
            },
            Err(e) => ListRecordsResponse {
                units: Vec::new(),
                error: e.into_reply("list_records")?,
            },
        };
        Ok(Response::new(reply))
    }

    async fn read_record(
        &self,
        mut request: Request<ReadRecordRequest>,
    ) -> Result<Response<ReadRecordResponse>, Status> {
        let call = AuthenticatedCall::take(&mut request)?;
        let id = SecretId(request.get_ref().id);

        let reply = match self.service.read(&call, id).await {
            Ok((data, content_type)) => ReadRecordResponse {
                data,
                r#type: content_type,
                error: String::new(),
            },
            Err(e) => ReadRecordResponse {
                data: Vec::new(),
                r#type: String::new(),
                error: e.into_reply("read_record")?,
            },
        };
        Ok(Response::new(reply))
    }

    async fn write_record(
        &self,
        mut request: Request<Streaming<WriteRecordRequest>>,
    ) -> Result<Response<WriteRecordResponse>, Status> {
        let call = AuthenticatedCall::take(&mut request)?;
        let health = request
            .extensions()
            .get::<BodyHealth>()
            .cloned()
            .unwrap_or_default();
        let stream = request.into_inner();

        let reply = match self.service.ingest(&call, stream, &health).await {
            Ok(id) => WriteRecordResponse {
                id: id.get(),
                error: String::new(),
            },
            Err(e) => WriteRecordResponse {
                id: 0,
                error: e.into_reply("write_record")?,
            },
        };
        Ok(Response::new(reply))
    }

    async fn delete_record(
        &self,
        mut request: Request<DeleteRecordRequest>,
    ) -> Result<Response<DeleteRecordResponse>, Status> {
        let call = AuthenticatedCall::take(&mut request)?;
        let id = SecretId(request.get_ref().id);

        let error = match self.service.delete(&call, id).await {
            Ok(()) => String::new(),
            Err(e) => e.into_reply("delete_record")?,
        };
        Ok(Response::new(DeleteRecordResponse { error }))
    }
}

fn service_name<S: NamedService>(_: &S) -> &'static str {
    S::NAME
}

/// Mount a service, putting it behind the gate unless it is exempt.
macro_rules! mount {
    ($routes:expr, $svc:expr, $gate:expr) => {{
        let svc = $svc;
        let name = service_name(&svc);
        if AuthGate::is_exempt(name) {
            debug!(service = name, "mounted without authentication");
            $routes.add_service(svc);
        } else {
            debug!(service = name, "mounted behind auth gate");
            $routes.add_service(InterceptedService::new(svc, $gate.clone()));
        }
    }};
}

/// Route table for both services.
pub fn routes(identity: IdentityApi, secrets: SecretsApi, gate: &AuthGate) -> Routes {
    let mut routes = RoutesBuilder::default();
    mount!(routes, IdentityServer::new(identity), gate);
    mount!(routes, SecretsServer::new(secrets), gate);
    routes.routes()
}
