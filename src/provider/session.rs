//! Provider lifecycle enforcement.
//!
//! [`ProviderSession`] wraps any [`Provider`] with the configure/stop state
//! machine and tracks open ephemeral resources so that late renewals and
//! unclosed leases are reported as caller errors.

use super::*;
use crate::addrs::ProviderAddr;
use crate::error::EngineError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default time allowed for a provider to stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle state of a provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet configured. Only schema retrieval, validation and state
    /// upgrades are allowed.
    Unconfigured,
    /// Configured and usable.
    Ready,
    /// Stopped. Terminal.
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Ready => write!(f, "ready"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
struct Lease {
    renew_at: Option<DateTime<Utc>>,
}

type LeaseKey = (String, Vec<u8>);

/// A [`Provider`] guarded by the session state machine.
pub struct ProviderSession {
    inner: Arc<dyn Provider>,
    state: Mutex<SessionState>,
    leases: Mutex<HashMap<LeaseKey, Lease>>,
    stop_timeout: Duration,
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

fn misuse(summary: &str, detail: String) -> Diagnostic {
    Diagnostic::error(summary).with_detail(EngineError::SessionState(detail).to_string())
}

impl ProviderSession {
    /// Start an unconfigured session over `inner`.
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self {
            inner,
            state: Mutex::new(SessionState::Unconfigured),
            leases: Mutex::new(HashMap::new()),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Set how long `stop_provider` waits for the provider.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The current state.
    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Number of ephemeral resources opened and not yet closed.
    pub async fn open_leases(&self) -> usize {
        self.leases.lock().await.len()
    }

    async fn require_ready(&self, operation: &str) -> Result<(), Diagnostic> {
        match *self.state.lock().await {
            SessionState::Ready => Ok(()),
            SessionState::Unconfigured => Err(misuse(
                "Provider not configured",
                format!("{} was called before the provider was configured.", operation),
            )),
            SessionState::Stopped => Err(stopped(operation)),
        }
    }

    async fn require_running(&self, operation: &str) -> Result<(), Diagnostic> {
        match *self.state.lock().await {
            SessionState::Stopped => Err(stopped(operation)),
            _ => Ok(()),
        }
    }
}

fn stopped(operation: &str) -> Diagnostic {
    misuse(
        "Provider stopped",
        format!("{} was called after the provider was stopped.", operation),
    )
}

macro_rules! guard {
    ($self:ident . $check:ident($op:literal), $resp:expr) => {
        if let Err(diag) = $self.$check($op).await {
            let mut resp = $resp;
            resp.diagnostics.push(diag);
            return resp;
        }
    };
    (@diags $self:ident . $check:ident($op:literal)) => {
        if let Err(diag) = $self.$check($op).await {
            return diag.into();
        }
    };
}

#[async_trait::async_trait]
impl Provider for ProviderSession {
    async fn get_provider_schema(&self) -> GetProviderSchemaResponse {
        guard!(self.require_running("GetProviderSchema"), GetProviderSchemaResponse::default());
        self.inner.get_provider_schema().await
    }

    async fn validate_provider_config(&self, request: ValidateProviderConfigRequest) -> Diagnostics {
        guard!(@diags self.require_running("ValidateProviderConfig"));
        self.inner.validate_provider_config(request).await
    }

    async fn validate_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        guard!(@diags self.require_running("ValidateResourceConfig"));
        self.inner.validate_resource_config(request).await
    }

    async fn validate_data_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        guard!(@diags self.require_running("ValidateDataResourceConfig"));
        self.inner.validate_data_resource_config(request).await
    }

    async fn validate_list_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        guard!(@diags self.require_running("ValidateListResourceConfig"));
        self.inner.validate_list_resource_config(request).await
    }

    async fn upgrade_resource_state(
        &self,
        request: UpgradeResourceStateRequest,
    ) -> UpgradeResourceStateResponse {
        guard!(self.require_running("UpgradeResourceState"), UpgradeResourceStateResponse::default());
        self.inner.upgrade_resource_state(request).await
    }

    async fn upgrade_resource_identity(
        &self,
        request: UpgradeResourceIdentityRequest,
    ) -> UpgradeResourceIdentityResponse {
        guard!(self.require_running("UpgradeResourceIdentity"), UpgradeResourceIdentityResponse::default());
        self.inner.upgrade_resource_identity(request).await
    }

    async fn configure_provider(&self, request: ConfigureProviderRequest) -> Diagnostics {
        // Held across the call so concurrent configures serialize.
        let mut state = self.state.lock().await;
        match *state {
            SessionState::Ready => {
                return misuse(
                    "Provider already configured",
                    "ConfigureProvider may only be called once per session.".to_string(),
                )
                .into()
            },
            SessionState::Stopped => return stopped("ConfigureProvider").into(),
            SessionState::Unconfigured => {},
        }
        let diags = self.inner.configure_provider(request).await;
        if !diags.has_errors() {
            *state = SessionState::Ready;
            debug!("provider session ready");
        }
        diags
    }

    async fn read_resource(&self, request: ReadResourceRequest) -> ReadResourceResponse {
        guard!(self.require_ready("ReadResource"), ReadResourceResponse::default());
        self.inner.read_resource(request).await
    }

    async fn plan_resource_change(&self, request: PlanResourceChangeRequest) -> PlanResourceChangeResponse {
        guard!(self.require_ready("PlanResourceChange"), PlanResourceChangeResponse::default());
        self.inner.plan_resource_change(request).await
    }

    async fn apply_resource_change(
        &self,
        request: ApplyResourceChangeRequest,
    ) -> ApplyResourceChangeResponse {
        guard!(self.require_ready("ApplyResourceChange"), ApplyResourceChangeResponse::default());
        self.inner.apply_resource_change(request).await
    }

    async fn import_resource_state(
        &self,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse {
        guard!(self.require_ready("ImportResourceState"), ImportResourceStateResponse::default());
        self.inner.import_resource_state(request).await
    }

    async fn move_resource_state(&self, request: MoveResourceStateRequest) -> MoveResourceStateResponse {
        guard!(self.require_ready("MoveResourceState"), MoveResourceStateResponse::default());
        self.inner.move_resource_state(request).await
    }

    async fn read_data_source(&self, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        guard!(self.require_ready("ReadDataSource"), ReadDataSourceResponse::default());
        self.inner.read_data_source(request).await
    }

    async fn open_ephemeral_resource(
        &self,
        request: OpenEphemeralResourceRequest,
    ) -> OpenEphemeralResourceResponse {
        guard!(self.require_ready("OpenEphemeralResource"), OpenEphemeralResourceResponse::default());
        let type_name = request.type_name.clone();
        let resp = self.inner.open_ephemeral_resource(request).await;
        if !resp.diagnostics.has_errors() && resp.deferred.is_none() {
            self.leases.lock().await.insert(
                (type_name, resp.private.clone()),
                Lease {
                    renew_at: resp.renew_at,
                },
            );
        }
        resp
    }

    async fn renew_ephemeral_resource(
        &self,
        request: RenewEphemeralResourceRequest,
    ) -> RenewEphemeralResourceResponse {
        guard!(self.require_ready("RenewEphemeralResource"), RenewEphemeralResourceResponse::default());
        let key = (request.type_name.clone(), request.private.clone());
        let mut resp = RenewEphemeralResourceResponse::default();
        {
            let mut leases = self.leases.lock().await;
            let Some(lease) = leases.get(&key) else {
                resp.diagnostics.push(misuse(
                    "Unknown ephemeral resource",
                    format!("No open \"{}\" ephemeral resource matches the renewal request.", key.0),
                ));
                return resp;
            };
            if let Some(deadline) = lease.renew_at {
                if Utc::now() > deadline {
                    leases.remove(&key);
                    warn!(ephemeral_type = %key.0, "ephemeral resource renewed after its deadline");
                    resp.diagnostics.push(misuse(
                        "Ephemeral resource expired",
                        format!(
                            "The \"{}\" ephemeral resource had to be renewed before {}.",
                            key.0, deadline
                        ),
                    ));
                    return resp;
                }
            }
        }

        let resp = self.inner.renew_ephemeral_resource(request).await;
        if !resp.diagnostics.has_errors() {
            let mut leases = self.leases.lock().await;
            leases.remove(&key);
            leases.insert(
                (key.0, resp.private.clone()),
                Lease {
                    renew_at: resp.renew_at,
                },
            );
        }
        resp
    }

    async fn close_ephemeral_resource(&self, request: CloseEphemeralResourceRequest) -> Diagnostics {
        guard!(@diags self.require_ready("CloseEphemeralResource"));
        let key = (request.type_name.clone(), request.private.clone());
        if self.leases.lock().await.remove(&key).is_none() {
            return misuse(
                "Unknown ephemeral resource",
                format!("No open \"{}\" ephemeral resource matches the close request.", key.0),
            )
            .into();
        }
        self.inner.close_ephemeral_resource(request).await
    }

    async fn list_resource(&self, request: ListResourceRequest) -> ListResourceResponse {
        guard!(self.require_ready("ListResource"), ListResourceResponse::default());
        self.inner.list_resource(request).await
    }

    async fn plan_action(&self, request: PlanActionRequest) -> PlanActionResponse {
        guard!(self.require_ready("PlanAction"), PlanActionResponse::default());
        self.inner.plan_action(request).await
    }

    async fn invoke_action(&self, request: InvokeActionRequest) -> InvokeActionResponse {
        guard!(self.require_ready("InvokeAction"), InvokeActionResponse::default());
        self.inner.invoke_action(request).await
    }

    async fn stop_provider(&self) -> Diagnostics {
        let mut state = self.state.lock().await;
        if *state == SessionState::Stopped {
            return stopped("StopProvider").into();
        }
        *state = SessionState::Stopped;
        drop(state);

        let mut diags = Diagnostics::new();
        let open: Vec<LeaseKey> = self.leases.lock().await.drain().map(|(key, _)| key).collect();
        for (type_name, private) in open {
            diags.push(misuse(
                "Ephemeral resource not closed",
                format!("The \"{}\" ephemeral resource was still open when the provider stopped.", type_name),
            ));
            diags.extend(
                self.inner
                    .close_ephemeral_resource(CloseEphemeralResourceRequest { type_name, private })
                    .await,
            );
        }

        match tokio::time::timeout(self.stop_timeout, self.inner.stop_provider()).await {
            Ok(stop) => diags.extend(stop),
            Err(_) => diags.push(misuse(
                "Provider did not stop",
                format!("The provider did not stop within {:?}.", self.stop_timeout),
            )),
        }
        info!(errors = diags.has_errors(), "provider session stopped");
        diags
    }
}

/// Produces configured-provider connections by address.
#[async_trait::async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Start a new, unconfigured provider for `addr`.
    async fn new_provider(&self, addr: &ProviderAddr) -> Result<Arc<dyn Provider>, EngineError>;
}

/// Launches provider executables and connects to them over the wire.
#[derive(Debug, Clone, Default)]
pub struct PluginFactory {
    executables: HashMap<ProviderAddr, PathBuf>,
    handshake_timeout: Option<Duration>,
}

impl PluginFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executable serving `addr`.
    pub fn with_executable(mut self, addr: ProviderAddr, path: impl Into<PathBuf>) -> Self {
        self.executables.insert(addr, path.into());
        self
    }

    /// How long to wait for a provider's handshake line.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl ProviderFactory for PluginFactory {
    async fn new_provider(&self, addr: &ProviderAddr) -> Result<Arc<dyn Provider>, EngineError> {
        let path = self.executables.get(addr).ok_or_else(|| {
            EngineError::Configuration(format!("no executable registered for provider {}", addr))
        })?;
        let timeout = self.handshake_timeout.unwrap_or(Duration::from_secs(10));
        let process = super::rpc::launch(path, timeout).await?;
        Ok(Arc::new(GrpcProvider::from_process(process).with_address(addr.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_error_contains, assert_no_errors, FakeProvider};

    fn session() -> (Arc<FakeProvider>, ProviderSession) {
        let fake = Arc::new(FakeProvider::new());
        (fake.clone(), ProviderSession::new(fake))
    }

    async fn configured() -> (Arc<FakeProvider>, ProviderSession) {
        let (fake, session) = session();
        assert_no_errors(&session.configure_provider(ConfigureProviderRequest::default()).await);
        (fake, session)
    }

    #[tokio::test]
    async fn test_operations_before_configure_fail() {
        let (_, session) = session();
        let resp = session
            .read_resource(ReadResourceRequest {
                type_name: "fake_thing".to_string(),
                ..Default::default()
            })
            .await;
        assert_error_contains(&resp.diagnostics, "not configured");
    }

    #[tokio::test]
    async fn test_validate_allowed_before_configure() {
        let (_, session) = session();
        let diags = session
            .validate_resource_config(ValidateResourceConfigRequest {
                type_name: "fake_thing".to_string(),
                config: Value::object([("name", Value::string("a"))]),
            })
            .await;
        assert_no_errors(&diags);
        assert_eq!(session.state().await, SessionState::Unconfigured);
    }

    #[tokio::test]
    async fn test_double_configure_fails() {
        let (_, session) = configured().await;
        let diags = session.configure_provider(ConfigureProviderRequest::default()).await;
        assert_error_contains(&diags, "already configured");
    }

    #[tokio::test]
    async fn test_stopped_is_terminal() {
        let (fake, session) = configured().await;
        assert_no_errors(&session.stop_provider().await);
        assert_eq!(session.state().await, SessionState::Stopped);
        assert_eq!(fake.calls("stop_provider"), 1);

        let schema = session.get_provider_schema().await;
        assert_error_contains(&schema.diagnostics, "stopped");
        assert_error_contains(&session.stop_provider().await, "stopped");
        assert_error_contains(
            &session.configure_provider(ConfigureProviderRequest::default()).await,
            "stopped",
        );
    }

    #[tokio::test]
    async fn test_ephemeral_lease_lifecycle() {
        let (_, session) = configured().await;
        let opened = session
            .open_ephemeral_resource(OpenEphemeralResourceRequest {
                type_name: "fake_secret".to_string(),
                ..Default::default()
            })
            .await;
        assert_no_errors(&opened.diagnostics);
        assert_eq!(session.open_leases().await, 1);

        let renewed = session
            .renew_ephemeral_resource(RenewEphemeralResourceRequest {
                type_name: "fake_secret".to_string(),
                private: opened.private.clone(),
            })
            .await;
        assert_no_errors(&renewed.diagnostics);

        let closed = session
            .close_ephemeral_resource(CloseEphemeralResourceRequest {
                type_name: "fake_secret".to_string(),
                private: renewed.private,
            })
            .await;
        assert_no_errors(&closed);
        assert_eq!(session.open_leases().await, 0);
    }

    #[tokio::test]
    async fn test_renew_after_deadline_is_caller_error() {
        let (fake, session) = configured().await;
        fake.set_ephemeral_ttl(chrono::Duration::seconds(-1));
        let opened = session
            .open_ephemeral_resource(OpenEphemeralResourceRequest {
                type_name: "fake_secret".to_string(),
                ..Default::default()
            })
            .await;
        let renewed = session
            .renew_ephemeral_resource(RenewEphemeralResourceRequest {
                type_name: "fake_secret".to_string(),
                private: opened.private,
            })
            .await;
        assert_error_contains(&renewed.diagnostics, "expired");
        assert_eq!(fake.calls("renew_ephemeral_resource"), 0);
    }

    #[tokio::test]
    async fn test_stop_with_open_lease_reports_and_closes() {
        let (fake, session) = configured().await;
        session
            .open_ephemeral_resource(OpenEphemeralResourceRequest {
                type_name: "fake_secret".to_string(),
                ..Default::default()
            })
            .await;
        let diags = session.stop_provider().await;
        assert_error_contains(&diags, "not closed");
        assert_eq!(fake.calls("close_ephemeral_resource"), 1);
    }

    #[tokio::test]
    async fn test_close_unknown_lease() {
        let (_, session) = configured().await;
        let diags = session
            .close_ephemeral_resource(CloseEphemeralResourceRequest {
                type_name: "fake_secret".to_string(),
                private: b"nope".to_vec(),
            })
            .await;
        assert_error_contains(&diags, "Unknown ephemeral resource");
    }

    #[tokio::test]
    async fn test_plugin_factory_unknown_address() {
        let factory = PluginFactory::new();
        let result = factory.new_provider(&ProviderAddr::new("hemmer", "fake")).await;
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }
}
