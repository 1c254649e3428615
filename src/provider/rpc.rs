//! Wire-level transport seam and the tonic implementation.
//!
//! [`ProviderRpc`] mirrors the protocol service one method per RPC, so the
//! typed provider can be tested against an in-process double.
//!
//! # Handshake Protocol
//!
//! A provider process prints one line to stdout once it is listening:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`

use crate::error::EngineError;
use crate::generated as pb;
use crate::generated::provider_client::ProviderClient;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::Stream;
use tonic::transport::Channel;
use tonic::Status;
use tracing::{debug, info};

/// The handshake line prefix.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

/// The protocol version this engine speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// A server-streaming RPC response.
pub type RpcStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// One method per provider RPC.
#[async_trait::async_trait]
pub trait ProviderRpc: Send + Sync {
    /// GetProviderSchema.
    async fn get_provider_schema(
        &self,
        request: pb::GetProviderSchemaRequest,
    ) -> Result<pb::GetProviderSchemaResponse, Status>;
    /// GetResourceIdentitySchemas.
    async fn get_resource_identity_schemas(
        &self,
        request: pb::GetResourceIdentitySchemasRequest,
    ) -> Result<pb::GetResourceIdentitySchemasResponse, Status>;
    /// ValidateProviderConfig.
    async fn validate_provider_config(
        &self,
        request: pb::ValidateProviderConfigRequest,
    ) -> Result<pb::ValidateResponse, Status>;
    /// ValidateResourceConfig.
    async fn validate_resource_config(
        &self,
        request: pb::ValidateResourceConfigRequest,
    ) -> Result<pb::ValidateResponse, Status>;
    /// ValidateDataResourceConfig.
    async fn validate_data_resource_config(
        &self,
        request: pb::ValidateResourceConfigRequest,
    ) -> Result<pb::ValidateResponse, Status>;
    /// ValidateListResourceConfig.
    async fn validate_list_resource_config(
        &self,
        request: pb::ValidateResourceConfigRequest,
    ) -> Result<pb::ValidateResponse, Status>;
    /// UpgradeResourceState.
    async fn upgrade_resource_state(
        &self,
        request: pb::UpgradeResourceStateRequest,
    ) -> Result<pb::UpgradeResourceStateResponse, Status>;
    /// UpgradeResourceIdentity.
    async fn upgrade_resource_identity(
        &self,
        request: pb::UpgradeResourceIdentityRequest,
    ) -> Result<pb::UpgradeResourceIdentityResponse, Status>;
    /// ConfigureProvider.
    async fn configure_provider(
        &self,
        request: pb::ConfigureProviderRequest,
    ) -> Result<pb::ConfigureProviderResponse, Status>;
    /// ReadResource.
    async fn read_resource(&self, request: pb::ReadResourceRequest) -> Result<pb::ReadResourceResponse, Status>;
    /// PlanResourceChange.
    async fn plan_resource_change(
        &self,
        request: pb::PlanResourceChangeRequest,
    ) -> Result<pb::PlanResourceChangeResponse, Status>;
    /// ApplyResourceChange.
    async fn apply_resource_change(
        &self,
        request: pb::ApplyResourceChangeRequest,
    ) -> Result<pb::ApplyResourceChangeResponse, Status>;
    /// ImportResourceState.
    async fn import_resource_state(
        &self,
        request: pb::ImportResourceStateRequest,
    ) -> Result<pb::ImportResourceStateResponse, Status>;
    /// MoveResourceState.
    async fn move_resource_state(
        &self,
        request: pb::MoveResourceStateRequest,
    ) -> Result<pb::MoveResourceStateResponse, Status>;
    /// ReadDataSource.
    async fn read_data_source(
        &self,
        request: pb::ReadDataSourceRequest,
    ) -> Result<pb::ReadDataSourceResponse, Status>;
    /// OpenEphemeralResource.
    async fn open_ephemeral_resource(
        &self,
        request: pb::OpenEphemeralResourceRequest,
    ) -> Result<pb::OpenEphemeralResourceResponse, Status>;
    /// RenewEphemeralResource.
    async fn renew_ephemeral_resource(
        &self,
        request: pb::RenewEphemeralResourceRequest,
    ) -> Result<pb::RenewEphemeralResourceResponse, Status>;
    /// CloseEphemeralResource.
    async fn close_ephemeral_resource(
        &self,
        request: pb::CloseEphemeralResourceRequest,
    ) -> Result<pb::CloseEphemeralResourceResponse, Status>;
    /// ListResource (server streaming).
    async fn list_resource(
        &self,
        request: pb::ListResourceRequest,
    ) -> Result<RpcStream<pb::ListResourceEvent>, Status>;
    /// PlanAction.
    async fn plan_action(&self, request: pb::PlanActionRequest) -> Result<pb::PlanActionResponse, Status>;
    /// InvokeAction (server streaming).
    async fn invoke_action(
        &self,
        request: pb::InvokeActionRequest,
    ) -> Result<RpcStream<pb::InvokeActionEvent>, Status>;
    /// StopProvider.
    async fn stop_provider(
        &self,
        request: pb::StopProviderRequest,
    ) -> Result<pb::StopProviderResponse, Status>;
}

/// [`ProviderRpc`] over a tonic channel.
#[derive(Debug, Clone)]
pub struct TonicRpc {
    client: ProviderClient<Channel>,
}

impl TonicRpc {
    /// Wrap an established channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            client: ProviderClient::new(channel),
        }
    }

    /// Dial a provider listening at `address` (`host:port`).
    pub async fn connect(address: &str) -> Result<Self, EngineError> {
        let endpoint = format!("http://{}", address);
        debug!(address = %address, "connecting to provider");
        let client = ProviderClient::connect(endpoint).await?;
        Ok(Self { client })
    }
}

macro_rules! tonic_rpc {
    (
        unary { $($method:ident($req:ty) -> $resp:ty;)* }
        streaming { $($smethod:ident($sreq:ty) -> $sresp:ty;)* }
    ) => {
        #[async_trait::async_trait]
        impl ProviderRpc for TonicRpc {
            $(
                async fn $method(&self, request: $req) -> Result<$resp, Status> {
                    let mut client = self.client.clone();
                    Ok(client.$method(request).await?.into_inner())
                }
            )*
            $(
                async fn $smethod(&self, request: $sreq) -> Result<RpcStream<$sresp>, Status> {
                    let mut client = self.client.clone();
                    let stream = client.$smethod(request).await?.into_inner();
                    Ok(Box::pin(stream))
                }
            )*
        }
    };
}

tonic_rpc! {
    unary {
        get_provider_schema(pb::GetProviderSchemaRequest) -> pb::GetProviderSchemaResponse;
        get_resource_identity_schemas(pb::GetResourceIdentitySchemasRequest) -> pb::GetResourceIdentitySchemasResponse;
        validate_provider_config(pb::ValidateProviderConfigRequest) -> pb::ValidateResponse;
        validate_resource_config(pb::ValidateResourceConfigRequest) -> pb::ValidateResponse;
        validate_data_resource_config(pb::ValidateResourceConfigRequest) -> pb::ValidateResponse;
        validate_list_resource_config(pb::ValidateResourceConfigRequest) -> pb::ValidateResponse;
        upgrade_resource_state(pb::UpgradeResourceStateRequest) -> pb::UpgradeResourceStateResponse;
        upgrade_resource_identity(pb::UpgradeResourceIdentityRequest) -> pb::UpgradeResourceIdentityResponse;
        configure_provider(pb::ConfigureProviderRequest) -> pb::ConfigureProviderResponse;
        read_resource(pb::ReadResourceRequest) -> pb::ReadResourceResponse;
        plan_resource_change(pb::PlanResourceChangeRequest) -> pb::PlanResourceChangeResponse;
        apply_resource_change(pb::ApplyResourceChangeRequest) -> pb::ApplyResourceChangeResponse;
        import_resource_state(pb::ImportResourceStateRequest) -> pb::ImportResourceStateResponse;
        move_resource_state(pb::MoveResourceStateRequest) -> pb::MoveResourceStateResponse;
        read_data_source(pb::ReadDataSourceRequest) -> pb::ReadDataSourceResponse;
        open_ephemeral_resource(pb::OpenEphemeralResourceRequest) -> pb::OpenEphemeralResourceResponse;
        renew_ephemeral_resource(pb::RenewEphemeralResourceRequest) -> pb::RenewEphemeralResourceResponse;
        close_ephemeral_resource(pb::CloseEphemeralResourceRequest) -> pb::CloseEphemeralResourceResponse;
        plan_action(pb::PlanActionRequest) -> pb::PlanActionResponse;
        stop_provider(pb::StopProviderRequest) -> pb::StopProviderResponse;
    }
    streaming {
        list_resource(pb::ListResourceRequest) -> pb::ListResourceEvent;
        invoke_action(pb::InvokeActionRequest) -> pb::InvokeActionEvent;
    }
}

/// A parsed handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol version the provider speaks.
    pub protocol_version: u32,
    /// `host:port` the provider listens on.
    pub address: String,
}

/// Parse a `HEMMER_PROVIDER|<version>|<address>` line.
pub fn parse_handshake(line: &str) -> Result<Handshake, EngineError> {
    let parts: Vec<&str> = line.trim().split('|').collect();
    let [prefix, version, address] = parts.as_slice() else {
        return Err(EngineError::Handshake(format!(
            "expected 3 '|'-separated fields, got {}",
            parts.len()
        )));
    };
    if *prefix != HANDSHAKE_PREFIX {
        return Err(EngineError::Handshake(format!("unexpected prefix \"{}\"", prefix)));
    }
    let protocol_version: u32 = version
        .parse()
        .map_err(|_| EngineError::Handshake(format!("invalid protocol version \"{}\"", version)))?;
    if protocol_version != PROTOCOL_VERSION {
        return Err(EngineError::Handshake(format!(
            "unsupported protocol version {} (expected {})",
            protocol_version, PROTOCOL_VERSION
        )));
    }
    if address.is_empty() {
        return Err(EngineError::Handshake("empty address".to_string()));
    }
    Ok(Handshake {
        protocol_version,
        address: address.to_string(),
    })
}

/// A running provider process and its connection.
#[derive(Debug)]
pub struct PluginProcess {
    /// The child process; killed on drop.
    pub child: Child,
    /// The connection to it.
    pub rpc: TonicRpc,
}

/// Start a provider executable, wait for its handshake, and connect.
pub async fn launch(executable: &Path, timeout: Duration) -> Result<PluginProcess, EngineError> {
    let mut child = Command::new(executable)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::Handshake(format!("failed to start {}: {}", executable.display(), e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::Handshake("provider stdout unavailable".to_string()))?;

    let mut lines = BufReader::new(stdout).lines();
    let line = tokio::time::timeout(timeout, lines.next_line())
        .await
        .map_err(|_| EngineError::Handshake("timed out waiting for handshake".to_string()))?
        .map_err(|e| EngineError::Handshake(e.to_string()))?
        .ok_or_else(|| EngineError::Handshake("provider exited before handshake".to_string()))?;

    let handshake = parse_handshake(&line)?;
    let rpc = TonicRpc::connect(&handshake.address).await?;
    info!(provider = %executable.display(), address = %handshake.address, "provider started");
    Ok(PluginProcess { child, rpc })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handshake() {
        let hs = parse_handshake("HEMMER_PROVIDER|1|127.0.0.1:50051\n").unwrap();
        assert_eq!(hs.protocol_version, 1);
        assert_eq!(hs.address, "127.0.0.1:50051");
    }

    #[test]
    fn test_parse_handshake_rejects_bad_lines() {
        assert!(parse_handshake("").is_err());
        assert!(parse_handshake("OTHER|1|127.0.0.1:1").is_err());
        assert!(parse_handshake("HEMMER_PROVIDER|x|127.0.0.1:1").is_err());
        assert!(parse_handshake("HEMMER_PROVIDER|2|127.0.0.1:1").is_err());
        assert!(parse_handshake("HEMMER_PROVIDER|1|").is_err());
    }

    #[tokio::test]
    async fn test_launch_missing_executable() {
        let err = launch(Path::new("/nonexistent/provider"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Handshake(_)));
    }
}
