//! gRPC client for the simulation client's `marble.MarbleService`.
//!
//! The service has two unary calls:
//!
//! ```text
//! rpc GetState(GetStateRequest) returns (StateResponse);
//! rpc Input(InputRequest) returns (EmptyResponse);
//! ```
//!
//! The message types are declared in [`wire`] with `prost` derives and
//! converted to the crate's [`protocol`](crate::protocol) types at the call
//! boundary. Rollouts run on plain threads, so every connection owns a
//! single-threaded tokio runtime and blocks on each call.

use std::{
    fmt, io,
    time::{Duration, Instant},
};

use tokio::runtime::{self, Runtime};
use tonic::{
    Request, Status,
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
};

use crate::{Action, Environment, EnvironmentError, ResultEntry, StateSnapshot, Vec3};

const GET_STATE: &str = "/marble.MarbleService/GetState";
const INPUT: &str = "/marble.MarbleService/Input";

/// Timeouts applied to a bridge connection.
#[derive(Debug, Clone, Copy)]
pub struct BridgeOptions {
    /// Total time spent retrying the initial connection.
    pub connect_timeout: Duration,
    /// Pause between connection attempts.
    pub retry_interval: Duration,
    /// Deadline of each call. `None` waits forever.
    pub io_timeout: Option<Duration>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(200),
            io_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Messages of the `marble` protobuf package.
pub mod wire {
    #[derive(Clone, Copy, PartialEq, prost::Message)]
    pub struct Vec3 {
        #[prost(float, tag = "1")]
        pub x: f32,
        #[prost(float, tag = "2")]
        pub y: f32,
        #[prost(float, tag = "3")]
        pub z: f32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ResultEntry {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(float, optional, tag = "2")]
        pub finish_time: Option<f32>,
        #[prost(uint64, optional, tag = "3")]
        pub last_touched_road_id: Option<u64>,
        #[prost(float, optional, tag = "4")]
        pub last_touched_road_time: Option<f32>,
    }

    #[derive(Clone, Copy, PartialEq, prost::Message)]
    pub struct GetStateRequest {}

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StateResponse {
        #[prost(bytes = "vec", tag = "1")]
        pub screen: Vec<u8>,
        #[prost(message, optional, tag = "2")]
        pub linear_velocity: Option<Vec3>,
        #[prost(message, optional, tag = "3")]
        pub angular_velocity: Option<Vec3>,
        #[prost(bool, tag = "4")]
        pub finished: bool,
        #[prost(message, repeated, tag = "5")]
        pub results: Vec<ResultEntry>,
    }

    #[derive(Clone, Copy, PartialEq, prost::Message)]
    pub struct InputRequest {
        #[prost(bool, tag = "1")]
        pub forward: bool,
        #[prost(bool, tag = "2")]
        pub back: bool,
        #[prost(bool, tag = "3")]
        pub left: bool,
        #[prost(bool, tag = "4")]
        pub right: bool,
        #[prost(bool, tag = "5")]
        pub reset: bool,
    }

    #[derive(Clone, Copy, PartialEq, prost::Message)]
    pub struct EmptyResponse {}
}

impl From<wire::Vec3> for Vec3 {
    fn from(v: wire::Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<wire::ResultEntry> for ResultEntry {
    fn from(entry: wire::ResultEntry) -> Self {
        Self {
            name: entry.name,
            finish_time: entry.finish_time,
            last_touched_checkpoint_id: entry.last_touched_road_id,
            last_touched_checkpoint_time: entry.last_touched_road_time,
        }
    }
}

impl From<wire::StateResponse> for StateSnapshot {
    fn from(response: wire::StateResponse) -> Self {
        Self {
            linear_velocity: response.linear_velocity.map_or(Vec3::ZERO, Vec3::from),
            angular_velocity: response.angular_velocity.map_or(Vec3::ZERO, Vec3::from),
            // Not exposed by the service.
            relative_angular_velocity: Vec3::ZERO,
            screen: response.screen,
            finished: response.finished,
            results: response.results.into_iter().map(ResultEntry::from).collect(),
        }
    }
}

impl From<Action> for wire::InputRequest {
    fn from(action: Action) -> Self {
        Self {
            forward: action.forward,
            back: action.back,
            left: action.left,
            right: action.right,
            reset: action.reset,
        }
    }
}

pub struct BridgeConnection {
    uri: String,
    runtime: Runtime,
    grpc: Grpc<Channel>,
}

impl fmt::Debug for BridgeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConnection")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

impl BridgeConnection {
    /// Connects to the service on `host:port`, retrying while the simulation starts up.
    pub fn connect(
        host: &str,
        port: u16,
        options: &BridgeOptions,
    ) -> Result<Self, EnvironmentError> {
        let uri = endpoint_uri(host, port);
        let connect_error = |source| EnvironmentError::Connect {
            addr: uri.clone(),
            source,
        };

        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(connect_error)?;
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| connect_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?
            .connect_timeout(options.connect_timeout);
        if let Some(timeout) = options.io_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        let channel = runtime
            .block_on(connect_with_retry(&endpoint, options))
            .map_err(|e| connect_error(io::Error::other(e)))?;

        tracing::debug!(%uri, "bridge connected");
        Ok(Self {
            uri,
            runtime,
            grpc: Grpc::new(channel),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn call<Req, Resp>(
        &mut self,
        method: &'static str,
        message: Req,
    ) -> Result<Resp, EnvironmentError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let grpc = &mut self.grpc;
        let response = self.runtime.block_on(async move {
            grpc.ready()
                .await
                .map_err(|e| Status::unavailable(format!("service not ready: {e}")))?;
            grpc.unary(
                Request::new(message),
                PathAndQuery::from_static(method),
                ProstCodec::default(),
            )
            .await
        });
        response
            .map(tonic::Response::into_inner)
            .map_err(|status| EnvironmentError::Rpc {
                method,
                source: Box::new(status),
            })
    }
}

impl Environment for BridgeConnection {
    fn get_state(&mut self) -> Result<StateSnapshot, EnvironmentError> {
        let response: wire::StateResponse = self.call(GET_STATE, wire::GetStateRequest {})?;
        Ok(response.into())
    }

    fn send_action(&mut self, action: Action) -> Result<(), EnvironmentError> {
        let wire::EmptyResponse {} = self.call(INPUT, wire::InputRequest::from(action))?;
        Ok(())
    }
}

/// Brackets IPv6 literals such as `::1`, which the simulation client binds by default.
fn endpoint_uri(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

async fn connect_with_retry(
    endpoint: &Endpoint,
    options: &BridgeOptions,
) -> Result<Channel, tonic::transport::Error> {
    let deadline = Instant::now() + options.connect_timeout;
    loop {
        match endpoint.connect().await {
            Ok(channel) => return Ok(channel),
            Err(e) if Instant::now() + options.retry_interval < deadline => {
                tracing::trace!(error = %e, "service not listening yet");
                tokio::time::sleep(options.retry_interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}
