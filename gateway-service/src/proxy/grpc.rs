//! Reflection-driven dynamic gRPC invocation.
//!
//! Bridges client JSON to an arbitrary unary protobuf method with no
//! compile-time knowledge of the upstream schema: the method descriptor is
//! discovered over the v1alpha server-reflection protocol, the request body
//! is parsed into a dynamic message of the input type, and the reply is
//! serialized back to JSON. Connections are dialed per invocation and
//! dropped on every exit path; descriptor pools are cached per
//! (address, service) and refreshed once when resolution goes stale.

use crate::models::{ProtoMapping, Service};
use crate::proxy::codec::DynamicCodec;
use axum::body::Bytes;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures::stream;
use gateway_core::error::GatewayError;
use gateway_core::observability::TraceSink;
use http::uri::PathAndQuery;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorProto;
use std::collections::HashSet;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tonic_reflection::pb::v1alpha::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1alpha::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1alpha::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1alpha::ServerReflectionRequest;
use tracing::debug;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const INVOKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GrpcInvoker {
    pools: DashMap<(String, String), DescriptorPool>,
}

impl Default for GrpcInvoker {
    fn default() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }
}

impl GrpcInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Performs one JSON → protobuf → unary call → protobuf → JSON bridge.
    pub async fn invoke(
        &self,
        traces: &TraceSink,
        request_id: &str,
        service: &Service,
        mapping: &ProtoMapping,
        body: Bytes,
    ) -> Result<Response, GatewayError> {
        let qualified = mapping.qualified_service();
        traces.info(
            request_id,
            "gRPC",
            format!("Invoking {}/{} at {}", qualified, mapping.rpc_method, service.grpc_addr),
        );

        let channel = self.dial(traces, request_id, service).await?;
        let method = match self
            .method_descriptor(&channel, &service.grpc_addr, &qualified, &mapping.rpc_method)
            .await
        {
            Ok(method) => method,
            Err(error) => {
                traces.error(
                    request_id,
                    "gRPC",
                    format!("Descriptor resolution failed: {error}"),
                );
                return Err(error);
            }
        };

        let input = match parse_request(&method, &body) {
            Ok(input) => input,
            Err(error) => {
                traces.error(request_id, "gRPC", format!("Request parse failed: {error}"));
                return Err(error);
            }
        };

        let path: PathAndQuery = format!("/{}/{}", qualified, mapping.rpc_method)
            .parse()
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!("invalid method path: {e}")))?;

        let codec = DynamicCodec::new(method.input(), method.output());
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.map_err(|e| {
            traces.error(request_id, "gRPC", format!("Upstream not ready: {e}"));
            GatewayError::UpstreamUnavailable(format!("gRPC upstream not ready: {e}"))
        })?;

        let mut request = tonic::Request::new(input);
        request.set_timeout(INVOKE_TIMEOUT);

        match grpc.unary(request, path, codec).await {
            Ok(reply) => {
                let message: DynamicMessage = reply.into_inner();
                let json = serde_json::to_vec(&message).map_err(|e| {
                    GatewayError::Internal(anyhow::anyhow!(
                        "failed to serialize gRPC response: {e}"
                    ))
                })?;
                Ok((
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    json,
                )
                    .into_response())
            }
            Err(status) => {
                traces.error(
                    request_id,
                    "gRPC",
                    format!(
                        "Upstream RPC failed: {:?} {}",
                        status.code(),
                        status.message()
                    ),
                );
                match status.code() {
                    Code::Unavailable | Code::Internal => Err(GatewayError::UpstreamFailure(
                        "gRPC upstream unavailable".to_string(),
                    )),
                    _ => Err(GatewayError::UpstreamFailure(status.message().to_string())),
                }
            }
        }
    }

    async fn dial(
        &self,
        traces: &TraceSink,
        request_id: &str,
        service: &Service,
    ) -> Result<Channel, GatewayError> {
        let uri = format!("http://{}", service.grpc_addr);
        let endpoint = Endpoint::from_shared(uri).map_err(|e| {
            traces.error(
                request_id,
                "gRPC",
                format!("Dial failed for {}: {e}", service.grpc_addr),
            );
            GatewayError::UpstreamUnavailable(format!("invalid gRPC address: {e}"))
        })?;

        endpoint
            .connect_timeout(DIAL_TIMEOUT)
            .connect()
            .await
            .map_err(|e| {
                traces.error(
                    request_id,
                    "gRPC",
                    format!("Dial failed for {}: {e}", service.grpc_addr),
                );
                GatewayError::UpstreamUnavailable(format!(
                    "gRPC upstream unreachable at {}",
                    service.grpc_addr
                ))
            })
    }

    /// Resolves the method descriptor, preferring the cached descriptor
    /// pool and re-reading reflection when the cache has gone stale.
    async fn method_descriptor(
        &self,
        channel: &Channel,
        grpc_addr: &str,
        qualified_service: &str,
        rpc_method: &str,
    ) -> Result<MethodDescriptor, GatewayError> {
        let service = self
            .service_descriptor(channel, grpc_addr, qualified_service)
            .await?;

        let method = service
            .methods()
            .find(|m| m.name() == rpc_method)
            .ok_or_else(|| {
                GatewayError::Internal(anyhow::anyhow!("gRPC method not found: {rpc_method}"))
            });
        method
    }

    async fn service_descriptor(
        &self,
        channel: &Channel,
        grpc_addr: &str,
        qualified_service: &str,
    ) -> Result<ServiceDescriptor, GatewayError> {
        let key = (grpc_addr.to_string(), qualified_service.to_string());

        if let Some(pool) = self.pools.get(&key) {
            if let Some(descriptor) = pool.get_service_by_name(qualified_service) {
                return Ok(descriptor);
            }
            debug!(service = qualified_service, "Cached descriptor pool is stale, refreshing");
        }

        let pool = fetch_descriptor_pool(channel.clone(), qualified_service).await?;
        let descriptor = pool.get_service_by_name(qualified_service).ok_or_else(|| {
            GatewayError::Internal(anyhow::anyhow!(
                "gRPC service not found: {qualified_service}"
            ))
        })?;
        self.pools.insert(key, pool);
        Ok(descriptor)
    }
}

fn parse_request(method: &MethodDescriptor, body: &Bytes) -> Result<DynamicMessage, GatewayError> {
    if body.is_empty() {
        return Ok(DynamicMessage::new(method.input()));
    }

    let mut deserializer = serde_json::Deserializer::from_slice(body);
    let message = DynamicMessage::deserialize(method.input(), &mut deserializer)
        .map_err(|e| GatewayError::InvalidInput(format!("invalid JSON request body: {e}")))?;
    deserializer
        .end()
        .map_err(|e| GatewayError::InvalidInput(format!("invalid JSON request body: {e}")))?;
    Ok(message)
}

/// Asks the upstream's reflection service for the file containing the given
/// symbol and assembles the returned descriptors into a pool.
async fn fetch_descriptor_pool(
    channel: Channel,
    symbol: &str,
) -> Result<DescriptorPool, GatewayError> {
    let mut client = ServerReflectionClient::new(channel);

    let request = ServerReflectionRequest {
        host: String::new(),
        message_request: Some(MessageRequest::FileContainingSymbol(symbol.to_string())),
    };

    let response = client
        .server_reflection_info(tonic::Request::new(stream::iter(vec![request])))
        .await
        .map_err(|e| {
            GatewayError::Internal(anyhow::anyhow!("reflection request failed: {e}"))
        })?;

    let mut stream = response.into_inner();
    let message = stream
        .message()
        .await
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("reflection stream failed: {e}")))?
        .ok_or_else(|| {
            GatewayError::Internal(anyhow::anyhow!("reflection stream closed without a response"))
        })?;

    let files = match message.message_response {
        Some(MessageResponse::FileDescriptorResponse(files)) => files.file_descriptor_proto,
        Some(MessageResponse::ErrorResponse(err)) => {
            return Err(GatewayError::Internal(anyhow::anyhow!(
                "reflection error {}: {}",
                err.error_code,
                err.error_message
            )))
        }
        _ => {
            return Err(GatewayError::Internal(anyhow::anyhow!(
                "unexpected reflection response"
            )))
        }
    };

    build_descriptor_pool(&files)
}

/// Builds a descriptor pool from raw `FileDescriptorProto` payloads.
/// Reflection servers return files in arbitrary order, so insertion loops
/// until every file's dependencies are satisfied.
pub fn build_descriptor_pool(files: &[Vec<u8>]) -> Result<DescriptorPool, GatewayError> {
    let mut pending = Vec::new();
    let mut seen = HashSet::new();
    for bytes in files {
        let descriptor = FileDescriptorProto::decode(bytes.as_slice()).map_err(|e| {
            GatewayError::Internal(anyhow::anyhow!("invalid file descriptor from reflection: {e}"))
        })?;
        if seen.insert(descriptor.name().to_string()) {
            pending.push(descriptor);
        }
    }

    let mut pool = DescriptorPool::new();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|descriptor| pool.add_file_descriptor_proto(descriptor.clone()).is_err());
        if pending.len() == before {
            return Err(GatewayError::Internal(anyhow::anyhow!(
                "unresolvable descriptor dependencies from reflection"
            )));
        }
    }
    Ok(pool)
}
