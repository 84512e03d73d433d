pub mod codec;
pub mod grpc;
pub mod rest;

pub use grpc::GrpcInvoker;
pub use rest::proxy_rest;
