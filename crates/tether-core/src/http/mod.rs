//! HTTP layer: request model, transport seam and the authenticated client

mod client;
mod request;
mod transport;

pub use client::{AuthenticatedClient, ClientOptions};
pub use request::{
    ApiRequest, ApiResponse, Method, MultipartPart, RequestBody, TransportResponse,
};
pub use transport::{ReqwestTransport, Transport};
