pub mod classify;
pub mod dns;
pub mod endpoint;
pub mod request;
pub mod segment;
pub mod transport;

pub use classify::Outcome;
pub use dns::{DnsCache, DnsCacheConfig, DnsCacheError};
pub use endpoint::{Endpoint, EndpointConfig, EndpointError, PullError, WriteError};
pub use request::WriteRequest;
pub use segment::{Body, BodySegmenter, MAX_BODY_BYTES, SegmentError, build_bodies};
pub use transport::{
    HttpRequest, HttpResponse, HttpTraceStat, ReqwestTransport, Transport, TransportError,
    TransportOptions,
};
