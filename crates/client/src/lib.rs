//! Wire client for the larder cache protocol.
//!
//! [`CacheBackend`] is the seam the transfer engine talks to;
//! [`HttpCacheClient`] implements it over pooled HTTPS with CBOR bodies and
//! bearer authentication.

pub mod backend;
pub mod credentials;
pub mod error;
pub mod http;

pub use backend::{CacheBackend, PutOutcome};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use error::{ErrorKind, WireError, WireResult};
pub use http::{HttpCacheClient, HttpClientConfig};
