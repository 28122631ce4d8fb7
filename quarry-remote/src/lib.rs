//! QUARRY Remote - Remote Resolve Endpoints
//!
//! The byte-level [`Transport`] seam, a reqwest-backed [`HttpTransport`], and
//! the [`RemoteClient`] that speaks the bulk and single-key resolve protocol:
//!
//! - bulk: `POST <base>/<endpoint>` with a JSON array of keys, answered by an
//!   array of `{id, name, category}`
//! - single: `GET <base>/<single_endpoint>/<id>` answered by one object, or a
//!   one-element bulk call when the data class has no single endpoint

pub mod client;
pub mod transport;
pub mod types;

pub use client::{RemoteClient, RemoteResolve, DEFAULT_BULK_LIMIT};
pub use transport::{FetchRequest, HttpTransport, Method, Transport};
pub use types::{BulkResponse, WireRecord};
