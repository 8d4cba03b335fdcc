//! # sipline-sip-core
//!
//! The typed SIP message model consumed by the sipline transaction layer.
//!
//! This crate deliberately stops short of the wire: parsing and
//! serialization live with the transport/parser collaborators. What it
//! provides is the in-memory shape of SIP traffic — [`Request`],
//! [`Response`], [`Message`], the headers transaction matching depends on
//! ([`Via`], [`CSeq`], [`NameAddr`], [`CallId`]) — plus builders and the
//! identifier generators (branch, tag, Call-ID).

pub mod builder;
pub mod error;
pub mod headers;
pub mod ids;
pub mod message;
pub mod method;
pub mod status;
pub mod uri;

pub use builder::{RequestBuilder, ResponseBuilder};
pub use error::{Error, Result};
pub use headers::{CSeq, CallId, NameAddr, Param, Via};
pub use ids::{generate_branch, generate_call_id, generate_tag, is_rfc3261_branch, MAGIC_COOKIE};
pub use message::{Message, Request, Response};
pub use method::Method;
pub use status::StatusCode;
pub use uri::{Scheme, Uri};

/// Glob-import surface for downstream crates.
pub mod prelude {
    pub use crate::builder::{RequestBuilder, ResponseBuilder};
    pub use crate::headers::{CSeq, CallId, NameAddr, Param, Via};
    pub use crate::ids::{generate_branch, generate_tag, is_rfc3261_branch, MAGIC_COOKIE};
    pub use crate::message::{Message, Request, Response};
    pub use crate::method::Method;
    pub use crate::status::StatusCode;
    pub use crate::uri::{Scheme, Uri};
}
