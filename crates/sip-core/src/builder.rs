//! Fluent builders for requests and responses.
//!
//! The builders exist so transaction code and tests can assemble
//! well-formed messages without touching every field. URI arguments that
//! fail to parse fall back to treating the raw string as a host, which
//! keeps the builder infallible after construction.

use std::str::FromStr;

use bytes::Bytes;

use crate::error::Result;
use crate::headers::{CSeq, CallId, NameAddr, Param, Via};
use crate::ids::generate_call_id;
use crate::message::{Request, Response};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::Uri;

fn parse_or_host(uri: &str) -> Uri {
    Uri::from_str(uri).unwrap_or_else(|_| Uri::sip(uri))
}

/// Builds a [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Starts a request toward `uri`. Fails only when `uri` is not a
    /// valid SIP/SIPS URI.
    pub fn new(method: Method, uri: &str) -> Result<Self> {
        let uri = Uri::from_str(uri)?;
        let to = NameAddr::new(uri.clone());
        let from = NameAddr::new(Uri::sip("anonymous.invalid").with_user("anonymous"));
        Ok(RequestBuilder {
            request: Request {
                cseq: CSeq::new(1, method.clone()),
                method,
                uri,
                vias: Vec::new(),
                from,
                to,
                call_id: CallId::new(generate_call_id()),
                max_forwards: Some(70),
                contact: None,
                extra_headers: Vec::new(),
                body: Bytes::new(),
            },
        })
    }

    pub fn from(mut self, display_name: &str, uri: &str, tag: Option<&str>) -> Self {
        let mut addr = NameAddr::new(parse_or_host(uri)).with_display_name(display_name);
        if let Some(tag) = tag {
            addr.set_tag(tag);
        }
        self.request.from = addr;
        self
    }

    pub fn to(mut self, display_name: &str, uri: &str, tag: Option<&str>) -> Self {
        let mut addr = NameAddr::new(parse_or_host(uri)).with_display_name(display_name);
        if let Some(tag) = tag {
            addr.set_tag(tag);
        }
        self.request.to = addr;
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.request.call_id = CallId::new(call_id);
        self
    }

    pub fn cseq(mut self, seq: u32) -> Self {
        self.request.cseq.seq = seq;
        self
    }

    /// Pushes a Via entry (topmost last-pushed-first is not modeled;
    /// entries are kept in push order, topmost first).
    pub fn via(mut self, sent_by: &str, transport: &str, branch: Option<&str>) -> Self {
        let (host, port) = match sent_by.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, Some(port)),
                Err(_) => (sent_by, None),
            },
            None => (sent_by, None),
        };
        let mut via = Via::new(transport, host, port);
        if let Some(branch) = branch {
            via.set_param(Param::branch(branch));
        }
        self.request.vias.push(via);
        self
    }

    pub fn contact(mut self, uri: &str) -> Self {
        self.request.contact = Some(NameAddr::new(parse_or_host(uri)));
        self
    }

    pub fn max_forwards(mut self, hops: u8) -> Self {
        self.request.max_forwards = Some(hops);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request
            .extra_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = body.into();
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

/// Builds a [`Response`].
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    /// Starts a response to `request`, copying the headers RFC 3261
    /// Section 8.2.6.2 requires: Via entries, From, To, Call-ID, CSeq.
    pub fn from_request(request: &Request, status: StatusCode) -> Self {
        ResponseBuilder {
            response: Response {
                status,
                reason: None,
                vias: request.vias.clone(),
                from: request.from.clone(),
                to: request.to.clone(),
                call_id: request.call_id.clone(),
                cseq: request.cseq.clone(),
                contact: None,
                extra_headers: Vec::new(),
                body: Bytes::new(),
            },
        }
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.response.reason = Some(reason.to_string());
        self
    }

    /// Sets the To tag, replacing any existing one.
    pub fn to_tag(mut self, tag: &str) -> Self {
        self.response.to.set_tag(tag);
        self
    }

    pub fn contact(mut self, uri: &str) -> Self {
        self.response.contact = Some(NameAddr::new(parse_or_host(uri)));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.response
            .extra_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}
