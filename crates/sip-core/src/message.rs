//! SIP requests, responses, and the [`Message`] sum type the transport
//! layer hands to the transaction layer.

use bytes::Bytes;

use crate::headers::{CSeq, CallId, NameAddr, Via};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::Uri;

/// A SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    /// Via entries, topmost first.
    pub vias: Vec<Via>,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: CallId,
    pub cseq: CSeq,
    pub max_forwards: Option<u8>,
    pub contact: Option<NameAddr>,
    /// Headers this layer does not interpret, as raw name/value pairs.
    pub extra_headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    /// The topmost Via entry, if any.
    pub fn top_via(&self) -> Option<&Via> {
        self.vias.first()
    }

    /// The branch parameter of the topmost Via.
    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(Via::branch)
    }
}

/// A SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    /// Overrides the default reason phrase when set.
    pub reason: Option<String>,
    pub vias: Vec<Via>,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: CallId,
    pub cseq: CSeq,
    pub contact: Option<NameAddr>,
    pub extra_headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    /// The topmost Via entry, if any.
    pub fn top_via(&self) -> Option<&Via> {
        self.vias.first()
    }

    /// The branch parameter of the topmost Via.
    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(Via::branch)
    }

    /// The reason phrase to present: the override or the code's default.
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }
}

/// A request or a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// The request method, or the CSeq method for responses.
    pub fn cseq_method(&self) -> &Method {
        match self {
            Message::Request(req) => &req.cseq.method,
            Message::Response(resp) => &resp.cseq.method,
        }
    }

    /// The topmost Via of either message kind.
    pub fn top_via(&self) -> Option<&Via> {
        match self {
            Message::Request(req) => req.top_via(),
            Message::Response(resp) => resp.top_via(),
        }
    }

    /// The topmost Via branch of either message kind.
    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(Via::branch)
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            Message::Request(req) => &req.call_id,
            Message::Response(resp) => &resp.call_id,
        }
    }

    pub fn cseq(&self) -> &CSeq {
        match self {
            Message::Request(req) => &req.cseq,
            Message::Response(resp) => &resp.cseq,
        }
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(req) => Some(req),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(resp) => Some(resp),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{RequestBuilder, ResponseBuilder};

    #[test]
    fn message_accessors() {
        let req = RequestBuilder::new(Method::Invite, "sip:bob@biloxi.example.com")
            .unwrap()
            .from("Alice", "sip:alice@atlanta.example.com", Some("tag1"))
            .to("Bob", "sip:bob@biloxi.example.com", None)
            .call_id("a84b4c76e66710")
            .cseq(314159)
            .via("atlanta.example.com", "UDP", Some("z9hG4bK776asdhds"))
            .build();
        let msg = Message::from(req.clone());

        assert!(msg.is_request());
        assert_eq!(msg.branch(), Some("z9hG4bK776asdhds"));
        assert_eq!(msg.cseq_method(), &Method::Invite);
        assert_eq!(msg.call_id().as_str(), "a84b4c76e66710");
        assert_eq!(msg.as_request(), Some(&req));
        assert!(msg.as_response().is_none());
    }

    #[test]
    fn response_reason_override() {
        let req = RequestBuilder::new(Method::Invite, "sip:bob@biloxi.example.com")
            .unwrap()
            .build();
        let mut resp = ResponseBuilder::from_request(&req, StatusCode::BusyHere).build();
        assert_eq!(resp.reason_phrase(), "Busy Here");
        resp.reason = Some("Try Later".to_string());
        assert_eq!(resp.reason_phrase(), "Try Later");
    }
}
