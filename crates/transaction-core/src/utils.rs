//! Message construction helpers used across the transaction layer.

use sipline_sip_core::prelude::*;

use crate::error::{Error, Result};

/// Builds the ACK a client INVITE transaction sends for a non-2xx final
/// response (RFC 3261 Section 17.1.1.3): same Request-URI, Call-ID,
/// From, and top Via (branch included) as the INVITE; To taken from the
/// response so its tag survives; CSeq number from the INVITE with
/// method ACK.
pub fn create_ack_from_invite(invite: &Request, response: &Response) -> Result<Request> {
    if invite.method != Method::Invite {
        return Err(Error::Other(format!(
            "cannot ACK a {} request",
            invite.method
        )));
    }
    let top_via = invite
        .top_via()
        .cloned()
        .ok_or_else(|| Error::Other("INVITE has no Via header".to_string()))?;

    let mut ack = Request {
        method: Method::Ack,
        uri: invite.uri.clone(),
        vias: vec![top_via],
        from: invite.from.clone(),
        to: response.to.clone(),
        call_id: invite.call_id.clone(),
        cseq: CSeq::new(invite.cseq.seq, Method::Ack),
        max_forwards: Some(70),
        contact: None,
        extra_headers: Vec::new(),
        body: bytes::Bytes::new(),
    };
    // Route set travels with the ACK.
    for (name, value) in &invite.extra_headers {
        if name.eq_ignore_ascii_case("Route") {
            ack.extra_headers.push((name.clone(), value.clone()));
        }
    }
    Ok(ack)
}

/// Builds a response to `request` with the given status.
pub fn create_response(request: &Request, status: StatusCode) -> Response {
    ResponseBuilder::from_request(request, status).build()
}

/// 100 Trying, sent by INVITE server machines on the TU's behalf.
pub fn create_trying_response(request: &Request) -> Response {
    create_response(request, StatusCode::Trying)
}

/// 200 OK for a CANCEL. Answers the CANCEL transaction itself, not the
/// INVITE it targets.
pub fn create_ok_for_cancel(cancel: &Request) -> Response {
    create_response(cancel, StatusCode::Ok)
}

/// 487 Request Terminated for a cancelled INVITE. A final non-2xx needs
/// a To tag, so one is generated when the request carries none.
pub fn create_request_terminated_response(invite: &Request) -> Response {
    let builder = ResponseBuilder::from_request(invite, StatusCode::RequestTerminated);
    if invite.to.tag().is_none() {
        builder.to_tag(&generate_tag()).build()
    } else {
        builder.build()
    }
}
