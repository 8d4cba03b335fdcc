use std::fmt;

use sipline_sip_core::prelude::*;

/// Uniquely identifies a transaction within the transaction layer.
///
/// RFC 3261 Section 17.1.3 / 17.2.3: a transaction is identified by the
/// topmost Via branch parameter, the CSeq method, and which role (client
/// or server) this side plays. The branch alone is not enough because an
/// ACK for a non-2xx response and a CANCEL both reuse the branch of the
/// INVITE they refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    branch: String,
    method: Method,
    is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        TransactionKey {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Derives the key for `request`, or `None` when the topmost Via
    /// carries no branch parameter.
    ///
    /// CANCEL forms its own transaction, so its method is kept as-is;
    /// ACK is matched against the INVITE transaction and is normalized
    /// here via [`TransactionKey::with_method`] by callers that need it.
    pub fn from_request(request: &Request, is_server: bool) -> Option<Self> {
        let branch = request.branch()?;
        Some(TransactionKey::new(
            branch,
            request.method.clone(),
            is_server,
        ))
    }

    /// Derives the client-side key that `response` answers, using the
    /// topmost Via branch and the CSeq method.
    pub fn from_response(response: &Response) -> Option<Self> {
        let branch = response.branch()?;
        Some(TransactionKey::new(
            branch,
            response.cseq.method.clone(),
            false,
        ))
    }

    /// Same branch and role, different method. Used to map an ACK or a
    /// CANCEL onto the INVITE server transaction it targets.
    pub fn with_method(&self, method: Method) -> Self {
        TransactionKey {
            branch: self.branch.clone(),
            method,
            is_server: self.is_server,
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// True when the branch declares RFC 3261 matching rules.
    pub fn is_rfc3261(&self) -> bool {
        is_rfc3261_branch(&self.branch)
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key({}:{}:{})",
            self.branch,
            self.method,
            if self.is_server { "server" } else { "client" }
        )
    }
}

/// Pre-RFC-3261 server-side matching (Section 17.2.3, second half).
///
/// Used only when `request` carries no magic-cookie branch, or when
/// branch lookup found nothing. Compares the header tuple of the
/// incoming request against the transaction's original request:
/// Request-URI, From and To tags, Call-ID, CSeq number, top Via
/// sent-by, and the method pairing rules (ACK and CANCEL match an
/// INVITE).
pub fn matches_legacy_server(incoming: &Request, original: &Request) -> bool {
    if incoming.call_id != original.call_id {
        return false;
    }
    // Tag comparison is wildcard when either side carries no tag
    // (pre-3261 UAs often omit them).
    if let (Some(incoming_tag), Some(original_tag)) = (incoming.from.tag(), original.from.tag()) {
        if incoming_tag != original_tag {
            return false;
        }
    }
    if let (Some(incoming_tag), Some(original_tag)) = (incoming.to.tag(), original.to.tag()) {
        if incoming_tag != original_tag {
            return false;
        }
    }
    if incoming.cseq.seq != original.cseq.seq {
        return false;
    }
    let (Some(incoming_via), Some(original_via)) = (incoming.top_via(), original.top_via()) else {
        return false;
    };
    if incoming_via.sent_by() != original_via.sent_by() {
        return false;
    }
    let method_matches = match incoming.method {
        Method::Ack | Method::Cancel => original.method == Method::Invite,
        ref m => *m == original.method,
    };
    if !method_matches {
        return false;
    }
    // The Request-URI of an ACK may legitimately differ (it follows the
    // Contact of the 2xx); for everything else it must match.
    if incoming.method != Method::Ack && incoming.uri != original.uri {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::RequestBuilder;

    fn request(method: Method, branch: &str) -> Request {
        RequestBuilder::new(method, "sip:bob@example.com")
            .unwrap()
            .from("Alice", "sip:alice@example.com", Some("fromtag1"))
            .call_id("callid-1")
            .cseq(101)
            .via("client.example.com:5060", "UDP", Some(branch))
            .build()
    }

    #[test]
    fn key_from_request_uses_branch_and_method() {
        let req = request(Method::Invite, "z9hG4bKabc");
        let key = TransactionKey::from_request(&req, true).unwrap();
        assert_eq!(key.branch(), "z9hG4bKabc");
        assert_eq!(*key.method(), Method::Invite);
        assert!(key.is_server());
        assert!(key.is_rfc3261());
    }

    #[test]
    fn key_missing_branch_is_none() {
        let req = RequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .unwrap()
            .via("client.example.com:5060", "UDP", None)
            .build();
        assert!(TransactionKey::from_request(&req, true).is_none());
    }

    #[test]
    fn ack_and_invite_keys_differ_until_normalized() {
        let invite = request(Method::Invite, "z9hG4bKabc");
        let ack = request(Method::Ack, "z9hG4bKabc");
        let invite_key = TransactionKey::from_request(&invite, true).unwrap();
        let ack_key = TransactionKey::from_request(&ack, true).unwrap();
        assert_ne!(invite_key, ack_key);
        assert_eq!(invite_key, ack_key.with_method(Method::Invite));
    }

    #[test]
    fn client_and_server_roles_do_not_collide() {
        let req = request(Method::Invite, "z9hG4bKabc");
        let client = TransactionKey::from_request(&req, false).unwrap();
        let server = TransactionKey::from_request(&req, true).unwrap();
        assert_ne!(client, server);
    }

    #[test]
    fn legacy_match_accepts_retransmission() {
        let original = request(Method::Invite, "old-branch");
        let retrans = request(Method::Invite, "old-branch");
        assert!(matches_legacy_server(&retrans, &original));
    }

    #[test]
    fn legacy_match_accepts_cancel_of_invite() {
        let original = request(Method::Invite, "old-branch");
        let cancel = request(Method::Cancel, "old-branch");
        assert!(matches_legacy_server(&cancel, &original));
    }

    #[test]
    fn legacy_match_rejects_different_call_id() {
        let original = request(Method::Invite, "old-branch");
        let mut other = request(Method::Invite, "old-branch");
        other.call_id = CallId::new("callid-2");
        assert!(!matches_legacy_server(&other, &original));
    }

    #[test]
    fn legacy_match_treats_missing_tag_as_wildcard() {
        let original = request(Method::Invite, "old-branch");
        let mut untagged = request(Method::Invite, "old-branch");
        untagged.from.params.clear();
        assert!(matches_legacy_server(&untagged, &original));

        let mut other_tag = request(Method::Invite, "old-branch");
        other_tag.from.set_tag("fromtag2");
        assert!(!matches_legacy_server(&other_tag, &original));
    }

    #[test]
    fn legacy_match_compares_to_tags() {
        let mut original = request(Method::Invite, "old-branch");
        original.to.set_tag("totag1");

        let mut other = request(Method::Invite, "old-branch");
        other.to.set_tag("totag2");
        assert!(!matches_legacy_server(&other, &original));

        // No To tag at all is a wildcard.
        let untagged = request(Method::Invite, "old-branch");
        assert!(matches_legacy_server(&untagged, &original));
    }

    #[test]
    fn legacy_match_rejects_different_cseq() {
        let original = request(Method::Invite, "old-branch");
        let mut other = request(Method::Invite, "old-branch");
        other.cseq.seq = 102;
        assert!(!matches_legacy_server(&other, &original));
    }
}
