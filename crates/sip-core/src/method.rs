//! SIP request methods as defined in
//! [RFC 3261 Section 7.1](https://datatracker.ietf.org/doc/html/rfc3261#section-7.1)
//! and common extensions.
//!
//! Method names are case-sensitive tokens. Unknown but well-formed tokens are
//! preserved through the [`Method::Extension`] variant so the transaction
//! layer can key on them without understanding their semantics.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A SIP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// INVITE: initiates a session.
    Invite,
    /// ACK: acknowledges a final response to an INVITE.
    Ack,
    /// BYE: terminates a session.
    Bye,
    /// CANCEL: cancels a pending request.
    Cancel,
    /// OPTIONS: queries capabilities.
    Options,
    /// REGISTER: binds a contact to an address-of-record.
    Register,
    /// SUBSCRIBE: requests event notification (RFC 6665).
    Subscribe,
    /// NOTIFY: delivers an event notification (RFC 6665).
    Notify,
    /// UPDATE: modifies session state without impacting dialog state (RFC 3311).
    Update,
    /// INFO: carries mid-session information (RFC 6086).
    Info,
    /// MESSAGE: instant message (RFC 3428).
    Message,
    /// REFER: asks the recipient to issue a request (RFC 3515).
    Refer,
    /// PRACK: acknowledges a reliable provisional response (RFC 3262).
    Prack,
    /// Any other well-formed method token.
    Extension(String),
}

impl Method {
    /// Returns the canonical token for this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Update => "UPDATE",
            Method::Info => "INFO",
            Method::Message => "MESSAGE",
            Method::Refer => "REFER",
            Method::Prack => "PRACK",
            Method::Extension(name) => name,
        }
    }

    /// True when this method creates an INVITE transaction.
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }

    /// True for methods that never create a transaction of their own
    /// on the client side (ACK to a 2xx travels outside any transaction).
    pub fn is_ack(&self) -> bool {
        matches!(self, Method::Ack)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.') {
            return Err(Error::InvalidMethod(s.to_string()));
        }
        Ok(match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "REGISTER" => Method::Register,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "UPDATE" => Method::Update,
            "INFO" => Method::Info,
            "MESSAGE" => Method::Message,
            "REFER" => Method::Refer,
            "PRACK" => Method::Prack,
            other => Method::Extension(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_known_methods() {
        for token in ["INVITE", "ACK", "BYE", "CANCEL", "OPTIONS", "REGISTER"] {
            let m = Method::from_str(token).unwrap();
            assert_eq!(m.to_string(), token);
        }
    }

    #[test]
    fn extension_method_preserved() {
        let m = Method::from_str("PUBLISH").unwrap();
        assert_eq!(m, Method::Extension("PUBLISH".to_string()));
        assert_eq!(m.as_str(), "PUBLISH");
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(Method::from_str("").is_err());
        assert!(Method::from_str("IN VITE").is_err());
    }
}
