//! The header types transaction processing reads and writes: `Via`,
//! `CSeq`, `From`/`To` name-addrs, and `Call-ID`.
//!
//! Each type keeps only the fields that participate in transaction
//! matching ([RFC 3261 Section 17.2.3](https://datatracker.ietf.org/doc/html/rfc3261#section-17.2.3));
//! everything else rides along as opaque parameters.

use std::fmt;

use crate::method::Method;

/// A generic header or URI parameter, `name` or `name=value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub value: Option<String>,
}

impl Param {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Param {
            name: name.into(),
            value,
        }
    }

    /// Convenience for the `branch` parameter.
    pub fn branch(value: impl Into<String>) -> Self {
        Param::new("branch", Some(value.into()))
    }

    /// Convenience for the `tag` parameter.
    pub fn tag(value: impl Into<String>) -> Self {
        Param::new("tag", Some(value.into()))
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// One Via header entry: transport, sent-by host/port, and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Via {
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<Param>,
}

impl Via {
    pub fn new(
        transport: impl Into<String>,
        host: impl Into<String>,
        port: Option<u16>,
    ) -> Self {
        Via {
            transport: transport.into(),
            host: host.into(),
            port,
            params: Vec::new(),
        }
    }

    /// Adds a parameter, replacing any existing one with the same name.
    pub fn set_param(&mut self, param: Param) {
        self.params.retain(|p| p.name != param.name);
        self.params.push(param);
    }

    /// Looks up a parameter value by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_deref())
    }

    /// The branch parameter, if present.
    pub fn branch(&self) -> Option<&str> {
        self.param("branch")
    }

    /// The sent-by value (`host` or `host:port`) used in server-side
    /// transaction matching.
    pub fn sent_by(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by())?;
        for param in &self.params {
            write!(f, ";{}", param)?;
        }
        Ok(())
    }
}

/// The CSeq header: sequence number plus method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

/// A From/To/Contact value: optional display name, URI, and parameters
/// (the `tag` parameter matters for dialogs and legacy matching).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: crate::uri::Uri,
    pub params: Vec<Param>,
}

impl NameAddr {
    pub fn new(uri: crate::uri::Uri) -> Self {
        NameAddr {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }

    /// The tag parameter, if present.
    pub fn tag(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == "tag")
            .and_then(|p| p.value.as_deref())
    }

    /// Sets or replaces the tag parameter.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.params.retain(|p| p.name != "tag");
        self.params.push(Param::tag(tag));
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "\"{}\" <{}>", name, self.uri)?,
            None => write!(f, "<{}>", self.uri)?,
        }
        for param in &self.params {
            write!(f, ";{}", param)?;
        }
        Ok(())
    }
}

/// The Call-ID header value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(value: impl Into<String>) -> Self {
        CallId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::Uri;

    #[test]
    fn via_branch_lookup() {
        let mut via = Via::new("UDP", "client.example.com", Some(5060));
        via.set_param(Param::branch("z9hG4bK776asdhds"));
        assert_eq!(via.branch(), Some("z9hG4bK776asdhds"));
        assert_eq!(via.sent_by(), "client.example.com:5060");
    }

    #[test]
    fn via_set_param_replaces() {
        let mut via = Via::new("TCP", "host", None);
        via.set_param(Param::branch("z9hG4bKone"));
        via.set_param(Param::branch("z9hG4bKtwo"));
        assert_eq!(via.branch(), Some("z9hG4bKtwo"));
        assert_eq!(via.params.len(), 1);
    }

    #[test]
    fn via_display() {
        let mut via = Via::new("UDP", "pc33.atlanta.example.com", None);
        via.set_param(Param::branch("z9hG4bK776asdhds"));
        assert_eq!(
            via.to_string(),
            "SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bK776asdhds"
        );
    }

    #[test]
    fn name_addr_tag() {
        let mut addr = NameAddr::new(Uri::sip("atlanta.example.com").with_user("alice"));
        assert_eq!(addr.tag(), None);
        addr.set_tag("1928301774");
        assert_eq!(addr.tag(), Some("1928301774"));
        addr.set_tag("replaced");
        assert_eq!(addr.tag(), Some("replaced"));
        assert_eq!(addr.params.len(), 1);
    }

    #[test]
    fn cseq_display() {
        let cseq = CSeq::new(314159, Method::Invite);
        assert_eq!(cseq.to_string(), "314159 INVITE");
    }
}
