//! SIP URIs, reduced to the pieces transaction matching needs: scheme,
//! user, host, and port. Full URI grammar (parameters, headers, escaping)
//! belongs to the parser layer upstream of this crate.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Sip,
    Sips,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Sip => f.write_str("sip"),
            Scheme::Sips => f.write_str("sips"),
        }
    }
}

/// A SIP or SIPS URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl Uri {
    /// Creates a `sip:` URI with just a host.
    pub fn sip(host: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Sip,
            user: None,
            host: host.into(),
            port: None,
        }
    }

    /// Sets the user part.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = s.strip_prefix("sips:") {
            (Scheme::Sips, rest)
        } else if let Some(rest) = s.strip_prefix("sip:") {
            (Scheme::Sip, rest)
        } else {
            return Err(Error::InvalidUri(s.to_string()));
        };

        // Parameters and headers are an upstream concern; stop at the first.
        let rest = rest.split([';', '?']).next().unwrap_or(rest);

        let (user, hostport) = match rest.split_once('@') {
            Some((user, hostport)) if !user.is_empty() => (Some(user.to_string()), hostport),
            Some(_) => return Err(Error::InvalidUri(s.to_string())),
            None => (None, rest),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidUri(s.to_string()))?;
                (host, Some(port))
            }
            None => (hostport, None),
        };
        if host.is_empty() {
            return Err(Error::InvalidUri(s.to_string()));
        }

        Ok(Uri {
            scheme,
            user,
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_uri() {
        let uri = Uri::from_str("sip:alice@atlanta.example.com:5060").unwrap();
        assert_eq!(uri.scheme, Scheme::Sip);
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host, "atlanta.example.com");
        assert_eq!(uri.port, Some(5060));
    }

    #[test]
    fn parses_host_only() {
        let uri = Uri::from_str("sips:proxy.example.com").unwrap();
        assert_eq!(uri.scheme, Scheme::Sips);
        assert!(uri.user.is_none());
        assert!(uri.port.is_none());
    }

    #[test]
    fn ignores_uri_parameters() {
        let uri = Uri::from_str("sip:bob@biloxi.example.com;transport=tcp").unwrap();
        assert_eq!(uri.host, "biloxi.example.com");
    }

    #[test]
    fn display_roundtrip() {
        let uri = Uri::sip("example.com").with_user("carol").with_port(5070);
        assert_eq!(uri.to_string(), "sip:carol@example.com:5070");
        assert_eq!(Uri::from_str(&uri.to_string()).unwrap(), uri);
    }

    #[test]
    fn rejects_bad_scheme() {
        assert!(Uri::from_str("http://example.com").is_err());
        assert!(Uri::from_str("sip:").is_err());
    }
}
