//! Inbound/outbound port pairs for protocol listeners.
//!
//! A mapping is written either as a single port (`"8443"`, both sides equal)
//! or as `"in:out"` (`"80:8080"`). The inbound port is the one bound on the
//! overlay network; the outbound port is where the supervised process listens
//! on localhost.

use std::fmt;

use thiserror::Error;

/// Errors produced while parsing a port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortMapError {
    /// The value is neither `port` nor `in:out`, or a token is not a port number.
    #[error("invalid port mapping '{value}': {reason}")]
    InvalidFormat {
        /// The rejected input.
        value: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// An `{inbound, outbound}` port pair with a listener-specific default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    inbound: u16,
    outbound: u16,
    explicitly_set: bool,
    default_inbound: u16,
    default_outbound: u16,
}

impl PortMapping {
    /// Create a mapping that resolves to `inbound:outbound` until a value is parsed.
    pub const fn with_default(inbound: u16, outbound: u16) -> Self {
        Self {
            inbound,
            outbound,
            explicitly_set: false,
            default_inbound: inbound,
            default_outbound: outbound,
        }
    }

    /// Parse `value` on top of a default pair.
    pub fn parse(value: &str, default: (u16, u16)) -> Result<Self, PortMapError> {
        let mut mapping = Self::with_default(default.0, default.1);
        mapping.set(value)?;
        Ok(mapping)
    }

    /// Apply a configuration string to this mapping.
    ///
    /// An empty string resets to the default pair without marking the mapping
    /// as explicitly set. On error the mapping is left untouched.
    pub fn set(&mut self, value: &str) -> Result<(), PortMapError> {
        if value.is_empty() {
            self.inbound = self.default_inbound;
            self.outbound = self.default_outbound;
            return Ok(());
        }

        let (inbound, outbound) = match value.split(':').collect::<Vec<_>>().as_slice() {
            [port] => {
                let port = parse_port(value, port, "port")?;
                (port, port)
            }
            [inbound, outbound] => (
                parse_port(value, inbound, "in port")?,
                parse_port(value, outbound, "out port")?,
            ),
            _ => {
                return Err(PortMapError::InvalidFormat {
                    value: value.to_string(),
                    reason: "expected 'port' or 'in:out'".to_string(),
                });
            }
        };

        self.inbound = inbound;
        self.outbound = outbound;
        self.explicitly_set = true;
        Ok(())
    }

    /// Port bound on the overlay network.
    pub fn inbound(&self) -> u16 {
        self.inbound
    }

    /// Port of the local upstream.
    pub fn outbound(&self) -> u16 {
        self.outbound
    }

    /// Whether a non-empty value has been parsed into this mapping.
    pub fn is_explicitly_set(&self) -> bool {
        self.explicitly_set
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.inbound, self.outbound)
    }
}

fn parse_port(value: &str, token: &str, which: &str) -> Result<u16, PortMapError> {
    token.parse::<u16>().map_err(|_| PortMapError::InvalidFormat {
        value: value.to_string(),
        reason: format!("invalid {which} '{token}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_port() {
        let mapping = PortMapping::parse("8443", (443, 8080)).unwrap();
        assert_eq!(mapping.inbound(), 8443);
        assert_eq!(mapping.outbound(), 8443);
        assert!(mapping.is_explicitly_set());
    }

    #[test]
    fn test_in_out_pair() {
        let mapping = PortMapping::parse("80:8080", (1, 2)).unwrap();
        assert_eq!(mapping.inbound(), 80);
        assert_eq!(mapping.outbound(), 8080);
    }

    #[test]
    fn test_empty_uses_default() {
        let mapping = PortMapping::parse("", (53, 53)).unwrap();
        assert_eq!((mapping.inbound(), mapping.outbound()), (53, 53));
        assert!(!mapping.is_explicitly_set());
    }

    #[test]
    fn test_invalid_values_leave_mapping_unchanged() {
        let mut mapping = PortMapping::with_default(80, 8080);
        mapping.set("9000:9001").unwrap();

        for bad in ["abc", "80:xyz", "1:2:3", ":80", "80:", "70000"] {
            let err = mapping.set(bad).unwrap_err();
            assert!(matches!(err, PortMapError::InvalidFormat { .. }), "{bad}");
            assert_eq!(mapping.inbound(), 9000);
            assert_eq!(mapping.outbound(), 9001);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(PortMapping::with_default(443, 8080).to_string(), "443:8080");
        assert_eq!(PortMapping::parse("53", (1, 1)).unwrap().to_string(), "53:53");
    }

    #[test]
    fn test_error_mentions_bad_token() {
        let err = PortMapping::parse("80:xyz", (0, 0)).unwrap_err();
        assert!(err.to_string().contains("xyz"));
    }
}
