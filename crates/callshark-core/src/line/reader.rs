use std::net::IpAddr;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::LineError;
use super::layout;

static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(layout::IPV4_PATTERN).expect("valid IPv4 pattern"));
static IPV6_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(layout::IPV6_PATTERN).expect("valid IPv6 pattern"));

/// Whitespace-split view over one descriptor line.
pub struct LineReader<'a> {
    tokens: Vec<&'a str>,
}

impl<'a> LineReader<'a> {
    pub fn new(line: &'a str) -> Self {
        Self {
            tokens: line.split_whitespace().collect(),
        }
    }

    /// True when any token names one of the accepted transport protocols.
    pub fn has_allowed_protocol(&self) -> bool {
        self.tokens
            .iter()
            .any(|token| layout::ALLOWED_PROTOCOLS.contains(token))
    }

    pub fn require_len(&self, needed: usize) -> Result<(), LineError> {
        if self.tokens.len() < needed {
            return Err(LineError::TooShort {
                needed,
                actual: self.tokens.len(),
            });
        }
        Ok(())
    }

    pub fn token(&self, index: usize) -> Result<&'a str, LineError> {
        self.tokens
            .get(index)
            .copied()
            .ok_or(LineError::TooShort {
                needed: index + 1,
                actual: self.tokens.len(),
            })
    }

    pub fn read_number<T: FromStr>(
        &self,
        index: usize,
        field: &'static str,
    ) -> Result<T, LineError> {
        let token = self.token(index)?;
        token.parse().map_err(|_| LineError::InvalidNumber {
            field,
            token: token.to_string(),
        })
    }

    /// Read an address token. The IPv6 pattern is tried before IPv4 and only
    /// the matched prefix is kept, so zone suffixes like `%eth0` are ignored.
    pub fn read_address(&self, index: usize, field: &'static str) -> Result<IpAddr, LineError> {
        let token = self.token(index)?;
        let invalid = || LineError::InvalidAddress {
            field,
            token: token.to_string(),
        };
        let matched = IPV6_RE
            .find(token)
            .or_else(|| IPV4_RE.find(token))
            .ok_or_else(invalid)?;
        matched.as_str().parse().map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::LineReader;
    use crate::line::error::LineError;
    use std::net::IpAddr;

    #[test]
    fn protocol_token_anywhere_is_accepted() {
        assert!(LineReader::new("1 2 a -> b TCP").has_allowed_protocol());
        assert!(LineReader::new("1 SSL").has_allowed_protocol());
        assert!(!LineReader::new("1 2 a -> b DNS udp").has_allowed_protocol());
    }

    #[test]
    fn address_prefers_ipv6_and_keeps_prefix() {
        let reader = LineReader::new("fe80::1%eth0 192.168.0.10x ::ffff");
        let v6: IpAddr = "fe80::1".parse().unwrap();
        let v4: IpAddr = "192.168.0.10".parse().unwrap();
        assert_eq!(reader.read_address(0, "source").unwrap(), v6);
        assert_eq!(reader.read_address(1, "source").unwrap(), v4);
        assert_eq!(
            reader.read_address(2, "source").unwrap(),
            "::ffff".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn address_rejects_non_address_tokens() {
        let reader = LineReader::new("host.example 300.1.1.1");
        assert!(matches!(
            reader.read_address(0, "source"),
            Err(LineError::InvalidAddress { .. })
        ));
        assert!(matches!(
            reader.read_address(1, "destination"),
            Err(LineError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn read_number_reports_field() {
        let reader = LineReader::new("abc");
        let err = reader.read_number::<u64>(0, "size").unwrap_err();
        assert!(err.to_string().contains("size"));
    }

    #[test]
    fn missing_token_is_too_short() {
        let reader = LineReader::new("one two");
        assert_eq!(
            reader.token(5).unwrap_err(),
            LineError::TooShort {
                needed: 6,
                actual: 2
            }
        );
    }
}
