//! Envelope address and client hostname forms.
//!
//! SMTP clients identify themselves with either a DNS name or an address
//! literal (`[1.2.3.4]`, `[IPv6:beef::1]`), and envelope senders may be the
//! empty null sender used for bounces. The DNS policy checks branch on those
//! forms, so they are parsed here once, strictly, and never panic on
//! malformed input.

use std::{
    fmt::{self, Display},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use thiserror::Error;

/// The hostname a client declared in EHLO/HELO.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeclaredHost {
    /// A DNS name.
    Name(String),
    /// A well-formed bracketed address literal.
    Literal(IpAddr),
    /// Bracketed, but not a parseable address.
    MalformedLiteral(String),
}

impl DeclaredHost {
    /// Classify a raw EHLO/HELO argument.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let Some(inner) = raw
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        else {
            return Self::Name(raw.to_owned());
        };

        if let Some(v6) = inner.strip_prefix("IPv6:") {
            return v6.parse::<Ipv6Addr>().map_or_else(
                |_| Self::MalformedLiteral(raw.to_owned()),
                |addr| Self::Literal(IpAddr::V6(addr)),
            );
        }

        inner.parse::<Ipv4Addr>().map_or_else(
            |_| Self::MalformedLiteral(raw.to_owned()),
            |addr| Self::Literal(IpAddr::V4(addr)),
        )
    }
}

impl Display for DeclaredHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Literal(IpAddr::V4(addr)) => write!(f, "[{addr}]"),
            Self::Literal(IpAddr::V6(addr)) => write!(f, "[IPv6:{addr}]"),
            Self::MalformedLiteral(raw) => f.write_str(raw),
        }
    }
}

/// A parsed, non-null envelope address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvelopeAddress {
    pub local_part: String,
    pub domain: String,
}

impl EnvelopeAddress {
    /// Whether the domain part is a bracketed address literal rather than a
    /// DNS name.
    #[must_use]
    pub fn domain_is_literal(&self) -> bool {
        self.domain.starts_with('[')
    }
}

impl Display for EnvelopeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("malformed address: no '@' separator")]
    MissingSeparator,

    #[error("malformed address: empty local part")]
    EmptyLocalPart,

    #[error("malformed address: empty domain")]
    EmptyDomain,
}

/// Split an envelope sender into local part and domain.
///
/// Returns `Ok(None)` for the empty string, the null sender used by bounce
/// messages.
///
/// # Errors
///
/// Any non-empty address without an `@`, or with an empty side, is malformed.
pub fn parse_envelope(raw: &str) -> Result<Option<EnvelopeAddress>, AddressError> {
    if raw.is_empty() {
        return Ok(None);
    }

    let (local_part, domain) = raw.rsplit_once('@').ok_or(AddressError::MissingSeparator)?;
    if local_part.is_empty() {
        return Err(AddressError::EmptyLocalPart);
    }
    if domain.is_empty() {
        return Err(AddressError::EmptyDomain);
    }

    Ok(Some(EnvelopeAddress {
        local_part: local_part.to_owned(),
        domain: domain.to_owned(),
    }))
}

/// Case-insensitive domain name equality, ignoring one optional trailing dot
/// on either side.
#[must_use]
pub fn fqdn_eq(left: &str, right: &str) -> bool {
    let left = left.strip_suffix('.').unwrap_or(left);
    let right = right.strip_suffix('.').unwrap_or(right);
    left.eq_ignore_ascii_case(right)
}
