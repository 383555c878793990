//! DNS-backed identity consistency checks.
//!
//! Three anti-spoofing checks run against the connection's DNS state:
//! reverse-DNS agreement with the EHLO hostname, MX presence for the envelope
//! sender's domain, and forward confirmation of the EHLO hostname against the
//! remote address. A transient resolution failure is treated the same as a
//! negative answer: traffic that cannot be positively confirmed is rejected.

use std::net::IpAddr;

use async_trait::async_trait;

use super::{Check, CheckContext, CheckFailure, CheckResult};
use crate::address::{DeclaredHost, fqdn_eq, parse_envelope};

/// Requires the remote address's reverse-DNS name to match the EHLO
/// hostname.
///
/// An address literal in EHLO fails unconditionally: a literal can never
/// match a name. Both sides are compared case-insensitively with one optional
/// trailing dot stripped.
pub struct MatchingRdns;

#[async_trait]
impl Check for MatchingRdns {
    fn name(&self) -> &'static str {
        "require_matching_rdns"
    }

    async fn evaluate(&self, ctx: &CheckContext) -> CheckResult {
        let declared = match DeclaredHost::parse(&ctx.declared_hostname) {
            DeclaredHost::Literal(_) | DeclaredHost::MalformedLiteral(_) => {
                return CheckResult::fail(CheckFailure::LiteralHostname);
            }
            DeclaredHost::Name(name) => name,
        };

        let Some(rdns) = ctx.reverse_name().await else {
            return CheckResult::fail(CheckFailure::NoReverseName(ctx.remote_addr));
        };

        if fqdn_eq(rdns, &declared) {
            CheckResult::pass()
        } else {
            CheckResult::fail(CheckFailure::ReverseNameMismatch {
                rdns: rdns.to_owned(),
                declared,
            })
        }
    }
}

/// Requires the envelope sender's domain to have at least one MX record.
///
/// The null sender always passes: bounces have no domain to validate. A
/// literal-address sender domain always fails, indistinguishable from a
/// missing MX by design.
pub struct SenderMx;

#[async_trait]
impl Check for SenderMx {
    fn name(&self) -> &'static str {
        "require_mx_record"
    }

    async fn evaluate(&self, ctx: &CheckContext) -> CheckResult {
        let addr = match parse_envelope(&ctx.sender) {
            Ok(None) => return CheckResult::pass(),
            Ok(Some(addr)) => addr,
            Err(_) => return CheckResult::fail(CheckFailure::MalformedSender(ctx.sender.clone())),
        };

        if addr.domain_is_literal() {
            return CheckResult::fail(CheckFailure::LiteralSenderDomain(addr.domain));
        }

        match ctx.resolver.lookup_mx(&addr.domain).await {
            // A lone "." exchanger still counts as presence.
            Ok(records) if !records.is_empty() => CheckResult::pass(),
            Ok(_) => CheckResult::fail(CheckFailure::NoMxRecords(addr.domain)),
            Err(err) if err.is_not_found() => {
                CheckResult::fail(CheckFailure::NoMxRecords(addr.domain))
            }
            Err(err) => CheckResult::fail(CheckFailure::Unresolvable(err.to_string())),
        }
    }
}

/// Requires the EHLO hostname to resolve back to the connecting address.
///
/// A well-formed address literal passes iff it equals the remote address; a
/// malformed literal fails. A DNS name passes iff the remote address appears
/// in the union of its A and AAAA records.
pub struct MatchingEhlo;

#[async_trait]
impl Check for MatchingEhlo {
    fn name(&self) -> &'static str {
        "require_matching_ehlo"
    }

    async fn evaluate(&self, ctx: &CheckContext) -> CheckResult {
        let remote = ctx.remote_addr.ip();

        let declared = match DeclaredHost::parse(&ctx.declared_hostname) {
            DeclaredHost::Literal(declared) => {
                return if declared == remote {
                    CheckResult::pass()
                } else {
                    CheckResult::fail(CheckFailure::LiteralMismatch { declared, remote })
                };
            }
            DeclaredHost::MalformedLiteral(raw) => {
                return CheckResult::fail(CheckFailure::MalformedLiteral(raw));
            }
            DeclaredHost::Name(name) => name,
        };

        let a = ctx.resolver.lookup_a(&declared).await;
        let aaaa = ctx.resolver.lookup_aaaa(&declared).await;
        let (a, aaaa) = match (a, aaaa) {
            (Ok(a), Ok(aaaa)) => (a, aaaa),
            (Err(err), _) | (_, Err(err)) => {
                return if err.is_not_found() {
                    CheckResult::fail(CheckFailure::NoForwardRecords(declared))
                } else {
                    CheckResult::fail(CheckFailure::Unresolvable(err.to_string()))
                };
            }
        };

        if a.is_empty() && aaaa.is_empty() {
            return CheckResult::fail(CheckFailure::NoForwardRecords(declared));
        }

        let confirmed = match remote {
            IpAddr::V4(remote) => a.contains(&remote),
            IpAddr::V6(remote) => aaaa.contains(&remote),
        };

        if confirmed {
            CheckResult::pass()
        } else {
            CheckResult::fail(CheckFailure::ForwardMismatch { declared, remote })
        }
    }
}

/// Look one of the built-in DNS checks up by its directive name.
#[must_use]
pub fn by_name(name: &str) -> Option<Box<dyn Check>> {
    match name {
        "require_matching_rdns" => Some(Box::new(MatchingRdns)),
        "require_mx_record" => Some(Box::new(SenderMx)),
        "require_matching_ehlo" => Some(Box::new(MatchingEhlo)),
        _ => None,
    }
}
