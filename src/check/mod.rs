//! Stateless policy check framework.
//!
//! A check is a pure function of a [`CheckContext`]: it never mutates session
//! state, and evaluating the same context twice yields the same result. The
//! session layer builds one context per connection, runs its configured
//! [`Pipeline`] after the client has identified itself, and maps a failing
//! [`CheckResult`] to whatever protocol response its policy calls for.

pub mod dns;

use std::{fmt::Debug, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::dns::Resolver;

/// Immutable per-connection facts handed to every check.
pub struct CheckContext {
    /// The address the client is actually connecting from.
    pub remote_addr: SocketAddr,
    /// The raw EHLO/HELO argument, possibly an address literal.
    pub declared_hostname: String,
    /// The envelope sender; empty means the null sender used by bounces.
    pub sender: String,
    /// Shared lookup capability.
    pub resolver: Arc<dyn Resolver>,
    /// Connection-scoped span all check logging attaches to.
    pub span: tracing::Span,
    /// Reverse-DNS name, resolved at most once per connection.
    rdns: OnceCell<Option<String>>,
}

impl CheckContext {
    #[must_use]
    pub fn new(
        remote_addr: SocketAddr,
        declared_hostname: impl Into<String>,
        sender: impl Into<String>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        let span = tracing::info_span!("connection", remote = %remote_addr);
        Self {
            remote_addr,
            declared_hostname: declared_hostname.into(),
            sender: sender.into(),
            resolver,
            span,
            rdns: OnceCell::new(),
        }
    }

    /// The connection's reverse-DNS name.
    ///
    /// The PTR lookup runs on first use and is memoized for the lifetime of
    /// the context, so every check sharing this connection observes the same
    /// answer without re-issuing the query. A failed or empty lookup is
    /// remembered as no name.
    pub async fn reverse_name(&self) -> Option<&str> {
        self.rdns
            .get_or_init(|| async {
                match self.resolver.lookup_ptr(self.remote_addr.ip()).await {
                    Ok(names) => names.into_iter().next(),
                    Err(err) => {
                        tracing::debug!(
                            parent: &self.span,
                            "reverse lookup for {} failed: {err}",
                            self.remote_addr.ip()
                        );
                        None
                    }
                }
            })
            .await
            .as_deref()
    }
}

impl Debug for CheckContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckContext")
            .field("remote_addr", &self.remote_addr)
            .field("declared_hostname", &self.declared_hostname)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// Why a check rejected the connection. Detailed enough to log and, at the
/// session layer's discretion, report to the remote peer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CheckFailure {
    #[error("no reverse DNS name for {0}")]
    NoReverseName(SocketAddr),

    #[error("reverse DNS name {rdns} does not match EHLO hostname {declared}")]
    ReverseNameMismatch { rdns: String, declared: String },

    #[error("an address literal was used in EHLO instead of a hostname")]
    LiteralHostname,

    #[error("malformed address literal in EHLO: {0}")]
    MalformedLiteral(String),

    #[error("EHLO address literal {declared} does not match the remote address {remote}")]
    LiteralMismatch {
        declared: std::net::IpAddr,
        remote: std::net::IpAddr,
    },

    #[error("no A or AAAA records for EHLO hostname {0}")]
    NoForwardRecords(String),

    #[error("EHLO hostname {declared} does not resolve to {remote}")]
    ForwardMismatch {
        declared: String,
        remote: std::net::IpAddr,
    },

    #[error("malformed envelope sender: {0}")]
    MalformedSender(String),

    #[error("sender domain is an address literal: {0}")]
    LiteralSenderDomain(String),

    #[error("no MX records for sender domain {0}")]
    NoMxRecords(String),

    /// An inability to verify is not distinguished from a negative answer:
    /// the checks fail closed.
    #[error("DNS resolution failed: {0}")]
    Unresolvable(String),
}

/// Outcome of one check. An empty `reason` is a pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckResult {
    pub reason: Option<CheckFailure>,
}

impl CheckResult {
    #[must_use]
    pub const fn pass() -> Self {
        Self { reason: None }
    }

    #[must_use]
    pub const fn fail(reason: CheckFailure) -> Self {
        Self {
            reason: Some(reason),
        }
    }

    #[must_use]
    pub const fn is_pass(&self) -> bool {
        self.reason.is_none()
    }
}

/// One stateless check, addressable by its directive name.
#[async_trait]
pub trait Check: Send + Sync {
    /// The configuration directive the check is wired under.
    fn name(&self) -> &'static str;

    /// Evaluate the connection. Side-effect free apart from logging.
    async fn evaluate(&self, ctx: &CheckContext) -> CheckResult;
}

/// An ordered sequence of checks, run until the first failure.
#[derive(Default)]
pub struct Pipeline {
    checks: Vec<Box<dyn Check>>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, check: impl Check + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check in order, stopping at the first failure.
    pub async fn evaluate(&self, ctx: &CheckContext) -> CheckResult {
        for check in &self.checks {
            let result = check.evaluate(ctx).await;
            if let Some(reason) = &result.reason {
                tracing::debug!(
                    parent: &ctx.span,
                    check = check.name(),
                    "check failed: {reason}"
                );
                return result;
            }

            tracing::trace!(parent: &ctx.span, check = check.name(), "check passed");
        }

        CheckResult::pass()
    }
}
