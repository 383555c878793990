//! DNS resolution capability.
//!
//! Checks never talk to `hickory` directly; they hold an `Arc<dyn Resolver>`
//! so the session layer can inject the system resolver in production and a
//! zone-map mock in tests. Every lookup distinguishes a definitive
//! not-found/NXDOMAIN outcome from a transient failure, and the system
//! implementation bounds each query with the configured timeout.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::Duration,
};

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver,
    config::ResolverOpts,
    name_server::TokioConnectionProvider,
};
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during a lookup.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The name definitively does not exist, or carries no records of the
    /// requested type.
    #[error("no records found for {0}")]
    NotFound(String),

    /// The query failed for network or resolver reasons and might succeed on
    /// retry.
    #[error("DNS lookup failed: {0}")]
    Lookup(#[from] hickory_resolver::ResolveError),

    /// A transient failure reported by a non-system resolver implementation.
    #[error("DNS lookup failed: {0}")]
    Failure(String),
}

impl ResolveError {
    /// Returns `true` for a definitive negative answer, as opposed to a
    /// transient failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// One MX record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MxRecord {
    pub host: String,
    pub preference: u16,
}

/// The lookup capability injected into checks.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Reverse (PTR) lookup for an address.
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError>;

    /// A records for a name.
    async fn lookup_a(&self, host: &str) -> Result<Vec<Ipv4Addr>, ResolveError>;

    /// AAAA records for a name.
    async fn lookup_aaaa(&self, host: &str) -> Result<Vec<Ipv6Addr>, ResolveError>;

    /// MX records for a domain.
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, ResolveError>;
}

/// Resolver tuning.
#[derive(Clone, Debug, Deserialize)]
pub struct DnsConfig {
    /// Per-query timeout in seconds (default: 5). An unbounded lookup must
    /// never stall a connection.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Queries attempted per lookup before giving up (default: 2).
    #[serde(default = "default_attempts")]
    pub attempts: usize,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_attempts() -> usize {
    2
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            attempts: default_attempts(),
        }
    }
}

/// [`Resolver`] backed by the system DNS configuration.
#[derive(Debug)]
pub struct SystemResolver {
    resolver: TokioResolver,
}

impl SystemResolver {
    /// Creates a resolver with default tuning.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new() -> Result<Self, ResolveError> {
        Self::with_config(&DnsConfig::default())
    }

    /// Creates a resolver with the given tuning.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be initialized.
    pub fn with_config(config: &DnsConfig) -> Result<Self, ResolveError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);
        opts.attempts = config.attempts;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }

    fn classify(name: &str, err: hickory_resolver::ResolveError) -> ResolveError {
        if err.is_no_records_found() || err.is_nx_domain() {
            ResolveError::NotFound(name.to_owned())
        } else {
            ResolveError::Lookup(err)
        }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => Ok(lookup.iter().map(|ptr| ptr.0.to_utf8()).collect()),
            Err(err) => Err(Self::classify(&ip.to_string(), err)),
        }
    }

    async fn lookup_a(&self, host: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        match self.resolver.ipv4_lookup(host).await {
            Ok(lookup) => Ok(lookup.iter().map(|a| a.0).collect()),
            Err(err) => Err(Self::classify(host, err)),
        }
    }

    async fn lookup_aaaa(&self, host: &str) -> Result<Vec<Ipv6Addr>, ResolveError> {
        match self.resolver.ipv6_lookup(host).await {
            Ok(lookup) => Ok(lookup.iter().map(|aaaa| aaaa.0).collect()),
            Err(err) => Err(Self::classify(host, err)),
        }
    }

    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, ResolveError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|mx| MxRecord {
                    host: mx.exchange().to_utf8(),
                    preference: mx.preference(),
                })
                .collect()),
            Err(err) => Err(Self::classify(domain, err)),
        }
    }
}
