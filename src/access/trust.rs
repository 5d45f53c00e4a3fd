//! Network-origin trust classification.
//!
//! A connection whose peer address falls inside a configured CIDR range, or
//! whose transport-resolved hostname matches a configured domain, is trusted
//! without any credential. The evaluator is a pure function of static
//! configuration; nothing here mutates after construction and nothing is
//! implicitly trusted (loopback included).

use anyhow::{Context, Result};
use ipnetwork::IpNetwork;

use super::identity::ConnectionOrigin;

/// Trust classification decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    Trusted,
    Untrusted,
}

#[derive(Debug, Clone)]
pub struct TrustEvaluator {
    networks: Vec<IpNetwork>,
    /// Lowercased domain patterns. A leading '.' matches any subdomain.
    domains: Vec<String>,
}

impl TrustEvaluator {
    /// Parse configured CIDR ranges and domain names.
    ///
    /// Returns an error if any CIDR string is invalid, so a typo in the trust
    /// set fails startup instead of silently trusting nobody.
    pub fn from_config(ranges: &[String], domains: &[String]) -> Result<Self> {
        let mut networks = Vec::new();
        for cidr in ranges {
            let network: IpNetwork = cidr
                .parse()
                .with_context(|| format!("Invalid trusted range CIDR: {}", cidr))?;
            networks.push(network);
        }
        let domains = domains.iter().map(|d| d.trim().to_ascii_lowercase()).filter(|d| !d.is_empty()).collect();
        Ok(Self { networks, domains })
    }

    /// Classify a connection origin against the configured trust set.
    pub fn classify(&self, origin: &ConnectionOrigin) -> Trust {
        for network in &self.networks {
            if network.contains(origin.ip) {
                tracing::trace!(ip = %origin.ip, network = %network, "origin trusted by range");
                return Trust::Trusted;
            }
        }
        if let Some(hostname) = origin.hostname.as_deref() {
            let hostname = hostname.to_ascii_lowercase();
            for domain in &self.domains {
                let hit = if let Some(suffix) = domain.strip_prefix('.') {
                    hostname.ends_with(suffix)
                } else {
                    hostname == *domain
                };
                if hit {
                    tracing::trace!(hostname = %hostname, domain = %domain, "origin trusted by domain");
                    return Trust::Trusted;
                }
            }
        }
        Trust::Untrusted
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.domains.is_empty()
    }
}
