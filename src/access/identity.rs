use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Backend responsible for verifying a username/password pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    Local,
    Directory,
}

impl AuthSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthSource::Local => "local",
            AuthSource::Directory => "directory",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "local" => Some(AuthSource::Local),
            "directory" => Some(AuthSource::Directory),
            _ => None,
        }
    }
}

/// Precedence level a resolved identity carries. Ordering matters:
/// trusted > api_key > user > anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Anonymous,
    User,
    ApiKey,
    Trusted,
}

/// The answer to "as whom is this caller acting?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Identity {
    /// Network origin matched the configured trust set; no credential involved.
    Trusted,
    /// Caller presented the current shared API key.
    ApiKey,
    /// Caller proved a user credential (token, oneshot or login).
    User { username: String, source: AuthSource },
    Anonymous,
}

impl Identity {
    pub fn tier(&self) -> Tier {
        match self {
            Identity::Trusted => Tier::Trusted,
            Identity::ApiKey => Tier::ApiKey,
            Identity::User { .. } => Tier::User,
            Identity::Anonymous => Tier::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Identity::Anonymous)
    }

    /// Username when the identity is user-backed.
    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::User { username, .. } => Some(username.as_str()),
            _ => None,
        }
    }

    /// Display name used in responses and logs. User tiers report their
    /// username; the credential-less tiers report synthetic markers.
    pub fn display_name(&self) -> &str {
        match self {
            Identity::Trusted => "_trusted_user_",
            Identity::ApiKey => "_api_key_user_",
            Identity::User { username, .. } => username.as_str(),
            Identity::Anonymous => "_anonymous_",
        }
    }
}

/// Where a connection came from, as reported by the transport. The resolved
/// hostname is optional; the evaluator never performs DNS itself.
#[derive(Debug, Clone)]
pub struct ConnectionOrigin {
    pub ip: IpAddr,
    pub hostname: Option<String>,
}

impl ConnectionOrigin {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip, hostname: None }
    }

    pub fn with_hostname(ip: IpAddr, hostname: impl Into<String>) -> Self {
        Self { ip, hostname: Some(hostname.into()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering() {
        assert!(Tier::Trusted > Tier::ApiKey);
        assert!(Tier::ApiKey > Tier::User);
        assert!(Tier::User > Tier::Anonymous);
    }

    #[test]
    fn source_parse_roundtrip() {
        assert_eq!(AuthSource::parse("local"), Some(AuthSource::Local));
        assert_eq!(AuthSource::parse("directory"), Some(AuthSource::Directory));
        assert_eq!(AuthSource::parse("ldap"), None);
        assert_eq!(AuthSource::Directory.as_str(), "directory");
    }

    #[test]
    fn identity_serde_tags_tier() {
        let id = Identity::User { username: "alice".into(), source: AuthSource::Local };
        let v = serde_json::to_value(&id).unwrap();
        assert_eq!(v["tier"], "user");
        assert_eq!(v["username"], "alice");
        assert_eq!(v["source"], "local");
    }
}
