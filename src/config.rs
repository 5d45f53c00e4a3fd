//! Configuration objects for the access core.
//!
//! Everything the engine needs is carried in explicit structs handed to each
//! component at construction; nothing reads the environment after startup.
//! `from_env` exists for the binary entry point and is the only place that
//! touches environment variables.

use serde::Deserialize;

/// Bind settings for the serving surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub http_port: u16,
    pub data_root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { http_port: 7125, data_root: "data".to_string() }
    }
}

/// Access-control configuration: trust set, source selection and token TTLs.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Source consulted when a login request names none. "local" or "directory".
    pub default_source: String,
    /// CIDR ranges whose connections are trusted without credentials.
    #[serde(default)]
    pub trusted_ranges: Vec<String>,
    /// Domain names (suffix match when prefixed with '.') trusted without credentials.
    #[serde(default)]
    pub trusted_domains: Vec<String>,
    /// Advertised through the info probe as `login_required` (once at least
    /// one user exists) so clients know to demand a login up front.
    #[serde(default)]
    pub force_logins: bool,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub directory: Option<DirectoryConfig>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            default_source: "local".to_string(),
            trusted_ranges: Vec::new(),
            trusted_domains: Vec::new(),
            force_logins: false,
            jwt: JwtConfig::default(),
            directory: None,
        }
    }
}

/// Signed-token settings. The signing secret itself is not configuration; it
/// is generated on first start and persisted in the record store.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub issuer: String,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "gatehouse".to_string(),
            access_ttl_seconds: 3600,            // 1 hour
            refresh_ttl_seconds: 90 * 24 * 3600, // 90 days
        }
    }
}

/// Remote directory (LDAP-like) settings. The wire client is a collaborator
/// injected at construction; this only carries what the provider needs.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { url: "ldap://localhost:389".to_string(), timeout_seconds: 10 }
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default()
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(p) = std::env::var("GATEHOUSE_HTTP_PORT") {
            if let Ok(port) = p.parse::<u16>() { cfg.http_port = port; }
        }
        if let Ok(root) = std::env::var("GATEHOUSE_DATA_ROOT") { cfg.data_root = root; }
        cfg
    }
}

impl AccessConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(s) = std::env::var("GATEHOUSE_DEFAULT_SOURCE") { cfg.default_source = s; }
        cfg.trusted_ranges = env_list("GATEHOUSE_TRUSTED_RANGES");
        cfg.trusted_domains = env_list("GATEHOUSE_TRUSTED_DOMAINS");
        if let Ok(s) = std::env::var("GATEHOUSE_FORCE_LOGINS") {
            cfg.force_logins = matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(s) = std::env::var("GATEHOUSE_JWT_ISSUER") { cfg.jwt.issuer = s; }
        if let Ok(url) = std::env::var("GATEHOUSE_DIRECTORY_URL") {
            let mut dir = DirectoryConfig { url, ..Default::default() };
            if let Ok(t) = std::env::var("GATEHOUSE_DIRECTORY_TIMEOUT_SECS") {
                if let Ok(secs) = t.parse::<u64>() { dir.timeout_seconds = secs; }
            }
            cfg.directory = Some(dir);
        }
        cfg
    }
}
