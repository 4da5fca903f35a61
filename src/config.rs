//! Configuration management for the Cargohold server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Default maximum assembled file size: 10 GiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Extensions accepted by INIT_UPLOAD when no override is configured
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    ".mp4", ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".webp", ".mov", ".avi", ".mkv",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Directory where chunk slots are staged before commit
    pub staging_dir: PathBuf,

    /// Upper bound on `total_chunks * chunk_size` declared at init
    pub max_file_size: u64,

    /// Allow-listed file extensions (lowercase, with leading dot)
    pub allowed_extensions: Vec<String>,

    /// How long terminal sessions are retained before eviction, in seconds
    pub retention_secs: u64,

    /// Idle timeout for non-terminal sessions, in seconds
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Static tokens as `token:user_id:username` triples
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: String,
    pub username: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8081,
            },
            storage: StorageConfig {
                endpoint: "http://localhost:9000".to_string(),
                bucket: "uploads".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
            },
            upload: UploadConfig::default(),
            auth: AuthConfig { tokens: Vec::new() },
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            staging_dir: PathBuf::from("./staging"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            retention_secs: 3600,
            idle_timeout_secs: 2 * 3600,
        }
    }
}

impl Config {
    /// Build configuration from the environment. Every field falls back to
    /// its default individually, so a partially configured environment
    /// keeps the variables it does set.
    pub fn from_env() -> Self {
        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8081".to_string())
                    .parse()
                    .unwrap_or(8081),
            },
            storage: StorageConfig {
                endpoint: env::var("S3_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:9000".to_string()),
                bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "uploads".to_string()),
                access_key: env::var("S3_ACCESS_KEY").unwrap_or_else(|_| "admin".to_string()),
                secret_key: env::var("S3_SECRET_KEY")
                    .unwrap_or_else(|_| "password123".to_string()),
                region: env::var("S3_REGION").ok(),
            },
            upload: UploadConfig {
                staging_dir: env::var("STAGING_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./staging")),
                max_file_size: env::var("MAX_FILE_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_MAX_FILE_SIZE),
                allowed_extensions: env::var("ALLOWED_EXTENSIONS")
                    .map(|v| parse_extensions(&v))
                    .unwrap_or_else(|_| UploadConfig::default().allowed_extensions),
                retention_secs: env::var("SESSION_RETENTION_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3600),
                idle_timeout_secs: env::var("SESSION_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2 * 3600),
            },
            auth: AuthConfig {
                tokens: env::var("AUTH_TOKENS")
                    .map(|v| parse_tokens(&v))
                    .unwrap_or_default(),
            },
        }
    }
}

/// Parse a comma-separated extension list, normalizing to `.ext` lowercase.
fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with('.') {
                s
            } else {
                format!(".{}", s)
            }
        })
        .collect()
}

/// Parse `token:user_id:username` triples separated by commas.
fn parse_tokens(raw: &str) -> Vec<TokenEntry> {
    raw.split(',')
        .filter_map(|entry| {
            let mut parts = entry.trim().splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(token), Some(user_id), Some(username))
                    if !token.is_empty() && !user_id.is_empty() =>
                {
                    Some(TokenEntry {
                        token: token.to_string(),
                        user_id: user_id.to_string(),
                        username: username.to_string(),
                    })
                }
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extensions_normalizes() {
        let exts = parse_extensions("mp4, .PDF ,png,");
        assert_eq!(exts, vec![".mp4", ".pdf", ".png"]);
    }

    #[test]
    fn test_parse_tokens() {
        let tokens = parse_tokens("tok1:user_1:alice,tok2:user_2:bob,garbage");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].token, "tok1");
        assert_eq!(tokens[1].username, "bob");
    }

    #[test]
    fn test_partial_env_keeps_set_variables() {
        env::set_var("SERVER_PORT", "9099");
        env::set_var("STAGING_DIR", "/tmp/cargohold-staging");
        env::remove_var("S3_ENDPOINT");
        env::remove_var("S3_BUCKET");

        let config = Config::from_env();
        assert_eq!(config.server.port, 9099);
        assert_eq!(config.upload.staging_dir, PathBuf::from("/tmp/cargohold-staging"));
        // Unset storage variables fall back individually
        assert_eq!(config.storage.endpoint, "http://localhost:9000");
        assert_eq!(config.storage.bucket, "uploads");

        env::remove_var("SERVER_PORT");
        env::remove_var("STAGING_DIR");
    }

    #[test]
    fn test_default_allow_list_covers_original_formats() {
        let config = Config::default();
        for ext in [".mp4", ".pdf", ".jpg", ".png"] {
            assert!(config.upload.allowed_extensions.iter().any(|e| e == ext));
        }
    }
}
