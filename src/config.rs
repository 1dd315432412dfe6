//! Configuration for the agreement backend
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Convenios - institutional agreement tracking backend
#[derive(Parser, Debug, Clone)]
#[command(name = "convenios")]
#[command(about = "REST backend for agreements, weighted dimensions, indicators and tasks")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store fallback, insecure default JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "convenios")]
    pub mongodb_db: String,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "86400")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Directory where uploaded evidence files are stored
    #[arg(long, env = "EVIDENCE_DIR", default_value = "uploads/evidencias")]
    pub evidence_dir: PathBuf,

    /// Maximum accepted request body size for uploads, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Value of the Access-Control-Allow-Origin header
    #[arg(long, env = "CORS_ORIGIN", default_value = "*")]
    pub cors_origin: String,

    /// Name of an org unit to create at startup when none exists yet
    #[arg(long, env = "BOOTSTRAP_ORG_UNIT")]
    pub bootstrap_org_unit: Option<String>,

    /// Email of a registered user to promote to admin at startup
    #[arg(long, env = "BOOTSTRAP_ADMIN_EMAIL")]
    pub bootstrap_admin_email: Option<String>,
}

impl Args {
    /// Get effective JWT secret (uses a fixed secret in dev mode when unset)
    pub fn effective_jwt_secret(&self) -> Option<String> {
        match &self.jwt_secret {
            Some(secret) => Some(secret.clone()),
            None if self.dev_mode => {
                Some("dev-mode-secret-not-for-production-use-123456".to_string())
            }
            None => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.max_upload_bytes == 0 {
            return Err("MAX_UPLOAD_BYTES must be greater than zero".to_string());
        }

        if self.jwt_expiry_seconds == 0 {
            return Err("JWT_EXPIRY_SECONDS must be greater than zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_args() -> Args {
    Args::parse_from(["convenios", "--dev-mode"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_requires_secret() {
        let args = Args::parse_from(["convenios"]);
        assert!(args.validate().is_err());
        assert!(args.effective_jwt_secret().is_none());
    }

    #[test]
    fn test_dev_mode_defaults() {
        let args = test_args();
        assert!(args.validate().is_ok());
        assert!(args.effective_jwt_secret().is_some());
        assert_eq!(args.evidence_dir, PathBuf::from("uploads/evidencias"));
        assert_eq!(args.jwt_expiry_seconds, 86400);
    }

    #[test]
    fn test_explicit_secret_wins() {
        let args = Args::parse_from([
            "convenios",
            "--jwt-secret",
            "this-secret-is-at-least-32-chars-long",
        ]);
        assert!(args.validate().is_ok());
        assert_eq!(
            args.effective_jwt_secret().as_deref(),
            Some("this-secret-is-at-least-32-chars-long")
        );
    }
}
