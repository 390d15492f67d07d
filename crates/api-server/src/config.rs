//! Process configuration, read from the environment once at bootstrap.

use std::path::PathBuf;

const DEFAULT_JWT_SECRET: &str = "dev-jwt-secret-change-me";
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 60 * 60 * 24 * 30;
const DEFAULT_PORT: u16 = 8080;

/// Known front-end origins for every Grid application, dev and prod.
/// Any other localhost origin is additionally allowed in development.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:3002",
    "http://localhost:3003",
    "http://localhost:3004",
    "http://localhost:3005",
    "https://smartgrid-dashboard.vercel.app",
    "https://teamgrid-frontend.vercel.app",
    "https://brandgrid-frontend.vercel.app",
    "https://callgrid-frontend.vercel.app",
    "https://salesgrid-frontend.vercel.app",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub port: u16,
    pub jwt_secret: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    /// Shared secret presented by sibling Grid applications for
    /// server-to-server provisioning. A full administrative credential.
    pub grid_apps_secret: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub allowed_origins: Vec<String>,
    pub mirror_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("SG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".sg-data"));
        let port = std::env::var("SG_PORT")
            .ok()
            .and_then(|raw| raw.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let jwt_secret =
            std::env::var("SG_JWT_SECRET").unwrap_or_else(|_| DEFAULT_JWT_SECRET.to_string());
        let access_ttl_seconds = env_ttl("SG_ACCESS_TOKEN_TTL_SECONDS", DEFAULT_ACCESS_TTL_SECONDS);
        let refresh_ttl_seconds =
            env_ttl("SG_REFRESH_TOKEN_TTL_SECONDS", DEFAULT_REFRESH_TTL_SECONDS);
        let grid_apps_secret = non_empty_env("GRID_APPS_API_SECRET");
        let stripe_webhook_secret = non_empty_env("STRIPE_WEBHOOK_SECRET");
        let allowed_origins = std::env::var("SG_ALLOWED_ORIGINS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(default_allowed_origins);
        let mirror_url = non_empty_env("TEAMGRID_MIRROR_URL");

        Self {
            data_dir,
            port,
            jwt_secret,
            access_ttl_seconds,
            refresh_ttl_seconds,
            grid_apps_secret,
            stripe_webhook_secret,
            allowed_origins,
            mirror_url,
        }
    }

    #[cfg(test)]
    pub fn for_tests(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            port: 0,
            jwt_secret: "test-jwt-secret".to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            grid_apps_secret: Some("grid-apps-test-secret".to_string()),
            stripe_webhook_secret: Some("whsec_test".to_string()),
            allowed_origins: default_allowed_origins(),
            mirror_url: None,
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    DEFAULT_ALLOWED_ORIGINS
        .iter()
        .map(|origin| origin.to_string())
        .collect()
}

fn env_ttl(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|ttl| *ttl > 0)
        .unwrap_or(default)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
