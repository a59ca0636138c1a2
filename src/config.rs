use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpEncryption {
    Tls,
    StartTls,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub encryption: SmtpEncryption,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs the server on the in-process store.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    /// Marks the session cookie `secure`.
    pub production: bool,
    /// Prefix for links embedded in outgoing email.
    pub base_url: String,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok();
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "ecocampus".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "ecocampus-users".into()),
        };
        let production = std::env::var("APP_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);
        let base_url =
            std::env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());

        Ok(Self {
            database_url,
            jwt,
            production,
            base_url,
            smtp: SmtpConfig::from_env()?,
        })
    }

    /// Configuration for tests and local tooling; never reads the environment.
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
            },
            production: false,
            base_url: "http://localhost:3000".into(),
            smtp: None,
        }
    }
}

impl SmtpConfig {
    /// Returns `Ok(None)` when `SMTP_HOST` is unset.
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        let port = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".into())
            .parse::<u16>()
            .context("invalid SMTP_PORT")?;
        let encryption = match std::env::var("SMTP_ENCRYPTION")
            .unwrap_or_else(|_| "starttls".into())
            .to_lowercase()
            .as_str()
        {
            "tls" => SmtpEncryption::Tls,
            "starttls" => SmtpEncryption::StartTls,
            "none" => SmtpEncryption::None,
            other => anyhow::bail!(
                "invalid SMTP_ENCRYPTION value: {other}; use 'tls', 'starttls' or 'none'"
            ),
        };

        Ok(Some(Self {
            host,
            port,
            username: std::env::var("SMTP_USERNAME").context("SMTP_USERNAME must be set")?,
            password: std::env::var("SMTP_PASSWORD").context("SMTP_PASSWORD must be set")?,
            from_email: std::env::var("SMTP_FROM_EMAIL")
                .context("SMTP_FROM_EMAIL must be set")?,
            from_name: std::env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "EcoCampus".into()),
            encryption,
        }))
    }
}
