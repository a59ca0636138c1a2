use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::mail::{self, LogMailer, Mailer};
use crate::users::credentials::CredentialStore;
use crate::users::repo::PgUserStore;

/// Per-process handles shared by every request. Built once in `main`,
/// torn down by [`AppState::shutdown`].
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: CredentialStore,
    pub mailer: Arc<dyn Mailer>,
    db: Option<PgPool>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let mailer = mail::from_config(&config)?;

        let Some(url) = config.database_url.clone() else {
            warn!("DATABASE_URL not set; using the in-memory user store");
            return Ok(Self::from_parts(config, CredentialStore::in_memory(), mailer));
        };

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await
            .context("connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;
        info!("database ready");

        let users = CredentialStore::new(Arc::new(PgUserStore::new(db.clone())));
        Ok(Self {
            config: Arc::new(config),
            users,
            mailer,
            db: Some(db),
        })
    }

    pub fn from_parts(config: AppConfig, users: CredentialStore, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config: Arc::new(config),
            users,
            mailer,
            db: None,
        }
    }

    /// In-memory store, log mailer, fixed test secrets.
    pub fn fake() -> Self {
        let config = AppConfig::for_tests();
        let mailer = Arc::new(LogMailer::new(&config.base_url));
        Self::from_parts(config, CredentialStore::in_memory(), mailer)
    }

    pub async fn shutdown(&self) {
        if let Some(db) = &self.db {
            db.close().await;
            info!("database pool closed");
        }
    }
}
