use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{AppConfig, SmtpConfig, SmtpEncryption};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("failed to build email message: {0}")]
    Build(String),
    #[error("failed to send email: {0}")]
    Send(String),
    #[error("mail configuration error: {0}")]
    Config(String),
}

/// Outbound notification channel for the one-time-token flows.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to: &str, token: &str) -> Result<(), MailError>;
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Verification,
    PasswordReset,
}

/// Sends on a background task. The caller's state change is already committed,
/// so a delivery failure is logged and otherwise ignored.
pub fn dispatch(mailer: Arc<dyn Mailer>, kind: MailKind, to: String, token: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let res = match kind {
            MailKind::Verification => mailer.send_verification(&to, &token).await,
            MailKind::PasswordReset => mailer.send_password_reset(&to, &token).await,
        };
        match res {
            Ok(()) => info!(email = %to, ?kind, "email dispatched"),
            Err(e) => error!(error = %e, email = %to, ?kind, "email dispatch failed"),
        }
    })
}

fn verification_link(base_url: &str, token: &str) -> String {
    format!("{}/verify-email?token={}", base_url.trim_end_matches('/'), token)
}

fn reset_link(base_url: &str, token: &str) -> String {
    format!("{}/reset-password?token={}", base_url.trim_end_matches('/'), token)
}

const REDACTED: &str = "<redacted>";

/// Records that a mail would have gone out; used when SMTP is not configured.
/// Tokens never reach the log.
pub struct LogMailer {
    base_url: String,
}

impl LogMailer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, to: &str, _token: &str) -> Result<(), MailError> {
        info!(email = %to, link = %verification_link(&self.base_url, REDACTED), "verification email (log only)");
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, _token: &str) -> Result<(), MailError> {
        info!(email = %to, link = %reset_link(&self.base_url, REDACTED), "password reset email (log only)");
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    base_url: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig, base_url: &str) -> Result<Self, MailError> {
        let from = format!("{} <{}>", cfg.from_name, cfg.from_email)
            .parse::<Mailbox>()
            .map_err(|e| MailError::Config(format!("invalid SMTP_FROM_EMAIL: {e}")))?;
        let credentials = Credentials::new(cfg.username.clone(), cfg.password.clone());
        let transport = match cfg.encryption {
            SmtpEncryption::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
                .map_err(|e| MailError::Config(format!("SMTP relay error: {e}")))?,
            SmtpEncryption::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                    .map_err(|e| MailError::Config(format!("SMTP starttls error: {e}")))?
            }
            SmtpEncryption::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host),
        }
        .port(cfg.port)
        .credentials(credentials)
        .build();

        Ok(Self {
            transport,
            from,
            base_url: base_url.to_string(),
        })
    }

    async fn send_html(&self, to: &str, subject: &str, html: String) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to
                .parse()
                .map_err(|e| MailError::Build(format!("invalid to address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Send(e.to_string()))?;
        Ok(())
    }
}

fn link_email(heading: &str, intro: &str, button: &str, url: &str, footer: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #2f6b3a;">{heading}</h1>
    <p>{intro}</p>
    <p style="text-align: center; margin: 30px 0;">
        <a href="{url}" style="background-color: #2f6b3a; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px;">{button}</a>
    </p>
    <p style="color: #666; font-size: 14px; word-break: break-all;">{url}</p>
    <p style="color: #999; font-size: 12px; margin-top: 40px;">{footer}</p>
</body>
</html>"#
    )
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(&self, to: &str, token: &str) -> Result<(), MailError> {
        let url = verification_link(&self.base_url, token);
        let html = link_email(
            "Welcome to EcoCampus",
            "Please confirm your email address to activate your account.",
            "Verify email",
            &url,
            "If you did not create an account, you can ignore this message.",
        );
        self.send_html(to, "Verify your EcoCampus account", html).await
    }

    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError> {
        let url = reset_link(&self.base_url, token);
        let html = link_email(
            "Reset your password",
            "Someone asked to reset the password for this account.",
            "Choose a new password",
            &url,
            "This link expires in 1 hour. If you did not ask for it, no action is needed.",
        );
        self.send_html(to, "Reset your EcoCampus password", html).await
    }
}

/// SMTP when configured, otherwise the log-only mailer. A configured but
/// unusable SMTP setup is a startup error.
pub fn from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match &config.smtp {
        Some(smtp) => {
            let mailer = SmtpMailer::new(smtp, &config.base_url)?;
            info!(host = %smtp.host, "using SMTP mailer");
            Ok(Arc::new(mailer))
        }
        None => {
            if config.production {
                warn!("SMTP not configured in production; emails will not be delivered");
            } else {
                info!("SMTP not configured; emails are only recorded in the log");
            }
            Ok(Arc::new(LogMailer::new(&config.base_url)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Failing {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl Mailer for Failing {
        async fn send_verification(&self, _to: &str, _token: &str) -> Result<(), MailError> {
            *self.attempts.lock().unwrap() += 1;
            Err(MailError::Send("connection refused".into()))
        }
        async fn send_password_reset(&self, _to: &str, _token: &str) -> Result<(), MailError> {
            *self.attempts.lock().unwrap() += 1;
            Err(MailError::Send("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn dispatch_swallows_delivery_failures() {
        let mailer = Arc::new(Failing::default());
        dispatch(mailer.clone(), MailKind::Verification, "a@x.com".into(), "t".into())
            .await
            .expect("task must not panic");
        assert_eq!(*mailer.attempts.lock().unwrap(), 1);
    }

    #[test]
    fn links_embed_token() {
        assert_eq!(
            verification_link("http://localhost:3000/", "abc"),
            "http://localhost:3000/verify-email?token=abc"
        );
        assert_eq!(
            reset_link("https://eco.example", "xyz"),
            "https://eco.example/reset-password?token=xyz"
        );
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let m = LogMailer::new("http://localhost:3000");
        assert!(m.send_verification("a@x.com", "t").await.is_ok());
        assert!(m.send_password_reset("a@x.com", "t").await.is_ok());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn log_mailer_keeps_tokens_out_of_the_log() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let m = LogMailer::new("http://localhost:3000");
        m.send_password_reset("a@x.com", "SECRET-RESET-TOKEN-123").await.unwrap();
        m.send_verification("a@x.com", "SECRET-VERIFY-TOKEN-456").await.unwrap();

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("password reset email (log only)"));
        assert!(out.contains("reset-password?token=<redacted>"));
        assert!(!out.contains("SECRET-RESET-TOKEN-123"));
        assert!(!out.contains("SECRET-VERIFY-TOKEN-456"));
    }

    fn smtp(from_email: &str) -> SmtpConfig {
        SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: "user".into(),
            password: "pass".into(),
            from_email: from_email.into(),
            from_name: "EcoCampus".into(),
            encryption: SmtpEncryption::None,
        }
    }

    #[test]
    fn broken_smtp_config_fails_startup() {
        let mut config = AppConfig::for_tests();
        config.smtp = Some(smtp("not an address"));
        assert!(from_config(&config).is_err());
    }

    #[tokio::test]
    async fn mailer_selection() {
        let mut config = AppConfig::for_tests();
        assert!(from_config(&config).is_ok());

        config.smtp = Some(smtp("noreply@eco.example"));
        assert!(from_config(&config).is_ok());
    }
}
