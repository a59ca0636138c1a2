#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use ecocampus::{
    app::build_app,
    config::AppConfig,
    mail::{MailError, MailKind, Mailer},
    state::AppState,
    users::{credentials::CredentialStore, memory::MemoryUserStore},
};

#[derive(Debug, Clone)]
pub struct SentMail {
    pub kind: MailKind,
    pub to: String,
    pub token: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    fn record(&self, kind: MailKind, to: &str, token: &str) {
        self.sent.lock().unwrap().push(SentMail {
            kind,
            to: to.to_string(),
            token: token.to_string(),
        });
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification(&self, to: &str, token: &str) -> Result<(), MailError> {
        self.record(MailKind::Verification, to, token);
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError> {
        self.record(MailKind::PasswordReset, to, token);
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryUserStore>,
    pub mailer: Arc<RecordingMailer>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryUserStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::from_parts(
            AppConfig::for_tests(),
            CredentialStore::new(store.clone()),
            mailer.clone(),
        );
        Self {
            router: build_app(state),
            store,
            mailer,
        }
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        cookie: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let req = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request("POST", uri, Some(body), None).await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request("GET", uri, None, None).await
    }

    /// Mail goes out on a spawned task; give it a chance to run.
    pub async fn wait_for_mail(&self, count: usize) -> Vec<SentMail> {
        for _ in 0..50 {
            let sent = self.mailer.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.mailer.sent()
    }
}

pub fn set_cookie(res: &TestResponse) -> Option<String> {
    res.headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
