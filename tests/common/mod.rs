use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header::SET_COOKIE, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use opsportal::access::Role;
use opsportal::config::AppConfig;
use opsportal::db;
use opsportal::lifecycle::accounts::{self, Registration};
use opsportal::notify::{NotificationEvent, Notifier};
use opsportal::routes;
use opsportal::state::AppState;
use opsportal::storage::ObjectStorage;
use opsportal::store::MemoryStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const COOKIE_NAME: &str = "portal_session";

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(
        &self,
        key: &str,
        expires_in: Duration,
        _content_disposition: Option<String>,
    ) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "memory".to_string(),
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        session_ttl_hours: 24,
        session_cookie_name: COOKIE_NAME.to_string(),
        session_cookie_secure: false,
        session_cookie_domain: None,
        download_token_secret: "test-secret".to_string(),
        download_token_issuer: "test-issuer".to_string(),
        download_token_audience: "test-download".to_string(),
        download_token_expiry_minutes: 15,
        invitation_expiry_days: 7,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: "test-bucket".to_string(),
        notification_webhook_url: None,
        notification_webhook_timeout_secs: 10,
    }
}

/// The full router over the in-memory store, with the notification queue
/// kept for assertions instead of a dispatcher.
pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    events: Mutex<UnboundedReceiver<NotificationEvent>>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let (notifier, events) = Notifier::channel();
        let state = AppState::new(
            test_config(),
            Arc::new(MemoryStore::new()),
            storage_for_state,
            notifier,
        );
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            events: Mutex::new(events),
        })
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    /// Everything queued since the last call.
    #[allow(dead_code)]
    pub async fn drain_events(&self) -> Vec<NotificationEvent> {
        let mut receiver = self.events.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn insert_user(&self, email: &str, password: &str, role: Role) -> Result<Uuid> {
        let user = accounts::provision(
            self.state.store.as_ref(),
            Registration {
                email: email.to_string(),
                password: password.to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                role: Some(role),
            },
        )
        .await
        .map_err(|err| anyhow!("failed to insert user: {err}"))?;
        Ok(user.id)
    }

    /// Logs in and returns the opaque token from the session cookie.
    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        session_cookie(&response).context("login response carried no session cookie")
    }

    /// Inserts a user with `role` and logs them in.
    #[allow(dead_code)]
    pub async fn user_with_token(&self, email: &str, role: Role) -> Result<(Uuid, String)> {
        let password = "correct horse battery";
        let id = self.insert_user(email, password, role).await?;
        let token = self.login_token(email, password).await?;
        Ok((id, token))
    }

    pub async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.json_request(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.json_request(Method::PATCH, path, payload, token).await
    }

    async fn json_request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body))?).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    #[allow(dead_code)]
    pub async fn get_with_cookie(&self, path: &str, token: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header("cookie", format!("{COOKIE_NAME}={token}"))
            .body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        self.send(builder.body(Body::empty())?).await
    }

    #[allow(dead_code)]
    pub async fn upload_document(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/documents")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.send(request).await
    }
}

/// Value of the session cookie set by `response`, if any.
pub fn session_cookie(response: &hyper::Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.to_string())
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn json_body<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).context("response body was not the expected JSON")
}
