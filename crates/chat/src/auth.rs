use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use somnia_storage::KeyValueStore;

use crate::error::{
    AuthError, AuthResult, AuthTransportSnafu, BlankCredentialSnafu, BuildAuthClientSnafu,
    EncodeUserSnafu, MissingTokenSnafu, RejectedSnafu, UserStorageSnafu,
};
use crate::message::now_timestamp;

pub const CURRENT_USER_KEY: &str = "currentUser";
pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";

/// The signed-in user, mirrored under `currentUser`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub logged_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Validated credentials; construction rejects blank fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub password: String,
}

impl Credentials {
    pub fn login(username: &str, password: &str) -> AuthResult<Self> {
        let username = username.trim();
        ensure!(
            !username.is_empty(),
            BlankCredentialSnafu {
                stage: "credentials-login",
                field: "username",
            }
        );
        ensure!(
            !password.trim().is_empty(),
            BlankCredentialSnafu {
                stage: "credentials-login",
                field: "password",
            }
        );

        Ok(Self {
            username: username.to_string(),
            email: None,
            password: password.to_string(),
        })
    }

    pub fn register(username: &str, email: &str, password: &str) -> AuthResult<Self> {
        let email = email.trim();
        ensure!(
            !email.is_empty(),
            BlankCredentialSnafu {
                stage: "credentials-register",
                field: "email",
            }
        );

        let mut credentials = Self::login(username, password)?;
        credentials.email = Some(email.to_string());
        Ok(credentials)
    }

    pub fn is_registration(&self) -> bool {
        self.email.is_some()
    }
}

/// What a successful login or registration hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: String,
}

pub type AuthFuture = Pin<Box<dyn Future<Output = AuthResult<AuthGrant>> + Send + 'static>>;

pub trait AuthBackend: Send + Sync {
    fn login(&self, credentials: Credentials) -> AuthFuture;
    fn register(&self, credentials: Credentials) -> AuthFuture;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: serde_json::Value,
}

/// Talks to the backend's `/auth/*` routes.
#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAuthBackend {
    pub fn new(base_url: impl Into<String>) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context(BuildAuthClientSnafu {
                stage: "auth-build-client",
            })?;

        Ok(Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn post(&self, path: &'static str, credentials: Credentials) -> AuthFuture {
        let client = self.client.clone();
        let url = format!("{}{path}", self.base_url);
        Box::pin(async move { request_token(client, url, credentials).await })
    }
}

impl AuthBackend for HttpAuthBackend {
    fn login(&self, credentials: Credentials) -> AuthFuture {
        self.post(LOGIN_PATH, credentials)
    }

    fn register(&self, credentials: Credentials) -> AuthFuture {
        self.post(REGISTER_PATH, credentials)
    }
}

async fn request_token(
    client: reqwest::Client,
    url: String,
    credentials: Credentials,
) -> AuthResult<AuthGrant> {
    let response = client
        .post(&url)
        .json(&credentials)
        .send()
        .await
        .context(AuthTransportSnafu {
            stage: "auth-send",
            url: url.clone(),
        })?;

    let status = response.status();
    let body = response.text().await.context(AuthTransportSnafu {
        stage: "auth-read-body",
        url: url.clone(),
    })?;

    if !status.is_success() {
        return RejectedSnafu {
            stage: "auth-status",
            status: status.as_u16(),
            detail: error_detail(&body),
        }
        .fail();
    }

    let token = serde_json::from_str::<TokenResponse>(&body)
        .ok()
        .and_then(|response| response.access_token.or(response.token))
        .filter(|token| !token.is_empty());

    match token {
        Some(token) => Ok(AuthGrant { token }),
        None => MissingTokenSnafu {
            stage: "auth-parse-token",
        }
        .fail(),
    }
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorResponse { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "no details".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Holds at most one current user and mirrors it to the store.
pub struct AuthSession<S> {
    store: S,
    backend: Arc<dyn AuthBackend>,
    user: Option<User>,
    loading: bool,
}

impl<S: KeyValueStore> AuthSession<S> {
    pub fn new(store: S, backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            store,
            backend,
            user: None,
            loading: true,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn current_user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Starts the backend call matching `credentials`; hand the outcome to `accept`.
    ///
    /// The returned future owns what it needs, so callers can drive it on
    /// another runtime while the session stays where it is.
    pub fn request(&self, credentials: &Credentials) -> AuthFuture {
        if credentials.is_registration() {
            self.backend.register(credentials.clone())
        } else {
            self.backend.login(credentials.clone())
        }
    }

    /// Restores the persisted user; a malformed record is removed.
    pub fn init(&mut self) {
        if !self.loading {
            return;
        }

        self.user = match self.store.get(CURRENT_USER_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<User>(&raw) {
                Ok(user) if !user.username.trim().is_empty() => Some(user),
                Ok(_) | Err(_) => {
                    tracing::warn!("removing malformed current user record");
                    if let Err(error) = self.store.remove(CURRENT_USER_KEY) {
                        tracing::warn!(error = %error, "failed to remove current user record");
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read current user record");
                None
            }
        };

        self.loading = false;
    }

    /// Makes the granted user current and persists it.
    pub fn accept(&mut self, credentials: Credentials, grant: AuthGrant) -> AuthResult<&User> {
        let now = now_timestamp();
        let registered_at = credentials.is_registration().then(|| now.clone());
        let user = User {
            username: credentials.username,
            email: credentials.email,
            logged_at: now,
            registered_at,
            token: Some(grant.token),
        };

        let encoded = serde_json::to_string(&user).context(EncodeUserSnafu {
            stage: "auth-accept-encode",
        })?;
        self.store
            .set(CURRENT_USER_KEY, &encoded)
            .context(UserStorageSnafu {
                stage: "auth-accept-persist",
            })?;

        tracing::info!(username = %user.username, "signed in");
        self.loading = false;
        Ok(&*self.user.insert(user))
    }

    pub fn logout(&mut self) -> AuthResult<()> {
        self.store
            .remove(CURRENT_USER_KEY)
            .context(UserStorageSnafu {
                stage: "auth-logout",
            })?;

        if let Some(user) = self.user.take() {
            tracing::info!(username = %user.username, "signed out");
        }
        Ok(())
    }
}

impl AuthError {
    /// Short text for the login form.
    pub fn user_message(&self) -> String {
        match self {
            Self::BlankCredential { field, .. } => format!("Please enter your {field}."),
            Self::Rejected { detail, .. } => detail.clone(),
            Self::AuthTransport { .. } | Self::BuildAuthClient { .. } => {
                "Could not reach the server. Please try again.".to_string()
            }
            Self::MissingToken { .. } => "The server returned an unexpected response.".to_string(),
            Self::EncodeUser { .. } | Self::UserStorage { .. } => {
                "Could not save your session on this device.".to_string()
            }
        }
    }
}
