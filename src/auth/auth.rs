//! Authentication façade
//!
//! One-shot sign-in/profile operations over the Identity Toolkit REST API,
//! plus the in-memory session state and the auth-state broadcast stream
//! the bridge layer subscribes to.

use crate::auth::types::{AuthResult, Credential, PhoneVerification, User, UserProfile};
use crate::error::{AuthError, BridgeError};
use async_stream::stream;
use futures::Stream;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Global map of API keys to Auth instances
static AUTH_INSTANCES: Lazy<RwLock<HashMap<String, Auth>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

const IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com/v1";

/// Refresh the ID token when it expires within this window (seconds)
const TOKEN_REFRESH_WINDOW: i64 = 300;

/// Authentication instance
///
/// Each API key has at most one Auth instance (singleton pattern).
/// Use `Auth::get_auth(api_key)` to obtain or create an instance.
#[derive(Clone)]
pub struct Auth {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    api_key: String,
    identity_endpoint: String,
    token_endpoint: String,
    current_user: RwLock<Option<Arc<User>>>,
    language_code: RwLock<Option<String>>,
    http_client: reqwest::Client,
    state_tx: broadcast::Sender<Option<Arc<User>>>,
}

impl Auth {
    /// Get or create the Auth instance for the given API key
    ///
    /// Returns the existing instance if one exists for this API key,
    /// otherwise creates a new one.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use firebase_bridge::Auth;
    ///
    /// let auth = Auth::get_auth("YOUR_API_KEY").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_auth(api_key: impl Into<String>) -> Result<Self, BridgeError> {
        Self::get_auth_with_endpoints(api_key, IDENTITY_ENDPOINT, SECURE_TOKEN_ENDPOINT).await
    }

    /// Get or create an Auth instance against custom endpoints
    ///
    /// Points the façade at a non-default backend, e.g. the local auth
    /// emulator.
    pub async fn get_auth_with_endpoints(
        api_key: impl Into<String>,
        identity_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Result<Self, BridgeError> {
        let api_key = api_key.into();

        // Validate API key (error case first)
        if api_key.is_empty() {
            return Err(AuthError::ApiKeyNotConfigured.into());
        }

        let mut instances = AUTH_INSTANCES.write().await;

        if let Some(auth) = instances.get(&api_key) {
            return Ok(auth.clone());
        }

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to create HTTP client: {e}")))?;

        // Broadcast channel for auth state changes (capacity: 16)
        let (state_tx, _) = broadcast::channel(16);

        let auth = Auth {
            inner: Arc::new(AuthInner {
                api_key: api_key.clone(),
                identity_endpoint: identity_endpoint.into(),
                token_endpoint: token_endpoint.into(),
                current_user: RwLock::new(None),
                language_code: RwLock::new(None),
                http_client,
                state_tx,
            }),
        };

        instances.insert(api_key, auth.clone());

        Ok(auth)
    }

    /// Get the API key for this Auth instance
    pub fn api_key(&self) -> &str {
        &self.inner.api_key
    }

    /// Get the current signed-in user
    ///
    /// Returns None if no user is currently signed in.
    pub async fn current_user(&self) -> Option<Arc<User>> {
        self.inner.current_user.read().await.clone()
    }

    /// Sign out the current user
    ///
    /// Always succeeds and clears the current user.
    pub async fn sign_out(&self) {
        self.set_current_user(None).await;
    }

    /// Set the locale sent with template-producing backend calls
    ///
    /// None reverts to the backend's default language.
    pub async fn set_language_code(&self, code: Option<String>) {
        *self.inner.language_code.write().await = code;
    }

    /// Get the currently configured locale
    pub async fn language_code(&self) -> Option<String> {
        self.inner.language_code.read().await.clone()
    }

    /// Subscribe to authentication state changes
    ///
    /// The stream immediately yields the current state upon subscription,
    /// then yields again on every sign-in and sign-out.
    pub async fn auth_state_changes(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Option<Arc<User>>> + Send>> {
        let initial_user = self.current_user().await;
        let mut rx = self.inner.state_tx.subscribe();

        Box::pin(stream! {
            yield initial_user;

            loop {
                let user = match rx.recv().await {
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Ok(u) => u,
                };
                yield user;
            }
        })
    }

    /// Sign in with email and password
    pub async fn sign_in_with_email_and_password(
        &self,
        email: impl AsRef<str>,
        password: impl AsRef<str>,
    ) -> Result<AuthResult, BridgeError> {
        let email = email.as_ref();
        let password = password.as_ref();

        // Validate inputs (error case first)
        if email.is_empty() {
            return Err(AuthError::InvalidEmail.into());
        }
        if password.is_empty() {
            return Err(AuthError::InvalidPassword.into());
        }

        let response = self
            .post_identity(
                "signInWithPassword",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true
                }),
            )
            .await?;

        self.complete_sign_in(response, "password", false).await
    }

    /// Create a new account with email and password
    pub async fn create_user_with_email_and_password(
        &self,
        email: impl AsRef<str>,
        password: impl AsRef<str>,
    ) -> Result<AuthResult, BridgeError> {
        let email = email.as_ref();
        let password = password.as_ref();

        // Validate inputs (error case first)
        if email.is_empty() {
            return Err(AuthError::InvalidEmail.into());
        }
        if password.is_empty() {
            return Err(AuthError::InvalidPassword.into());
        }

        let response = self
            .post_identity(
                "signUp",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true
                }),
            )
            .await?;

        self.complete_sign_in(response, "password", true).await
    }

    /// Sign in anonymously
    ///
    /// Creates a temporary account that can later be linked to a permanent
    /// one.
    pub async fn sign_in_anonymously(&self) -> Result<AuthResult, BridgeError> {
        let response = self
            .post_identity("signUp", serde_json::json!({ "returnSecureToken": true }))
            .await?;

        self.complete_sign_in(response, "anonymous", true).await
    }

    /// Sign in with an OAuth credential (Google, Facebook, Twitter)
    pub async fn sign_in_with_credential(
        &self,
        credential: Credential,
    ) -> Result<AuthResult, BridgeError> {
        let provider_id = credential.provider_id().to_string();
        let post_body = credential.post_body()?;

        let response = self
            .post_identity(
                "signInWithIdp",
                serde_json::json!({
                    "postBody": post_body,
                    "requestUri": "http://localhost",
                    "returnSecureToken": true,
                    "returnIdpCredential": true
                }),
            )
            .await?;

        let is_new_user = response
            .get("isNewUser")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.complete_sign_in(response, &provider_id, is_new_user)
            .await
    }

    /// Complete a phone verification flow with the SMS code
    ///
    /// With no signed-in user the credential signs one in; with a current
    /// user it attaches the verified number to that account instead.
    pub async fn sign_in_with_verification_id(
        &self,
        verification_id: impl AsRef<str>,
        code: impl AsRef<str>,
    ) -> Result<AuthResult, BridgeError> {
        let verification_id = verification_id.as_ref();
        let code = code.as_ref();

        // Validate inputs (error case first)
        if verification_id.is_empty() {
            return Err(AuthError::InvalidVerificationSession.into());
        }
        if code.is_empty() {
            return Err(AuthError::InvalidVerificationCode.into());
        }

        let mut body = serde_json::json!({
            "sessionInfo": verification_id,
            "code": code,
            "returnSecureToken": true
        });

        // An existing session turns this into a phone-number update
        if let Some(user) = self.current_user().await {
            if let Some(id_token) = &user.id_token {
                body["idToken"] = serde_json::json!(id_token);
            }
        }

        let response = self.post_identity("signInWithPhoneNumber", body).await?;
        let is_new_user = response
            .get("isNewUser")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.complete_sign_in(response, "phone", is_new_user).await
    }

    /// Start a phone number verification flow
    ///
    /// Resolves to a verification session handle once the SMS code is on
    /// its way, or to a completed sign-in when the backend verifies the
    /// number instantly. `timeout_ms` bounds the backend round trip; zero
    /// keeps the client default.
    pub async fn verify_phone_number(
        &self,
        phone_number: impl AsRef<str>,
        timeout_ms: u64,
    ) -> Result<PhoneVerification, BridgeError> {
        let phone_number = phone_number.as_ref();

        // Validate input (error case first)
        if phone_number.is_empty() {
            return Err(AuthError::InvalidCredential("Phone number is empty".to_string()).into());
        }

        let url = format!(
            "{}/accounts:sendVerificationCode?key={}",
            self.inner.identity_endpoint, self.inner.api_key
        );

        let mut request = self
            .inner
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "phoneNumber": phone_number }));
        if timeout_ms > 0 {
            request = request.timeout(std::time::Duration::from_millis(timeout_ms));
        }

        let response = request.send().await?;
        let body = Self::parse_identity_response(response).await?;

        let Some(session_info) = body.get("sessionInfo").and_then(|v| v.as_str()) else {
            return Err(BridgeError::internal(
                "Verification response carried no session handle",
            ));
        };

        Ok(PhoneVerification::CodeSent {
            verification_id: session_info.to_string(),
        })
    }

    /// Get the current user's ID token
    ///
    /// Refreshes through the secure-token endpoint when forced or when the
    /// cached token is about to expire, and stores the refreshed tokens on
    /// the session.
    pub async fn get_id_token(&self, force_refresh: bool) -> Result<String, BridgeError> {
        // Caller-context error: no session, no backend call
        let Some(user) = self.current_user().await else {
            return Err(AuthError::NoSignedInUser.into());
        };
        let Some(token) = &user.id_token else {
            return Err(AuthError::UserTokenExpired.into());
        };

        let needs_refresh = force_refresh
            || match user.token_expiration {
                Some(expiration) => chrono::Utc::now().timestamp() >= expiration - TOKEN_REFRESH_WINDOW,
                None => false,
            };
        if !needs_refresh {
            return Ok(token.clone());
        }

        let Some(refresh_token) = &user.refresh_token else {
            return Err(AuthError::UserTokenExpired.into());
        };

        let url = format!(
            "{}/token?key={}",
            self.inner.token_endpoint, self.inner.api_key
        );
        let response = self
            .inner
            .http_client
            .post(&url)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token
            }))
            .send()
            .await?;
        let body = Self::parse_identity_response(response).await?;

        let Some(new_token) = body.get("id_token").and_then(|v| v.as_str()) else {
            return Err(AuthError::UserTokenExpired.into());
        };
        let new_refresh = body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(3600);

        // Store the refreshed tokens without waking state listeners
        let mut user = (*user).clone();
        user.id_token = Some(new_token.to_string());
        if new_refresh.is_some() {
            user.refresh_token = new_refresh;
        }
        user.token_expiration = Some(chrono::Utc::now().timestamp() + expires_in);
        self.replace_current_user(Arc::new(user)).await;

        Ok(new_token.to_string())
    }

    /// Update the current user's email address
    pub async fn update_email(&self, new_email: impl AsRef<str>) -> Result<(), BridgeError> {
        let new_email = new_email.as_ref();

        // Validate email (error case first)
        if new_email.is_empty() || !new_email.contains('@') {
            return Err(AuthError::InvalidEmail.into());
        }

        let id_token = self.get_id_token(false).await?;
        self.post_identity(
            "update",
            serde_json::json!({
                "idToken": id_token,
                "email": new_email,
                "returnSecureToken": true
            }),
        )
        .await?;

        self.mutate_current_user(|user| user.email = Some(new_email.to_string()))
            .await;
        Ok(())
    }

    /// Update the current user's password
    pub async fn update_password(&self, new_password: impl AsRef<str>) -> Result<(), BridgeError> {
        let new_password = new_password.as_ref();

        // Validate password (error case first)
        if new_password.is_empty() {
            return Err(AuthError::InvalidPassword.into());
        }

        let id_token = self.get_id_token(false).await?;
        self.post_identity(
            "update",
            serde_json::json!({
                "idToken": id_token,
                "password": new_password,
                "returnSecureToken": true
            }),
        )
        .await?;
        Ok(())
    }

    /// Update the current user's display name and/or photo URL
    ///
    /// Fields left as None are not changed. Note that a profile update on
    /// an anonymous account makes the backend drop its anonymous flag; the
    /// normalized profile record compensates (see
    /// [`User::effective_anonymous`]).
    pub async fn update_profile(&self, profile: UserProfile) -> Result<(), BridgeError> {
        let id_token = self.get_id_token(false).await?;

        let mut body = serde_json::json!({
            "idToken": id_token,
            "returnSecureToken": true
        });
        if let Some(display_name) = &profile.display_name {
            body["displayName"] = serde_json::json!(display_name);
        }
        if let Some(photo_url) = &profile.photo_url {
            body["photoUrl"] = serde_json::json!(photo_url);
        }

        self.post_identity("update", body).await?;

        self.mutate_current_user(|user| {
            if profile.display_name.is_some() {
                user.display_name = profile.display_name.clone();
            }
            if profile.photo_url.is_some() {
                user.photo_url = profile.photo_url.clone();
            }
        })
        .await;
        Ok(())
    }

    /// Reauthenticate the current user with an email/password credential
    ///
    /// Required before sensitive operations when the session is stale. The
    /// refreshed tokens are stored on the session; a credential resolving
    /// to a different account is rejected.
    pub async fn reauthenticate(
        &self,
        email: impl AsRef<str>,
        password: impl AsRef<str>,
    ) -> Result<(), BridgeError> {
        // Caller-context error: no session, no backend call
        let Some(current) = self.current_user().await else {
            return Err(AuthError::NoSignedInUser.into());
        };

        let result = self
            .sign_in_with_email_and_password(email, password)
            .await?;
        if result.user.uid != current.uid {
            // Roll the session back to the original account
            self.set_current_user(Some(current)).await;
            return Err(AuthError::UserMismatch.into());
        }
        Ok(())
    }

    /// Send a verification email to the current user
    pub async fn send_email_verification(&self) -> Result<(), BridgeError> {
        let id_token = self.get_id_token(false).await?;
        self.post_identity(
            "sendOobCode",
            serde_json::json!({
                "requestType": "VERIFY_EMAIL",
                "idToken": id_token
            }),
        )
        .await?;
        Ok(())
    }

    /// Send a password reset email
    ///
    /// Succeeds even for unregistered addresses to prevent email
    /// enumeration.
    pub async fn send_password_reset_email(
        &self,
        email: impl AsRef<str>,
    ) -> Result<(), BridgeError> {
        let email = email.as_ref();

        // Validate email (error case first)
        if email.is_empty() {
            return Err(AuthError::InvalidEmail.into());
        }

        self.post_identity(
            "sendOobCode",
            serde_json::json!({
                "requestType": "PASSWORD_RESET",
                "email": email
            }),
        )
        .await?;
        Ok(())
    }

    /// Internal: POST to an Identity Toolkit action endpoint
    async fn post_identity(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, BridgeError> {
        let url = format!(
            "{}/accounts:{}?key={}",
            self.inner.identity_endpoint, action, self.inner.api_key
        );

        let mut request = self.inner.http_client.post(&url).json(&body);
        if let Some(code) = self.language_code().await {
            request = request.header("X-Firebase-Locale", code);
        }

        let response = request.send().await?;
        Self::parse_identity_response(response).await
    }

    /// Internal: map an Identity Toolkit response to JSON or an AuthError
    async fn parse_identity_response(
        response: reqwest::Response,
    ) -> Result<serde_json::Value, BridgeError> {
        // Handle error responses first
        if !response.status().is_success() {
            let error_body: serde_json::Value = response.json().await?;
            let error_message = error_body["error"]["message"]
                .as_str()
                .unwrap_or("UNKNOWN_ERROR");
            // Codes arrive as "CODE" or "CODE : human readable detail"
            let code = error_message
                .split([' ', ':'])
                .next()
                .unwrap_or(error_message);
            return Err(AuthError::from_error_code(code).into());
        }

        Ok(response.json().await?)
    }

    /// Internal: parse a sign-in response and install the session
    async fn complete_sign_in(
        &self,
        response: serde_json::Value,
        provider_id: &str,
        is_new_user: bool,
    ) -> Result<AuthResult, BridgeError> {
        let data: SignInResponse = serde_json::from_value(response)?;
        let user = Arc::new(data.into_user(provider_id));

        debug!(uid = %user.uid, provider = provider_id, "sign-in completed");
        self.set_current_user(Some(Arc::clone(&user))).await;

        Ok(AuthResult {
            user,
            provider_id: provider_id.to_string(),
            is_new_user,
        })
    }

    /// Internal: set current user and broadcast the state change
    pub(crate) async fn set_current_user(&self, user: Option<Arc<User>>) {
        let mut current = self.inner.current_user.write().await;
        *current = user.clone();
        drop(current);

        // Ignore error if no listeners
        let _ = self.inner.state_tx.send(user);
    }

    /// Internal: swap session state without waking state listeners
    async fn replace_current_user(&self, user: Arc<User>) {
        *self.inner.current_user.write().await = Some(user);
    }

    /// Internal: apply an in-place edit to the current user, if any
    async fn mutate_current_user(&self, edit: impl FnOnce(&mut User)) {
        let mut current = self.inner.current_user.write().await;
        if let Some(user) = current.as_ref() {
            let mut updated = (**user).clone();
            edit(&mut updated);
            *current = Some(Arc::new(updated));
        }
    }
}

/// Identity Toolkit sign-in response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    phone_number: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

impl SignInResponse {
    fn into_user(self, provider_id: &str) -> User {
        // expires_in is a stringified number of seconds
        let token_expiration = self
            .expires_in
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .map(|seconds| chrono::Utc::now().timestamp() + seconds)
            .or_else(|| Some(chrono::Utc::now().timestamp() + 3600));

        let provider_data = if provider_id == "anonymous" {
            vec![]
        } else {
            vec![provider_id.to_string()]
        };

        User {
            uid: self.local_id,
            email: self.email,
            display_name: self.display_name,
            photo_url: self.photo_url,
            phone_number: self.phone_number,
            email_verified: false,
            is_anonymous: provider_id == "anonymous",
            provider_id: "firebase".to_string(),
            provider_data,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            token_expiration,
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("api_key", &"<redacted>")
            .finish()
    }
}
