//! Auth method dispatch
//!
//! Translates auth bridge requests into façade calls and façade results
//! into response records. Every request runs in its own task and delivers
//! through its own responder, keyed by the caller's request id, so
//! concurrent sign-in calls cannot overwrite each other's completion.

use crate::auth::auth::Auth;
use crate::auth::types::{Credential, PhoneVerification, UserProfile};
use crate::bridge::message::{
    bool_arg, opt_str_arg, str_arg, u64_arg, BridgeRequest, Responder, ResponseSender,
};
use crate::error::BridgeError;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Dispatcher for the auth façade's method surface
#[derive(Clone)]
pub struct AuthBridge {
    inner: Arc<AuthBridgeInner>,
}

struct AuthBridgeInner {
    auth: Auth,
    tx: ResponseSender,
    teardown: CancellationToken,
    /// Cancellation handle of the active auth-state subscription, if any
    state_subscription: Mutex<Option<CancellationToken>>,
}

impl AuthBridge {
    pub(crate) fn new(auth: Auth, tx: ResponseSender, teardown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(AuthBridgeInner {
                auth,
                tx,
                teardown,
                state_subscription: Mutex::new(None),
            }),
        }
    }

    /// The wrapped auth façade
    pub fn auth(&self) -> &Auth {
        &self.inner.auth
    }

    /// Dispatch one request; the result arrives on the delivery channel
    ///
    /// Never blocks the caller: the backend round trip runs in its own
    /// task.
    pub fn dispatch(&self, request: BridgeRequest) {
        let bridge = self.clone();
        tokio::spawn(async move {
            bridge.handle(request).await;
        });
    }

    async fn handle(&self, request: BridgeRequest) {
        debug!(method = %request.method, id = %request.id, "auth request");
        let responder = Responder::new(self.inner.tx.clone(), request.id);

        match self.execute(&request.method, &request.args, &responder).await {
            Ok(Some(payload)) => responder.ok(payload),
            Ok(None) => {} // delivery owned by a streaming task
            Err(error) => responder.error(&error),
        }
    }

    async fn execute(
        &self,
        method: &str,
        args: &[Value],
        responder: &Responder,
    ) -> Result<Option<Value>, BridgeError> {
        let auth = &self.inner.auth;

        match method {
            "getIdToken" => {
                let force_refresh = args.first().and_then(Value::as_bool).unwrap_or(false);
                let token = auth.get_id_token(force_refresh).await?;
                Ok(Some(Value::String(token)))
            }
            "createUserWithEmailAndPassword" => {
                let email = str_arg(args, 0, "email")?;
                let password = str_arg(args, 1, "password")?;
                let result = auth
                    .create_user_with_email_and_password(email, password)
                    .await?;
                Ok(Some(result.user.profile_value()))
            }
            "signInWithEmailAndPassword" => {
                let email = str_arg(args, 0, "email")?;
                let password = str_arg(args, 1, "password")?;
                let result = auth.sign_in_with_email_and_password(email, password).await?;
                Ok(Some(result.user.profile_value()))
            }
            "signInAnonymously" => {
                let result = auth.sign_in_anonymously().await?;
                Ok(Some(result.user.profile_value()))
            }
            "signInWithGoogle" => {
                let credential = Credential::Google {
                    id_token: opt_str_arg(args, 0),
                    access_token: opt_str_arg(args, 1),
                };
                let result = auth.sign_in_with_credential(credential).await?;
                Ok(Some(result.user.profile_value()))
            }
            "signInWithFacebook" => {
                let credential = Credential::Facebook {
                    access_token: str_arg(args, 0, "accessToken")?,
                };
                let result = auth.sign_in_with_credential(credential).await?;
                Ok(Some(result.user.profile_value()))
            }
            "signInWithTwitter" => {
                let credential = Credential::Twitter {
                    token: str_arg(args, 0, "token")?,
                    secret: str_arg(args, 1, "secret")?,
                };
                let result = auth.sign_in_with_credential(credential).await?;
                Ok(Some(result.user.profile_value()))
            }
            "signInWithVerificationId" => {
                let verification_id = str_arg(args, 0, "verificationId")?;
                let code = str_arg(args, 1, "code")?;
                let result = auth
                    .sign_in_with_verification_id(verification_id, code)
                    .await?;
                Ok(Some(result.user.profile_value()))
            }
            "verifyPhoneNumber" => {
                let phone_number = str_arg(args, 0, "phoneNumber")?;
                let timeout_ms = u64_arg(args, 1, "timeoutMs")?;
                match auth.verify_phone_number(phone_number, timeout_ms).await? {
                    PhoneVerification::CodeSent { verification_id } => {
                        Ok(Some(Value::String(verification_id)))
                    }
                    PhoneVerification::Completed(result) => {
                        Ok(Some(result.user.profile_value()))
                    }
                }
            }
            "signOut" => {
                auth.sign_out().await;
                Ok(Some(Value::Null))
            }
            "setLanguageCode" => {
                auth.set_language_code(opt_str_arg(args, 0)).await;
                Ok(Some(Value::Null))
            }
            "setAuthStateChanged" => {
                let disable = bool_arg(args, 0, "disable")?;
                if disable {
                    self.disable_auth_state().await;
                    Ok(Some(Value::Null))
                } else {
                    self.enable_auth_state(responder.clone()).await;
                    Ok(None)
                }
            }
            "updateEmail" => {
                auth.update_email(str_arg(args, 0, "email")?).await?;
                Ok(Some(Value::Null))
            }
            "changePassword" => {
                auth.update_password(str_arg(args, 0, "password")?).await?;
                Ok(Some(Value::Null))
            }
            "updateProfile" => {
                let profile = UserProfile {
                    display_name: opt_str_arg(args, 0),
                    photo_url: opt_str_arg(args, 1),
                };
                auth.update_profile(profile).await?;
                Ok(Some(Value::Null))
            }
            "currentUser" => {
                let payload = match auth.current_user().await {
                    Some(user) => user.profile_value(),
                    None => Value::Bool(false),
                };
                Ok(Some(payload))
            }
            "sendEmailVerification" => {
                auth.send_email_verification().await?;
                Ok(Some(Value::Null))
            }
            "sendPasswordResetEmail" => {
                auth.send_password_reset_email(str_arg(args, 0, "email")?)
                    .await?;
                Ok(Some(Value::Null))
            }
            "reauthenticateWithCredential" => {
                let email = str_arg(args, 0, "email")?;
                let password = str_arg(args, 1, "password")?;
                auth.reauthenticate(email, password).await?;
                Ok(Some(Value::Null))
            }
            other => Err(BridgeError::UnknownMethod(other.to_string())),
        }
    }

    /// Start (or replace) the persistent auth-state subscription
    ///
    /// At most one is live; enabling again moves the stream onto the new
    /// request's responder.
    async fn enable_auth_state(&self, responder: Responder) {
        let cancel = self.inner.teardown.child_token();
        let previous = self
            .inner
            .state_subscription
            .lock()
            .await
            .replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let mut stream = self.inner.auth.auth_state_changes().await;
        tokio::spawn(async move {
            loop {
                let user = tokio::select! {
                    _ = cancel.cancelled() => return,
                    item = stream.next() => match item {
                        None => return,
                        Some(user) => user,
                    },
                };

                // Teardown check before delivery
                if cancel.is_cancelled() {
                    return;
                }
                let payload = match user {
                    Some(user) => user.profile_value(),
                    None => Value::Bool(false),
                };
                responder.ok_streamed(payload);
            }
        });
    }

    /// Stop the persistent auth-state subscription, if any
    async fn disable_auth_state(&self) {
        if let Some(active) = self.inner.state_subscription.lock().await.take() {
            active.cancel();
        }
    }

    /// Stop every streaming delivery owned by this dispatcher
    pub(crate) async fn teardown(&self) {
        self.disable_auth_state().await;
    }
}
