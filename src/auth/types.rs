//! Authentication types
//!
//! The user account model, sign-in credentials, and the normalized profile
//! record that every auth operation hands back to the web layer.

use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// A signed-in user account
///
/// Use `Arc<User>` for shared ownership; the auth façade hands out snapshots
/// of the session state, never mutable references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub uid: String,

    /// Email address (if available)
    pub email: Option<String>,

    /// Display name (if available)
    pub display_name: Option<String>,

    /// Photo URL (if available)
    pub photo_url: Option<String>,

    /// Phone number (if available)
    pub phone_number: Option<String>,

    /// Whether email is verified
    pub email_verified: bool,

    /// Whether the backend flagged this account as anonymous
    pub is_anonymous: bool,

    /// Identity provider of the account itself (always "firebase")
    pub provider_id: String,

    /// Provider IDs linked to this account (e.g. "password", "google.com")
    pub provider_data: Vec<String>,

    /// ID token (JWT) - internal use
    #[serde(skip)]
    pub(crate) id_token: Option<String>,

    /// Refresh token - internal use
    #[serde(skip)]
    pub(crate) refresh_token: Option<String>,

    /// Token expiration timestamp (seconds since epoch) - internal use
    #[serde(skip)]
    pub(crate) token_expiration: Option<i64>,
}

impl User {
    /// Whether this account should be reported as anonymous
    ///
    /// The backend keeps reporting `is_anonymous == false` for anonymous
    /// accounts that went through a profile update, while their provider
    /// list stays empty. An empty provider list therefore also counts as
    /// anonymous.
    pub fn effective_anonymous(&self) -> bool {
        self.is_anonymous || self.provider_data.is_empty()
    }

    /// Normalize into the caller-facing profile record
    ///
    /// The shape every sign-in-family operation, `currentUser`, and the
    /// auth-state stream resolve to.
    pub fn profile_value(&self) -> serde_json::Value {
        json!({
            "uid": self.uid,
            "displayName": self.display_name,
            "email": self.email,
            "phoneNumber": self.phone_number,
            "photoURL": self.photo_url,
            "providerId": self.provider_id,
            "providerData": self.provider_data,
            "isAnonymous": self.effective_anonymous(),
        })
    }
}

/// Sign-in credential
///
/// One variant per supported provider; the façade chooses the backend
/// endpoint and request shape from the variant.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Email and password credential
    EmailPassword {
        /// Email address
        email: String,
        /// Password
        password: String,
    },

    /// Google OAuth credential
    Google {
        /// Google Sign-In ID token
        id_token: Option<String>,
        /// Google Sign-In access token
        access_token: Option<String>,
    },

    /// Facebook OAuth credential
    Facebook {
        /// Facebook access token
        access_token: String,
    },

    /// Twitter OAuth 1.0a credential
    Twitter {
        /// Twitter OAuth token
        token: String,
        /// Twitter OAuth token secret
        secret: String,
    },

    /// Phone credential from a completed verification flow
    Phone {
        /// Verification session handle from `verify_phone_number`
        verification_id: String,
        /// SMS code entered by the user
        code: String,
    },
}

impl Credential {
    /// Get the provider ID for this credential
    pub fn provider_id(&self) -> &str {
        match self {
            Credential::EmailPassword { .. } => "password",
            Credential::Google { .. } => "google.com",
            Credential::Facebook { .. } => "facebook.com",
            Credential::Twitter { .. } => "twitter.com",
            Credential::Phone { .. } => "phone",
        }
    }

    /// Render the `postBody` form string for the IdP sign-in endpoint
    ///
    /// Only OAuth credentials have one; email/password and phone sign-in
    /// use dedicated endpoints.
    pub(crate) fn post_body(&self) -> Result<String, AuthError> {
        match self {
            Credential::Google {
                id_token,
                access_token,
            } => {
                // At least one token is required (error case first)
                if id_token.is_none() && access_token.is_none() {
                    return Err(AuthError::InvalidCredential(
                        "Google credential requires id_token or access_token".to_string(),
                    ));
                }
                let mut body = "providerId=google.com".to_string();
                if let Some(id_token) = id_token {
                    body.push_str(&format!("&id_token={id_token}"));
                }
                if let Some(access_token) = access_token {
                    body.push_str(&format!("&access_token={access_token}"));
                }
                Ok(body)
            }
            Credential::Facebook { access_token } => {
                Ok(format!("providerId=facebook.com&access_token={access_token}"))
            }
            Credential::Twitter { token, secret } => Ok(format!(
                "providerId=twitter.com&access_token={token}&oauth_token_secret={secret}"
            )),
            Credential::EmailPassword { .. } => Err(AuthError::InvalidCredential(
                "Use sign_in_with_email_and_password() for email/password auth".to_string(),
            )),
            Credential::Phone { .. } => Err(AuthError::InvalidCredential(
                "Use sign_in_with_verification_id() for phone auth".to_string(),
            )),
        }
    }
}

/// User profile update request
///
/// Pass None for fields that should not change.
#[derive(Debug, Default, Clone)]
pub struct UserProfile {
    /// Display name to update (None = no change)
    pub display_name: Option<String>,

    /// Photo URL to update (None = no change)
    pub photo_url: Option<String>,
}

/// Authentication result
///
/// Returned from every sign-in-family operation.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// The signed-in user
    pub user: Arc<User>,

    /// Provider that produced this sign-in
    pub provider_id: String,

    /// Whether the backend created a new account for this sign-in
    pub is_new_user: bool,
}

/// Outcome of a phone number verification request
#[derive(Debug, Clone)]
pub enum PhoneVerification {
    /// An SMS code was sent; the session handle completes the flow later
    CodeSent {
        /// Opaque verification session, passed back with the SMS code
        verification_id: String,
    },

    /// The backend verified the number instantly and completed sign-in
    Completed(AuthResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_user() -> User {
        User {
            uid: "user-1".to_string(),
            email: Some("test@example.com".to_string()),
            display_name: None,
            photo_url: None,
            phone_number: None,
            email_verified: false,
            is_anonymous: false,
            provider_id: "firebase".to_string(),
            provider_data: vec!["password".to_string()],
            id_token: None,
            refresh_token: None,
            token_expiration: None,
        }
    }

    #[test]
    fn test_profile_record_shape() {
        let user = base_user();
        let profile = user.profile_value();

        assert_eq!(profile["uid"], "user-1");
        assert_eq!(profile["email"], "test@example.com");
        assert_eq!(profile["displayName"], serde_json::Value::Null);
        assert_eq!(profile["providerId"], "firebase");
        assert_eq!(profile["providerData"], json!(["password"]));
        assert_eq!(profile["isAnonymous"], false);
    }

    #[test]
    fn test_empty_provider_list_is_anonymous() {
        // The backend keeps the anonymous flag false after a profile
        // update; the empty provider list must win.
        let mut user = base_user();
        user.is_anonymous = false;
        user.provider_data = vec![];

        assert!(user.effective_anonymous());
        assert_eq!(user.profile_value()["isAnonymous"], true);
    }

    #[test]
    fn test_backend_anonymous_flag_is_respected() {
        let mut user = base_user();
        user.is_anonymous = true;

        assert!(user.effective_anonymous());
    }

    #[test]
    fn test_google_credential_post_body() {
        let cred = Credential::Google {
            id_token: Some("idt".to_string()),
            access_token: Some("act".to_string()),
        };
        assert_eq!(
            cred.post_body().unwrap(),
            "providerId=google.com&id_token=idt&access_token=act"
        );
        assert_eq!(cred.provider_id(), "google.com");
    }

    #[test]
    fn test_google_credential_requires_a_token() {
        let cred = Credential::Google {
            id_token: None,
            access_token: None,
        };
        assert!(matches!(cred.post_body(), Err(AuthError::InvalidCredential(_))));
    }

    #[test]
    fn test_twitter_credential_post_body() {
        let cred = Credential::Twitter {
            token: "tok".to_string(),
            secret: "sec".to_string(),
        };
        assert_eq!(
            cred.post_body().unwrap(),
            "providerId=twitter.com&access_token=tok&oauth_token_secret=sec"
        );
    }

    #[test]
    fn test_phone_credential_has_no_post_body() {
        let cred = Credential::Phone {
            verification_id: "v".to_string(),
            code: "123456".to_string(),
        };
        assert_eq!(cred.provider_id(), "phone");
        assert!(matches!(cred.post_body(), Err(AuthError::InvalidCredential(_))));
    }

    #[test]
    fn test_user_serialization_skips_tokens() {
        let mut user = base_user();
        user.id_token = Some("secret-token".to_string());
        user.refresh_token = Some("secret-refresh".to_string());

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-token"));
        assert!(!json.contains("secret-refresh"));
        assert!(json.contains("user-1"));
    }
}
