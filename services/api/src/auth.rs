//! Authentication: Google sign-in verification and the internal session
//! token used by both the HTTP routes and the WebSocket handshake.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("credential verification failed: {0}")]
    Verification(String),
}

/// The authenticated user a verified token resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Issues and verifies the session tokens carried by clients.
pub trait Authenticator: Send + Sync {
    fn issue(&self, identity: &Identity) -> Result<String, AuthError>;
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: Option<String>,
    email: Option<String>,
    exp: usize,
}

/// HS256 session tokens signed with a shared secret.
pub struct JwtAuthenticator {
    secret: String,
    exp_hours: i64,
}

impl JwtAuthenticator {
    pub fn new(secret: String, exp_hours: i64) -> Self {
        Self { secret, exp_hours }
    }
}

impl Authenticator for JwtAuthenticator {
    fn issue(&self, identity: &Identity) -> Result<String, AuthError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.exp_hours);
        let claims = Claims {
            sub: identity.sub.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            exp: exp.timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Identity {
            sub: data.claims.sub,
            name: data.claims.name,
            email: data.claims.email,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GoogleTokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

/// Verifies Google ID tokens against the tokeninfo endpoint.
pub struct GoogleVerifier {
    http: reqwest::Client,
    client_id: String,
}

impl GoogleVerifier {
    pub fn new(client_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
        }
    }

    /// Resolves a Google ID token to the identity it asserts.
    pub async fn verify_credential(&self, credential: &str) -> Result<Identity, AuthError> {
        let response = self
            .http
            .get("https://oauth2.googleapis.com/tokeninfo")
            .query(&[("id_token", credential)])
            .send()
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Verification(format!(
                "tokeninfo returned status {}",
                response.status()
            )));
        }

        let info: GoogleTokenInfo = response
            .json()
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?;

        if info.aud != self.client_id {
            return Err(AuthError::Verification(
                "token was issued for a different client".to_string(),
            ));
        }

        Ok(Identity {
            sub: info.sub,
            name: info.name,
            email: info.email,
        })
    }
}
