//! Authentication middleware
//!
//! Supports two `Authorization` schemes:
//!
//! ```text
//! Authorization: Bearer <jwt>     dashboard users
//! Authorization: ApiKey <key>     CI integrations and internal services
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::permissions::{effective_permissions, has_permission, Permission};
use crate::error::{ApiError, ApiResult};
use crate::models::{ApiKey, ApiKeyCreated};
use crate::ApiState;

/// Prefix of generated API keys
pub const API_KEY_PREFIX: &str = "atlas_";

/// User role, ordered by privilege
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Viewer,
    Auditor,
    Admin,
}

impl Role {
    /// Unknown roles degrade to viewer
    pub fn parse_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "auditor" => Self::Auditor,
            _ => Self::Viewer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Auditor => "auditor",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated user with a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub email: String,
    /// Scopes restricting an API key; empty means the full role
    pub scopes: Vec<String>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            role,
            email: String::new(),
            scopes: Vec::new(),
        }
    }

    pub fn permissions(&self) -> HashSet<Permission> {
        effective_permissions(self.role, &self.scopes)
    }

    /// Fails with 403 unless the user holds `permission`
    pub fn require(&self, permission: Permission) -> ApiResult<()> {
        if has_permission(&self.permissions(), permission) {
            Ok(())
        } else {
            tracing::debug!("User {} denied {:?}", self.username, permission);
            Err(ApiError::Forbidden(format!(
                "insufficient permissions: {} lacks {:?}",
                self.role, permission
            )))
        }
    }
}

/// Check if user has the required role
pub fn require_role(user: &AuthUser, required: Role) -> ApiResult<()> {
    if user.role < required {
        return Err(ApiError::Forbidden(format!(
            "insufficient permissions: {} cannot perform {} actions",
            user.role, required
        )));
    }
    Ok(())
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub username: String,
    pub role: String,
    #[serde(default)]
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

/// HS256 token issuer and verifier
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str, expiry_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_secs,
        }
    }

    pub fn expiry_secs(&self) -> i64 {
        self.expiry_secs
    }

    /// Create a JWT token for a user
    pub fn issue(&self, user: &AuthUser) -> ApiResult<String> {
        self.issue_with_expiry(user, self.expiry_secs)
    }

    pub fn issue_with_expiry(&self, user: &AuthUser, expiry_secs: i64) -> ApiResult<String> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role.as_str().to_string(),
            email: user.email.clone(),
            exp: now + expiry_secs,
            iat: now,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("token encoding failed: {e}")))
    }

    /// Verify a JWT token and return the user
    pub fn verify(&self, token: &str) -> ApiResult<AuthUser> {
        if token.split('.').count() != 3 {
            return Err(ApiError::Unauthorized("invalid token format".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<JwtClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            let message = match e.kind() {
                ErrorKind::InvalidSignature => "invalid token signature".to_string(),
                ErrorKind::ExpiredSignature => "token expired".to_string(),
                ErrorKind::InvalidToken => "invalid token format".to_string(),
                _ => format!("invalid token payload: {e}"),
            };
            ApiError::Unauthorized(message)
        })?;

        let claims = data.claims;
        Ok(AuthUser {
            id: claims.sub,
            username: claims.username,
            role: Role::parse_lossy(&claims.role),
            email: claims.email,
            scopes: Vec::new(),
        })
    }
}

/// Registered API key
struct ApiKeyEntry {
    meta: ApiKey,
    user: AuthUser,
}

/// API key registry
///
/// Keys are stored by SHA-256 digest; the plain key is only returned once.
#[derive(Clone, Default)]
pub struct ApiKeyRegistry {
    keys: Arc<RwLock<HashMap<String, ApiKeyEntry>>>,
}

impl ApiKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn digest(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// Register a caller-provided key for a user
    pub fn register(&self, key: &str, user: AuthUser) -> Uuid {
        let id = Uuid::new_v4();
        let meta = ApiKey {
            id,
            name: user.username.clone(),
            key_prefix: key.chars().take(10).collect(),
            role: user.role,
            scopes: user.scopes.clone(),
            created_at: Utc::now(),
            last_used: None,
        };
        self.keys.write().insert(Self::digest(key), ApiKeyEntry { meta, user });
        id
    }

    /// Generate a new key bound to a service user
    pub fn create(&self, name: &str, role: Role, scopes: Vec<String>) -> ApiKeyCreated {
        let key = format!("{}{}", API_KEY_PREFIX, Uuid::new_v4().simple());
        let mut user = AuthUser::new(format!("key:{name}"), name, role);
        user.scopes = scopes.clone();

        let id = self.register(&key, user);
        tracing::info!("API key created: {} ({})", name, id);

        ApiKeyCreated { id, name: name.to_string(), key, role, scopes }
    }

    /// Verify an API key and return the associated user
    pub fn verify(&self, key: &str) -> ApiResult<AuthUser> {
        let mut keys = self.keys.write();
        let entry = keys
            .get_mut(&Self::digest(key))
            .ok_or_else(|| ApiError::Unauthorized("invalid API key".into()))?;
        entry.meta.last_used = Some(Utc::now());
        Ok(entry.user.clone())
    }

    pub fn revoke(&self, id: Uuid) -> bool {
        let mut keys = self.keys.write();
        let before = keys.len();
        keys.retain(|_, entry| entry.meta.id != id);
        keys.len() != before
    }

    pub fn list(&self) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self.keys.read().values().map(|e| e.meta.clone()).collect();
        keys.sort_by_key(|k| k.created_at);
        keys
    }
}

/// Extract and verify a user from an `Authorization` header value
pub fn authenticate(
    authorization: &str,
    tokens: &TokenService,
    api_keys: &ApiKeyRegistry,
) -> ApiResult<AuthUser> {
    if authorization.trim().is_empty() {
        return Err(ApiError::Unauthorized("missing authorization header".into()));
    }

    let (scheme, credential) = authorization
        .split_once(' ')
        .ok_or_else(|| ApiError::Unauthorized("invalid authorization format".into()))?;
    let credential = credential.trim();

    match scheme.to_ascii_lowercase().as_str() {
        "bearer" => tokens.verify(credential),
        "apikey" => api_keys.verify(credential),
        _ => Err(ApiError::Unauthorized(format!("unsupported auth scheme: {scheme}"))),
    }
}

/// Authenticated caller, extracted from the `Authorization` header
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthUser);

impl std::ops::Deref for CurrentUser {
    type Target = AuthUser;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        authenticate(header, &state.tokens, &state.api_keys).map(CurrentUser)
    }
}
