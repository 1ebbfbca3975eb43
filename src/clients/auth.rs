// src/clients/auth.rs

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::jwt::verify_jwt;

/// The verified caller of a request. Passed explicitly to every engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub role: String,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

#[derive(Debug, Error)]
pub enum AuthGatewayError {
    #[error("credential rejected")]
    Rejected,

    #[error("auth service unreachable: {0}")]
    Unavailable(String),

    #[error("malformed claims: {0}")]
    Malformed(String),
}

/// Verifies bearer credentials. Any error means the request is unauthorized.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, AuthGatewayError>;
}

/// Delegates verification to the auth service (`POST {base_url}/verify`).
#[derive(Clone)]
pub struct HttpAuthGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    async fn verify(&self, token: &str) -> Result<Principal, AuthGatewayError> {
        let response = self
            .client
            .post(format!("{}/verify", self.base_url))
            .json(&VerifyRequest { token })
            .send()
            .await
            .map_err(|e| AuthGatewayError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            tracing::debug!("Auth service rejected token with {}", response.status());
            return Err(AuthGatewayError::Rejected);
        }

        response
            .json::<Principal>()
            .await
            .map_err(|e| AuthGatewayError::Malformed(e.to_string()))
    }
}

/// Verifies HS256 tokens locally with the secret shared with the auth service.
#[derive(Clone)]
pub struct JwtAuthGateway {
    secret: String,
}

impl JwtAuthGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl AuthGateway for JwtAuthGateway {
    async fn verify(&self, token: &str) -> Result<Principal, AuthGatewayError> {
        let claims = verify_jwt(token, &self.secret).map_err(|_| AuthGatewayError::Rejected)?;
        let user_id = claims
            .sub
            .parse::<i64>()
            .map_err(|e| AuthGatewayError::Malformed(format!("subject is not a user id: {}", e)))?;
        Ok(Principal {
            user_id,
            role: claims.role,
        })
    }
}
