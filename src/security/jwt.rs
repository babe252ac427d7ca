use crate::error::{AppError, AppResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    kind: TokenKind,
    exp: usize,
    iat: usize,
}

pub struct JwtIssuer {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

#[derive(Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl JwtIssuer {
    pub fn new(secret: String, access_minutes: i64, refresh_days: i64) -> Self {
        Self {
            secret,
            access_ttl: Duration::minutes(access_minutes),
            refresh_ttl: Duration::days(refresh_days),
        }
    }

    pub fn issue(&self, user_id: Uuid) -> AppResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_one(user_id, TokenKind::Access, self.access_ttl)?,
            refresh_token: self.issue_one(user_id, TokenKind::Refresh, self.refresh_ttl)?,
        })
    }

    fn issue_one(&self, user_id: Uuid, kind: TokenKind, ttl: Duration) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            kind,
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp() as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|_| AppError::Internal("failed to sign token".into()))
    }

    /// Returns the subject user id on success; `AppError::AuthInvalid` on
    /// expiry, bad signature, or kind mismatch.
    pub fn verify(&self, token: &str, expected: TokenKind) -> AppResult<Uuid> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation)
            .map_err(|_| AppError::AuthInvalid)?;
        if data.claims.kind != expected {
            return Err(AppError::AuthInvalid);
        }
        Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::AuthInvalid)
    }

    pub fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let user_id = self.verify(refresh_token, TokenKind::Refresh)?;
        self.issue(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_and_verifies_access_token() {
        let issuer = JwtIssuer::new("test-secret".into(), 15, 7);
        let user_id = Uuid::new_v4();
        let pair = issuer.issue(user_id).unwrap();
        assert_eq!(issuer.verify(&pair.access_token, TokenKind::Access).unwrap(), user_id);
    }

    #[test]
    fn rejects_wrong_token_kind() {
        let issuer = JwtIssuer::new("test-secret".into(), 15, 7);
        let pair = issuer.issue(Uuid::new_v4()).unwrap();
        assert!(issuer.verify(&pair.access_token, TokenKind::Refresh).is_err());
    }

    #[test]
    fn rejects_tampered_secret() {
        let issuer_a = JwtIssuer::new("secret-a".into(), 15, 7);
        let issuer_b = JwtIssuer::new("secret-b".into(), 15, 7);
        let pair = issuer_a.issue(Uuid::new_v4()).unwrap();
        assert!(issuer_b.verify(&pair.access_token, TokenKind::Access).is_err());
    }

    #[test]
    fn refresh_issues_new_pair_for_same_user() {
        let issuer = JwtIssuer::new("test-secret".into(), 15, 7);
        let user_id = Uuid::new_v4();
        let pair = issuer.issue(user_id).unwrap();
        let refreshed = issuer.refresh(&pair.refresh_token).unwrap();
        assert_eq!(issuer.verify(&refreshed.access_token, TokenKind::Access).unwrap(), user_id);
    }
}
