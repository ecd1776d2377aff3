use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// The claims the client cares about. The backend signs the token; the
/// client only reads it, so the signature is not checked here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

pub fn read_claims(token: &str) -> Option<SessionClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<SessionClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

/// Expiry from the `exp` claim, if the token is a readable JWT
pub fn access_token_expiry(token: &str) -> Option<DateTime<Utc>> {
    read_claims(token).and_then(|claims| DateTime::from_timestamp(claims.exp, 0))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub(crate) fn signed_token(exp: i64) -> String {
        let claims = SessionClaims {
            sub: Some("user-1".to_string()),
            tenant: Some("acme".to_string()),
            user: Some("admin".to_string()),
            exp,
            iat: Some(exp - 3600),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"backend-secret")).unwrap()
    }

    #[test]
    fn test_reads_expiry_without_the_secret() {
        let exp = Utc::now().timestamp() + 900;
        let token = signed_token(exp);
        assert_eq!(access_token_expiry(&token).map(|dt| dt.timestamp()), Some(exp));

        let claims = read_claims(&token).unwrap();
        assert_eq!(claims.tenant.as_deref(), Some("acme"));
    }

    #[test]
    fn test_expired_token_still_readable() {
        let exp = Utc::now().timestamp() - 60;
        assert!(access_token_expiry(&signed_token(exp)).is_some());
    }

    #[test]
    fn test_opaque_token() {
        assert_eq!(access_token_expiry("not-a-jwt"), None);
    }
}
