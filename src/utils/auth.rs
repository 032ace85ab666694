use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub username: String,
    pub sid: String, // server-side session row
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, username: String, session_id: Uuid, hours: i64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(hours);

        Self {
            sub: user_id.to_string(),
            username,
            sid: session_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sid).ok()
    }
}

pub fn create_token(secret: &str, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        let token = create_token("secret", &Claims::new(user, "handler01".into(), session, 24)).unwrap();

        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.user_id(), Some(user));
        assert_eq!(claims.session_id(), Some(session));
        assert_eq!(claims.username, "handler01");
    }

    #[test]
    fn test_token_rejects_other_secret() {
        let claims = Claims::new(Uuid::new_v4(), "a".into(), Uuid::new_v4(), 1);
        let token = create_token("secret", &claims).unwrap();
        assert!(verify_token("other", &token).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let claims = Claims::new(Uuid::new_v4(), "a".into(), Uuid::new_v4(), -2);
        let token = create_token("secret", &claims).unwrap();
        assert!(verify_token("secret", &token).is_err());
    }
}
