//! Session model - one row per issued access token, keyed by its `jti`.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: Uuid, tenant_id: Uuid, user_id: Uuid, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            tenant_id,
            user_id,
            expiry_utc: now + Duration::seconds(ttl_seconds),
            revoked_utc: None,
            created_utc: now,
        }
    }

    /// Not expired and not revoked.
    pub fn is_valid(&self) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_validity() {
        let mut session = Session::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 60);
        assert!(session.is_valid());

        session.revoked_utc = Some(Utc::now());
        assert!(!session.is_valid());

        let expired = Session::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), -1);
        assert!(!expired.is_valid());
    }
}
