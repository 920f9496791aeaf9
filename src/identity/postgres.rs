//! Postgres identity store — reads the learning platform's users table.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use super::{Account, IdentityStore};
use crate::error::IdentityError;
use crate::gateway::MemberId;

const FIND_BY_DISCORD_ID: &str = r#"
    SELECT
        u.id::text AS id,
        u.email AS email,
        COALESCE(s.active, false) AS active_subscription
    FROM users AS u
    LEFT JOIN subscriptions AS s ON u.id = s.uid AND s.active = true
    WHERE u.discord_id = $1
    LIMIT 1
"#;

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    email: Option<String>,
    active_subscription: bool,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            active_subscription: row.active_subscription,
        }
    }
}

/// Identity store backed by a read-only Postgres pool.
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub async fn connect(url: &SecretString) -> Result<Self, IdentityError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url.expose_secret())
            .await
            .map_err(|e| IdentityError::Connection(e.to_string()))?;
        info!("Identity database connected");
        Ok(Self { pool })
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_member(&self, member: MemberId) -> Result<Option<Account>, IdentityError> {
        let row = sqlx::query_as::<_, AccountRow>(FIND_BY_DISCORD_ID)
            .bind(member.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IdentityError::LookupFailed {
                member_id: member.get(),
                reason: e.to_string(),
            })?;
        Ok(row.map(Account::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_binds_the_member_id() {
        assert!(FIND_BY_DISCORD_ID.contains("u.discord_id = $1"));
        assert!(FIND_BY_DISCORD_ID.contains("s.active = true"));
    }

    #[test]
    fn row_maps_to_account() {
        let account = Account::from(AccountRow {
            id: "42".into(),
            email: None,
            active_subscription: true,
        });
        assert_eq!(account.id, "42");
        assert!(account.active_subscription);
    }
}
