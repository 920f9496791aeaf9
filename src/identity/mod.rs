//! External account linking — who a member is on the learning platform.
//!
//! `IdentityStore` answers "is this member linked to an account?";
//! `AccountLinker` adds logging and the wait-until-linked poll on top.

pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::IdentityError;
use crate::gateway::MemberId;
use crate::poll::poll_until;

pub use postgres::PgIdentityStore;

/// A learning-platform account linked to a chat member. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: String,
    pub email: Option<String>,
    pub active_subscription: bool,
}

/// Lookup of linked accounts by chat member id.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_member(&self, member: MemberId) -> Result<Option<Account>, IdentityError>;
}

/// Finds linked accounts, or waits for one to appear.
pub struct AccountLinker {
    store: Arc<dyn IdentityStore>,
    poll_interval: Duration,
}

impl AccountLinker {
    pub fn new(store: Arc<dyn IdentityStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// The member's linked account. Lookup failures are logged and read as "not linked".
    pub async fn find_linked_account(&self, member: MemberId) -> Option<Account> {
        match self.store.find_by_member(member).await {
            Ok(account) => account,
            Err(e) => {
                warn!(member_id = %member, error = %e, "Linked account lookup failed");
                None
            }
        }
    }

    /// Poll until the member links an account. `None` if cancelled first.
    pub async fn wait_for_account(
        &self,
        member: MemberId,
        cancel: &CancellationToken,
    ) -> Option<Account> {
        debug!(member_id = %member, "Waiting for account link");
        poll_until(self.poll_interval, cancel, || self.find_linked_account(member)).await
    }
}

/// In-memory identity store for tests and local runs.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    accounts: RwLock<HashMap<MemberId, Account>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn link(&self, member: MemberId, account: Account) {
        self.accounts.write().await.insert(member, account);
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_member(&self, member: MemberId) -> Result<Option<Account>, IdentityError> {
        Ok(self.accounts.read().await.get(&member).cloned())
    }
}
