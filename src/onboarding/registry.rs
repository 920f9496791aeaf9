//! Per-member coordination: one lock per session, one poll token per member.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::gateway::MemberId;

type LockMap = HashMap<MemberId, Arc<Mutex<()>>>;

/// Serializes work on each member's session and tracks their poll tasks.
///
/// A member's lock entry lives only while some task holds or waits on it.
pub struct SessionRegistry {
    locks: StdMutex<LockMap>,
    polls: RwLock<HashMap<MemberId, CancellationToken>>,
    shutdown: CancellationToken,
}

/// Exclusive access to one member's session. Released on drop.
pub struct SessionGuard<'a> {
    registry: &'a SessionRegistry,
    member: MemberId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // Unlock before the count check so this guard's own clone is gone.
        drop(self.guard.take());
        let mut locks = self.registry.lock_map();
        if locks
            .get(&self.member)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.member);
        }
    }
}

impl SessionRegistry {
    /// Poll tokens are children of `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
            polls: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    // Never held across an await.
    fn lock_map(&self) -> std::sync::MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to a member's session.
    pub async fn acquire(&self, member: MemberId) -> SessionGuard<'_> {
        // Cloned under the map lock, so a releasing guard sees this waiter.
        let lock = Arc::clone(
            self.lock_map()
                .entry(member)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        SessionGuard {
            registry: self,
            member,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Members with a lock currently held or awaited.
    pub fn locked_members(&self) -> usize {
        self.lock_map().len()
    }

    /// A fresh token for a member's poll task. Cancels the previous one.
    pub async fn poll_token(&self, member: MemberId) -> CancellationToken {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.polls.write().await.insert(member, token.clone()) {
            previous.cancel();
        }
        token
    }

    pub async fn cancel_poll(&self, member: MemberId) {
        if let Some(token) = self.polls.write().await.remove(&member) {
            token.cancel();
        }
    }

    pub async fn active_polls(&self) -> usize {
        self.polls
            .read()
            .await
            .values()
            .filter(|token| !token.is_cancelled())
            .count()
    }
}
