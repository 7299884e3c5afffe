//! Redis-backed advisory locks
//!
//! Two primitives guard the pipeline's critical sections: a plain
//! test-and-set used where any holder may release, and a token-fenced variant
//! whose release is a Lua compare-and-delete so a holder that outlived its TTL
//! cannot release a successor's lock.
//!
//! All locks carry a TTL, so crashed holders self-heal.

use crate::error::Result;
use crate::types::ProjectId;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const RELEASE_IF_TOKEN_LUA: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis lock coordinator shared by the ingest and skill-learn controllers.
#[derive(Clone)]
pub struct LockCoordinator {
    conn: ConnectionManager,
    release_script: Script,
}

impl LockCoordinator {
    /// Connect to Redis with an auto-reconnecting connection manager.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            release_script: Script::new(RELEASE_IF_TOKEN_LUA),
        })
    }

    fn lock_key(project_id: ProjectId, qualifier: &str) -> String {
        format!("lock.{project_id}.{qualifier}")
    }

    /// `SET NX EX`; true iff newly acquired.
    pub async fn test_and_set(
        &self,
        project_id: ProjectId,
        qualifier: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let key = Self::lock_key(project_id, qualifier);
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        debug!(key = %key, acquired = acquired.is_some(), "test_and_set");
        Ok(acquired.is_some())
    }

    /// Acquire with a fresh fencing token. Returns `None` when the lock is
    /// already held.
    pub async fn acquire_token(
        &self,
        project_id: ProjectId,
        qualifier: &str,
        ttl: Duration,
    ) -> Result<Option<String>> {
        let key = Self::lock_key(project_id, qualifier);
        let token = Uuid::new_v4().simple().to_string();
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        debug!(key = %key, acquired = acquired.is_some(), "acquire_token");
        Ok(acquired.map(|_| token))
    }

    /// Unconditional delete.
    pub async fn release(&self, project_id: ProjectId, qualifier: &str) -> Result<()> {
        let key = Self::lock_key(project_id, qualifier);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
        Ok(())
    }

    /// Compare-and-delete; true iff this token still held the lock.
    pub async fn release_if_token(
        &self,
        project_id: ProjectId,
        qualifier: &str,
        token: &str,
    ) -> Result<bool> {
        let key = Self::lock_key(project_id, qualifier);
        let mut conn = self.conn.clone();
        let removed: i32 = self
            .release_script
            .key(&key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        debug!(key = %key, removed, "release_if_token");
        Ok(removed == 1)
    }
}

/// Lock qualifier for session-pending ingest.
pub fn session_ingest_qualifier(session_id: crate::types::SessionId) -> String {
    format!("session-ingest.{session_id}")
}

/// Lock qualifier for per-task skill learning.
pub fn skill_learn_qualifier(task_id: crate::types::TaskId) -> String {
    format!("skill-learn.{task_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionId, TaskId};

    #[test]
    fn test_lock_key_layout() {
        let project = ProjectId::new();
        let key = LockCoordinator::lock_key(project, "session-ingest.abc");
        assert_eq!(key, format!("lock.{project}.session-ingest.abc"));
    }

    #[test]
    fn test_qualifiers_are_scoped_per_entity() {
        let session = SessionId::new();
        let task = TaskId::new();
        assert!(session_ingest_qualifier(session).contains(&session.to_string()));
        assert!(skill_learn_qualifier(task).starts_with("skill-learn."));
    }
}
