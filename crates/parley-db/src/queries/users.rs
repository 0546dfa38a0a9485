use crate::Database;
use anyhow::Result;

impl Database {
    /// Refresh the profile cache from verified identity claims.
    pub fn upsert_user(
        &self,
        id: &str,
        username: &str,
        avatar_url: Option<&str>,
        now: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, avatar_url, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (id) DO UPDATE SET
                     username = excluded.username,
                     avatar_url = excluded.avatar_url,
                     updated_at = excluded.updated_at",
                rusqlite::params![id, username, avatar_url, now],
            )?;
            Ok(())
        })
    }
}
