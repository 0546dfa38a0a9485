use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::{ConversationForUser, ConversationRow, ParticipantDetail, ParticipantRow};
use crate::queries::is_unique_violation;
use parley_types::api::ConversationFilter;

/// Canonical key for the unordered user pair of a direct conversation.
/// Both orderings of (a, b) produce the same key, so the UNIQUE
/// constraint on `conversations.direct_key` serializes concurrent
/// chat-start attempts.
pub fn direct_pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

impl Database {
    /// Get-or-create the direct conversation for (caller, target).
    /// Returns `(conversation_id, created)`. Re-starting an existing
    /// chat un-archives it for the caller.
    pub fn create_direct(
        &self,
        id: &str,
        caller: &str,
        target: &str,
        now: &str,
    ) -> Result<(String, bool)> {
        let direct_key = direct_pair_key(caller, target);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = match tx.execute(
                "INSERT INTO conversations (id, kind, created_by, direct_key, created_at, updated_at)
                 VALUES (?1, 'direct', ?2, ?3, ?4, ?4)",
                rusqlite::params![id, caller, direct_key, now],
            ) {
                Ok(_) => true,
                // Lost the race (or the chat already existed): fall
                // through to fetching the surviving row.
                Err(e) if is_unique_violation(&e) => false,
                Err(e) => return Err(e.into()),
            };

            let conversation_id = if inserted {
                for user_id in [caller, target] {
                    tx.execute(
                        "INSERT INTO participants (conversation_id, user_id, role, joined_at)
                         VALUES (?1, ?2, 'member', ?3)",
                        rusqlite::params![id, user_id, now],
                    )?;
                }
                id.to_string()
            } else {
                let existing: String = tx.query_row(
                    "SELECT id FROM conversations WHERE direct_key = ?1",
                    [&direct_key],
                    |row| row.get(0),
                )?;
                tx.execute(
                    "UPDATE participants SET is_archived = 0
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    rusqlite::params![existing, caller],
                )?;
                existing
            };

            tx.commit()?;
            Ok((conversation_id, inserted))
        })
    }

    /// Create a group conversation. Size bounds are validated at the
    /// API boundary; the creator is always inserted first, as admin,
    /// so a creator id appearing in `member_ids` keeps the admin role.
    pub fn create_group(
        &self,
        id: &str,
        creator: &str,
        name: Option<&str>,
        member_ids: &[String],
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO conversations (id, kind, name, created_by, created_at, updated_at)
                 VALUES (?1, 'group', ?2, ?3, ?4, ?4)",
                rusqlite::params![id, name, creator, now],
            )?;
            tx.execute(
                "INSERT INTO participants (conversation_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'admin', ?3)",
                rusqlite::params![id, creator, now],
            )?;
            for member in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO participants (conversation_id, user_id, role, joined_at)
                     VALUES (?1, ?2, 'member', ?3)",
                    rusqlite::params![id, member, now],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, kind, name, avatar_url, created_by, created_at, updated_at
                     FROM conversations WHERE id = ?1",
                    [id],
                    map_conversation_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Conversations the user participates in, newest activity first.
    /// `archived` selects the rows the user archived; every other
    /// filter excludes them (archive is a personal hide). The `unread`
    /// filter is applied by the caller after unread counting.
    pub fn list_for_user(
        &self,
        user_id: &str,
        filter: ConversationFilter,
    ) -> Result<Vec<ConversationForUser>> {
        let predicate = match filter {
            ConversationFilter::Archived => "p.is_archived = 1",
            ConversationFilter::Groups => "p.is_archived = 0 AND c.kind = 'group'",
            ConversationFilter::All | ConversationFilter::Unread => "p.is_archived = 0",
        };
        let sql = format!(
            "SELECT c.id, c.kind, c.name, c.avatar_url, c.created_by, c.created_at, c.updated_at,
                    p.is_muted, p.is_archived
             FROM conversations c
             JOIN participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1 AND {predicate}
             ORDER BY c.updated_at DESC"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationForUser {
                        conversation: map_conversation_row(row)?,
                        is_muted: row.get(7)?,
                        is_archived: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn find_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT conversation_id, user_id, role, joined_at, last_read_at, is_muted, is_archived
                     FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id, user_id],
                    |row| {
                        Ok(ParticipantRow {
                            conversation_id: row.get(0)?,
                            user_id: row.get(1)?,
                            role: row.get(2)?,
                            joined_at: row.get(3)?,
                            last_read_at: row.get(4)?,
                            is_muted: row.get(5)?,
                            is_archived: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        Ok(self.find_participant(conversation_id, user_id)?.is_some())
    }

    /// Roster with profiles for hydration; "unknown" for users the
    /// identity cache has never seen.
    pub fn participants(&self, conversation_id: &str) -> Result<Vec<ParticipantDetail>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.user_id, COALESCE(u.username, 'unknown'), u.avatar_url, p.role, p.last_read_at
                 FROM participants p
                 LEFT JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id = ?1
                 ORDER BY p.joined_at, p.user_id",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(ParticipantDetail {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        avatar_url: row.get(2)?,
                        role: row.get(3)?,
                        last_read_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_archived(&self, conversation_id: &str, user_id: &str, archived: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE participants SET is_archived = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id, user_id, archived],
            )?;
            Ok(())
        })
    }
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        avatar_url: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
