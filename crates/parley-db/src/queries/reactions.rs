use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::ReactionRow;
use crate::queries::is_unique_violation;
use parley_types::models::ToggleOutcome;

impl Database {
    /// Toggle the user's reaction on a message. At most one reaction
    /// row exists per (message, user): no row → insert, same emoji →
    /// remove, different emoji → replace in place. An insert racing
    /// into the UNIQUE constraint is retried as an update instead of
    /// surfacing a hard error.
    pub fn toggle_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        now: &str,
    ) -> Result<ToggleOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<(String, String)> = tx
                .query_row(
                    "SELECT id, emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    [message_id, user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let outcome = match existing {
                Some((row_id, row_emoji)) if row_emoji == emoji => {
                    tx.execute("DELETE FROM reactions WHERE id = ?1", [&row_id])?;
                    ToggleOutcome::Removed
                }
                Some((row_id, _)) => {
                    tx.execute(
                        "UPDATE reactions SET emoji = ?2, created_at = ?3 WHERE id = ?1",
                        rusqlite::params![row_id, emoji, now],
                    )?;
                    ToggleOutcome::Updated
                }
                None => {
                    let inserted = tx.execute(
                        "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![id, message_id, user_id, emoji, now],
                    );
                    match inserted {
                        Ok(_) => ToggleOutcome::Added,
                        Err(e) if is_unique_violation(&e) => {
                            // A concurrent toggle from the same user won
                            // the insert; resolve against its row.
                            let row_emoji: String = tx.query_row(
                                "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                                [message_id, user_id],
                                |row| row.get(0),
                            )?;
                            if row_emoji == emoji {
                                tx.execute(
                                    "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                                    [message_id, user_id],
                                )?;
                                ToggleOutcome::Removed
                            } else {
                                tx.execute(
                                    "UPDATE reactions SET emoji = ?3, created_at = ?4
                                     WHERE message_id = ?1 AND user_id = ?2",
                                    rusqlite::params![message_id, user_id, emoji, now],
                                )?;
                                ToggleOutcome::Updated
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Batch-fetch reactions for a set of message ids.
    pub fn reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM reactions WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_ts;
    use crate::queries::testutil::{direct, test_db, text_message, user};
    use uuid::Uuid;

    fn toggle(db: &Database, message_id: &str, user_id: &str, emoji: &str) -> ToggleOutcome {
        db.toggle_reaction(
            &Uuid::new_v4().to_string(),
            message_id,
            user_id,
            emoji,
            &now_ts(),
        )
        .unwrap()
    }

    #[test]
    fn same_emoji_twice_returns_to_the_initial_state() {
        let db = test_db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let conversation_id = direct(&db, &a, &b);
        let message_id = text_message(&db, &conversation_id, &a, &now_ts());

        assert_eq!(toggle(&db, &message_id, &b, "👍"), ToggleOutcome::Added);
        assert_eq!(toggle(&db, &message_id, &b, "👍"), ToggleOutcome::Removed);

        let rows = db
            .reactions_for_messages(&[message_id.clone()])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn different_emoji_replaces_instead_of_stacking() {
        let db = test_db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let conversation_id = direct(&db, &a, &b);
        let message_id = text_message(&db, &conversation_id, &a, &now_ts());

        assert_eq!(toggle(&db, &message_id, &b, "👍"), ToggleOutcome::Added);
        assert_eq!(toggle(&db, &message_id, &b, "😂"), ToggleOutcome::Updated);

        let rows = db
            .reactions_for_messages(&[message_id.clone()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].emoji, "😂");
        assert_eq!(rows[0].user_id, b);
    }

    #[test]
    fn reactions_from_different_users_coexist() {
        let db = test_db();
        let (a, b) = (user(&db, "a"), user(&db, "b"));
        let conversation_id = direct(&db, &a, &b);
        let message_id = text_message(&db, &conversation_id, &a, &now_ts());

        toggle(&db, &message_id, &a, "❤️");
        toggle(&db, &message_id, &b, "❤️");

        let rows = db
            .reactions_for_messages(&[message_id.clone()])
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
