//! Key/value operations on the `kv_entries` table.

use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO kv_entries (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_remove(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    /// Delete every key starting with `prefix`. Returns the number removed.
    pub fn kv_remove_prefix(&self, prefix: &str) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM kv_entries WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(affected)
    }

    pub fn kv_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT key FROM kv_entries
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key ASC",
        )?;
        let rows = stmt.query_map(params![prefix], |row| row.get(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_overwrite() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.kv_get("a").unwrap(), None);

        db.kv_set("a", "1").unwrap();
        db.kv_set("a", "2").unwrap();
        assert_eq!(db.kv_get("a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_remove() {
        let db = Database::open_in_memory().unwrap();
        db.kv_set("gone", "x").unwrap();
        assert!(db.kv_remove("gone").unwrap());
        assert!(!db.kv_remove("gone").unwrap());
        assert_eq!(db.kv_get("gone").unwrap(), None);
    }

    #[test]
    fn test_remove_prefix_leaves_others() {
        let db = Database::open_in_memory().unwrap();
        db.kv_set("messages:a_b", "[]").unwrap();
        db.kv_set("messages:a_c", "[]").unwrap();
        db.kv_set("profiles:a", "{}").unwrap();
        // LIKE wildcards must not leak into prefix matching
        db.kv_set("messages%x", "{}").unwrap();

        assert_eq!(db.kv_remove_prefix("messages:").unwrap(), 2);
        assert_eq!(db.kv_keys("").unwrap(), vec!["messages%x", "profiles:a"]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.kv_set("private_key:u1", "pem").unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.kv_get("private_key:u1").unwrap().as_deref(), Some("pem"));
    }
}
