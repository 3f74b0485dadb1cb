use rusqlite::{OptionalExtension, params};
use tracing::info;

use crate::db::Database;
use crate::domain::{ShelfName, UserId};
use crate::error::{StoreError, StoreResult};
use crate::shelves::seed_default_shelves;

/// Account setup. Credentials are opaque bytes produced by the
/// authentication layer; they are stored, never interpreted.
pub trait UserStore: Send + Sync {
    /// Creates the user row and its default shelves atomically.
    fn register(&self, user_name: &str, credential: Option<&[u8]>) -> StoreResult<RegisteredUser>;

    fn exists(&self, user_id: UserId) -> StoreResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegisteredUser {
    pub user_id: UserId,
    pub user_name: String,
    pub shelves: Vec<ShelfName>,
}

#[derive(Debug, Clone)]
pub struct SqliteUsers {
    db: Database,
}

impl SqliteUsers {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl UserStore for SqliteUsers {
    fn register(&self, user_name: &str, credential: Option<&[u8]>) -> StoreResult<RegisteredUser> {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            return Err(StoreError::InvalidData("user name is empty".to_string()));
        }
        let user_id = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (password, user_name) VALUES (?1, ?2)",
                params![credential, user_name],
            )?;
            let user_id = UserId::new(tx.last_insert_rowid())
                .map_err(|err| StoreError::InvalidData(err.to_string()))?;
            seed_default_shelves(&tx, user_id)?;
            tx.commit()?;
            Ok(user_id)
        })?;

        info!(%user_id, user_name, "user.registered");
        Ok(RegisteredUser {
            user_id,
            user_name: user_name.to_string(),
            shelves: ShelfName::defaults(),
        })
    }

    fn exists(&self, user_id: UserId) -> StoreResult<bool> {
        self.db.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM users WHERE user_id = ?1",
                    params![user_id.get()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}
