use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::catalog::{BOOK_COLUMNS, RawBook};
use crate::db::{Constraint, Database, constraint_violation};
use crate::domain::{DEFAULT_SHELVES, Isbn, Lookup, ShelfEntry, ShelfName, ShelvedBook, UserId};
use crate::error::{StoreError, StoreResult};

const ENTRY_COLUMNS: &str = "user_id, isbn, shelf_name, pages_read, added_at";

/// Per-user shelves and the books placed on them.
pub trait ShelfStore: Send + Sync {
    /// Every entry the user has, joined with catalog metadata, ordered by
    /// shelf name then ISBN.
    fn shelves_for_user(&self, user_id: UserId) -> StoreResult<Vec<ShelvedBook>>;

    fn shelf_names(&self, user_id: UserId) -> StoreResult<Vec<ShelfName>>;

    /// Places a cataloged book on a shelf with zero pages read.
    ///
    /// An existing (user, isbn, shelf) entry yields `StoreError::Conflict`;
    /// an unknown book or shelf yields `StoreError::MissingReference`.
    fn add_entry(&self, user_id: UserId, isbn: &Isbn, shelf: &ShelfName) -> StoreResult<ShelfEntry>;

    fn get_entry(
        &self,
        user_id: UserId,
        isbn: &Isbn,
        shelf: &ShelfName,
    ) -> StoreResult<Lookup<ShelfEntry>>;

    fn update_progress(
        &self,
        user_id: UserId,
        isbn: &Isbn,
        shelf: &ShelfName,
        pages_read: u32,
    ) -> StoreResult<Lookup<ShelfEntry>>;

    /// Seeds the default shelves. Idempotent.
    fn create_default_shelves(&self, user_id: UserId) -> StoreResult<Vec<ShelfName>>;
}

#[derive(Debug, Clone)]
pub struct SqliteShelves {
    db: Database,
}

impl SqliteShelves {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ShelfStore for SqliteShelves {
    fn shelves_for_user(&self, user_id: UserId) -> StoreResult<Vec<ShelvedBook>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOK_COLUMNS}, shelf_books.shelf_name, shelf_books.pages_read, shelf_books.added_at
                 FROM shelf_books
                 JOIN books ON books.isbn = shelf_books.isbn
                 WHERE shelf_books.user_id = ?1
                 ORDER BY shelf_books.shelf_name, shelf_books.isbn"
            ))?;
            let rows = stmt.query_map(params![user_id.get()], |row| {
                Ok((
                    RawBook::from_row_at(row, 0)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?;

            let mut shelved = Vec::new();
            for row in rows {
                let (raw, shelf, pages_read, added_at) = row?;
                shelved.push(ShelvedBook {
                    book: raw.into_book()?,
                    shelf: parse_shelf(&shelf)?,
                    pages_read: parse_pages_read(pages_read)?,
                    added_at,
                });
            }
            Ok(shelved)
        })
    }

    fn shelf_names(&self, user_id: UserId) -> StoreResult<Vec<ShelfName>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT shelf_name FROM shelves WHERE user_id = ?1 ORDER BY shelf_name",
            )?;
            let names = stmt
                .query_map(params![user_id.get()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            names.iter().map(|name| parse_shelf(name)).collect()
        })
    }

    fn add_entry(&self, user_id: UserId, isbn: &Isbn, shelf: &ShelfName) -> StoreResult<ShelfEntry> {
        let added_at = chrono::Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO shelf_books (user_id, isbn, shelf_name, pages_read, added_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![user_id.get(), isbn.as_str(), shelf.as_str(), added_at],
            );
            match result {
                Ok(_) => Ok(ShelfEntry {
                    user_id,
                    isbn: isbn.clone(),
                    shelf: shelf.clone(),
                    pages_read: 0,
                    added_at: added_at.clone(),
                }),
                Err(err) => Err(match constraint_violation(&err) {
                    Some(Constraint::Unique) => StoreError::Conflict(format!(
                        "{isbn} is already on shelf {shelf} for user {user_id}"
                    )),
                    Some(Constraint::ForeignKey) => StoreError::MissingReference(format!(
                        "book {isbn} or shelf {shelf} for user {user_id}"
                    )),
                    _ => err.into(),
                }),
            }
        })
    }

    fn get_entry(
        &self,
        user_id: UserId,
        isbn: &Isbn,
        shelf: &ShelfName,
    ) -> StoreResult<Lookup<ShelfEntry>> {
        self.db
            .with_conn(|conn| select_entry(conn, user_id, isbn, shelf).map(Lookup::from))
    }

    fn update_progress(
        &self,
        user_id: UserId,
        isbn: &Isbn,
        shelf: &ShelfName,
        pages_read: u32,
    ) -> StoreResult<Lookup<ShelfEntry>> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE shelf_books SET pages_read = ?4
                 WHERE user_id = ?1 AND isbn = ?2 AND shelf_name = ?3",
                params![user_id.get(), isbn.as_str(), shelf.as_str(), pages_read],
            )?;
            if updated == 0 {
                return Ok(Lookup::NotFound);
            }
            select_entry(conn, user_id, isbn, shelf).map(Lookup::from)
        })
    }

    fn create_default_shelves(&self, user_id: UserId) -> StoreResult<Vec<ShelfName>> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            seed_default_shelves(&tx, user_id)?;
            tx.commit()?;
            Ok(ShelfName::defaults())
        })
    }
}

/// Inserts the default shelf rows, skipping any that already exist.
pub(crate) fn seed_default_shelves(conn: &Connection, user_id: UserId) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO shelves (user_id, shelf_name) VALUES (?1, ?2)
         ON CONFLICT(user_id, shelf_name) DO NOTHING",
    )?;
    for name in DEFAULT_SHELVES {
        stmt.execute(params![user_id.get(), name])?;
    }
    Ok(())
}

fn select_entry(
    conn: &Connection,
    user_id: UserId,
    isbn: &Isbn,
    shelf: &ShelfName,
) -> StoreResult<Option<ShelfEntry>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM shelf_books
                 WHERE user_id = ?1 AND isbn = ?2 AND shelf_name = ?3"
            ),
            params![user_id.get(), isbn.as_str(), shelf.as_str()],
            raw_entry,
        )
        .optional()?;
    raw.map(|(_, _, _, pages_read, added_at)| {
        Ok(ShelfEntry {
            user_id,
            isbn: isbn.clone(),
            shelf: shelf.clone(),
            pages_read: parse_pages_read(pages_read)?,
            added_at,
        })
    })
    .transpose()
}

fn raw_entry(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, i64, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn parse_shelf(value: &str) -> StoreResult<ShelfName> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidData(format!("bad shelf name: {value}")))
}

fn parse_pages_read(value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidData(format!("bad pages_read: {value}")))
}
