use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::db::{Constraint, Database, constraint_violation};
use crate::domain::{Book, Isbn, Lookup};
use crate::error::{StoreError, StoreResult};

pub(crate) const BOOK_COLUMNS: &str = "books.isbn, books.book_name, books.author, books.genre, books.pages";

/// Outcome of an insert keyed by ISBN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Book),
    /// A row with this ISBN already existed; nothing was written.
    Conflict,
}

/// Global book catalog, one record per ISBN.
pub trait CatalogStore: Send + Sync {
    fn get_by_isbn(&self, isbn: &Isbn) -> StoreResult<Lookup<Book>>;

    /// Inserts `book` unless its ISBN is already cataloged. Safe under
    /// concurrent callers: the uniqueness check happens in the storage engine.
    fn insert_if_absent(&self, book: &Book) -> StoreResult<InsertOutcome>;

    fn count(&self) -> StoreResult<u64>;
}

#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    db: Database,
}

impl SqliteCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl CatalogStore for SqliteCatalog {
    fn get_by_isbn(&self, isbn: &Isbn) -> StoreResult<Lookup<Book>> {
        self.db.with_conn(|conn| select_book(conn, isbn).map(Lookup::from))
    }

    fn insert_if_absent(&self, book: &Book) -> StoreResult<InsertOutcome> {
        let genre = serde_json::to_string(&book.genres)
            .map_err(|err| StoreError::InvalidData(err.to_string()))?;
        self.db.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO books (isbn, book_name, author, genre, pages)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(isbn) DO NOTHING",
                params![
                    book.isbn.as_str(),
                    book.title,
                    book.author,
                    genre,
                    book.pages
                ],
            );
            match result {
                Ok(0) => Ok(InsertOutcome::Conflict),
                Ok(_) => Ok(InsertOutcome::Inserted(book.clone())),
                Err(err) if constraint_violation(&err) == Some(Constraint::Unique) => {
                    Ok(InsertOutcome::Conflict)
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    fn count(&self) -> StoreResult<u64> {
        self.db.with_conn(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get::<_, i64>(0))?;
            u64::try_from(count).map_err(|_| StoreError::InvalidData(format!("bad row count: {count}")))
        })
    }
}

fn select_book(conn: &Connection, isbn: &Isbn) -> StoreResult<Option<Book>> {
    let raw = conn
        .query_row(
            &format!("SELECT {BOOK_COLUMNS} FROM books WHERE isbn = ?1"),
            params![isbn.as_str()],
            RawBook::from_row,
        )
        .optional()?;
    raw.map(RawBook::into_book).transpose()
}

/// Column values as stored, before domain validation.
pub(crate) struct RawBook {
    isbn: String,
    title: String,
    author: String,
    genre: String,
    pages: Option<i64>,
}

impl RawBook {
    /// Reads the five book columns starting at `offset`.
    pub(crate) fn from_row_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            isbn: row.get(offset)?,
            title: row.get(offset + 1)?,
            author: row.get(offset + 2)?,
            genre: row.get(offset + 3)?,
            pages: row.get(offset + 4)?,
        })
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Self::from_row_at(row, 0)
    }

    pub(crate) fn into_book(self) -> StoreResult<Book> {
        let isbn = self
            .isbn
            .parse()
            .map_err(|_| StoreError::InvalidData(format!("bad isbn in books: {}", self.isbn)))?;
        let genres: Vec<String> = serde_json::from_str(&self.genre).map_err(|err| {
            StoreError::InvalidData(format!("bad genre list for {}: {err}", self.isbn))
        })?;
        let pages = self
            .pages
            .map(u32::try_from)
            .transpose()
            .map_err(|_| StoreError::InvalidData(format!("bad page count for {}", self.isbn)))?;
        Ok(Book {
            isbn,
            title: self.title,
            author: self.author,
            genres,
            pages,
        })
    }
}
