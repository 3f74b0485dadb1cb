use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::catalog::{CatalogStore, InsertOutcome};
use crate::context::RequestContext;
use crate::domain::{Book, Isbn, Lookup, ShelfEntry, ShelfName, ShelvedBook, UserId};
use crate::error::{LookupError, ShelfError, StoreError};
use crate::isbndb::BibliographicClient;
use crate::retry::RetryPolicy;
use crate::shelves::ShelfStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LocalLookup,
    RemoteFetch,
    Insert,
    AttachToShelf,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::LocalLookup => "local-lookup",
            Stage::RemoteFetch => "remote-fetch",
            Stage::Insert => "insert",
            Stage::AttachToShelf => "attach-to-shelf",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookSource {
    Catalog,
    Remote,
    /// Fetched remotely, but a concurrent request inserted it first.
    ConflictRecovered,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Shelving {
    Created,
    AlreadyShelved,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddBookResult {
    pub book: Book,
    pub entry: ShelfEntry,
    pub source: BookSource,
    pub shelving: Shelving,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub user_id: UserId,
    pub books: Vec<ShelvedBook>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShelfNamesResult {
    pub user_id: UserId,
    pub shelves: Vec<ShelfName>,
}

#[derive(Debug, Clone, Default)]
pub struct ManualBook {
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub genres: Vec<String>,
    pub pages: Option<u32>,
}

#[derive(Clone)]
pub struct App<C: CatalogStore, S: ShelfStore, B: BibliographicClient> {
    catalog: C,
    shelves: S,
    client: B,
    retry: RetryPolicy,
}

impl<C: CatalogStore, S: ShelfStore, B: BibliographicClient> App<C, S, B> {
    pub fn new(catalog: C, shelves: S, client: B, retry: RetryPolicy) -> Self {
        Self {
            catalog,
            shelves,
            client,
            retry,
        }
    }

    /// If the shelf attach fails after a fresh insert, the book stays
    /// cataloged; retrying the call re-uses it without a remote fetch.
    pub fn add_book(&self, isbn: &str, ctx: &RequestContext) -> Result<AddBookResult, ShelfError> {
        let isbn: Isbn = isbn.parse()?;
        let span = info_span!(
            "add_book",
            %isbn,
            user_id = %ctx.user_id,
            shelf = %ctx.shelf
        );
        let _guard = span.enter();
        let started = Instant::now();

        let (book, source) = self.resolve_book(&isbn, ctx)?;
        let (entry, shelving) = self.attach(&book, ctx, source)?;

        info!(
            source = ?source,
            shelving = ?shelving,
            duration_ms = started.elapsed().as_millis() as u64,
            "add_book.done"
        );
        Ok(AddBookResult {
            book,
            entry,
            source,
            shelving,
        })
    }

    /// The ISBN uniqueness rule still applies: if the ISBN is already
    /// cataloged, the existing record is used and the typed details are
    /// discarded.
    pub fn add_manual(
        &self,
        manual: ManualBook,
        ctx: &RequestContext,
    ) -> Result<AddBookResult, ShelfError> {
        let isbn: Isbn = manual.isbn.parse()?;
        let book = Book {
            isbn: isbn.clone(),
            title: manual.title.trim().to_string(),
            author: manual.author.trim().to_string(),
            genres: manual
                .genres
                .into_iter()
                .map(|genre| genre.trim().to_string())
                .filter(|genre| !genre.is_empty())
                .collect(),
            pages: manual.pages.filter(|pages| *pages > 0),
        };
        book.validate()?;

        let span = info_span!("add_manual", %isbn, user_id = %ctx.user_id, shelf = %ctx.shelf);
        let _guard = span.enter();

        let (book, source) = match self.insert(&book, ctx)? {
            InsertOutcome::Inserted(book) => (book, BookSource::Manual),
            InsertOutcome::Conflict => (self.reread_after_conflict(&isbn, ctx)?, BookSource::Catalog),
        };
        let (entry, shelving) = self.attach(&book, ctx, source)?;
        Ok(AddBookResult {
            book,
            entry,
            source,
            shelving,
        })
    }

    pub fn list(&self, user_id: UserId) -> Result<ListResult, ShelfError> {
        let books = self
            .shelves
            .shelves_for_user(user_id)
            .map_err(|err| ShelfError::store(format!("listing shelves for user {user_id}"), err))?;
        Ok(ListResult { user_id, books })
    }

    pub fn shelf_names(&self, user_id: UserId) -> Result<ShelfNamesResult, ShelfError> {
        let shelves = self
            .shelves
            .shelf_names(user_id)
            .map_err(|err| ShelfError::store(format!("listing shelf names for user {user_id}"), err))?;
        Ok(ShelfNamesResult { user_id, shelves })
    }

    pub fn update_progress(
        &self,
        isbn: &str,
        ctx: &RequestContext,
        pages_read: u32,
    ) -> Result<ShelfEntry, ShelfError> {
        let isbn: Isbn = isbn.parse()?;
        ctx.deadline.check("progress-update")?;
        let updated = self
            .shelves
            .update_progress(ctx.user_id, &isbn, &ctx.shelf, pages_read)
            .map_err(|err| {
                ShelfError::store(
                    format!("updating progress on {isbn} for user {}", ctx.user_id),
                    err,
                )
            })?;
        match updated {
            Lookup::Found(entry) => {
                info!(%isbn, user_id = %ctx.user_id, pages_read, "progress.updated");
                Ok(entry)
            }
            Lookup::NotFound => Err(ShelfError::EntryNotFound {
                user_id: ctx.user_id,
                isbn,
                shelf: ctx.shelf.to_string(),
            }),
        }
    }

    fn resolve_book(&self, isbn: &Isbn, ctx: &RequestContext) -> Result<(Book, BookSource), ShelfError> {
        ctx.deadline.check(Stage::LocalLookup.as_str())?;
        let local = self.catalog.get_by_isbn(isbn).map_err(|err| {
            ShelfError::store(
                format!("looking up {isbn} for user {}", ctx.user_id),
                err,
            )
        })?;
        if let Lookup::Found(book) = local {
            debug!(stage = %Stage::LocalLookup, "catalog hit");
            return Ok((book, BookSource::Catalog));
        }

        let book = self.fetch_remote(isbn, ctx)?;
        match self.insert(&book, ctx)? {
            InsertOutcome::Inserted(book) => Ok((book, BookSource::Remote)),
            InsertOutcome::Conflict => {
                let book = self.reread_after_conflict(isbn, ctx)?;
                info!(stage = %Stage::Insert, "concurrent insert won; using stored record");
                Ok((book, BookSource::ConflictRecovered))
            }
        }
    }

    fn fetch_remote(&self, isbn: &Isbn, ctx: &RequestContext) -> Result<Book, ShelfError> {
        ctx.deadline.check(Stage::RemoteFetch.as_str())?;
        let (result, attempts) = self.retry.run(
            &ctx.deadline,
            |attempt| {
                debug!(stage = %Stage::RemoteFetch, attempt, "bibliographic lookup");
                self.client.lookup_by_isbn(isbn, &ctx.deadline)
            },
            LookupError::is_transient,
        );

        let metadata = result.map_err(|err| match err {
            LookupError::NotFound { message, .. } => {
                info!(stage = %Stage::RemoteFetch, detail = %message, "no such book");
                ShelfError::BookNotFound { isbn: isbn.clone() }
            }
            LookupError::Transient(message) => {
                warn!(stage = %Stage::RemoteFetch, attempts, detail = %message, "lookup unavailable");
                ShelfError::UpstreamUnavailable {
                    isbn: isbn.clone(),
                    attempts,
                    message,
                }
            }
            LookupError::Permanent { status, message } => {
                warn!(stage = %Stage::RemoteFetch, ?status, detail = %message, "lookup rejected");
                ShelfError::UpstreamRejected {
                    isbn: isbn.clone(),
                    message,
                }
            }
            LookupError::Cancelled => ShelfError::DeadlineExceeded {
                stage: Stage::RemoteFetch.as_str(),
            },
        })?;

        if !metadata.isbn13.is_empty() && metadata.isbn13 != isbn.as_str() {
            warn!(
                remote_isbn13 = %metadata.isbn13,
                "remote record carries a different ISBN-13; cataloging under the requested one"
            );
        }
        let book = metadata.to_book(isbn);
        book.validate().map_err(|err| ShelfError::UpstreamRejected {
            isbn: isbn.clone(),
            message: err.to_string(),
        })?;
        Ok(book)
    }

    fn insert(&self, book: &Book, ctx: &RequestContext) -> Result<InsertOutcome, ShelfError> {
        ctx.deadline.check(Stage::Insert.as_str())?;
        self.catalog.insert_if_absent(book).map_err(|err| {
            ShelfError::store(
                format!("cataloging {} for user {}", book.isbn, ctx.user_id),
                err,
            )
        })
    }

    fn reread_after_conflict(&self, isbn: &Isbn, ctx: &RequestContext) -> Result<Book, ShelfError> {
        let context = || format!("re-reading {isbn} after insert conflict for user {}", ctx.user_id);
        match self
            .catalog
            .get_by_isbn(isbn)
            .map_err(|err| ShelfError::store(context(), err))?
        {
            Lookup::Found(book) => Ok(book),
            Lookup::NotFound => Err(ShelfError::store(
                context(),
                StoreError::InvalidData(format!("{isbn} reported as present but not readable")),
            )),
        }
    }

    fn attach(
        &self,
        book: &Book,
        ctx: &RequestContext,
        source: BookSource,
    ) -> Result<(ShelfEntry, Shelving), ShelfError> {
        let isbn = &book.isbn;
        if let Err(err) = ctx.deadline.check(Stage::AttachToShelf.as_str()) {
            log_unshelved(source, isbn, &err.to_string());
            return Err(err);
        }

        match self.shelves.add_entry(ctx.user_id, isbn, &ctx.shelf) {
            Ok(entry) => Ok((entry, Shelving::Created)),
            Err(StoreError::Conflict(_)) => {
                let existing = self
                    .shelves
                    .get_entry(ctx.user_id, isbn, &ctx.shelf)
                    .map_err(|err| {
                        ShelfError::store(
                            format!("re-reading shelf entry {isbn} for user {}", ctx.user_id),
                            err,
                        )
                    })?;
                match existing {
                    Lookup::Found(entry) => {
                        debug!(stage = %Stage::AttachToShelf, "already shelved");
                        Ok((entry, Shelving::AlreadyShelved))
                    }
                    Lookup::NotFound => Err(ShelfError::store(
                        format!("attaching {isbn} for user {}", ctx.user_id),
                        StoreError::InvalidData("entry conflict without a readable row".to_string()),
                    )),
                }
            }
            Err(StoreError::MissingReference(_)) => Err(ShelfError::UnknownShelf {
                user_id: ctx.user_id,
                shelf: ctx.shelf.to_string(),
            }),
            Err(err) => {
                log_unshelved(source, isbn, &err.to_string());
                Err(ShelfError::store(
                    format!(
                        "attaching {isbn} to shelf {} for user {}",
                        ctx.shelf, ctx.user_id
                    ),
                    err,
                ))
            }
        }
    }
}

/// Records a book left cataloged without the requested shelf entry.
fn log_unshelved(source: BookSource, isbn: &Isbn, reason: &str) {
    match source {
        BookSource::Remote | BookSource::Manual => {
            warn!(%isbn, reason, "book cataloged but shelf attach failed");
        }
        BookSource::ConflictRecovered => {
            info!(
                %isbn,
                reason,
                "shelf attach failed after losing the insert race; book was cataloged by a concurrent request"
            );
        }
        BookSource::Catalog => {}
    }
}
