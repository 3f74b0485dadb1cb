use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ShelfError;

/// Shelves every account starts with.
pub const DEFAULT_SHELVES: [&str; 3] = ["currently-reading", "finished", "to-read"];

static ISBN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]{9}[0-9X]|[0-9]{13})$").expect("static ISBN regex"));

static SHELF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,63}$").expect("static shelf regex"));

/// ISBN in canonical ISBN-13 form.
///
/// ISBN-10 input is rewritten to its ISBN-13 equivalent so that both spellings
/// of the same book share one catalog row. Check digits of the input are not
/// verified; a wrong ISBN simply fails to resolve remotely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Isbn(String);

impl Isbn {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Isbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Isbn {
    type Err = ShelfError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let compact = value
            .trim()
            .chars()
            .filter(|ch| *ch != '-' && *ch != ' ')
            .collect::<String>()
            .to_uppercase();
        if !ISBN_PATTERN.is_match(&compact) {
            return Err(ShelfError::InvalidIsbn(value.to_string()));
        }
        if compact.len() == 13 {
            return Ok(Self(compact));
        }
        Ok(Self(isbn10_to_isbn13(&compact[..9])))
    }
}

impl TryFrom<String> for Isbn {
    type Error = ShelfError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Isbn> for String {
    fn from(value: Isbn) -> Self {
        value.0
    }
}

fn isbn10_to_isbn13(body: &str) -> String {
    let mut digits = format!("978{body}");
    let sum: u32 = digits
        .chars()
        .filter_map(|ch| ch.to_digit(10))
        .enumerate()
        .map(|(idx, digit)| if idx % 2 == 0 { digit } else { digit * 3 })
        .sum();
    let check = (10 - sum % 10) % 10;
    digits.push(char::from_digit(check, 10).unwrap_or('0'));
    digits
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub fn new(value: i64) -> Result<Self, ShelfError> {
        if value <= 0 {
            return Err(ShelfError::InvalidUserId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ShelfError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<i64>()
            .map_err(|_| ShelfError::InvalidUserId(value.to_string()))?;
        Self::new(parsed)
    }
}

/// Name of a per-user shelf, normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShelfName(String);

impl ShelfName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn defaults() -> Vec<ShelfName> {
        DEFAULT_SHELVES
            .iter()
            .map(|name| ShelfName((*name).to_string()))
            .collect()
    }
}

impl fmt::Display for ShelfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ShelfName {
    type Err = ShelfError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if !SHELF_PATTERN.is_match(&normalized) {
            return Err(ShelfError::InvalidShelfName(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for ShelfName {
    type Error = ShelfError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ShelfName> for String {
    fn from(value: ShelfName) -> Self {
        value.0
    }
}

/// A catalog record. One row per ISBN, never updated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub isbn: Isbn,
    pub title: String,
    pub author: String,
    pub genres: Vec<String>,
    pub pages: Option<u32>,
}

impl Book {
    pub fn validate(&self) -> Result<(), ShelfError> {
        if self.title.trim().is_empty() {
            return Err(ShelfError::InvalidBook(format!(
                "{} has an empty title",
                self.isbn
            )));
        }
        if self.author.trim().is_empty() {
            return Err(ShelfError::InvalidBook(format!(
                "{} has an empty author",
                self.isbn
            )));
        }
        Ok(())
    }
}

/// A book placed on one of a user's shelves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfEntry {
    pub user_id: UserId,
    pub isbn: Isbn,
    pub shelf: ShelfName,
    pub pages_read: u32,
    pub added_at: String,
}

/// Shelf entry joined with its catalog record, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShelvedBook {
    pub book: Book,
    pub shelf: ShelfName,
    pub pages_read: u32,
    pub added_at: String,
}

/// Result of a point lookup. Absence is a value, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotFound,
        }
    }
}
