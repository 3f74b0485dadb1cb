use assert_matches::assert_matches;

use shelfmark::domain::{Book, Isbn, Lookup, ShelfName};
use shelfmark::error::ShelfError;

#[test]
fn isbn10_and_isbn13_spellings_share_identity() {
    let short: Isbn = "0 201 61622 X".parse().unwrap();
    let long: Isbn = "978-0-201-61622-4".parse().unwrap();
    assert_eq!(short, long);
}

#[test]
fn book_json_uses_canonical_isbn() {
    let book: Book = serde_json::from_str(
        r#"{"isbn":"0-306-40615-2","title":"T","author":"A","genres":[],"pages":null}"#,
    )
    .unwrap();
    assert_eq!(book.isbn.as_str(), "9780306406157");

    let json = serde_json::to_value(&book).unwrap();
    assert_eq!(json["isbn"], "9780306406157");
}

#[test]
fn book_json_rejects_invalid_isbn() {
    let result = serde_json::from_str::<Book>(
        r#"{"isbn":"not-an-isbn","title":"T","author":"A","genres":[],"pages":null}"#,
    );
    assert!(result.is_err());
}

#[test]
fn default_shelves_are_valid_names() {
    let names = ShelfName::defaults();
    assert_eq!(names.len(), 3);
    for name in names {
        assert_eq!(name.as_str().parse::<ShelfName>().unwrap(), name);
    }
}

#[test]
fn book_validation_requires_title_and_author() {
    let book = Book {
        isbn: "9780000000002".parse().unwrap(),
        title: "Example".to_string(),
        author: String::new(),
        genres: Vec::new(),
        pages: None,
    };
    assert_matches!(book.validate(), Err(ShelfError::InvalidBook(_)));
}

#[test]
fn lookup_converts_from_option() {
    assert_eq!(Lookup::from(Some(3)), Lookup::Found(3));
    assert!(!Lookup::<u8>::from(None).is_found());
    assert_eq!(Lookup::Found("x").into_option(), Some("x"));
}

#[test]
fn non_ascii_digits_are_invalid_isbns() {
    for input in ["٠٣٠٦٤٠٦١٥٢", "978000000000٢", "０３０６４０６１５２"] {
        assert_matches!(input.parse::<Isbn>(), Err(ShelfError::InvalidIsbn(_)));
    }
}
