use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use shelfmark::config::IsbndbSettings;
use shelfmark::context::Deadline;
use shelfmark::domain::Isbn;
use shelfmark::error::LookupError;
use shelfmark::isbndb::{BibliographicClient, IsbndbHttpClient, classify_response};

#[test]
fn extract_book_metadata_from_fixture() {
    let raw = fs::read_to_string("tests/fixtures/isbndb_book.json").unwrap();
    let meta = classify_response("9780201616224", 200, &raw).unwrap();

    assert_eq!(meta.display_title(), Some("The Pragmatic Programmer"));
    assert_eq!(meta.primary_author(), Some("Hunt, Andrew"));
    assert_eq!(meta.page_count(), Some(321));
    assert_eq!(meta.isbn13, "9780201616224");

    let isbn: Isbn = "0-201-61622-X".parse().unwrap();
    let book = meta.to_book(&isbn);
    assert_eq!(book.isbn.as_str(), "9780201616224");
    assert_eq!(book.author, "Hunt, Andrew");
    assert_eq!(
        book.genres,
        vec!["computer_programming", "software_engineering"]
    );
}

#[test]
fn explicit_error_field_wins_over_status() {
    for status in [200, 404, 500] {
        let err = classify_response("9780000000002", status, r#"{"error":"not found"}"#)
            .unwrap_err();
        assert_matches!(err, LookupError::NotFound { .. });
    }
}

/// Serves one canned response and hands back the raw request text.
fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = stream.read(&mut buf).unwrap();
            if read == 0 {
                break;
            }
            request.extend_from_slice(&buf[..read]);
        }
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).unwrap();
        stream.flush().unwrap();
        String::from_utf8_lossy(&request).into_owned()
    });
    (format!("http://{addr}/api/v2/json"), handle)
}

fn client_for(base_url: String) -> IsbndbHttpClient {
    IsbndbHttpClient::new(&IsbndbSettings {
        base_url,
        api_key: Some("TESTKEY".to_string()),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[test]
fn http_lookup_hits_key_scoped_book_path() {
    let (base_url, server) = serve_once(
        "200 OK",
        r#"{"data":[{"title_latin":"Example","author_data":[{"id":"1","name":"A. Writer"}],"isbn13":"9780000000002","subject_ids":["Fiction"]}]}"#,
    );
    let client = client_for(base_url);
    let isbn: Isbn = "9780000000002".parse().unwrap();

    let meta = client
        .lookup_by_isbn(&isbn, &Deadline::after(Duration::from_secs(10)))
        .unwrap();
    let request = server.join().unwrap().to_lowercase();

    assert!(request.starts_with("get /api/v2/json/testkey/book/9780000000002 http/1.1"));
    assert!(request.contains("accept: application/json"));
    assert_eq!(meta.display_title(), Some("Example"));
    assert_eq!(meta.primary_author(), Some("A. Writer"));
}

#[test]
fn http_server_error_is_transient() {
    let (base_url, server) = serve_once("503 Service Unavailable", r#"{"message":"busy"}"#);
    let client = client_for(base_url);
    let isbn: Isbn = "9780000000002".parse().unwrap();

    let err = client
        .lookup_by_isbn(&isbn, &Deadline::none())
        .unwrap_err();
    server.join().unwrap();
    assert_matches!(err, LookupError::Transient(_));
}

#[test]
fn http_error_payload_is_not_found() {
    let (base_url, server) = serve_once("200 OK", r#"{"error":"Unable to locate 9780000000002"}"#);
    let client = client_for(base_url);
    let isbn: Isbn = "9780000000002".parse().unwrap();

    let err = client
        .lookup_by_isbn(&isbn, &Deadline::none())
        .unwrap_err();
    server.join().unwrap();
    assert_matches!(err, LookupError::NotFound { .. });
}

#[test]
fn cancelled_deadline_skips_network() {
    let client = client_for("http://127.0.0.1:9/api/v2/json".to_string());
    let isbn: Isbn = "9780000000002".parse().unwrap();
    let deadline = Deadline::none();
    deadline.cancel();

    assert_eq!(
        client.lookup_by_isbn(&isbn, &deadline).unwrap_err(),
        LookupError::Cancelled
    );
}

#[test]
fn client_requires_api_key() {
    let result = IsbndbHttpClient::new(&IsbndbSettings {
        base_url: "https://isbndb.com/api/v2/json".to_string(),
        api_key: None,
        timeout: Duration::from_secs(5),
    });
    assert!(result.is_err());
}

#[test]
fn null_fields_read_as_empty() {
    let body = r#"{"data":[{
        "title_latin":null,
        "title":"Example",
        "author_data":[null,{"id":null,"name":"A. Writer"}],
        "subject_ids":null,
        "isbn13":"9780000000002",
        "isbn10":null,
        "physical_description_text":null,
        "publisher_name":null,
        "language":null,
        "summary":null
    }]}"#;

    let meta = classify_response("9780000000002", 200, body).unwrap();
    assert_eq!(meta.display_title(), Some("Example"));
    assert_eq!(meta.primary_author(), Some("A. Writer"));
    assert_eq!(meta.summary, "");
    assert_eq!(meta.page_count(), None);

    let book = meta.to_book(&"9780000000002".parse().unwrap());
    assert!(book.genres.is_empty());
    assert!(book.validate().is_ok());
}

#[test]
fn null_data_is_not_found() {
    let err = classify_response("9780000000002", 200, r#"{"data":null}"#).unwrap_err();
    assert_matches!(err, LookupError::NotFound { .. });
}

#[test]
fn transport_errors_do_not_expose_api_key() {
    // Bind then drop to get a local port with nothing listening.
    let addr = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let client = IsbndbHttpClient::new(&IsbndbSettings {
        base_url: format!("http://{addr}/api/v2/json"),
        api_key: Some("SECRETKEY123".to_string()),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let isbn: Isbn = "9780000000002".parse().unwrap();

    let err = client
        .lookup_by_isbn(&isbn, &Deadline::after(Duration::from_secs(10)))
        .unwrap_err();

    assert_matches!(err, LookupError::Transient(_));
    assert!(!err.to_string().contains("SECRETKEY123"));
    assert!(!format!("{err:?}").contains("SECRETKEY123"));
}
