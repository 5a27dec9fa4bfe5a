//! Black-box coverage for the small enums and the pooled header map.

use weft::enums::HttpStatus;
use weft::headers::{HeaderArrayPool, HeaderMap};
use weft::{Method, Status, Version};

#[test]
fn method_from_wire() {
    assert_eq!(Method::from_wire("GET"), Method::Get);
    assert_eq!(Method::from_wire("POST"), Method::Post);
    assert_eq!(Method::from_wire("PATCH"), Method::Patch);
    assert_eq!(Method::from_wire("get"), Method::Other("get".to_string()));
    assert_eq!(Method::from_wire("PURGE"), Method::Other("PURGE".to_string()));
}

#[test]
fn method_is_head_only_for_head() {
    assert!(Method::Head.is_head());
    assert!(!Method::Get.is_head());
}

#[test]
fn status_raw_fallback_round_trips_code_and_reason() {
    let status = Status::from_code(451, "Unavailable For Legal Reasons");
    assert_eq!(status.code(), 451);
    assert_eq!(status.reason(), "Unavailable For Legal Reasons");
}

#[test]
fn status_from_code_prefers_well_known_variant() {
    assert_eq!(Status::from_code(404, "whatever"), Status::NotFound);
}

#[test]
fn version_http10_defaults_to_close() {
    assert!(Version::Http10.defaults_to_close());
    assert!(!Version::Http11.defaults_to_close());
}

#[test]
fn header_map_is_case_insensitive_and_insertion_ordered() {
    let pool = HeaderArrayPool::new();
    let mut headers = HeaderMap::new(&pool);
    headers.insert("Host", "example.com").unwrap();
    headers.insert("X-Request-Id", "abc123").unwrap();
    headers.set("HOST", "override.example.com").unwrap();

    assert_eq!(headers.get("host"), Some("override.example.com"));
    let keys: Vec<_> = headers.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["host", "x-request-id"]);
}

#[test]
fn header_map_rejects_duplicate_insert() {
    let pool = HeaderArrayPool::new();
    let mut headers = HeaderMap::new(&pool);
    headers.insert("Accept", "*/*").unwrap();
    assert!(headers.insert("accept", "text/html").is_err());
}
