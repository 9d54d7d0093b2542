use std::fs;
use std::os::unix::fs::PermissionsExt;

use warden::http::file::MappedFile;
use warden::http::resolve::Outcome;
use warden::http::response::{ResponseHead, StatusCode};
use warden::http::writer::{ResponseWriter, WriteProgress};

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::InternalError.as_u16(), 500);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::BadRequest.reason_phrase(), "Bad Request");
    assert_eq!(StatusCode::Forbidden.reason_phrase(), "Forbidden");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    assert_eq!(StatusCode::InternalError.reason_phrase(), "Internal Error");
}

#[test]
fn test_keep_alive_header() {
    let mut head = ResponseHead::default();
    head.status_line(StatusCode::Ok).unwrap();
    head.headers(5, true).unwrap();
    assert_eq!(
        head.as_bytes(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Type: text/html\r\nConnection: keep-alive\r\n\r\n"
    );
}

#[test]
fn test_error_outcome_is_single_segment() {
    let mut writer = ResponseWriter::new();
    writer.prepare(Outcome::Forbidden, false).unwrap();
    assert_eq!(writer.bytes_to_send(), writer.head().len());

    let mut out = Vec::new();
    assert_eq!(writer.write_to(&mut out).unwrap(), WriteProgress::Done);
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(text.ends_with(StatusCode::Forbidden.canned_body()));
    assert!(text.contains(&format!(
        "Content-Length: {}\r\n",
        StatusCode::Forbidden.canned_body().len()
    )));
}

#[test]
fn test_file_outcome_sends_header_then_file_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    let contents: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&path, &contents).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

    let mut writer = ResponseWriter::new();
    writer
        .prepare(Outcome::File(MappedFile::open(&path).unwrap()), true)
        .unwrap();
    let head = writer.head().as_bytes().to_vec();
    assert_eq!(writer.bytes_to_send(), head.len() + contents.len());

    let mut out = Vec::new();
    assert_eq!(writer.write_to(&mut out).unwrap(), WriteProgress::Done);
    assert_eq!(&out[..head.len()], &head[..]);
    assert_eq!(&out[head.len()..], &contents[..]);
    assert_eq!(writer.remaining(), 0);
}
