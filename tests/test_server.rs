use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use warden::config::Config;
use warden::http::resolve::Resolver;
use warden::http::response::StatusCode;
use warden::server::{ControlHandle, Server};
use warden::store::{CredentialCache, MemoryStore, open_sessions};

struct Running {
    addr: SocketAddr,
    control: ControlHandle,
    thread: Option<JoinHandle<anyhow::Result<()>>>,
    _root: tempfile::TempDir,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.control.shutdown();
            let _ = thread.join();
        }
    }
}

fn write_page(root: &Path, name: &str, contents: &[u8]) {
    let path = root.join(name);
    fs::write(&path, contents).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
}

fn start(pages: &[(&str, &[u8])]) -> Running {
    start_with(pages, |_| {})
}

fn start_with(pages: &[(&str, &[u8])], tweak: impl FnOnce(&mut Config)) -> Running {
    let root = tempfile::tempdir().unwrap();
    for (name, contents) in pages {
        write_page(root.path(), name, contents);
    }

    let mut cfg = Config::default();
    cfg.server.listen_addr = "127.0.0.1:0".to_string();
    cfg.server.tick_secs = 1;
    cfg.server.idle_ticks = 1;
    cfg.server.write_idle_ticks = 1;
    cfg.workers.threads = 2;
    cfg.store.pool_size = 2;
    tweak(&mut cfg);

    let sessions = Arc::new(open_sessions(&MemoryStore::new(), cfg.store.pool_size).unwrap());
    let resolver = Arc::new(Resolver::new(root.path(), Arc::new(CredentialCache::new())));
    let mut server = Server::new(&cfg, resolver, sessions).unwrap();
    let addr = server.local_addr();
    let control = server.control();
    let thread = thread::spawn(move || server.run());

    Running {
        addr,
        control,
        thread: Some(thread),
        _root: root,
    }
}

fn connect(addr: SocketAddr) -> BufReader<TcpStream> {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    BufReader::new(stream)
}

struct Reply {
    status: u16,
    headers: Vec<String>,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

fn exchange(conn: &mut BufReader<TcpStream>, request: &[u8]) -> Reply {
    conn.get_mut().write_all(request).unwrap();

    let mut status_line = String::new();
    conn.read_line(&mut status_line).unwrap();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or_else(|| panic!("bad status line {status_line:?}"));

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        conn.read_line(&mut line).unwrap();
        let line = line.trim_end_matches("\r\n").to_string();
        if line.is_empty() {
            break;
        }
        headers.push(line);
    }

    let mut reply = Reply {
        status,
        headers,
        body: Vec::new(),
    };
    let len: usize = reply.header("Content-Length").unwrap().parse().unwrap();
    reply.body.resize(len, 0);
    conn.read_exact(&mut reply.body).unwrap();
    reply
}

fn assert_closed(conn: &mut BufReader<TcpStream>) {
    let mut rest = Vec::new();
    let n = conn.read_to_end(&mut rest).unwrap_or(0);
    assert_eq!(n, 0, "unexpected bytes after response: {rest:?}");
}

#[test]
fn test_get_serves_file_bytes_exactly() {
    let big: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let server = start(&[("big.html", big.as_slice())]);
    let mut conn = connect(server.addr);

    let reply = exchange(&mut conn, b"GET /big.html HTTP/1.1\r\nHost: h\r\n\r\n");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Content-Type"), Some("text/html"));
    assert_eq!(reply.header("Connection"), Some("close"));
    assert_eq!(reply.body.len(), big.len());
    assert!(reply.body == big);
    assert_closed(&mut conn);
}

#[test]
fn test_root_serves_index_when_present() {
    let server = start(&[("index.html", b"<h1>home</h1>".as_slice())]);
    let mut conn = connect(server.addr);
    let reply = exchange(&mut conn, b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"<h1>home</h1>");
}

#[test]
fn test_root_is_not_found_without_index() {
    let server = start(&[]);
    let mut conn = connect(server.addr);
    let reply = exchange(&mut conn, b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body, StatusCode::NotFound.canned_body().as_bytes());
}

#[test]
fn test_unsupported_method_is_bad_request() {
    let server = start(&[]);
    let mut conn = connect(server.addr);
    let reply = exchange(&mut conn, b"FOO /x HTTP/1.1\r\n\r\n");
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body, StatusCode::BadRequest.canned_body().as_bytes());
    assert_closed(&mut conn);
}

#[test]
fn test_request_split_across_writes() {
    let server = start(&[("a.html", b"split".as_slice())]);
    let mut conn = connect(server.addr);
    conn.get_mut().write_all(b"GET /a.ht").unwrap();
    thread::sleep(Duration::from_millis(50));
    conn.get_mut().write_all(b"ml HTTP/1.1\r").unwrap();
    thread::sleep(Duration::from_millis(50));
    let reply = exchange(&mut conn, b"\nHost: h\r\n\r\n");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"split");
}

#[test]
fn test_register_and_login_over_keep_alive() {
    let server = start(&[
        ("login.html", b"login".as_slice()),
        ("registerError.html", b"register-error".as_slice()),
        ("welcome.html", b"welcome".as_slice()),
        ("loginError.html", b"login-error".as_slice()),
    ]);
    let mut conn = connect(server.addr);
    let register = b"POST /2register HTTP/1.1\r\nConnection: keep-alive\r\nContent-Length: 17\r\n\r\nuser=ab&passwd=cd";

    let reply = exchange(&mut conn, register);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Connection"), Some("keep-alive"));
    assert_eq!(reply.body, b"login");

    let reply = exchange(&mut conn, register);
    assert_eq!(reply.body, b"register-error");

    let reply = exchange(
        &mut conn,
        b"POST /3login HTTP/1.1\r\nConnection: keep-alive\r\nContent-Length: 17\r\n\r\nuser=ab&passwd=cd",
    );
    assert_eq!(reply.body, b"welcome");

    let reply = exchange(
        &mut conn,
        b"POST /3login HTTP/1.1\r\nContent-Length: 17\r\n\r\nuser=ab&passwd=xx",
    );
    assert_eq!(reply.body, b"login-error");
    assert_eq!(reply.header("Connection"), Some("close"));
    assert_closed(&mut conn);
}

#[test]
fn test_idle_connection_is_evicted_on_tick() {
    let server = start(&[]);
    let mut idle = connect(server.addr);

    thread::sleep(Duration::from_millis(1300));
    server.control.tick().unwrap();
    assert_closed(&mut idle);
}

#[test]
fn test_shutdown_stops_the_loop() {
    let mut server = start(&[]);
    server.control.shutdown().unwrap();
    let thread = server.thread.take().unwrap();
    assert!(thread.join().unwrap().is_ok());
}

#[test]
fn test_connection_over_cap_is_closed() {
    let server = start_with(&[("a.html", b"capped".as_slice())], |cfg| {
        cfg.server.max_connections = 1;
    });
    let mut first = connect(server.addr);
    // Let the first connection be admitted before the second arrives.
    thread::sleep(Duration::from_millis(100));

    let mut second = connect(server.addr);
    assert_closed(&mut second);

    let reply = exchange(&mut first, b"GET /a.html HTTP/1.1\r\n\r\n");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"capped");
}

#[test]
fn test_peer_hangup_evicts_connection() {
    let server = start(&[]);
    let mut conn = connect(server.addr);
    conn.get_ref().shutdown(Shutdown::Write).unwrap();
    assert_closed(&mut conn);
}

#[test]
fn test_bad_request_keeps_earlier_keep_alive() {
    let server = start(&[("a.html", b"again".as_slice())]);
    let mut conn = connect(server.addr);

    let reply = exchange(
        &mut conn,
        b"GET /a.html HTTP/1.1\r\nConnection: keep-alive\r\nX-Bad\rx",
    );
    assert_eq!(reply.status, 400);
    assert_eq!(reply.header("Connection"), Some("keep-alive"));
    assert_eq!(reply.body, StatusCode::BadRequest.canned_body().as_bytes());

    let reply = exchange(&mut conn, b"GET /a.html HTTP/1.1\r\n\r\n");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Connection"), Some("close"));
    assert_eq!(reply.body, b"again");
    assert_closed(&mut conn);
}
