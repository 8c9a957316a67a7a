//! The CouchDB client against a small in-process fake server.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use mbox2couch::config::CouchDbConfig;
use mbox2couch::error::MigrateError;
use mbox2couch::ingest::{ingest, IngestOptions, Outcome};
use mbox2couch::model::document::{attachment_filename, Document};
use mbox2couch::store::couchdb::CouchDb;
use mbox2couch::store::{CreateOutcome, DocumentStore};

/// One request as seen by the fake server.
#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

#[derive(Default)]
struct FakeState {
    /// Decoded document ID → current revision generation.
    docs: HashMap<String, u32>,
    requests: Vec<Recorded>,
    /// Expected `Authorization` header, if the server requires one.
    auth: Option<String>,
    /// Answer every document `PUT` with this status instead.
    fail_puts_with: Option<u16>,
    /// Echo the ID in `PUT` responses exactly as it appeared in the path.
    echo_encoded_ids: bool,
}

struct FakeCouch {
    url: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeCouch {
    fn start(state: FakeState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(Mutex::new(state));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => serve(stream, &shared),
                    Err(_) => break,
                }
            }
        });
        Self { url, state }
    }

    fn config(&self) -> CouchDbConfig {
        CouchDbConfig {
            server_url: self.url.clone(),
            db_name: "mail".to_string(),
            timeout_secs: Some(10),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }
}

fn serve(stream: TcpStream, state: &Mutex<FakeState>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).unwrap_or(0) == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).unwrap();

    let request = Recorded {
        method,
        target,
        headers,
        body,
    };
    let (status, json) = respond(&request, &mut state.lock().unwrap());

    let mut stream = reader.into_inner();
    let response = format!(
        "HTTP/1.1 {status} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{json}",
        json.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn respond(request: &Recorded, state: &mut FakeState) -> (u16, String) {
    state.requests.push(request.clone());

    if let Some(expected) = &state.auth {
        if request.headers.get("authorization") != Some(expected) {
            return (401, r#"{"error":"unauthorized","reason":"Name or password is incorrect."}"#.into());
        }
    }

    let (path, query) = request.target.split_once('?').unwrap_or((request.target.as_str(), ""));
    let encoded: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let decoded: Vec<String> = encoded.iter().map(|s| percent_decode(s)).collect();
    let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();
    let echo_encoded = state.echo_encoded_ids;
    let echo = |id: &str| {
        if echo_encoded {
            encoded.get(1).copied().unwrap_or(id).to_string()
        } else {
            id.to_string()
        }
    };

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["mail"]) => (200, r#"{"db_name":"mail"}"#.into()),
        ("GET", [_]) => (404, r#"{"error":"not_found","reason":"Database does not exist."}"#.into()),
        ("PUT", ["mail", id]) => {
            if let Some(status) = state.fail_puts_with {
                return (status, r#"{"error":"internal","reason":"disk full"}"#.into());
            }
            if state.docs.contains_key(*id) {
                return (409, r#"{"error":"conflict","reason":"Document update conflict."}"#.into());
            }
            let body = serde_json::json!({"ok": true, "id": echo(*id), "rev": "1-a"});
            state.docs.insert(id.to_string(), 1);
            (201, body.to_string())
        }
        ("PUT", ["mail", id, _]) => {
            let Some(generation) = state.docs.get_mut(*id) else {
                return (404, r#"{"error":"not_found","reason":"missing"}"#.into());
            };
            let rev = if *generation == 1 { "1-a" } else { "2-b" };
            if query != format!("rev={rev}") {
                return (409, r#"{"error":"conflict","reason":"stale rev"}"#.into());
            }
            *generation += 1;
            (201, serde_json::json!({"ok": true, "id": echo(*id), "rev": "2-b"}).to_string())
        }
        _ => (405, r#"{"error":"method_not_allowed"}"#.into()),
    }
}

/// Decode `%XX` escapes in one path segment.
fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'%')
            .then(|| bytes.get(i + 1..i + 3))
            .flatten()
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(b) => {
                out.push(b);
                i += 3;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn document<'a>(id: &str, raw: &'a [u8]) -> Document<'a> {
    let mut fields = serde_json::Map::new();
    fields.insert("_id".into(), id.into());
    fields.insert("Subject".into(), "hello".into());
    Document::new(id.to_string(), fields, raw)
}

#[test]
fn test_connect_checks_database() {
    let server = FakeCouch::start(FakeState::default());
    let client = CouchDb::connect(&server.config()).unwrap();
    assert_eq!(client.name(), "mail");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].target, "/mail");
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[test]
fn test_connect_missing_database() {
    let server = FakeCouch::start(FakeState::default());
    let config = CouchDbConfig {
        db_name: "archive".to_string(),
        ..server.config()
    };
    let err = CouchDb::connect(&config).err().unwrap();
    assert!(matches!(err, MigrateError::DatabaseNotFound(ref db) if db == "archive"));
}

#[test]
fn test_basic_auth_from_config() {
    let server = FakeCouch::start(FakeState {
        // admin:secret
        auth: Some("Basic YWRtaW46c2VjcmV0".to_string()),
        ..Default::default()
    });

    let wrong = CouchDbConfig {
        username: "admin".to_string(),
        password: "nope".to_string(),
        ..server.config()
    };
    assert!(matches!(
        CouchDb::connect(&wrong).err().unwrap(),
        MigrateError::Unauthorized(_)
    ));

    let right = CouchDbConfig {
        username: "admin".to_string(),
        password: "secret".to_string(),
        ..server.config()
    };
    assert!(CouchDb::connect(&right).is_ok());
}

#[test]
fn test_basic_auth_from_url_userinfo() {
    let server = FakeCouch::start(FakeState {
        auth: Some("Basic YWRtaW46c2VjcmV0".to_string()),
        ..Default::default()
    });
    let config = CouchDbConfig {
        server_url: server.url.replace("http://", "http://admin:secret@"),
        ..server.config()
    };
    let client = CouchDb::connect(&config).unwrap();
    assert_eq!(client.server_url().username(), "");
    assert_eq!(client.server_url().password(), None);
}

#[test]
fn test_create_attach_and_conflict() {
    let server = FakeCouch::start(FakeState::default());
    let mut client = CouchDb::connect(&server.config()).unwrap();

    let raw = b"Subject: hello\r\n\r\nbody\r\n";
    let doc = document("<a/b@example.com>", raw);
    let CreateOutcome::Created(doc_ref) = client.create_if_absent(&doc).unwrap() else {
        panic!("expected created");
    };
    assert_eq!(doc_ref.rev, "1-a");
    client.attach(&doc_ref, &doc.attachment()).unwrap();

    assert_eq!(client.create_if_absent(&doc).unwrap(), CreateOutcome::Conflict);

    let requests = server.requests();
    let create = &requests[1];
    assert_eq!(create.method, "PUT");
    assert_eq!(create.target, "/mail/%3Ca%2Fb@example.com%3E");
    assert_eq!(create.headers["content-type"], "application/json");
    let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();
    assert_eq!(body["_id"], "<a/b@example.com>");
    assert_eq!(body["Subject"], "hello");

    let attach = &requests[2];
    assert_eq!(attach.target, "/mail/%3Ca%2Fb@example.com%3E/a%2Fb@example.com.eml?rev=1-a");
    assert_eq!(attach.headers["content-type"], "message/rfc822");
    assert_eq!(attach.body, raw);
    assert_eq!(attachment_filename("<a/b@example.com>"), "a/b@example.com.eml");
}

#[test]
fn test_attach_uses_sent_id_not_echoed_id() {
    let server = FakeCouch::start(FakeState {
        echo_encoded_ids: true,
        ..Default::default()
    });
    let mut client = CouchDb::connect(&server.config()).unwrap();

    let doc = document("<x y@example.com>", b"Subject: s\n\nbody\n");
    let CreateOutcome::Created(doc_ref) = client.create_if_absent(&doc).unwrap() else {
        panic!("expected created");
    };
    assert_eq!(doc_ref.id, "<x y@example.com>");
    client.attach(&doc_ref, &doc.attachment()).unwrap();

    let attach = &server.requests()[2];
    assert!(attach.target.starts_with("/mail/%3Cx%20y@example.com%3E/"));
}

#[test]
fn test_unexpected_status_is_store_error() {
    let server = FakeCouch::start(FakeState {
        fail_puts_with: Some(500),
        ..Default::default()
    });
    let mut client = CouchDb::connect(&server.config()).unwrap();
    let err = client.create_if_absent(&document("id1", b"x")).unwrap_err();
    match err {
        MigrateError::Store { status, reason, .. } => {
            assert_eq!(status, 500);
            assert_eq!(reason, "internal: disk full");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_full_ingest_against_fake_server() {
    let server = FakeCouch::start(FakeState::default());
    let mut client = CouchDb::connect(&server.config()).unwrap();
    let fixture = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/simple.mbox");

    let first = ingest(&fixture, &mut client, &IngestOptions::default(), None, &mut |_| {}).unwrap();
    assert_eq!(first.added, 5);
    assert_eq!(first.outcome, Outcome::Success);

    let second = ingest(&fixture, &mut client, &IngestOptions::default(), None, &mut |_| {}).unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.conflicts, 5);
    assert_eq!(second.outcome.code(), 2);

    // Connect + 5 creates + 5 attachments + 5 conflicting creates
    assert_eq!(server.requests().len(), 16);
}
