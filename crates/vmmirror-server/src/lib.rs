//! Reference HTTP server for the vmmirror bucket protocol.
//!
//! Serves a directory tree as a path-style object store. Each top-level
//! directory of `data_dir` is a bucket. Inside a bucket every directory is
//! a folder marker object (`a/b/`) and every regular file is an object
//! (`a/b/c`). Dotfiles are hidden; they carry the tag sidecars: a folder's
//! tags live in its `.tags.json`, a file `x` has its tags in `.x.tags.json`.
//! Sidecars hold a flat JSON object of tag key to tag value.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, warn};

/// Page size used when the request carries no `max-keys`.
pub const DEFAULT_MAX_KEYS: usize = 1000;

const TAGS_FILE: &str = ".tags.json";

#[derive(Debug, Serialize)]
struct ListEntry {
    key: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct ListBody {
    contents: Vec<ListEntry>,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct TagEntry {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct TaggingBody {
    tag_set: Vec<TagEntry>,
}

/// File-backed bucket store.
pub struct Store {
    data_dir: PathBuf,
}

/// Map an object key onto a path below `root`, refusing keys that would
/// leave it.
fn key_path(root: &Path, key: &str) -> Option<PathBuf> {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let rel = Path::new(trimmed);
    let clean = rel.components().all(|c| match c {
        Component::Normal(name) => !name.to_string_lossy().starts_with('.'),
        _ => false,
    });
    clean.then(|| root.join(rel))
}

fn sidecar_path(root: &Path, key: &str) -> Option<PathBuf> {
    let path = key_path(root, key)?;
    if key.ends_with('/') {
        return Some(path.join(TAGS_FILE));
    }
    let name = path.file_name()?.to_string_lossy().into_owned();
    Some(path.with_file_name(format!(".{name}{TAGS_FILE}")))
}

fn collect_keys(dir: &Path, rel: &str, out: &mut Vec<(String, u64)>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let key = format!("{rel}{name}/");
            out.push((key.clone(), 0));
            collect_keys(&entry.path(), &key, out)?;
        } else if file_type.is_file() {
            out.push((format!("{rel}{name}"), entry.metadata()?.len()));
        }
    }
    Ok(())
}

impl Store {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn bucket_dir(&self, bucket: &str) -> Option<PathBuf> {
        self.bucket_root(bucket).ok().filter(|dir| dir.is_dir())
    }

    fn bucket_root(&self, bucket: &str) -> std::io::Result<PathBuf> {
        key_path(&self.data_dir, bucket)
            .filter(|_| !bucket.contains('/'))
            .ok_or_else(|| invalid_key(bucket))
    }

    /// Store an object. A key ending in `/` creates a folder marker.
    pub fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> std::io::Result<()> {
        let root = self.bucket_root(bucket)?;
        let path = key_path(&root, key).ok_or_else(|| invalid_key(key))?;
        if key.ends_with('/') {
            return fs::create_dir_all(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)
    }

    pub fn put_tags(&self, bucket: &str, key: &str, tags: &[(&str, &str)]) -> std::io::Result<()> {
        let root = self.bucket_root(bucket)?;
        let path = sidecar_path(&root, key).ok_or_else(|| invalid_key(key))?;
        let map: BTreeMap<&str, &str> = tags.iter().copied().collect();
        let json = serde_json::to_vec_pretty(&map)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)
    }

    /// All keys of `bucket` in lexicographic order with their sizes, or
    /// `None` when the bucket does not exist.
    pub fn list_keys(&self, bucket: &str) -> std::io::Result<Option<Vec<(String, u64)>>> {
        let Some(dir) = self.bucket_dir(bucket) else {
            return Ok(None);
        };
        let mut keys = Vec::new();
        collect_keys(&dir, "", &mut keys)?;
        keys.sort();
        Ok(Some(keys))
    }

    /// Object bytes. Folder markers read as empty.
    pub fn get_object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let path = key_path(&self.bucket_dir(bucket)?, key)?;
        if key.ends_with('/') {
            return path.is_dir().then(Vec::new);
        }
        fs::read(path).ok()
    }

    /// Tags of an existing object; an object without a sidecar has none.
    pub fn get_tags(&self, bucket: &str, key: &str) -> Option<Vec<(String, String)>> {
        let root = self.bucket_dir(bucket)?;
        let path = key_path(&root, key)?;
        let exists = if key.ends_with('/') {
            path.is_dir()
        } else {
            path.is_file()
        };
        if !exists {
            return None;
        }
        let sidecar = sidecar_path(&root, key)?;
        let Ok(content) = fs::read(&sidecar) else {
            return Some(Vec::new());
        };
        match serde_json::from_slice::<BTreeMap<String, String>>(&content) {
            Ok(map) => Some(map.into_iter().collect()),
            Err(e) => {
                warn!("ignoring malformed tag file {}: {e}", sidecar.display());
                Some(Vec::new())
            }
        }
    }
}

fn invalid_key(key: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("invalid object key '{key}'"),
    )
}

/// Decode `%XX` escapes (and `+` as space in query values). Fails when
/// the decoded bytes are not UTF-8.
pub fn decode_component(raw: &str, plus_as_space: bool) -> Option<String> {
    let decoded = if plus_as_space && raw.contains('+') {
        percent_decode_str(&raw.replace('+', " "))
            .decode_utf8()
            .ok()?
            .into_owned()
    } else {
        percent_decode_str(raw).decode_utf8().ok()?.into_owned()
    };
    Some(decoded)
}

/// Split a request target into decoded path and query parameters.
/// Parameters without `=` map to an empty value.
pub fn parse_target(url: &str) -> Option<(String, BTreeMap<String, String>)> {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let path = decode_component(path, false)?;
    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(k, true)?, decode_component(v, true)?);
    }
    Some((path, params))
}

/// Select one listing page: keys under `prefix` strictly after `after`.
pub fn paginate(
    keys: &[(String, u64)],
    prefix: &str,
    after: Option<&str>,
    max_keys: usize,
) -> (Vec<(String, u64)>, Option<String>) {
    let mut matching = keys
        .iter()
        .filter(|(k, _)| k.starts_with(prefix))
        .filter(|(k, _)| after.is_none_or(|t| k.as_str() > t));
    let page: Vec<(String, u64)> = matching.by_ref().take(max_keys).cloned().collect();
    let next = if matching.next().is_some() {
        page.last().map(|(k, _)| k.clone())
    } else {
        None
    };
    (page, next)
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_octet(req: tiny_http::Request, data: Vec<u8>) {
    let header =
        Header::from_bytes("Content-Type", "application/octet-stream").expect("valid header");
    let _ = req.respond(Response::from_data(data).with_header(header));
}

fn respond_json(req: tiny_http::Request, value: &impl Serialize) {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let header =
                Header::from_bytes("Content-Type", "application/json").expect("valid header");
            let _ = req.respond(Response::from_data(body).with_header(header));
        }
        Err(e) => {
            error!("serializing response: {e}");
            respond_err(req, 500, "serialization error");
        }
    }
}

fn handle_list(
    store: &Store,
    req: tiny_http::Request,
    bucket: &str,
    params: &BTreeMap<String, String>,
) {
    let prefix = params.get("prefix").map_or("", String::as_str);
    let after = params.get("continuation-token").map(String::as_str);
    let max_keys = match params.get("max-keys") {
        None => DEFAULT_MAX_KEYS,
        Some(v) => match v.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                respond_err(req, 400, "invalid max-keys");
                return;
            }
        },
    };

    let keys = match store.list_keys(bucket) {
        Ok(Some(keys)) => keys,
        Ok(None) => {
            respond_err(req, 404, "no such bucket");
            return;
        }
        Err(e) => {
            error!("listing {bucket}: {e}");
            respond_err(req, 500, &format!("listing error: {e}"));
            return;
        }
    };

    let (page, next) = paginate(&keys, prefix, after, max_keys);
    debug!("list {bucket} prefix='{prefix}': {} keys", page.len());
    let body = ListBody {
        contents: page
            .into_iter()
            .map(|(key, size)| ListEntry { key, size })
            .collect(),
        next_continuation_token: next,
    };
    respond_json(req, &body);
}

fn handle_object(
    store: &Store,
    req: tiny_http::Request,
    bucket: &str,
    key: &str,
    params: &BTreeMap<String, String>,
) {
    if params.contains_key("tagging") {
        match store.get_tags(bucket, key) {
            Some(tags) => {
                let body = TaggingBody {
                    tag_set: tags
                        .into_iter()
                        .map(|(key, value)| TagEntry { key, value })
                        .collect(),
                };
                respond_json(req, &body);
            }
            None => respond_err(req, 404, "not found"),
        }
        return;
    }
    match store.get_object(bucket, key) {
        Some(data) => respond_octet(req, data),
        None => respond_err(req, 404, "not found"),
    }
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(store: &Store, req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    if method != Method::Get {
        respond_err(req, 405, "method not allowed");
        return;
    }
    if url == "/health" {
        let _ = req.respond(Response::from_string(r#"{"status":"ok"}"#));
        return;
    }
    let Some((path, params)) = parse_target(&url) else {
        respond_err(req, 400, "malformed request target");
        return;
    };
    let Some(rest) = path.strip_prefix('/').filter(|r| !r.is_empty()) else {
        respond_err(req, 404, "not found");
        return;
    };

    match rest.split_once('/') {
        None if params.get("list-type").map(String::as_str) == Some("2") => {
            handle_list(store, req, rest, &params);
        }
        None => respond_err(req, 400, "unsupported bucket operation"),
        Some((bucket, key)) if !key.is_empty() => {
            handle_object(store, req, bucket, key, &params);
        }
        Some(_) => respond_err(req, 404, "not found"),
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(store: &Arc<Store>, addr: &str) {
    let server = Server::http(addr).expect("failed to bind HTTP server");
    for request in server.incoming_requests() {
        handle_request(store, request);
    }
}

/// A test helper that starts a vmmirror-server on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}` and serves buckets from the provided `data_dir`.
/// Drop the `TestServer` to stop the server (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub store: Arc<Store>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server over `data_dir`.
    /// Binds to `127.0.0.1:0` (random port).
    pub fn start(data_dir: PathBuf) -> Self {
        fs::create_dir_all(&data_dir).expect("failed to create test data dir");
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let store = Arc::new(Store::new(data_dir));
        let srv = Arc::clone(&server);
        let srv_store = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&srv_store, request);
            }
        });

        Self {
            url,
            port,
            store,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
