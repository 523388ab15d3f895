use crate::{ListPage, RemoteBackend, RemoteConfig, RemoteError, Tag, Tagging};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt::Write as _;
use std::io::{Read, Write};

/// HTTP-based object store backend.
///
/// Speaks a path-style bucket API with JSON listing and tagging bodies:
/// - `GET /<bucket>?list-type=2&prefix=<p>[&continuation-token=<t>]`: one listing page
/// - `GET /<bucket>/<key>?tagging`: tag set of an object
/// - `GET /<bucket>/<key>`: object bytes
pub struct HttpBackend {
    config: RemoteConfig,
    agent: ureq::Agent,
}

/// Everything outside the RFC 3986 unreserved set.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');
/// Same, but `/` passes through so object keys stay path-shaped.
const KEY_PATH: &AsciiSet = &COMPONENT.remove(b'/');

fn encode(raw: &str, keep_slash: bool) -> String {
    let set = if keep_slash { KEY_PATH } else { COMPONENT };
    utf8_percent_encode(raw, set).to_string()
}

impl HttpBackend {
    pub fn new(config: RemoteConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { config, agent }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn list_url(&self, bucket: &str, prefix: &str, continuation: Option<&str>) -> String {
        let mut url = format!(
            "{}/{}?list-type=2&prefix={}",
            self.config.url,
            encode(bucket, false),
            encode(prefix, false)
        );
        if let Some(token) = continuation {
            let _ = write!(url, "&continuation-token={}", encode(token, false));
        }
        url
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.url,
            encode(bucket, false),
            encode(key, true)
        )
    }

    fn do_get(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>, RemoteError> {
        let mut req = self
            .agent
            .get(url)
            .header("X-Vmmirror-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RemoteError::Http(e.to_string()));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(RemoteError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }
        Ok(resp)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, RemoteError> {
        let resp = self.do_get(url)?;
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))
    }
}

impl RemoteBackend for HttpBackend {
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        let url = self.list_url(bucket, prefix, continuation);
        tracing::debug!("GET {url}");
        self.get_json(&url)
    }

    fn get_object_tagging(&self, bucket: &str, key: &str) -> Result<Vec<Tag>, RemoteError> {
        let url = format!("{}?tagging", self.object_url(bucket, key));
        tracing::debug!("GET {url}");
        let tagging: Tagging = self.get_json(&url)?;
        Ok(tagging.tag_set)
    }

    fn download_object(
        &self,
        bucket: &str,
        key: &str,
        out: &mut dyn Write,
    ) -> Result<u64, RemoteError> {
        let url = self.object_url(bucket, key);
        tracing::debug!("GET {url}");
        let resp = self.do_get(&url)?;
        let mut reader = resp.into_body().into_reader();
        let written = std::io::copy(&mut reader, out)?;
        tracing::debug!("GET {url}: {written} bytes");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// A captured HTTP request for header inspection.
    #[derive(Debug, Clone)]
    struct CapturedRequest {
        path: String,
        headers: HashMap<String, String>,
    }

    /// Serves canned `(status, body)` responses keyed by request target.
    struct MockServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        routes: Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let routes: Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>> =
                Arc::new(Mutex::new(HashMap::new()));
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let routes_clone = Arc::clone(&routes);
            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let routes = Arc::clone(&routes_clone);
                    let reqs = Arc::clone(&requests_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let path = parts[1].to_owned();

                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                        }

                        reqs.lock().unwrap().push(CapturedRequest {
                            path: path.clone(),
                            headers,
                        });

                        let (status, body) = routes
                            .lock()
                            .unwrap()
                            .get(&path)
                            .cloned()
                            .unwrap_or((404, Vec::new()));
                        let head = format!(
                            "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = stream.write_all(head.as_bytes());
                        let _ = stream.write_all(&body);
                        let _ = stream.flush();
                    });
                }
            });

            MockServer {
                addr,
                _handle: handle,
                routes,
                requests,
            }
        }

        fn route(&self, target: &str, status: u16, body: &[u8]) {
            self.routes
                .lock()
                .unwrap()
                .insert(target.to_owned(), (status, body.to_vec()));
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn test_backend(url: &str) -> HttpBackend {
        HttpBackend::new(RemoteConfig::new(url, "images"))
    }

    #[test]
    fn encode_keeps_unreserved_and_optionally_slash() {
        assert_eq!(encode("ubuntu-22.04/kernel/", true), "ubuntu-22.04/kernel/");
        assert_eq!(encode("microvm-images/", false), "microvm-images%2F");
        assert_eq!(encode("a b+c", true), "a%20b%2Bc");
        assert_eq!(encode("tok~en_1", false), "tok~en_1");
        assert_eq!(encode("é", false), "%C3%A9");
    }

    #[test]
    fn http_list_objects_parses_page() {
        let server = MockServer::start();
        server.route(
            "/images?list-type=2&prefix=microvm-images%2F",
            200,
            br#"{"contents":[{"key":"microvm-images/u1/","size":0}],"next_continuation_token":"microvm-images/u1/"}"#,
        );
        server.route(
            "/images?list-type=2&prefix=microvm-images%2F&continuation-token=microvm-images%2Fu1%2F",
            200,
            br#"{"contents":[{"key":"microvm-images/u1/rootfs.ext4","size":4}]}"#,
        );
        let backend = test_backend(&server.addr);

        let keys = crate::list_all_keys(&backend, "images", "microvm-images/").unwrap();
        assert_eq!(
            keys,
            vec!["microvm-images/u1/", "microvm-images/u1/rootfs.ext4"]
        );
    }

    #[test]
    fn http_get_object_tagging() {
        let server = MockServer::start();
        server.route(
            "/images/microvm-images/u1/?tagging",
            200,
            br#"{"tag_set":[{"key":"capability:net","value":""},{"key":"owner","value":"ci"}]}"#,
        );
        let backend = test_backend(&server.addr);

        let tags = backend
            .get_object_tagging("images", "microvm-images/u1/")
            .unwrap();
        assert_eq!(
            tags,
            vec![Tag::new("capability:net", ""), Tag::new("owner", "ci")]
        );
    }

    #[test]
    fn http_download_streams_into_writer() {
        let server = MockServer::start();
        let payload: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
        server.route("/images/microvm-images/u1/fsfiles/rootfs.ext4", 200, &payload);
        let backend = test_backend(&server.addr);

        let mut out = Vec::new();
        let n = backend
            .download_object("images", "microvm-images/u1/fsfiles/rootfs.ext4", &mut out)
            .unwrap();
        assert_eq!(n, payload.len() as u64);
        assert_eq!(out, payload);
    }

    #[test]
    fn http_missing_object_is_not_found() {
        let server = MockServer::start();
        let backend = test_backend(&server.addr);
        let mut out = Vec::new();
        let err = backend
            .download_object("images", "nope", &mut out)
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[test]
    fn http_server_error_is_http_error() {
        let server = MockServer::start();
        server.route("/images/denied", 403, b"");
        let backend = test_backend(&server.addr);
        let mut out = Vec::new();
        let err = backend
            .download_object("images", "denied", &mut out)
            .unwrap_err();
        assert!(matches!(err, RemoteError::Http(ref m) if m.contains("403")));
    }

    #[test]
    fn http_bad_listing_body_is_serialization_error() {
        let server = MockServer::start();
        server.route("/images?list-type=2&prefix=p%2F", 200, b"<xml/>");
        let backend = test_backend(&server.addr);
        let err = backend.list_objects("images", "p/", None).unwrap_err();
        assert!(matches!(err, RemoteError::Serialization(_)));
    }

    #[test]
    fn http_connection_refused_returns_error() {
        let backend = test_backend("http://127.0.0.1:1");
        assert!(backend.list_objects("images", "p/", None).is_err());
    }

    #[test]
    fn http_requests_include_protocol_and_auth_headers() {
        let server = MockServer::start();
        server.route("/images/k", 200, b"x");
        let backend = HttpBackend::new(
            RemoteConfig::new(&server.addr, "images").with_token("secret-token-42"),
        );

        let mut out = Vec::new();
        backend.download_object("images", "k", &mut out).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].path, "/images/k");
        assert_eq!(
            reqs[0].headers.get("x-vmmirror-protocol"),
            Some(&"1".to_owned())
        );
        assert_eq!(
            reqs[0].headers.get("authorization"),
            Some(&"Bearer secret-token-42".to_owned())
        );
    }

    #[test]
    fn http_no_auth_header_without_token() {
        let server = MockServer::start();
        server.route("/images/k", 200, b"x");
        let backend = test_backend(&server.addr);

        let mut out = Vec::new();
        backend.download_object("images", "k", &mut out).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));

        let reqs = server.captured_requests();
        assert!(!reqs.is_empty());
        assert!(!reqs[0].headers.contains_key("authorization"));
    }
}
