use crate::{ListPage, ObjectSummary, RemoteBackend, RemoteError, Tag};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct MockObject {
    data: Vec<u8>,
    tags: Vec<Tag>,
}

/// In-memory object store that counts every call it receives.
///
/// Objects are listed in lexicographic key order, like a real bucket.
/// Failures can be injected per operation, and downloads can be slowed
/// down to widen race windows in concurrency tests.
pub struct MockRemote {
    objects: Mutex<BTreeMap<(String, String), MockObject>>,
    page_size: usize,
    download_delay: Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
    tagging_calls: AtomicUsize,
    downloads: Mutex<HashMap<String, usize>>,
    fail_listing: AtomicBool,
    fail_tagging: AtomicBool,
    failing_downloads: Mutex<HashSet<String>>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: 1000,
            download_delay: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            tagging_calls: AtomicUsize::new(0),
            downloads: Mutex::new(HashMap::new()),
            fail_listing: AtomicBool::new(false),
            fail_tagging: AtomicBool::new(false),
            failing_downloads: Mutex::new(HashSet::new()),
        }
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn put_object(&self, bucket: &str, key: &str, data: &[u8]) {
        let mut objects = self.objects.lock().expect("mock lock poisoned");
        objects
            .entry((bucket.to_owned(), key.to_owned()))
            .or_default()
            .data = data.to_vec();
    }

    pub fn put_tags(&self, bucket: &str, key: &str, tags: &[(&str, &str)]) {
        let mut objects = self.objects.lock().expect("mock lock poisoned");
        objects
            .entry((bucket.to_owned(), key.to_owned()))
            .or_default()
            .tags = tags.iter().map(|(k, v)| Tag::new(k, v)).collect();
    }

    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.lock().expect("mock lock poisoned") = Some(delay);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_tagging(&self, fail: bool) {
        self.fail_tagging.store(fail, Ordering::SeqCst);
    }

    /// Make downloads of `key` fail with an HTTP error.
    pub fn fail_download(&self, key: &str) {
        self.failing_downloads
            .lock()
            .expect("mock lock poisoned")
            .insert(key.to_owned());
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn tagging_calls(&self) -> usize {
        self.tagging_calls.load(Ordering::SeqCst)
    }

    /// Number of download calls issued for `key`, including failed ones.
    pub fn download_count(&self, key: &str) -> usize {
        self.downloads
            .lock()
            .expect("mock lock poisoned")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_downloads(&self) -> usize {
        self.downloads
            .lock()
            .expect("mock lock poisoned")
            .values()
            .sum()
    }
}

impl RemoteBackend for MockRemote {
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RemoteError::Http("injected listing failure".to_owned()));
        }

        let objects = self
            .objects
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?;
        let mut matching = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .filter(|((_, k), _)| continuation.is_none_or(|after| k.as_str() > after))
            .map(|((_, k), obj)| ObjectSummary {
                key: k.clone(),
                size: obj.data.len() as u64,
            });

        let contents: Vec<ObjectSummary> = matching.by_ref().take(self.page_size).collect();
        let next_continuation_token = if matching.next().is_some() {
            contents.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            contents,
            next_continuation_token,
        })
    }

    fn get_object_tagging(&self, bucket: &str, key: &str) -> Result<Vec<Tag>, RemoteError> {
        self.tagging_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tagging.load(Ordering::SeqCst) {
            return Err(RemoteError::Http("injected tagging failure".to_owned()));
        }
        let objects = self
            .objects
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?;
        objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|o| o.tags.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("{bucket}/{key}")))
    }

    fn download_object(
        &self,
        bucket: &str,
        key: &str,
        out: &mut dyn Write,
    ) -> Result<u64, RemoteError> {
        *self
            .downloads
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?
            .entry(key.to_owned())
            .or_default() += 1;

        let delay = *self
            .download_delay
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if self
            .failing_downloads
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?
            .contains(key)
        {
            return Err(RemoteError::Http(format!("HTTP 403 for {bucket}/{key}")));
        }

        let data = self
            .objects
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|o| o.data.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("{bucket}/{key}")))?;
        out.write_all(&data)?;
        Ok(data.len() as u64)
    }
}
