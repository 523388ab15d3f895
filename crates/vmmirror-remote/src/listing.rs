use crate::{RemoteBackend, RemoteError};

/// List every key under `prefix`, following continuation tokens until the
/// backend reports no further pages. Keys are returned in listing order.
pub fn list_all_keys(
    backend: &dyn RemoteBackend,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<String>, RemoteError> {
    let mut keys = Vec::new();
    let mut continuation: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = backend.list_objects(bucket, prefix, continuation.as_deref())?;
        pages += 1;
        keys.extend(page.contents.into_iter().map(|o| o.key));

        match page.next_continuation_token {
            Some(next) if continuation.as_deref() == Some(next.as_str()) => {
                return Err(RemoteError::Http(format!(
                    "listing of {bucket}/{prefix} did not advance past token '{next}'"
                )));
            }
            Some(next) => continuation = Some(next),
            None => break,
        }
    }

    tracing::debug!(
        "listed {} keys under {bucket}/{prefix} in {pages} page(s)",
        keys.len()
    );
    Ok(keys)
}
