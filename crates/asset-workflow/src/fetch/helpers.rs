//! Pure helpers: URI classification and path mapping (no HTTP, no status logic).

use std::path::PathBuf;

use crate::catalog::is_remote_uri;

/// Filesystem path for a local bundle URI (`file://` URL or bare path).
pub(crate) fn local_path(uri: &str) -> Option<PathBuf> {
    if is_remote_uri(uri) {
        return None;
    }
    if uri.starts_with("file:") {
        return url::Url::parse(uri).ok()?.to_file_path().ok();
    }
    Some(PathBuf::from(uri))
}

/// Strip query and credentials before a URL goes into logs or errors.
pub(crate) fn display_uri(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(mut url) if is_remote_uri(uri) => {
            let _ = url.set_password(None);
            let _ = url.set_username("");
            url.set_query(None);
            url.to_string()
        }
        _ => uri.to_string(),
    }
}
