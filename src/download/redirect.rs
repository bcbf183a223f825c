use reqwest::header::{HeaderMap, LOCATION};
use tracing::{debug, warn};
use url::Url;

use crate::error::DownloadError;

/// Work out whether a completed response is a redirect, tolerating the
/// malformed `Location` values real-world servers emit: scheme-relative
/// (`//host/path`), origin-relative (`/path`) and otherwise-relative
/// targets are all resolved instead of failing transfers a browser would
/// follow without trouble.
///
/// `Ok(None)` means "not a redirect, continue with normal finalize
/// handling"; an unparseable target is a protocol failure, not a silent
/// no-redirect.
pub(crate) fn resolve_redirect(
    original: &Url,
    status: u16,
    headers: &HeaderMap,
) -> Result<Option<Url>, DownloadError> {
    if !(300..400).contains(&status) {
        return Ok(None);
    }
    let Some(raw) = headers.get(LOCATION) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| DownloadError::Redirect("non-ASCII Location header".to_string()))?
        .trim();
    if raw.is_empty() {
        // present yet empty; not worth failing the transfer over
        return Ok(None);
    }

    if let Ok(url) = Url::parse(raw) {
        debug!("Location header: {url}");
        return Ok(Some(url));
    }

    // Scheme-relative targets need the original scheme spliced in front
    // (RFC 3986 section 4.2); anything else resolves against the request
    // URL, which also covers origin-relative paths.
    let fixed = if raw.starts_with("//") {
        format!("{}:{}", original.scheme(), raw)
    } else {
        raw.to_string()
    };

    match Url::parse(&fixed).or_else(|_| original.join(&fixed)) {
        Ok(url) => {
            debug!("Fixed location header: {url}");
            Ok(Some(url))
        }
        Err(_) => {
            warn!("Failed to parse redirect URL: {raw}");
            Err(DownloadError::Redirect(raw.to_string()))
        }
    }
}
