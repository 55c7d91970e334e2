//! Redirect handling helpers.

use crate::base::error::PoolError;
use http::header::{
    HeaderMap, HeaderName, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_LOCATION, CONTENT_TYPE,
    LAST_MODIFIED,
};
use url::Url;

/// Resolve a `Location` header against the URL that produced it.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url, PoolError> {
    base.join(location).map_err(|e| PoolError::LocationParse(format!("{location}: {e}")))
}

/// Drop body-describing headers when a redirect turns the request into a GET.
pub fn prepare_for_method_change(headers: &mut HeaderMap) {
    for name in [CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LOCATION, CONTENT_TYPE, CONTENT_LENGTH, LAST_MODIFIED] {
        headers.remove(name);
    }
    headers.remove("digest");
}

/// Different scheme, host or port.
pub fn is_cross_origin(from: &Url, to: &Url) -> bool {
    from.scheme() != to.scheme()
        || from.host_str().map(str::to_ascii_lowercase) != to.host_str().map(str::to_ascii_lowercase)
        || from.port_or_known_default() != to.port_or_known_default()
}

/// Remove credentials before following a redirect to another origin.
pub fn strip_cross_origin(headers: &mut HeaderMap, remove: &[HeaderName]) {
    for name in remove {
        headers.remove(name);
    }
}
