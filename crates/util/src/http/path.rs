//! Path template resolution and URL assembly.

use indexmap::IndexMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Replace `{name}` placeholders in `template` with percent-encoded values.
///
/// Placeholders without a value are left untouched so callers can detect
/// them with [`unresolved_placeholders`].
///
/// # Arguments
/// - `template`: A path such as `/orders/{market}/{id}`
/// - `variables`: Placeholder name to raw (unencoded) value
///
/// # Returns
/// The resolved path.
///
/// # Example
/// ```rust
/// use indexmap::IndexMap;
/// use tether_util::build_path;
///
/// let mut variables = IndexMap::new();
/// variables.insert("pair".to_string(), "btc/usd".to_string());
/// assert_eq!(build_path("/ticker/{pair}", &variables), "/ticker/btc%2Fusd");
/// ```
pub fn build_path(template: &str, variables: &IndexMap<String, String>) -> String {
    let mut path = template.to_string();
    for (name, value) in variables {
        let encoded = encode_path_segment(value);
        path = path.replace(&format!("{{{name}}}"), &encoded);
    }
    path
}

/// Names of `{placeholders}` still present in `path`, in order of appearance.
pub fn unresolved_placeholders(path: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                names.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    names
}

/// Percent-encode a single path segment, keeping RFC3986 unreserved bytes.
pub fn encode_path_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

/// Join a base URL and an absolute path with exactly one `/` between them.
///
/// ```rust
/// use tether_util::join_url;
///
/// assert_eq!(join_url("http://h", "/account"), "http://h/account");
/// assert_eq!(join_url("http://h/api/", "account"), "http://h/api/account");
/// ```
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{base}/{path}")
}
