//! `application/x-www-form-urlencoded` encoding for query strings and form bodies.

use url::form_urlencoded;

/// Encode ordered pairs as `k=v&k=v`.
///
/// ```rust
/// use tether_util::encode_form;
///
/// let pairs = vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())];
/// assert_eq!(encode_form(&pairs), "a=1&b=2");
/// ```
pub fn encode_form(pairs: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Decode a form or query string into ordered pairs.
pub fn decode_form(encoded: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(encoded.as_bytes()).into_owned().collect()
}

/// Append encoded query pairs to `url`, respecting an existing query string.
pub fn append_query(url: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{}", encode_form(pairs))
}
