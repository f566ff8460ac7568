//! Cache identity derived from a request URL.

use url::Url;

/// Parsed request URL with the pieces the cache keys on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
  /// URL as given by the caller
  pub url: String,
  /// Path plus query string; the subkey under the caller's cache key
  pub subkey: String,
  query_names: Vec<String>,
}

impl RequestTarget {
  pub fn parse(url: &str) -> Result<Self, url::ParseError> {
    let parsed = Url::parse(url)?;

    let subkey = match parsed.query() {
      Some(query) => format!("{}?{}", parsed.path(), query),
      None => parsed.path().to_string(),
    };
    let query_names = parsed
      .query_pairs()
      .map(|(name, _)| name.into_owned())
      .collect();

    Ok(Self {
      url: url.to_string(),
      subkey,
      query_names,
    })
  }

  /// Invalidator for this request: query parameter names followed by the
  /// configured invalidator, joined with `_`. Empty parts are skipped.
  pub fn invalidator(&self, configured: &str) -> String {
    self
      .query_names
      .iter()
      .map(String::as_str)
      .chain(std::iter::once(configured))
      .filter(|part| !part.is_empty())
      .collect::<Vec<_>>()
      .join("_")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_subkey_is_path_and_query() {
    let target = RequestTarget::parse("https://myurl.com/endpoint").unwrap();
    assert_eq!(target.subkey, "/endpoint");

    let target = RequestTarget::parse("https://myurl.com/products?search=shoe&page=2").unwrap();
    assert_eq!(target.subkey, "/products?search=shoe&page=2");
  }

  #[test]
  fn test_invalidator_includes_query_names() {
    let target = RequestTarget::parse("https://myurl.com/products?search=shoe&page=2").unwrap();
    assert_eq!(target.invalidator(""), "search_page");
    assert_eq!(target.invalidator("custom"), "search_page_custom");

    let target = RequestTarget::parse("https://myurl.com/products").unwrap();
    assert_eq!(target.invalidator(""), "");
    assert_eq!(target.invalidator("custom"), "custom");
  }

  #[test]
  fn test_rejects_relative_urls() {
    assert!(RequestTarget::parse("/products").is_err());
  }
}
