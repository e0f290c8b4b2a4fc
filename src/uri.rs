//! Connector URIs and configuration parameters.
//!
//! A connector URI is `<scheme>:[//]<location>[?<query>]`. The scheme is the
//! text before the first `:`; the location is everything after the optional
//! `//` up to the first `?`; the query is form-urlencoded and becomes a
//! [`Params`] map that backend configs consume field by field.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PreserveError, Result};

/// Returns the scheme of `uri`: the text before the first `:`.
///
/// # Errors
/// - `InvalidUri` if there is no `:` or the scheme is empty.
pub fn scheme_of(uri: &str) -> Result<&str> {
    match uri.split_once(':') {
        Some((scheme, _)) if !scheme.is_empty() => Ok(scheme),
        Some(_) => Err(PreserveError::invalid_uri(uri, "empty scheme")),
        None => Err(PreserveError::invalid_uri(uri, "missing ':' scheme separator")),
    }
}

/// A connector URI split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    /// The original text.
    pub uri: String,
    /// Scheme, as written.
    pub scheme: String,
    /// Authority and path, without the leading `//`.
    pub location: String,
    /// Decoded query parameters.
    pub params: Params,
}

impl ParsedUri {
    /// Splits `uri` into scheme, location, and query parameters.
    ///
    /// # Errors
    /// - `InvalidUri` if there is no scheme separator.
    pub fn parse(uri: &str) -> Result<Self> {
        let scheme = scheme_of(uri)?;
        let rest = &uri[scheme.len() + 1..];
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        Ok(Self {
            uri: uri.to_string(),
            scheme: scheme.to_string(),
            location: location.to_string(),
            params: query.map(Params::from_query).unwrap_or_default(),
        })
    }

    /// Checks that the scheme is `expected` or one of `aliases`.
    ///
    /// # Errors
    /// - `InvalidUri` on a mismatch.
    pub fn expect_scheme(&self, expected: &str, aliases: &[&str]) -> Result<()> {
        if self.scheme == expected || aliases.contains(&self.scheme.as_str()) {
            Ok(())
        } else {
            Err(PreserveError::invalid_uri(
                &self.uri,
                format!("scheme '{}' does not match '{expected}'", self.scheme),
            ))
        }
    }
}

/// String-keyed configuration parameters.
///
/// Configs consume the fields they know with the `take*` methods and then
/// call [`Params::deny_unknown`] so typos surface as errors instead of being
/// silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    /// Creates an empty parameter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a form-urlencoded query string. Later duplicates win.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        )
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    /// Looks up a parameter without consuming it.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if no parameters are left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes and returns a parameter.
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Removes a required parameter.
    ///
    /// # Errors
    /// - `MissingConfiguration` if the parameter is absent or empty.
    pub fn require(&mut self, backend: &str, key: &str) -> Result<String> {
        match self.take(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(PreserveError::missing(backend, key)),
        }
    }

    /// Removes and parses a parameter.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if the value does not parse.
    pub fn take_parsed<T>(&mut self, backend: &str, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.take(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    PreserveError::invalid_config(backend, key, format!("'{raw}': {e}"))
                })
            })
            .transpose()
    }

    /// Removes and parses a boolean parameter.
    ///
    /// Accepts `true/false`, `1/0`, `yes/no`, and `on/off` in any case.
    ///
    /// # Errors
    /// - `InvalidConfiguration` for any other spelling.
    pub fn take_bool(&mut self, backend: &str, key: &str) -> Result<Option<bool>> {
        self.take(key)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(PreserveError::invalid_config(
                    backend,
                    key,
                    format!("'{raw}' is not a boolean"),
                )),
            })
            .transpose()
    }

    /// Fails if any parameter was not consumed.
    ///
    /// # Errors
    /// - `InvalidConfiguration` naming the first leftover parameter.
    pub fn deny_unknown(self, backend: &str) -> Result<()> {
        match self.0.into_keys().next() {
            Some(key) => Err(PreserveError::invalid_config(
                backend,
                key,
                "is not a recognised parameter",
            )),
            None => Ok(()),
        }
    }

    /// Consumes the map, returning the remaining parameters.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: ToString, const N: usize> From<[(K, V); N]> for Params {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_of() {
        assert_eq!(scheme_of("memory:").unwrap(), "memory");
        assert_eq!(scheme_of("mongodb://h:1/db").unwrap(), "mongodb");
        assert!(matches!(
            scheme_of("no-separator"),
            Err(PreserveError::InvalidUri { .. })
        ));
        assert!(scheme_of(":x").is_err());
    }

    #[test]
    fn test_parse_file_uri() {
        let parsed = ParsedUri::parse("sqlite:///tmp/a.db?protocol=iso").unwrap();
        assert_eq!(parsed.scheme, "sqlite");
        assert_eq!(parsed.location, "/tmp/a.db");
        assert_eq!(parsed.params.get("protocol"), Some("iso"));

        let parsed = ParsedUri::parse("shelf://data/store.shelf").unwrap();
        assert_eq!(parsed.location, "data/store.shelf");
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_parse_bare_scheme() {
        let parsed = ParsedUri::parse("memory:").unwrap();
        assert_eq!(parsed.location, "");
        assert!(parsed.params.is_empty());

        let parsed = ParsedUri::parse("memory:?keyencoding=latin-1").unwrap();
        assert_eq!(parsed.params.get("keyencoding"), Some("latin-1"));
    }

    #[test]
    fn test_query_decoding() {
        let params = Params::from_query("a=1&b=hello%20world&c=x+y&a=2");
        assert_eq!(params.get("a"), Some("2"));
        assert_eq!(params.get("b"), Some("hello world"));
        assert_eq!(params.get("c"), Some("x y"));
    }

    #[test]
    fn test_expect_scheme() {
        let parsed = ParsedUri::parse("file:///tmp/a.db").unwrap();
        assert!(parsed.expect_scheme("sqlite", &["file"]).is_ok());
        let err = parsed.expect_scheme("shelf", &[]).unwrap_err();
        assert!(matches!(err, PreserveError::InvalidUri { .. }));
    }

    #[test]
    fn test_typed_extraction() {
        let mut params = Params::from([("port", "27017"), ("writeback", "Yes"), ("bad", "x")]);
        assert_eq!(params.take_parsed::<u16>("test", "port").unwrap(), Some(27017));
        assert_eq!(params.take_bool("test", "writeback").unwrap(), Some(true));
        assert_eq!(params.take_bool("test", "absent").unwrap(), None);
        let err = params.take_parsed::<u16>("test", "bad").unwrap_err();
        assert!(matches!(err, PreserveError::InvalidConfiguration { .. }));
        assert!(params.deny_unknown("test").is_ok());
    }

    #[test]
    fn test_require_and_deny_unknown() {
        let mut params = Params::new().with("filename", "").with("typo", 1);
        let err = params.require("shelf", "filename").unwrap_err();
        assert!(matches!(err, PreserveError::MissingConfiguration { .. }));

        let err = params.deny_unknown("shelf").unwrap_err();
        assert!(format!("{err}").contains("typo"));
    }
}
