use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Minimal URL support for addressing connectors.
///
/// This deliberately ignores the more advanced parts of real URLs, such as
/// escaping or quoting. A URL splits into scheme, authority, path, query
/// parameters and fragment; the first `#` found is taken as the fragment
/// delimiter, the first `?` as the query delimiter, and for duplicate query
/// parameters the last value wins.
///
/// The scheme, query parameter names and values are case-folded, and values
/// expressing booleans are normalized to `"0"` and `"1"` (so `yes`, `true`
/// and `1` all compare equal downstream).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Url {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub fragment: String,
}

fn normalize_value(value: &str) -> String {
    let folded = value.to_lowercase();
    match folded.as_str() {
        "yes" | "true" => "1".into(),
        "no" | "false" => "0".into(),
        _ => folded,
    }
}

impl Url {
    /// Parses a URL string. Fails with [`Error::Format`] if there is no
    /// `scheme://` part.
    pub fn parse(input: &str) -> Result<Url> {
        let (scheme, rest) = input.split_once("://").ok_or(Error::Format)?;
        if scheme.is_empty() {
            return Err(Error::Format);
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) => (r, f.to_string()),
            None => (rest, String::new()),
        };

        let (rest, query_str) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
            None => (rest.to_string(), String::new()),
        };

        let mut query = BTreeMap::new();
        for pair in query_str.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            query.insert(key.to_lowercase(), normalize_value(value));
        }

        Ok(Url {
            scheme: scheme.to_lowercase(),
            authority,
            path,
            query,
            fragment,
        })
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Url> {
        Url::parse(s)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)?;
        if !self.query.is_empty() {
            let mut sep = '?';
            for (key, value) in &self.query {
                write!(f, "{sep}{key}={value}")?;
                sep = '&';
            }
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full() {
        let url = Url::parse("TCP4://192.168.0.1:8080/some/path?Blocking=YES&x=2#frag").unwrap();
        assert_eq!(url.scheme, "tcp4");
        assert_eq!(url.authority, "192.168.0.1:8080");
        assert_eq!(url.path, "/some/path");
        assert_eq!(url.query.get("blocking").map(String::as_str), Some("1"));
        assert_eq!(url.query.get("x").map(String::as_str), Some("2"));
        assert_eq!(url.fragment, "frag");
    }

    #[test]
    fn parse_no_authority() {
        let url = Url::parse("local:///var/run/test.sock").unwrap();
        assert_eq!(url.scheme, "local");
        assert_eq!(url.authority, "");
        assert_eq!(url.path, "/var/run/test.sock");
    }

    #[test]
    fn parse_bare_scheme() {
        let url = Url::parse("anon://").unwrap();
        assert_eq!(url.scheme, "anon");
        assert_eq!(url.authority, "");
        assert_eq!(url.path, "");
        assert!(url.query.is_empty());
    }

    #[test]
    fn boolean_values_normalize() {
        let url = Url::parse("anon://?blocking=False&other=No&keep=maybe").unwrap();
        assert_eq!(url.query.get("blocking").map(String::as_str), Some("0"));
        assert_eq!(url.query.get("other").map(String::as_str), Some("0"));
        assert_eq!(url.query.get("keep").map(String::as_str), Some("maybe"));
    }

    #[test]
    fn last_duplicate_wins() {
        let url = Url::parse("udp://host:1?behaviour=stream&behaviour=datagram").unwrap();
        assert_eq!(
            url.query.get("behaviour").map(String::as_str),
            Some("datagram")
        );
    }

    #[test]
    fn missing_scheme_fails() {
        assert_eq!(Url::parse("no-scheme-here"), Err(Error::Format));
        assert_eq!(Url::parse("://missing"), Err(Error::Format));
    }

    #[test]
    fn round_trip() {
        for input in [
            "tcp4://127.0.0.1:8080",
            "local:///tmp/foo.sock?behaviour=datagram",
            "anon://?blocking=1",
            "udp6://[::1]:53/x?a=1&b=2#frag",
        ] {
            let url = Url::parse(input).unwrap();
            let rendered = url.to_string();
            assert_eq!(Url::parse(&rendered).unwrap(), url, "{input}");
        }
    }
}
