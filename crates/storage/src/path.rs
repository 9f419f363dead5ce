//! Path classification and joining across storage schemes.

use std::fmt;

use crate::{Result, StorageError};

/// Storage scheme of a path, decided by prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Local,
    /// `http://` or `https://`, read-only
    Http,
    /// `s3://bucket/key`
    ObjectStorage,
}

impl Scheme {
    pub fn classify(path: &str) -> Self {
        if path.starts_with("http://") || path.starts_with("https://") {
            Scheme::Http
        } else if path.starts_with("s3://") {
            Scheme::ObjectStorage
        } else {
            Scheme::Local
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Scheme::Local)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scheme::Local => "local",
            Scheme::Http => "http",
            Scheme::ObjectStorage => "s3",
        };
        f.write_str(name)
    }
}

/// Join path segments with `/`, without doubling separators.
pub fn join<I, S>(base: &str, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = base.trim_end_matches('/').to_string();
    for part in parts {
        let part = part.as_ref().trim_matches('/');
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() || base.starts_with('/') {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

/// Everything before the last `/`, or `None` at a root.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    trimmed.rfind('/').map(|idx| &trimmed[..idx]).filter(|p| {
        !p.is_empty() && !p.ends_with(':') && !p.ends_with(":/")
    })
}

/// Bucket and key of an `s3://bucket/key` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?;
        let (bucket, key) = match rest.split_once('/') {
            Some((bucket, key)) => (bucket, key.trim_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(StorageError::InvalidUri(uri.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Split `https://host:port/a/b` into `("https://host:port", "a/b")`.
pub fn split_http_origin(url: &str) -> Result<(String, String)> {
    let scheme_end = url
        .find("://")
        .ok_or_else(|| StorageError::InvalidUri(url.to_string()))?;
    let after_scheme = &url[scheme_end + 3..];
    let (host, path) = match after_scheme.split_once('/') {
        Some((host, path)) => (host, path.trim_matches('/')),
        None => (after_scheme, ""),
    };
    if host.is_empty() {
        return Err(StorageError::InvalidUri(url.to_string()));
    }
    Ok((format!("{}{}", &url[..scheme_end + 3], host), path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Scheme::classify("/data/out"), Scheme::Local);
        assert_eq!(Scheme::classify("relative/out"), Scheme::Local);
        assert_eq!(Scheme::classify("http://example.com/tiles"), Scheme::Http);
        assert_eq!(Scheme::classify("https://example.com/tiles"), Scheme::Http);
        assert_eq!(Scheme::classify("s3://bucket/tiles"), Scheme::ObjectStorage);
        assert!(!Scheme::Local.is_remote());
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/data/out/", ["5", "3", "7.png"]), "/data/out/5/3/7.png");
        assert_eq!(join("s3://bucket/out", ["metadata.json"]), "s3://bucket/out/metadata.json");
        assert_eq!(join("out", ["", "1"]), "out/1");
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/data/out/5/3/7.png"), Some("/data/out/5/3"));
        assert_eq!(parent("s3://bucket/out/a"), Some("s3://bucket/out"));
        assert_eq!(parent("s3://bucket"), None);
        assert_eq!(parent("file.png"), None);
    }

    #[test]
    fn test_s3_location() {
        let loc = S3Location::parse("s3://tiles/out/5/3/7.png").unwrap();
        assert_eq!(loc.bucket, "tiles");
        assert_eq!(loc.key, "out/5/3/7.png");

        assert!(S3Location::parse("s3:///key").is_err());
        assert!(S3Location::parse("/local").is_err());
    }

    #[test]
    fn test_split_http_origin() {
        let (origin, path) = split_http_origin("https://example.com:8080/a/b.png").unwrap();
        assert_eq!(origin, "https://example.com:8080");
        assert_eq!(path, "a/b.png");
    }
}
