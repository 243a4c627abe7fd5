use std::fmt;

/// Bucket and key of one object in an S3-compatible store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageLocator {
    /// Bucket name (empty when the locator had no authority)
    pub bucket: String,
    /// Object key without a leading `/`, exactly as written in the locator
    pub key: String,
}

impl StorageLocator {
    /// Parses a locator such as `s3://bucket/some/key`
    ///
    /// The authority after `//` becomes the bucket and the path (minus leading
    /// slashes) the key. The scheme is optional, so `//bucket/key` names a
    /// bucket too. A `#` is part of the key rather than a fragment, any query
    /// string is dropped, and the key is neither decoded nor normalized.
    /// Locators without an authority yield an empty bucket; callers decide what
    /// to do with those.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let rest = strip_scheme(raw);

        let (bucket, path) = match rest.strip_prefix("//") {
            Some(after) => {
                let end = after.find(|c| matches!(c, '/' | '?' | '#')).unwrap_or(after.len());
                after.split_at(end)
            }
            None => ("", rest),
        };
        let path = path.split_once('?').map_or(path, |(path, _query)| path);

        Self {
            bucket: bucket.to_owned(),
            key: path.trim_start_matches('/').to_owned(),
        }
    }

    /// Whether the locator names no bucket
    #[must_use]
    pub fn is_bucketless(&self) -> bool {
        self.bucket.is_empty()
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Drops a leading `scheme:` (a letter followed by letters, digits, `+`, `-` or `.`)
fn strip_scheme(raw: &str) -> &str {
    let Some((scheme, rest)) = raw.split_once(':') else {
        return raw;
    };

    let mut chars = scheme.chars();
    let is_scheme = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if is_scheme {
        rest
    } else {
        raw
    }
}
