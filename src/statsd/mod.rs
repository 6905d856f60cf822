use std::collections::BTreeMap;
use std::fmt;

pub mod gauge;
mod job;
pub mod line;
pub mod macros;
pub mod publisher;
pub mod registry;
pub mod writer;

/// Identity of a meter: a name plus an unordered set of key/value tags.
///
/// Tags are kept sorted by key, so two identities built from the same tags
/// in a different order compare and hash equal. Declaring a key twice keeps
/// the last value.
///
/// # Example
///
/// ```
/// use statsd_pollable::MeterId;
///
/// let a = MeterId::new("queue.depth").with_tag("queue", "jobs").with_tag("env", "prod");
/// let b = MeterId::new("queue.depth").with_tag("env", "prod").with_tag("queue", "jobs");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeterId {
    name: String,
    tags: BTreeMap<String, String>,
}

impl MeterId {
    /// Creates an identity with the given name and no tags.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
        }
    }

    /// Adds one tag, replacing any previous value for `key`.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds every tag of `tags`, later keys replacing earlier ones.
    #[must_use]
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// The metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the tag `key`, if present.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Iterates the tags sorted by key.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tags.
    #[must_use]
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.tags.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        let mut first = true;
        for (key, value) in &self.tags {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}
