//! Per-type configuration and request options.

use crate::cascade::Cascade;
use crate::record::Record;
use std::collections::BTreeMap;

/// How aggressively a type uses the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Every model is cached locally.
    #[default]
    All,
    /// Only models with unfinished remote work are cached; the entry
    /// is evicted once the remote confirms.
    Pending,
    /// The local cache is never used.
    None,
}

/// Configuration for one model type.
///
/// Built with `with_` methods in the builder style:
///
/// ```
/// use riptide_core::{Cascade, DatabaseOptions};
///
/// let options = DatabaseOptions::new("task")
///     .with_key_fields(["id"])
///     .with_cascade_save(Cascade::ALL);
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Type name, unique within a registry.
    pub name: String,
    /// Key field names; more than one makes the key composite.
    pub key_fields: Vec<String>,
    /// Separator joining composite key parts when serialized.
    pub key_separator: String,
    /// Default field values applied to newly created models.
    pub defaults: Record,
    /// Default cascade for saves.
    pub cascade_save: Cascade,
    /// Default cascade for removals.
    pub cascade_remove: Cascade,
    /// Default cascade for gets/refreshes.
    pub cascade_get: Cascade,
    /// Local cache behavior.
    pub cache: CacheMode,
    /// Fields always included in remote save diffs even when
    /// unchanged.
    pub save_always: Vec<String>,
    /// Fields always included in live publishes even when unchanged.
    pub publish_always: Vec<String>,
    /// Comparator fields (name, descending) for the sorted collection.
    pub comparator: Vec<(String, bool)>,
    /// Whether an established key may change (server-assigned keys).
    pub allow_key_change: bool,
}

impl DatabaseOptions {
    /// Creates options for a type with conventional defaults: key
    /// field `id`, separator `/`, all cascades `All`, cache `All`.
    pub fn new(name: impl Into<String>) -> DatabaseOptions {
        DatabaseOptions {
            name: name.into(),
            key_fields: vec!["id".to_string()],
            key_separator: "/".to_string(),
            defaults: Record::new(),
            cascade_save: Cascade::ALL,
            cascade_remove: Cascade::ALL,
            cascade_get: Cascade::ALL,
            cache: CacheMode::All,
            save_always: Vec::new(),
            publish_always: Vec::new(),
            comparator: Vec::new(),
            allow_key_change: false,
        }
    }

    /// Sets the key fields.
    pub fn with_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the composite key separator.
    pub fn with_key_separator(mut self, separator: impl Into<String>) -> Self {
        self.key_separator = separator.into();
        self
    }

    /// Sets default field values for created models.
    pub fn with_defaults(mut self, defaults: Record) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sets the default save cascade.
    pub fn with_cascade_save(mut self, cascade: Cascade) -> Self {
        self.cascade_save = cascade;
        self
    }

    /// Sets the default remove cascade.
    pub fn with_cascade_remove(mut self, cascade: Cascade) -> Self {
        self.cascade_remove = cascade;
        self
    }

    /// Sets the default get cascade.
    pub fn with_cascade_get(mut self, cascade: Cascade) -> Self {
        self.cascade_get = cascade;
        self
    }

    /// Sets the cache mode.
    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Adds fields that are always included in save diffs.
    pub fn with_save_always<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.save_always = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Adds fields that are always included in live publishes.
    pub fn with_publish_always<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publish_always = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sorts the type's collection by a field, ascending.
    pub fn with_comparator(mut self, field: impl Into<String>) -> Self {
        self.comparator.push((field.into(), false));
        self
    }

    /// Sorts the type's collection by a field, descending.
    pub fn with_comparator_desc(mut self, field: impl Into<String>) -> Self {
        self.comparator.push((field.into(), true));
        self
    }

    /// Enables key changes after the key is established.
    pub fn with_key_changes(mut self) -> Self {
        self.allow_key_change = true;
        self
    }
}

/// Options threaded through a single save/remove/get request to the
/// remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// URL override for this request.
    pub url: Option<String>,
    /// Extra request parameters.
    pub params: BTreeMap<String, String>,
}

impl RequestOptions {
    /// Creates empty options.
    pub fn new() -> RequestOptions {
        RequestOptions::default()
    }

    /// Sets the URL override.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Adds a request parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_defaults() {
        let options = DatabaseOptions::new("task");
        assert_eq!(options.key_fields, vec!["id".to_string()]);
        assert_eq!(options.cascade_save, Cascade::ALL);
        assert_eq!(options.cache, CacheMode::All);
        assert!(!options.allow_key_change);
    }

    #[test]
    fn builder_methods() {
        let options = DatabaseOptions::new("membership")
            .with_key_fields(["user_id", "group_id"])
            .with_key_separator("-")
            .with_cascade_save(Cascade::NO_LIVE)
            .with_cache(CacheMode::Pending)
            .with_comparator("created_at");
        assert_eq!(options.key_fields.len(), 2);
        assert_eq!(options.key_separator, "-");
        assert_eq!(options.cascade_save, Cascade::NO_LIVE);
        assert_eq!(options.cache, CacheMode::Pending);
        assert_eq!(options.comparator, vec![("created_at".to_string(), false)]);
    }

    #[test]
    fn request_options() {
        let options = RequestOptions::new()
            .with_url("/tasks/recent")
            .with_param("limit", "10");
        assert_eq!(options.url.as_deref(), Some("/tasks/recent"));
        assert_eq!(options.params.get("limit").map(String::as_str), Some("10"));
    }
}
