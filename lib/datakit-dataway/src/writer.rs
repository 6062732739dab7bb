use std::{collections::BTreeMap, fmt, sync::Arc};

use datakit_io::diskcache::FailCache;
use datakit_point::{Category, Point};

use crate::body::MAX_KODO_BODY;

/// A single write to a dataway.
///
/// A writer is built for each call to [`Dataway::write`][crate::Dataway::write] and consumed by it. Options left unset
/// take the dataway's configured defaults.
///
/// In cache-clean mode, the writer carries no points: the write replays one entry of the fail cache instead.
#[derive(Clone)]
pub struct Writer {
    category: Category,
    points: Vec<Point>,
    pub(crate) gzip: Option<bool>,
    pub(crate) max_body_size: Option<usize>,
    dynamic_url: Option<String>,
    fail_cache: Option<Arc<dyn FailCache>>,
    cache_all: bool,
    cache_clean: bool,
    http_headers: BTreeMap<String, String>,
}

impl Writer {
    /// Creates a writer for points of the given category.
    pub fn new(category: Category) -> Self {
        Self {
            category,
            points: Vec::new(),
            gzip: None,
            max_body_size: None,
            dynamic_url: None,
            fail_cache: None,
            cache_all: false,
            cache_clean: false,
            http_headers: BTreeMap::new(),
        }
    }

    /// Creates a writer that replays one cached entry from `fail_cache`.
    pub fn cache_clean(fail_cache: Arc<dyn FailCache>) -> Self {
        Self::new(Category::Unknown)
            .with_fail_cache(fail_cache)
            .with_cache_clean(true)
    }

    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = points;
        self
    }

    /// Sets whether bodies are gzip-compressed.
    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = Some(gzip);
        self
    }

    /// Sets the maximum raw size of a body.
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = Some(max_body_size);
        self
    }

    /// Sets the URL used for categories without a fixed write path.
    pub fn with_dynamic_url(mut self, url: impl Into<String>) -> Self {
        self.dynamic_url = Some(url.into());
        self
    }

    /// Sets the cache that bodies failing to be delivered are put in.
    pub fn with_fail_cache(mut self, fail_cache: Arc<dyn FailCache>) -> Self {
        self.fail_cache = Some(fail_cache);
        self
    }

    /// Sets whether bodies of every category are cached on failure.
    ///
    /// Metric, object and dynamic bodies are otherwise dropped, as they are superseded by the next collection.
    pub fn with_cache_all(mut self, cache_all: bool) -> Self {
        self.cache_all = cache_all;
        self
    }

    /// Sets whether this write replays the fail cache instead of sending points.
    pub fn with_cache_clean(mut self, cache_clean: bool) -> Self {
        self.cache_clean = cache_clean;
        self
    }

    /// Adds a header to every request of this write.
    ///
    /// Writer headers take precedence over the endpoint's headers.
    pub fn with_http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub(crate) fn take_points(&mut self) -> Vec<Point> {
        std::mem::take(&mut self.points)
    }

    pub fn gzip(&self) -> bool {
        self.gzip.unwrap_or(true)
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size.unwrap_or(MAX_KODO_BODY)
    }

    pub fn dynamic_url(&self) -> Option<&str> {
        self.dynamic_url.as_deref()
    }

    pub fn fail_cache(&self) -> Option<&Arc<dyn FailCache>> {
        self.fail_cache.as_ref()
    }

    pub fn cache_all(&self) -> bool {
        self.cache_all
    }

    pub fn is_cache_clean(&self) -> bool {
        self.cache_clean
    }

    pub fn http_headers(&self) -> &BTreeMap<String, String> {
        &self.http_headers
    }

    /// Returns a copy of this writer, without its points, for sending to a sinker.
    ///
    /// Sinkers never use the fail cache.
    pub(crate) fn for_sinker(&self) -> Self {
        Self {
            category: self.category,
            points: Vec::new(),
            gzip: self.gzip,
            max_body_size: self.max_body_size,
            dynamic_url: self.dynamic_url.clone(),
            fail_cache: None,
            cache_all: self.cache_all,
            cache_clean: false,
            http_headers: self.http_headers.clone(),
        }
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("category", &self.category)
            .field("points", &self.points.len())
            .field("gzip", &self.gzip)
            .field("max_body_size", &self.max_body_size)
            .field("dynamic_url", &self.dynamic_url)
            .field("fail_cache", &self.fail_cache.is_some())
            .field("cache_all", &self.cache_all)
            .field("cache_clean", &self.cache_clean)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use datakit_point::random::random_points;

    use super::*;

    #[test]
    fn defaults() {
        let writer = Writer::new(Category::Logging);
        assert!(writer.gzip());
        assert_eq!(writer.max_body_size(), MAX_KODO_BODY);
        assert!(writer.fail_cache().is_none());
        assert!(!writer.cache_all());
        assert!(!writer.is_cache_clean());
    }

    #[tokio::test]
    async fn sinker_copy_drops_points_and_cache() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = datakit_io::diskcache::DiskCache::builder(cache_dir.path())
            .open()
            .await
            .unwrap();

        let writer = Writer::new(Category::Logging)
            .with_points(random_points(3))
            .with_gzip(false)
            .with_fail_cache(Arc::new(cache))
            .with_http_header("X-Test", "1");

        let sinker = writer.for_sinker();
        assert!(sinker.points().is_empty());
        assert!(sinker.fail_cache().is_none());
        assert!(!sinker.gzip());
        assert_eq!(sinker.http_headers().get("X-Test").map(String::as_str), Some("1"));
        assert_eq!(writer.points().len(), 3);
    }
}
