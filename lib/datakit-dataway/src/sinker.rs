use std::{collections::HashSet, sync::Arc};

use datakit_point::{Category, Point};
use snafu::ResultExt as _;
use tracing::{debug, info, warn};

use crate::{
    config::SinkerConfiguration,
    endpoint::{Endpoint, EndpointOptions},
    error::*,
    filter::Filter,
    telemetry::record_sink,
    usage::UsageMonitor,
    writer::Writer,
};

/// A secondary destination that points are diverted to when they match its filters.
pub struct Sinker {
    url: String,
    categories: HashSet<Category>,
    filter: Filter,
    endpoint: Arc<Endpoint>,
}

impl Sinker {
    /// Sets up a sinker from its configuration.
    ///
    /// The sinker's endpoint starts from `options`, with the sinker's proxy taking over when one is set.
    ///
    /// # Errors
    ///
    /// If a filter or category name is invalid, or the endpoint cannot be created, an error is returned.
    pub fn setup(
        config: &SinkerConfiguration, options: EndpointOptions, usage: UsageMonitor,
    ) -> Result<Self, DatawayError> {
        let filter = Filter::parse_all(&config.filters).context(SinkerFilter { url: &config.url })?;

        let categories = config
            .categories
            .iter()
            .map(|name| name.parse::<Category>())
            .collect::<Result<HashSet<_>, _>>()
            .context(SinkerCategory { url: &config.url })?;

        let options = match config.proxy.as_deref().filter(|p| !p.is_empty()) {
            Some(proxy) => options.with_proxy(proxy),
            None => options,
        };
        let endpoint = Arc::new(Endpoint::new(&config.url, options, usage)?);

        info!(url = %config.url, categories = ?config.categories, filters = config.filters.len(), "Sinker set up.");

        Ok(Self {
            url: config.url.clone(),
            categories,
            filter,
            endpoint,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Sends the points matching this sinker to its endpoint, and returns the others.
    ///
    /// Points whose filter evaluation fails are kept. Points sent to the sinker are never cached, even if the sinker's
    /// endpoint fails.
    pub async fn sink(&self, writer: &Writer, points: Vec<Point>) -> Vec<Point> {
        let category = writer.category();
        if !self.categories.contains(&category) {
            return points;
        }

        let (sinked, remaining) = if self.filter.is_empty() {
            (points, Vec::new())
        } else {
            let mut sinked = Vec::new();
            let mut remaining = Vec::new();
            for point in points {
                match self.filter.matches(category, &point) {
                    Ok(true) => sinked.push(point),
                    Ok(false) => remaining.push(point),
                    Err(e) => {
                        warn!(sinker = %self.url, point = point.name(), error = %e, "Failed to evaluate sinker filter.");
                        remaining.push(point);
                    }
                }
            }
            (sinked, remaining)
        };

        record_sink(category, sinked.len(), remaining.len());

        if !sinked.is_empty() {
            debug!(sinker = %self.url, %category, points = sinked.len(), "Sinking points.");
            if let Err(e) = self.endpoint.write_points(&writer.for_sinker(), &sinked).await {
                warn!(sinker = %self.url, %category, points = sinked.len(), error = %e, "Failed to sink points.");
            }
        }

        remaining
    }
}
