use crate::domain::{Category, PayloadEncoding, Point};
use tokio_util::sync::CancellationToken;

/// One producer batch bound for a single category.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub category: Category,
    pub points: Vec<Point>,
    pub encoding: PayloadEncoding,
    pub gzip: bool,
    /// Cache on transient failure regardless of the category's cache policy.
    pub cache_all: bool,
    /// Target used when the category has no route on the endpoint.
    pub dynamic_url: Option<String>,
    /// Points are also counted as sink output.
    pub sink: bool,
    pub cancel: Option<CancellationToken>,
}

impl WriteRequest {
    pub fn new(category: Category, points: Vec<Point>) -> Self {
        Self {
            category,
            points,
            encoding: PayloadEncoding::default(),
            gzip: false,
            cache_all: false,
            dynamic_url: None,
            sink: false,
            cancel: None,
        }
    }

    pub fn encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn cache_all(mut self, cache_all: bool) -> Self {
        self.cache_all = cache_all;
        self
    }

    pub fn dynamic_url(mut self, url: impl Into<String>) -> Self {
        self.dynamic_url = Some(url.into());
        self
    }

    pub fn sink(mut self, sink: bool) -> Self {
        self.sink = sink;
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
