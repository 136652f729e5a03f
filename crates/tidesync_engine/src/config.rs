//! Configuration for replication sessions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tidesync_protocol::Body;
use tidesync_store::{NoValidation, SchemaValidator};

use crate::error::{ReplicationError, ReplicationResult};

/// Builds a pull request body from the current cursor.
pub type PullRequestBuilder = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

/// Extracts the row array from a pull response.
pub type ResponseExtractor = Arc<dyn Fn(&Value) -> Option<Vec<Value>> + Send + Sync>;

/// Builds the cursor to persist from the last raw row of a page.
pub type CursorBuilder = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Builds a push request body from a batch of wire rows.
pub type PushRequestBuilder = Arc<dyn Fn(&[Body]) -> Value + Send + Sync>;

/// Rewrites or drops a row. Returning `None` drops it.
pub type RowModifier = Arc<dyn Fn(Body) -> Option<Body> + Send + Sync>;

/// Default number of rows requested per pull page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default number of change records read per push batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Configuration of the pull direction.
#[derive(Clone)]
pub struct PullOptions {
    pub(crate) request_builder: PullRequestBuilder,
    pub(crate) response_extractor: Option<ResponseExtractor>,
    pub(crate) data_path: Option<String>,
    pub(crate) modifier: Option<RowModifier>,
    pub(crate) cursor_builder: Option<CursorBuilder>,
    pub(crate) page_size: usize,
}

impl PullOptions {
    /// Creates pull options with the given request builder.
    ///
    /// The builder receives the last persisted cursor, or `None` on the
    /// first pull.
    pub fn new<F>(request_builder: F) -> Self
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        Self {
            request_builder: Arc::new(request_builder),
            response_extractor: None,
            data_path: None,
            modifier: None,
            cursor_builder: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets a custom row extractor. Takes precedence over the data path.
    pub fn with_response_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Value) -> Option<Vec<Value>> + Send + Sync + 'static,
    {
        self.response_extractor = Some(Arc::new(extractor));
        self
    }

    /// Sets a dotted path to the row array inside the response
    /// (e.g. `"data.pullHuman"`).
    pub fn with_data_path(mut self, path: impl Into<String>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Sets a modifier applied to every pulled row before validation.
    pub fn with_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(Body) -> Option<Body> + Send + Sync + 'static,
    {
        self.modifier = Some(Arc::new(modifier));
        self
    }

    /// Sets how the cursor is derived from the last row of a page.
    ///
    /// By default the raw row itself is the cursor.
    pub fn with_cursor_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.cursor_builder = Some(Arc::new(builder));
        self
    }

    /// Sets the number of rows expected per full page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Returns the page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl fmt::Debug for PullOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullOptions")
            .field("data_path", &self.data_path)
            .field("response_extractor", &self.response_extractor.is_some())
            .field("modifier", &self.modifier.is_some())
            .field("cursor_builder", &self.cursor_builder.is_some())
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

/// Configuration of the push direction.
#[derive(Clone)]
pub struct PushOptions {
    pub(crate) request_builder: PushRequestBuilder,
    pub(crate) modifier: Option<RowModifier>,
    pub(crate) batch_size: usize,
}

impl PushOptions {
    /// Creates push options with the given request builder.
    ///
    /// The builder receives every row of one batch, ordered by primary key,
    /// and produces a single request body.
    pub fn new<F>(request_builder: F) -> Self
    where
        F: Fn(&[Body]) -> Value + Send + Sync + 'static,
    {
        Self {
            request_builder: Arc::new(request_builder),
            modifier: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets a modifier applied to every outgoing row.
    pub fn with_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(Body) -> Option<Body> + Send + Sync + 'static,
    {
        self.modifier = Some(Arc::new(modifier));
        self
    }

    /// Sets the number of change records read per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Returns the batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl fmt::Debug for PushOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushOptions")
            .field("modifier", &self.modifier.is_some())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

/// Configuration of a replication session.
#[derive(Clone)]
pub struct ReplicationOptions {
    /// Remote endpoint URL. Also the endpoint identity.
    pub url: String,
    /// Keep replicating after the first successful run.
    pub live: bool,
    /// Polling interval in live mode.
    pub live_interval: Duration,
    /// Delay before retrying a failed run.
    pub retry_time: Duration,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Pull configuration; `None` disables pulling.
    pub pull: Option<PullOptions>,
    /// Push configuration; `None` disables pushing.
    pub push: Option<PushOptions>,
    /// Name of the wire field carrying the deletion flag.
    pub deleted_field: String,
    /// Name of the primary key field.
    pub primary_path: String,
    /// Validator applied to pulled rows.
    pub validator: Arc<dyn SchemaValidator>,
    /// Trigger the first run when the session starts.
    pub auto_start: bool,
}

impl ReplicationOptions {
    /// Creates options for `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            live: false,
            live_interval: Duration::from_secs(10),
            retry_time: Duration::from_secs(5),
            headers: BTreeMap::new(),
            pull: None,
            push: None,
            deleted_field: "deleted".to_string(),
            primary_path: "id".to_string(),
            validator: Arc::new(NoValidation),
            auto_start: true,
        }
    }

    /// Enables or disables live mode.
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Sets the live polling interval.
    pub fn with_live_interval(mut self, interval: Duration) -> Self {
        self.live_interval = interval;
        self
    }

    /// Sets the retry delay.
    pub fn with_retry_time(mut self, retry_time: Duration) -> Self {
        self.retry_time = retry_time;
        self
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces all request headers.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Enables pulling.
    pub fn with_pull(mut self, pull: PullOptions) -> Self {
        self.pull = Some(pull);
        self
    }

    /// Enables pushing.
    pub fn with_push(mut self, push: PushOptions) -> Self {
        self.push = Some(push);
        self
    }

    /// Sets the deletion flag field name.
    pub fn with_deleted_field(mut self, field: impl Into<String>) -> Self {
        self.deleted_field = field.into();
        self
    }

    /// Sets the primary key field name.
    pub fn with_primary_path(mut self, path: impl Into<String>) -> Self {
        self.primary_path = path.into();
        self
    }

    /// Sets the validator for pulled rows.
    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Enables or disables the automatic first run.
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Checks the options for mistakes that would make every run fail.
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.url.trim().is_empty() {
            return Err(config_error("url must not be empty"));
        }
        if self.pull.is_none() && self.push.is_none() {
            return Err(config_error("either pull or push must be configured"));
        }
        if self.pull.as_ref().is_some_and(|pull| pull.page_size == 0) {
            return Err(config_error("pull page size must be at least 1"));
        }
        if self.push.as_ref().is_some_and(|push| push.batch_size == 0) {
            return Err(config_error("push batch size must be at least 1"));
        }
        if self.live && self.live_interval.is_zero() {
            return Err(config_error("live interval must be greater than zero"));
        }
        if self.deleted_field.is_empty() {
            return Err(config_error("deleted field must not be empty"));
        }
        if self.primary_path.is_empty() {
            return Err(config_error("primary path must not be empty"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> ReplicationError {
    ReplicationError::Configuration(message.to_string())
}

impl fmt::Debug for ReplicationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationOptions")
            .field("url", &self.url)
            .field("live", &self.live)
            .field("live_interval", &self.live_interval)
            .field("retry_time", &self.retry_time)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("pull", &self.pull)
            .field("push", &self.push)
            .field("deleted_field", &self.deleted_field)
            .field("primary_path", &self.primary_path)
            .field("auto_start", &self.auto_start)
            .finish_non_exhaustive()
    }
}
