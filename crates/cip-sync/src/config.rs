//! Sync configuration.

/// Configuration shared by the inventory reader and the promotion executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Number of concurrent workers.
    pub workers: usize,

    /// Capacity of the bounded job queue.
    pub queue_capacity: usize,

    /// Crawl child repositories of each registry.
    pub recurse: bool,

    /// Record requests instead of executing them.
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 100,
            recurse: true,
            dry_run: true,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }
}

/// Builder for `SyncConfig`.
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    recurse: Option<bool>,
    dry_run: Option<bool>,
}

impl SyncConfigBuilder {
    /// Sets the number of workers. Zero is raised to one.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the job queue capacity. Zero is raised to one.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Enables or disables crawling of child repositories.
    #[must_use]
    pub const fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = Some(recurse);
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            workers: self.workers.unwrap_or(defaults.workers).max(1),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity).max(1),
            recurse: self.recurse.unwrap_or(defaults.recurse),
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
        }
    }
}
