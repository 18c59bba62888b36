use crate::config::Settings;
use crate::question::ScreenshotParser;
use crate::rag::RagService;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;

/// Services shared by every handler invocation
pub struct AppState {
    /// Loaded configuration
    pub settings: Arc<Settings>,
    /// Screenshot parser backed by the vision model
    pub parser: ScreenshotParser,
    /// Daily quota store
    pub rate_limiter: RateLimiter,
    /// Lazily initialised RAG engine, `None` when `ENABLE_RAG` is off
    pub rag: Option<RagService>,
}

impl AppState {
    /// Bundle the services for the dispatcher
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        parser: ScreenshotParser,
        rate_limiter: RateLimiter,
        rag: Option<RagService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            parser,
            rate_limiter,
            rag,
        })
    }
}
