use crate::{
    config::Config,
    coordinator::{Coordinator, CoordinatorSettings},
    extractor::MediaExtractor,
    image::ImageSource,
    rate_limit::RateLimiter,
    session::SessionRegistry,
};
use std::{sync::Arc, time::Instant};

/// Everything the update handlers share.
pub struct App {
    pub config: Config,
    pub coordinator: Coordinator,
    pub limiter: RateLimiter,
    pub started_at: Instant,
}

impl App {
    #[must_use]
    pub fn new(
        config: Config,
        extractor: Arc<dyn MediaExtractor>,
        images: Arc<dyn ImageSource>,
    ) -> Self {
        let sessions = SessionRegistry::new();
        let limiter = RateLimiter::new(sessions.clone(), config.rate_limit);
        let coordinator = Coordinator::new(
            sessions,
            extractor,
            images,
            CoordinatorSettings::from(&config),
        );
        Self {
            config,
            coordinator,
            limiter,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        self.coordinator.sessions()
    }
}
