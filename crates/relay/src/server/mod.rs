mod routes;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::clock::Clock;
use crate::processor::Processor;
use crate::rules::ConfigService;
use crate::sources::WebhookNormalizer;
use crate::store::Database;

pub struct Server {
    pub processor: Arc<Processor>,
    pub normalizer: Arc<WebhookNormalizer>,
    pub rules: Arc<ConfigService>,
    pub db: Option<Arc<dyn Database>>,
    pub clock: Arc<dyn Clock>,
    pub auth_token: Option<String>,
    /// In-flight alert processing detached from webhook requests; shutdown
    /// waits on this up to the grace window.
    pub tasks: TaskTracker,
}

impl Server {
    pub fn new(
        processor: Arc<Processor>,
        normalizer: Arc<WebhookNormalizer>,
        rules: Arc<ConfigService>,
        db: Option<Arc<dyn Database>>,
        clock: Arc<dyn Clock>,
        auth_token: Option<String>,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            processor,
            normalizer,
            rules,
            db,
            clock,
            auth_token,
            tasks,
        }
    }

    pub fn build_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/alerts", post(routes::ingest_alerts))
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .route("/reload", get(routes::reload).post(routes::reload))
            .route("/get-config", get(routes::get_config))
            .route("/push-config", post(routes::push_config))
            .route(
                "/troubleshooting-guide",
                get(routes::get_guides).post(routes::post_guide),
            )
            .layer(middleware::from_fn_with_state(
                self.clone(),
                routes::require_bearer,
            ))
            .with_state(self)
    }
}
