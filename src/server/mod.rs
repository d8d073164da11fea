pub mod attachments;
pub mod auth;
pub mod chat_request;
pub mod error_classifier;
pub mod handlers;
pub mod provider_dispatch;
pub mod request_state;
pub mod ssrf;
pub mod storage_traits;
pub mod streaming;
pub mod token_model_limits;
pub(crate) mod util;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::http_client::client_for_downloads;
use crate::routing::ProviderResolver;
use crate::server::attachments::AttachmentPolicy;
use crate::server::auth::{AuthResolver, StaticTokenAuth};
use crate::server::chat_request::RequestNormalizer;
use crate::server::provider_dispatch::ProviderRegistry;
use crate::server::storage_traits::{HttpObjectStore, ObjectStore, PlainTextExtractor};
use crate::server::streaming::StreamMultiplexer;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable per-process state shared by every request.
pub struct AppState {
    pub settings: Settings,
    pub registry: ProviderRegistry,
    pub resolver: ProviderResolver,
    pub normalizer: RequestNormalizer,
    pub policy: AttachmentPolicy,
    pub multiplexer: StreamMultiplexer,
    pub auth: Arc<dyn AuthResolver>,
    pub object_store: Arc<dyn ObjectStore>,
}

impl AppState {
    /// Default collaborators: static bearer tokens, HTTP object store, plain-text extraction.
    pub fn from_settings(settings: Settings) -> AppResult<Self> {
        let registry = ProviderRegistry::from_settings(&settings, Arc::new(PlainTextExtractor))?;
        let object_store = Arc::new(
            HttpObjectStore::new(client_for_downloads(DOWNLOAD_TIMEOUT)?)
                .allow_private_hosts(settings.attachments.allow_private_urls),
        );
        let auth = Arc::new(StaticTokenAuth::new(&settings.auth.tokens));
        Ok(Self::with_collaborators(settings, registry, auth, object_store))
    }

    pub fn with_collaborators(
        settings: Settings,
        registry: ProviderRegistry,
        auth: Arc<dyn AuthResolver>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        let gateway = settings.gateway.clone();
        Self {
            registry,
            resolver: ProviderResolver::new(gateway.default_provider),
            multiplexer: StreamMultiplexer::new(Duration::from_secs(gateway.heartbeat_secs.max(1))),
            normalizer: RequestNormalizer::new(gateway),
            policy: settings.attachments.into(),
            auth,
            object_store,
            settings,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server.cors_origins);
    let body_limit = state.settings.server.max_body_bytes;

    handlers::routes()
        .with_state(Arc::new(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub fn build_app(settings: Settings) -> AppResult<Router> {
    Ok(create_app(AppState::from_settings(settings)?))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o.trim()) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("ignoring invalid CORS origin {:?}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(allow_origin)
}
