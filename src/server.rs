//! # Server Configuration
//!
//! Router construction, collaborator wiring and the listener loop for the
//! Slack event receiver.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::credentials::{MetadataServerToken, StaticToken, TokenProvider};
use crate::dispatcher::EventDispatcher;
use crate::handlers;
use crate::sentiment::{LanguageClient, SentimentClassifier};
use crate::slack::SlackClient;
use crate::warehouse::{BigQuerySink, TableRef};
use crate::webhook_verification::SignatureVerifier;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub verifier: Arc<SignatureVerifier>,
    pub dispatcher: Arc<EventDispatcher>,
    pub credentials: Arc<dyn TokenProvider>,
}

impl AppState {
    /// Wires the production HTTP collaborators from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.outbound_timeout())
            .user_agent(concat!("slackbot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let credentials: Arc<dyn TokenProvider> = match &config.google_oauth_access_token {
            Some(token) => Arc::new(StaticToken::new(token.clone())),
            None => Arc::new(MetadataServerToken::new(
                http.clone(),
                &config.gce_metadata_host,
            )),
        };

        let chat = Arc::new(SlackClient::new(
            http.clone(),
            config.slack_api_base.clone(),
            config.slack_oauth_access_token.clone(),
        ));
        let sink = Arc::new(BigQuerySink::new(
            http.clone(),
            config.bigquery_api_base.clone(),
            TableRef {
                project_id: config.bigquery_project_id.clone(),
                dataset_id: config.bigquery_dataset_id.clone(),
                table_id: config.bigquery_table_id.clone(),
            },
            credentials.clone(),
        ));
        let sentiment: Option<Arc<dyn SentimentClassifier>> = if config.reaction_sentiment_enable {
            Some(Arc::new(LanguageClient::new(
                http,
                config.language_api_base.clone(),
                config.language_api_key.clone(),
                Some(credentials.clone()),
            )))
        } else {
            None
        };

        let dispatcher = EventDispatcher::new(chat, sink, sentiment, config.outbound_timeout());
        let verifier = SignatureVerifier::new(
            config.slack_signing_secret.clone(),
            config.signature_tolerance_seconds,
        );

        Ok(Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            dispatcher: Arc::new(dispatcher),
            credentials,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/events-endpoint", post(handlers::events::events_endpoint))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (host, port) = config.bind_target();
    let host = host.to_string();

    let state = AppState::from_config(config)?;
    // Fail fast when no Google credential source is reachable.
    state
        .credentials
        .access_token()
        .await
        .map_err(|e| format!("No usable Google credentials: {}", e))?;
    info!(
        profile = %state.config.profile,
        sentiment_enabled = state.config.reaction_sentiment_enable,
        "Collaborators initialized"
    );
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!(addr = %listener.local_addr()?, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::events::events_endpoint,
    ),
    components(
        schemas(
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Liveness"),
        (name = "events", description = "Slack Events API ingress")
    ),
    info(
        title = "Slackbot Event Receiver",
        description = "Receives Slack Events API callbacks and appends them to a BigQuery table",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
