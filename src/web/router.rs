use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{agents, conversations, experiments, export, users};

fn build_localhost_cors(api_port: u16, web_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
        format!("http://127.0.0.1:{}", web_port),
        format!("http://localhost:{}", web_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/conversations/conversation",
            get(conversations::get_conversation),
        )
        .route("/api/conversations/message", post(conversations::post_message))
        .route("/api/conversations/audio", post(conversations::post_audio))
        .route(
            "/api/conversations/message/stream",
            get(conversations::stream_message),
        )
        .route(
            "/api/conversations/create",
            post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/metadata",
            put(conversations::update_metadata),
        )
        .route(
            "/api/conversations/annotation",
            put(conversations::update_annotation),
        )
        .route(
            "/api/conversations/finish",
            post(conversations::finish_conversation),
        )
        .route(
            "/api/conversations/snapshot",
            post(conversations::save_snapshot),
        )
        .route("/api/conversations/affect", post(conversations::record_affect))
        .route(
            "/api/agents",
            get(agents::list_agents)
                .post(agents::create_agent)
                .put(agents::update_agent),
        )
        .route("/api/agents/download-sample", get(agents::download_sample))
        // The browser parses the uploaded sheet; the parsed condition lands
        // here as a plain agent update.
        .route("/api/agents/upload-rulesheet", post(agents::update_agent))
        .route(
            "/api/agents/{agent_id}",
            get(agents::get_agent).delete(agents::delete_agent),
        )
        .route(
            "/api/experiments",
            get(experiments::list_experiments)
                .post(experiments::create_experiment)
                .put(experiments::update_experiment),
        )
        .route(
            "/api/experiments/{experiment_id}",
            get(experiments::get_experiment).delete(experiments::delete_experiment),
        )
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route("/api/users/{user_id}", get(users::get_user))
        .route(
            "/api/export/experiment/{experiment_id}/xlsx",
            get(export::experiment_xlsx),
        )
        .route("/api/export/action-units", get(export::action_units))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(build_localhost_cors(state.api_port, state.web_port))
        .with_state(state)
}
