use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{
    auth::{AdminOnly, AnyRole, DirectorOnly, ManagerOnly, RequireRole, Reviewer},
    state::AppState,
};

pub mod auth;
pub mod health;
pub mod letters;
pub mod notifications;
pub mod public;
pub mod review;
pub mod signature;
pub mod templates;
pub mod users;

const BODY_LIMIT_HEADROOM: usize = 1024 * 1024;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        tracing::warn!(origin = value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true)
}

fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(review::dashboard))
        .route("/letters", get(review::list_letters))
        .route("/letters/:id", get(review::get_letter))
        .route("/letters/:id/review", post(review::review_letter))
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);
    let body_limit = state.config.max_signature_bytes + BODY_LIMIT_HEADROOM;

    let public_routes = Router::new()
        .route("/templates", get(public::list_templates))
        .route("/templates/:id", get(public::get_template))
        .route("/letters", post(public::submit_letter))
        .route("/letters/:letter_number/document", get(public::letter_document))
        .route("/track", get(public::track))
        .route("/track/:letter_number", get(public::track_letter));

    let auth_routes = Router::new()
        .route("/:role/login", post(auth::login))
        .route(
            "/logout",
            post(auth::logout).route_layer(middleware::from_extractor_with_state::<
                RequireRole<AnyRole>,
                _,
            >(state.clone())),
        )
        .route(
            "/me",
            get(auth::me).route_layer(middleware::from_extractor_with_state::<
                RequireRole<AnyRole>,
                _,
            >(state.clone())),
        );

    let admin_routes = Router::new()
        .route("/dashboard", get(letters::admin_dashboard))
        .route("/letters", get(letters::list_letters))
        .route("/letters/:id", get(letters::get_letter))
        .route(
            "/templates",
            get(templates::list_templates).post(templates::create_template),
        )
        .route(
            "/templates/:id",
            get(templates::get_template)
                .patch(templates::update_template)
                .delete(templates::delete_template),
        )
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/:id",
            axum::routing::patch(users::update_user).delete(users::delete_user),
        )
        .route("/users/:id/reset-password", post(users::reset_password))
        .route_layer(middleware::from_extractor_with_state::<
            RequireRole<AdminOnly>,
            _,
        >(state.clone()));

    let manager_routes = review_routes().route_layer(middleware::from_extractor_with_state::<
        RequireRole<ManagerOnly>,
        _,
    >(state.clone()));

    let director_routes = review_routes().route_layer(middleware::from_extractor_with_state::<
        RequireRole<DirectorOnly>,
        _,
    >(state.clone()));

    let signature_routes = Router::new()
        .route(
            "/",
            get(signature::get_signature).post(signature::upload_signature),
        )
        .route("/image", get(signature::get_signature_image))
        .route_layer(middleware::from_extractor_with_state::<
            RequireRole<Reviewer>,
            _,
        >(state.clone()));

    let inbox_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/unread-count", get(notifications::get_unread_count))
        .route("/read-all", post(notifications::mark_all_read))
        .route("/read", axum::routing::delete(notifications::delete_read))
        .route("/:id/read", post(notifications::mark_read))
        .route("/:id", axum::routing::delete(notifications::delete_notification))
        .route_layer(middleware::from_extractor_with_state::<
            RequireRole<AnyRole>,
            _,
        >(state.clone()));

    Router::new()
        .nest("/api/public", public_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api/manager", manager_routes)
        .nest("/api/director", director_routes)
        .nest("/api/signature", signature_routes)
        .nest("/api/notifications", inbox_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
