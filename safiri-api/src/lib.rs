use axum::{
    routing::{get, post},
    Router,
    http::Method,
    extract::State,
    response::IntoResponse,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use std::net::SocketAddr;

pub mod auth;
pub mod state;
pub mod error;
pub mod middleware;
pub mod rides;
pub mod bookings;
pub mod payments;
pub mod webhooks;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let public = Router::new()
        .merge(auth::routes())
        .route("/v1/rides/{id}", get(rides::get_ride))
        .route("/v1/rides/{id}/availability", get(rides::get_availability))
        .route(
            "/v1/webhooks/payments/{provider}",
            post(webhooks::handle_payment_webhook),
        );

    let rider = Router::new()
        .route("/v1/bookings", post(bookings::create_booking))
        .route("/v1/bookings/{id}", get(bookings::get_booking))
        .route("/v1/bookings/{id}/payment", post(payments::initiate_payment))
        .route(
            "/v1/bookings/{id}/payment/status",
            get(payments::payment_status),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::rider_auth_middleware,
        ));

    let driver = Router::new()
        .route("/v1/rides", post(rides::create_ride))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::driver_auth_middleware,
        ));

    Router::new()
        .merge(public)
        .merge(rider)
        .merge(driver)
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(TraceLayer::new_for_http()),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::resiliency::circuit_breaker_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let ip = addr.ip().to_string();
    let key = format!("ratelimit:{}", ip);

    match state.redis.check_rate_limit(&key, 100, 60).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err((axum::http::StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")),
        Err(_) => Ok(next.run(req).await), // Fail open
    }
}
