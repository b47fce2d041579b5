use axum::Router;
use axum::http::{Method, header};
use tower_http::cors::{Any, CorsLayer};

pub fn add_cors(router: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    router.layer(cors)
}
