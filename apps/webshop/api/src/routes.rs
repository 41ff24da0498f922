//! HTTP route table for the webshop API.
//!
//! Only the operational surface lives here; storefront business endpoints
//! (signup, login, checkout) are registered by their own modules once they
//! land and follow the same [`HttpRoute`] shape.

use axum::routing::get;
use axum::Json;
use core_config::AppInfo;
use serde_json::json;
use server_core::HttpRoute;

/// Routes handed to the HTTP server. `/health` and `/metrics` are built in
/// and do not appear here.
pub fn routes(app: AppInfo) -> Vec<HttpRoute> {
    vec![
        HttpRoute::new(
            "/",
            get(move || async move {
                Json(json!({
                    "name": app.name,
                    "version": app.version,
                }))
            }),
        ),
        HttpRoute::new("/version", get(move || async move { app.version })),
    ]
}
