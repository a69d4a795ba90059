//! 健康检查路由（免认证、免凭据）

use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

/// GET /api/health
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "UP",
        "service": "nakacrm",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
