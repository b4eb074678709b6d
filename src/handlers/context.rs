//! 项目上下文的 HTTP 处理器

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::{auth::AuthContext, middleware::AppState};

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    /// json（默认）或 markdown
    pub format: Option<String>,
}

/// GET /api/v1/context
pub async fn get_context(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<ContextQuery>,
) -> Response {
    let format = query.format.as_deref().unwrap_or("json");

    if format == "markdown" {
        match state
            .context_compiler
            .generate_markdown(&auth_context.user_id)
            .await
        {
            Ok(markdown) => {
                ([(header::CONTENT_TYPE, "text/markdown")], markdown).into_response()
            }
            Err(e) => compilation_failed(e),
        }
    } else {
        match state
            .context_compiler
            .compile_project_context(&auth_context.user_id)
            .await
        {
            Ok(context) => Json(context).into_response(),
            Err(e) => compilation_failed(e),
        }
    }
}

fn compilation_failed(e: crate::error::AppError) -> Response {
    tracing::error!(error = %e, "Context compilation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "CONTEXT_COMPILATION_FAILED",
            "message": e.user_message(),
        })),
    )
        .into_response()
}
