//! HTTP router: maps `/<workspace>/...` onto cached environments.
//!
//! The router is deliberately thin. It extracts the workspace name from
//! the path prefix, validates it (invalid names never reach the core),
//! delegates to the registry, and forwards the remaining sub-path to the
//! environment's serving interface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::workspace::{ProvisionError, WorkspaceName};
use crate::AppContext;

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(status))
        .fallback(serve_workspace)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// `GET /` — registry snapshot for tooling.
async fn status(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let environments: Vec<serde_json::Value> = ctx
        .registry
        .list()
        .await
        .iter()
        .map(|env| {
            json!({
                "name": env.name,
                "root": env.root,
                "base_path": env.base_path,
                "created_at": env.created_at.to_rfc3339(),
            })
        })
        .collect();

    Json(json!({
        "repo": ctx.registry.repo_path(),
        "workspaces": environments,
    }))
}

async fn serve_workspace(State(ctx): State<Arc<AppContext>>, uri: Uri) -> Response {
    let path = uri.path();
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (first, rest) = match trimmed.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (trimmed, None),
    };

    let Ok(name) = WorkspaceName::parse(first) else {
        // Not a workspace route; nothing else handles it here.
        debug!(path, "request did not match a valid workspace name");
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    // `/<name>` → `/<name>/` so relative asset URLs resolve under the
    // workspace base path.
    let Some(sub_path) = rest else {
        return Redirect::permanent(&name.base_path()).into_response();
    };

    match ctx.registry.resolve(&name).await {
        Ok(env) => env.server.serve(sub_path).await,
        Err(err) => provision_error_response(&err),
    }
}

fn provision_error_response(err: &ProvisionError) -> Response {
    let status = match err {
        ProvisionError::InvalidName(_) => StatusCode::NOT_FOUND,
        ProvisionError::BranchCheckedOutElsewhere { .. }
        | ProvisionError::PathOccupiedByOtherBranch { .. }
        | ProvisionError::NonEmptyDirectory { .. }
        | ProvisionError::InvalidBaseBranch(_) => StatusCode::CONFLICT,
        ProvisionError::CreationFailed { .. } => StatusCode::BAD_GATEWAY,
        ProvisionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(json!({
            "error": err.kind(),
            "detail": err.to_string(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn conflicts_map_to_409() {
        let err = ProvisionError::NonEmptyDirectory {
            path: PathBuf::from("/x"),
        };
        let response = provision_error_response(&err);
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let err = ProvisionError::BranchCheckedOutElsewhere {
            branch: "feature1-branch".to_string(),
            other_path: PathBuf::from("/elsewhere"),
        };
        assert_eq!(provision_error_response(&err).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn creation_failure_maps_to_502() {
        let err = ProvisionError::CreationFailed {
            detail: "fatal: oops".to_string(),
        };
        assert_eq!(
            provision_error_response(&err).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_maps_to_500() {
        let err = ProvisionError::Internal(anyhow::anyhow!("boom"));
        assert_eq!(
            provision_error_response(&err).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
