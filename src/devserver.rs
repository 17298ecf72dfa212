//! Static dev server bound to one workspace checkout.
//!
//! This is the opaque serving collaborator behind each environment
//! handle: it knows its root, the base path its workspace is mounted
//! under, and a filesystem allowlist (the primary repository and the
//! worktrees container — never the whole filesystem). Index documents
//! get the HTML template transform applied before they are served.

use std::path::{Path, PathBuf};

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::workspace::inspect::canonical;

const INDEX_DOCUMENT: &str = "index.html";

#[derive(Debug)]
pub struct DevServer {
    root: PathBuf,
    base_path: String,
    allowlist: Vec<PathBuf>,
}

impl DevServer {
    pub fn new(root: PathBuf, base_path: String, allowlist: Vec<PathBuf>) -> Self {
        Self {
            root: canonical(&root),
            base_path,
            allowlist: allowlist.iter().map(|p| canonical(p)).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve `sub_path` (the request path with the workspace prefix
    /// stripped) from this workspace's root.
    ///
    /// Directory requests resolve to the index document; extensionless
    /// paths that match no file fall back to it as well, so client-side
    /// routes reload correctly.
    pub async fn serve(&self, sub_path: &str) -> Response {
        let mut relative = PathBuf::new();
        for part in sub_path.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return (StatusCode::FORBIDDEN, "path traversal rejected").into_response()
                }
                part => relative.push(part),
            }
        }

        let mut candidate = self.root.join(&relative);
        if tokio::fs::metadata(&candidate)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            candidate = candidate.join(INDEX_DOCUMENT);
        }

        match self.read_allowed(&candidate).await {
            Ok(Some(bytes)) => self.file_response(&candidate, bytes),
            Ok(None) => {
                // SPA fallback: unknown extensionless paths render the
                // index document under this workspace's base path.
                if relative.extension().is_none() {
                    let index = self.root.join(INDEX_DOCUMENT);
                    match self.read_allowed(&index).await {
                        Ok(Some(bytes)) => self.file_response(&index, bytes),
                        Ok(None) => (StatusCode::NOT_FOUND, "not found").into_response(),
                        Err(response) => response,
                    }
                } else {
                    (StatusCode::NOT_FOUND, "not found").into_response()
                }
            }
            Err(response) => response,
        }
    }

    /// Inject a `<base>` element pointing at the workspace base path so
    /// relative asset URLs resolve under `/<workspace>/`. Documents that
    /// already declare a base are left alone.
    pub fn transform_index_html(&self, html: &str) -> String {
        if html.contains("<base ") || html.contains("<base>") {
            return html.to_string();
        }
        let tag = format!("<base href=\"{}\">", self.base_path);
        if let Some(pos) = html.find("<head>") {
            let insert_at = pos + "<head>".len();
            format!("{}{}{}", &html[..insert_at], tag, &html[insert_at..])
        } else {
            format!("{tag}{html}")
        }
    }

    /// Read a file after enforcing the filesystem allowlist on its
    /// canonical path. `Ok(None)` means not found.
    async fn read_allowed(&self, path: &Path) -> Result<Option<Vec<u8>>, Response> {
        let resolved = canonical(path);
        if !self.allowlist.iter().any(|root| resolved.starts_with(root)) {
            warn!(path = %resolved.display(), "request resolved outside the filesystem allowlist");
            return Err((StatusCode::FORBIDDEN, "forbidden").into_response());
        }
        match tokio::fs::read(&resolved).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotADirectory => Ok(None),
            Err(err) => {
                warn!(path = %resolved.display(), error = %err, "failed to read file");
                Err((StatusCode::INTERNAL_SERVER_ERROR, "read error").into_response())
            }
        }
    }

    fn file_response(&self, path: &Path, bytes: Vec<u8>) -> Response {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let is_index = path
            .file_name()
            .map(|name| name == INDEX_DOCUMENT)
            .unwrap_or(false);

        if is_index {
            let html = self.transform_index_html(&String::from_utf8_lossy(&bytes));
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8".to_string())],
                html,
            )
                .into_response();
        }

        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime.essence_str().to_string())],
            bytes,
        )
            .into_response()
    }
}
