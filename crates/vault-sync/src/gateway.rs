//! JSON request/response surface over the coordinator.
//!
//! One request per line:
//!
//! ```json
//! {"window": 1, "id": 7, "op": "rename", "oldPath": "/v/a.md", "newPath": "/v/b.md"}
//! ```
//!
//! Answered with `{"id": 7, "ok": true}` or
//! `{"id": 7, "ok": false, "error": {"kind": "io", "message": "..."}}`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use vault_core::{FileInfoNode, IndexEntry};

use crate::context::WindowId;
use crate::coordinator::SyncCoordinator;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Operation {
    ListTree,
    ReadFile {
        path: PathBuf,
    },
    Exists {
        path: PathBuf,
    },
    IsDirectory {
        path: PathBuf,
    },
    WriteFile {
        path: PathBuf,
        content: String,
    },
    CreateFile {
        path: PathBuf,
        #[serde(default)]
        content: String,
    },
    CreateDirectory {
        path: PathBuf,
    },
    Delete {
        path: PathBuf,
    },
    Rename {
        old_path: PathBuf,
        new_path: PathBuf,
    },
    Move {
        source_path: PathBuf,
        destination_path: PathBuf,
    },
    ListDirectory {
        dir_path: PathBuf,
    },
    Reindex {
        path: PathBuf,
    },
    ConvertPaths {
        paths: Vec<PathBuf>,
    },
}

impl Operation {
    /// Wire name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ListTree => "list-tree",
            Operation::ReadFile { .. } => "read-file",
            Operation::Exists { .. } => "exists",
            Operation::IsDirectory { .. } => "is-directory",
            Operation::WriteFile { .. } => "write-file",
            Operation::CreateFile { .. } => "create-file",
            Operation::CreateDirectory { .. } => "create-directory",
            Operation::Delete { .. } => "delete",
            Operation::Rename { .. } => "rename",
            Operation::Move { .. } => "move",
            Operation::ListDirectory { .. } => "list-directory",
            Operation::Reindex { .. } => "reindex",
            Operation::ConvertPaths { .. } => "convert-paths",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub window: WindowId,
    /// Echoed back so callers can match responses
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub operation: Operation,
}

/// Successful payload of an operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum OperationResult {
    Tree(Vec<FileInfoNode>),
    Text(String),
    Flag(bool),
    Names(Vec<String>),
    Entries(Vec<IndexEntry>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn success(id: Option<u64>, result: Option<OperationResult>) -> Self {
        Self {
            id,
            ok: true,
            result,
            error: None,
        }
    }

    fn failure(id: Option<u64>, kind: &str, message: String) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message,
            }),
        }
    }
}

/// Run one operation for `window`.
pub async fn execute(
    coordinator: &SyncCoordinator,
    window: WindowId,
    operation: Operation,
) -> Result<Option<OperationResult>> {
    let result = match operation {
        Operation::ListTree => Some(OperationResult::Tree(coordinator.list_tree(window).await?)),
        Operation::ReadFile { path } => {
            Some(OperationResult::Text(coordinator.read_file(window, &path).await?))
        }
        Operation::Exists { path } => {
            Some(OperationResult::Flag(coordinator.exists(window, &path).await))
        }
        Operation::IsDirectory { path } => {
            Some(OperationResult::Flag(coordinator.is_directory(window, &path).await?))
        }
        Operation::WriteFile { path, content } => {
            coordinator.write_file(window, &path, &content).await?;
            None
        }
        Operation::CreateFile { path, content } => {
            coordinator.create_file(window, &path, &content).await?;
            None
        }
        Operation::CreateDirectory { path } => {
            coordinator.create_directory(window, &path).await?;
            None
        }
        Operation::Delete { path } => {
            coordinator.delete(window, &path).await?;
            None
        }
        Operation::Rename { old_path, new_path } => {
            coordinator.rename(window, &old_path, &new_path).await?;
            None
        }
        Operation::Move {
            source_path,
            destination_path,
        } => {
            coordinator
                .move_entry(window, &source_path, &destination_path)
                .await?;
            None
        }
        Operation::ListDirectory { dir_path } => Some(OperationResult::Names(
            coordinator.list_directory(window, &dir_path).await?,
        )),
        Operation::Reindex { path } => {
            coordinator.reindex(window, &path).await?;
            None
        }
        Operation::ConvertPaths { paths } => Some(OperationResult::Entries(
            coordinator.convert_paths(window, &paths).await?,
        )),
    };
    Ok(result)
}

/// Execute a parsed request, folding failures into the response.
pub async fn dispatch(coordinator: &SyncCoordinator, request: Request) -> Response {
    let name = request.operation.name();
    match execute(coordinator, request.window, request.operation).await {
        Ok(result) => Response::success(request.id, result),
        Err(e) => {
            debug!("{} for window {} failed: {}", name, request.window, e);
            error_response(request.id, &e)
        }
    }
}

/// Parse and execute one JSON line.
pub async fn handle_line(coordinator: &SyncCoordinator, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => dispatch(coordinator, request).await,
        Err(e) => Response::failure(None, "badRequest", e.to_string()),
    }
}

fn error_response(id: Option<u64>, error: &SyncError) -> Response {
    Response::failure(id, error.kind(), error.to_string())
}
