use crate::report::ErrorKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build failed for target '{target}': {backend_error}")]
    BuildFailed {
        target: String,
        backend_error: String,
    },

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build backend error: {0}")]
    Backend(String),

    #[error("Invalid OCI layout at {path}: {message}")]
    InvalidLayout { path: PathBuf, message: String },

    #[error("Build cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BuildError {
    /// レポート上のエラー種別
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::BuildFailed,
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;

/// レジストリ認証の失敗
///
/// 認証結果はプロセス内でキャッシュされ、複数の待機者で共有されるため Clone。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Authentication failed for registry '{registry}': {reason}")]
pub struct AuthError {
    pub registry: String,
    pub reason: String,
}

impl AuthError {
    pub fn new(registry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            reason: reason.into(),
        }
    }
}

/// プッシュ失敗の分類（リトライ可否を決める）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushErrorClass {
    /// タイムアウト、接続エラー、5xx、429
    Transient,
    /// 401 / 403
    Auth,
    /// 不正な成果物、その他の 4xx
    Rejected,
    /// キャンセル
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PushError {
    pub class: PushErrorClass,
    pub message: String,
}

impl PushError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(PushErrorClass::Transient, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(PushErrorClass::Auth, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(PushErrorClass::Rejected, message)
    }

    pub fn cancelled() -> Self {
        Self::new(PushErrorClass::Cancelled, "push cancelled")
    }

    fn new(class: PushErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// 一時的な失敗のみリトライ対象
    pub fn is_retryable(&self) -> bool {
        self.class == PushErrorClass::Transient
    }

    pub fn kind(&self) -> ErrorKind {
        match self.class {
            PushErrorClass::Auth => ErrorKind::AuthFailed,
            PushErrorClass::Cancelled => ErrorKind::Cancelled,
            PushErrorClass::Transient | PushErrorClass::Rejected => ErrorKind::PushFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(PushError::transient("503").is_retryable());
        assert!(!PushError::auth("401").is_retryable());
        assert!(!PushError::rejected("400").is_retryable());
        assert!(!PushError::cancelled().is_retryable());
    }

    #[test]
    fn test_push_error_kind() {
        assert_eq!(PushError::auth("denied").kind(), ErrorKind::AuthFailed);
        assert_eq!(PushError::transient("timeout").kind(), ErrorKind::PushFailed);
        assert_eq!(PushError::rejected("bad").kind(), ErrorKind::PushFailed);
        assert_eq!(PushError::cancelled().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_build_error_kind() {
        assert_eq!(BuildError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            BuildError::Backend("exit 1".to_string()).kind(),
            ErrorKind::BuildFailed
        );
    }
}
