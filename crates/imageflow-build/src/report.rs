//! 実行結果のレポート

use chrono::{DateTime, Utc};
use imageflow_core::Digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 失敗の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BuildFailed,
    AuthFailed,
    PushFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BuildFailed => "build_failed",
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::PushFailed => "push_failed",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    BuildOnly,
    Push,
}

/// ターゲットのビルド結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    Succeeded {
        context_digest: Digest,
        index_digest: Digest,
        arch_digests: BTreeMap<String, Digest>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Succeeded { .. })
    }
}

/// (ターゲット, レジストリ) 1組のプッシュ結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushResult {
    Pushed {
        remote_digest: Digest,
        retry_count: u32,
        /// レジストリに同じ index がすでにあり、転送しなかった
        already_present: bool,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        retry_count: u32,
    },
}

impl PushResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PushResult::Pushed { .. })
    }

    pub fn retry_count(&self) -> u32 {
        match self {
            PushResult::Pushed { retry_count, .. } | PushResult::Failed { retry_count, .. } => {
                *retry_count
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub build: BuildOutcome,
    /// レジストリID -> 結果（ビルド専用モードやビルド失敗時は空）
    #[serde(default)]
    pub pushes: BTreeMap<String, PushResult>,
}

/// 1回の実行の最終レポート
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub project: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetReport>,
}

/// 失敗1件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure<'a> {
    pub target: &'a str,
    pub registry: Option<&'a str>,
    pub kind: ErrorKind,
    pub message: &'a str,
}

impl Report {
    /// PushResult の総数（ビルド成功ターゲット数 × レジストリ数になる）
    pub fn push_result_count(&self) -> usize {
        self.targets.values().map(|t| t.pushes.len()).sum()
    }

    pub fn failures(&self) -> Vec<Failure<'_>> {
        let mut failures = Vec::new();
        for (target, report) in &self.targets {
            if let BuildOutcome::Failed { kind, message } = &report.build {
                failures.push(Failure {
                    target,
                    registry: None,
                    kind: *kind,
                    message,
                });
            }
            for (registry, push) in &report.pushes {
                if let PushResult::Failed { kind, message, .. } = push {
                    failures.push(Failure {
                        target,
                        registry: Some(registry.as_str()),
                        kind: *kind,
                        message,
                    });
                }
            }
        }
        failures
    }

    pub fn has_failures(&self) -> bool {
        self.targets.values().any(|t| {
            !t.build.is_success() || t.pushes.values().any(|p| !p.is_success())
        })
    }

    /// プロセスの終了コード（失敗またはキャンセルがあれば非0）
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() { 1 } else { 0 }
    }
}
