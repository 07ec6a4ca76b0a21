use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// マニフェストの検証エラー（検出した問題をすべて保持する）
    #[error("manifest invalid: {path}\n{}", format_problems(.problems))]
    ManifestInvalid {
        path: PathBuf,
        problems: Vec<String>,
    },

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid architecture: {0}")]
    InvalidArch(String),

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("invalid target name '{0}': use lowercase letters, digits and single separators (. _ -)")]
    InvalidName(String),
}

impl CatalogError {
    /// 検出された問題の一覧（ManifestInvalid 以外は1件）
    pub fn problems(&self) -> Vec<String> {
        match self {
            CatalogError::ManifestInvalid { problems, .. } => problems.clone(),
            other => vec![other.to_string()],
        }
    }
}

fn format_problems(problems: &[String]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {}", p))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, CatalogError>;
