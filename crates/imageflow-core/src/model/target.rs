//! ビルドターゲット

use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// buildx がサポートする linux アーキテクチャ
const KNOWN_ARCHS: &[&str] = &[
    "amd64", "arm64", "386", "arm/v6", "arm/v7", "ppc64le", "s390x", "riscv64",
];

/// タグ未指定時に付与するタグ
pub const DEFAULT_TAG: &str = "latest";

/// ビルドするイメージ1つ分の定義
///
/// カタログのロード時に生成され、以降は変更されない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// ターゲット名（マニフェスト内で一意）
    pub name: String,

    /// ビルドコンテキスト（マニフェストのディレクトリで解決済み）
    pub context: PathBuf,

    /// Dockerfile（未指定時は context/Dockerfile）
    pub dockerfile: Option<PathBuf>,

    /// ビルドするアーキテクチャ
    pub platforms: Vec<Arch>,

    /// プッシュ時に付与するタグ
    pub tags: Vec<String>,

    /// `--build-arg`
    pub build_args: BTreeMap<String, String>,

    /// マルチステージビルドのターゲットステージ
    pub stage: Option<String>,
}

impl Target {
    /// 実際に使用する Dockerfile のパス
    pub fn dockerfile_path(&self) -> PathBuf {
        self.dockerfile
            .clone()
            .unwrap_or_else(|| self.context.join("Dockerfile"))
    }

    /// 付与するタグ（空なら latest）
    pub fn effective_tags(&self) -> Vec<String> {
        if self.tags.is_empty() {
            vec![DEFAULT_TAG.to_string()]
        } else {
            self.tags.clone()
        }
    }
}

/// アーキテクチャタグ（例: `amd64`, `arm/v7`）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Arch(String);

impl Arch {
    /// `amd64` / `linux/amd64` のどちらも受け付ける
    pub fn parse(value: &str) -> Result<Self> {
        let arch = value.strip_prefix("linux/").unwrap_or(value);
        if KNOWN_ARCHS.contains(&arch) {
            Ok(Self(arch.to_string()))
        } else {
            Err(CatalogError::InvalidArch(value.to_string()))
        }
    }

    /// buildx の `--platform` 値
    pub fn platform(&self) -> String {
        format!("linux/{}", self.0)
    }

    /// ファイル名に使える形 (`arm/v7` -> `arm-v7`)
    pub fn slug(&self) -> String {
        self.0.replace('/', "-")
    }

    /// OCI platform の architecture / variant
    pub fn oci_parts(&self) -> (&str, Option<&str>) {
        match self.0.split_once('/') {
            Some((arch, variant)) => (arch, Some(variant)),
            None => (self.0.as_str(), None),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Arch {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Arch> for String {
    fn from(arch: Arch) -> Self {
        arch.0
    }
}

/// `discover` ノード: glob にマッチした Dockerfile 付きディレクトリをターゲット化する
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRule {
    /// マニフェストのディレクトリからの相対 glob
    pub pattern: String,

    /// 発見したターゲットに設定するアーキテクチャ
    pub platforms: Vec<Arch>,

    /// 発見したターゲットに設定するタグ
    pub tags: Vec<String>,
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(CatalogError::InvalidTag("(empty)".to_string()));
    }

    if tag.len() > 128 {
        return Err(CatalogError::InvalidTag(format!(
            "Tag too long ({} characters, max 128)",
            tag.len()
        )));
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(CatalogError::InvalidTag(tag.to_string()));
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(CatalogError::InvalidTag(format!(
            "Invalid character '{}' in tag: {}",
            c, tag
        )));
    }

    Ok(())
}

/// ターゲット名のバリデーション
///
/// ターゲット名は出力ディレクトリ名とリポジトリ名の一部になるため、
/// OCI のパスコンポーネント規則 `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*` に従う。
pub fn validate_target_name(name: &str) -> Result<()> {
    let invalid = || CatalogError::InvalidName(name.to_string());
    if name.is_empty() || name.len() > 128 {
        return Err(invalid());
    }

    let mut separator = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            let allowed = separator.is_empty()
                || separator == "."
                || separator == "_"
                || separator == "__"
                || separator.chars().all(|s| s == '-');
            if !allowed {
                return Err(invalid());
            }
            separator.clear();
        } else if matches!(c, '.' | '_' | '-') && i > 0 {
            separator.push(c);
        } else {
            return Err(invalid());
        }
    }

    if separator.is_empty() {
        Ok(())
    } else {
        Err(invalid())
    }
}
