//! マニフェストのデータモデル

mod digest;
mod registry;
mod target;

pub use digest::Digest;
pub use registry::{CredentialRef, Registry, default_env_vars};
pub use target::{Arch, DEFAULT_TAG, DiscoveryRule, Target, validate_tag, validate_target_name};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 1回の実行で扱うターゲットとプッシュ先の集合
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// プロジェクト名
    pub project: String,

    /// マニフェストファイルのあるディレクトリ（相対パスの基準）
    pub root: PathBuf,

    /// ビルドターゲット（宣言順）
    pub targets: Vec<Target>,

    /// プッシュ先レジストリ（宣言順）
    pub registries: Vec<Registry>,

    /// ターゲット自動発見ルール
    pub discover: Vec<DiscoveryRule>,

    /// マニフェスト側の実行設定
    pub settings: ManifestSettings,
}

impl Manifest {
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// 指定した名前のターゲットだけに絞り込む
    pub fn retain_targets(&mut self, names: &[String]) {
        if !names.is_empty() {
            self.targets.retain(|t| names.contains(&t.name));
        }
    }
}

/// `settings { ... }` ブロック
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSettings {
    pub max_parallel_builds: Option<usize>,
    pub max_parallel_pushes: Option<usize>,
    pub max_attempts: Option<u32>,
}
