//! 実行設定
//!
//! 優先順位（後勝ち）:
//! 1. 組み込みのデフォルト
//! 2. ユーザー設定 (~/.config/imageflow/settings.yaml または IMAGEFLOW_SETTINGS)
//! 3. マニフェストの settings ブロック
//! 4. CLI フラグ / 環境変数

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 設定ファイルのパスを直接指定する環境変数
pub const SETTINGS_ENV: &str = "IMAGEFLOW_SETTINGS";

const SETTINGS_FILE: &str = "settings.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// 同時に実行するターゲットビルド数
    pub max_parallel_builds: usize,

    /// 同時に実行するプッシュ数（全ターゲット合計）
    pub max_parallel_pushes: usize,

    /// プッシュの最大試行回数（初回を含む）
    pub max_attempts: u32,

    /// リトライ待機の初期値
    pub initial_backoff_ms: u64,

    /// リトライ待機の上限
    pub max_backoff_ms: u64,

    /// リトライ待機の倍率
    pub backoff_multiplier: f64,

    /// ビルド成果物とログの出力先（相対パスはマニフェストのディレクトリ基準）
    pub out_dir: PathBuf,

    /// context digest が一致する成果物を再利用する
    pub cache: bool,

    /// ビルドに使う docker CLI
    pub docker_bin: String,

    /// Registry API のリクエストタイムアウト
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_parallel_builds: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_parallel_pushes: 4,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            out_dir: PathBuf::from(".imageflow"),
            cache: true,
            docker_bin: "docker".to_string(),
            request_timeout_secs: 300,
        }
    }
}

/// 上書き用の値（None は上書きしない）
#[derive(Debug, Clone, Default)]
pub struct SettingsOverride {
    pub max_parallel_builds: Option<usize>,
    pub max_parallel_pushes: Option<usize>,
    pub max_attempts: Option<u32>,
    pub out_dir: Option<PathBuf>,
    pub cache: Option<bool>,
}

impl Settings {
    /// YAML ファイルから読み込み（存在しないキーはデフォルト）
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// ユーザー設定を読み込む
    ///
    /// IMAGEFLOW_SETTINGS が指定されていればそのファイルを必須として読む。
    /// それ以外は ~/.config/imageflow/settings.yaml があれば読み、なければデフォルト。
    pub fn load_user() -> Result<Self> {
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            tracing::debug!("Loading settings from {}", path);
            return Self::from_file(Path::new(&path));
        }

        if let Ok(config_dir) = crate::get_config_dir() {
            let path = config_dir.join(SETTINGS_FILE);
            if path.is_file() {
                tracing::debug!("Loading settings from {}", path.display());
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// 上書きを適用する
    pub fn apply(mut self, overrides: &SettingsOverride) -> Result<Self> {
        if let Some(n) = overrides.max_parallel_builds {
            self.max_parallel_builds = n;
        }
        if let Some(n) = overrides.max_parallel_pushes {
            self.max_parallel_pushes = n;
        }
        if let Some(n) = overrides.max_attempts {
            self.max_attempts = n;
        }
        if let Some(dir) = &overrides.out_dir {
            self.out_dir = dir.clone();
        }
        if let Some(cache) = overrides.cache {
            self.cache = cache;
        }
        self.validate()?;
        Ok(self)
    }

    /// 出力ディレクトリを基準ディレクトリで解決
    pub fn resolve_out_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.out_dir)
    }

    fn validate(&self) -> Result<()> {
        if self.max_parallel_builds == 0 {
            return Err(ConfigError::InvalidValue(
                "max-parallel-builds must be at least 1".to_string(),
            ));
        }
        if self.max_parallel_pushes == 0 {
            return Err(ConfigError::InvalidValue(
                "max-parallel-pushes must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "max-attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "backoff-multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
