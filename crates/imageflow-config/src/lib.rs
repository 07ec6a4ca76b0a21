pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{SETTINGS_ENV, Settings, SettingsOverride};

use std::path::PathBuf;

/// マニフェストのパスを直接指定する環境変数
pub const MANIFEST_ENV: &str = "IMAGEFLOW_MANIFEST";

/// imageflow の設定ディレクトリ (~/.config/imageflow) を取得
pub fn get_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("imageflow"))
        .ok_or(ConfigError::ConfigDirNotFound)
}

/// マニフェストファイル (images.kdl) を探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 IMAGEFLOW_MANIFEST (直接パス指定)
/// 2. カレントディレクトリ: images.kdl, .images.kdl
/// 3. ./.imageflow/ ディレクトリ内: images.kdl
pub fn find_manifest_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(manifest_path) = std::env::var(MANIFEST_ENV) {
        let path = PathBuf::from(manifest_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(
            "{} points to a missing file: {}",
            MANIFEST_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in ["images.kdl", ".images.kdl"] {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.imageflow/ ディレクトリで検索
    let path = current_dir.join(".imageflow").join("images.kdl");
    if path.exists() {
        return Ok(path);
    }

    Err(ConfigError::ManifestNotFound)
}
