pub mod build;
pub mod validate;

use colored::Colorize;
use imageflow_core::CatalogError;
use std::path::{Path, PathBuf};

/// マニフェストが不正なときの終了コード
pub const EXIT_MANIFEST_INVALID: i32 = 2;

/// マニフェストのパスを決定（未指定なら探索）
pub fn resolve_manifest(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => imageflow_config::find_manifest_file().map_err(|e| {
            anyhow::anyhow!(
                "{}\nヒント: --manifest で指定するか、images.kdl を作成してください",
                e
            )
        }),
    }
}

/// マニフェストの問題をすべて表示
pub fn print_manifest_problems(path: &Path, error: &CatalogError) {
    eprintln!(
        "{} {}",
        "✗ マニフェストが不正です:".red().bold(),
        path.display()
    );
    for problem in error.problems() {
        eprintln!("  {} {}", "-".red(), problem);
    }
}
