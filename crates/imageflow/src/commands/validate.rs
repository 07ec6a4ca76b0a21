use super::{EXIT_MANIFEST_INVALID, print_manifest_problems, resolve_manifest};
use colored::Colorize;
use std::path::Path;

pub fn handle(manifest: Option<&Path>, push: bool) -> anyhow::Result<i32> {
    let path = resolve_manifest(manifest)?;

    let manifest = match imageflow_core::load(&path, push) {
        Ok(manifest) => manifest,
        Err(e) => {
            print_manifest_problems(&path, &e);
            return Ok(EXIT_MANIFEST_INVALID);
        }
    };

    println!("{} {}", "✓ マニフェストは有効です:".green().bold(), path.display());
    println!("  プロジェクト: {}", manifest.project.cyan());
    println!("  ターゲット:");
    for target in &manifest.targets {
        let platforms: Vec<&str> = target.platforms.iter().map(|a| a.as_str()).collect();
        println!(
            "    • {} [{}] tags: {}",
            target.name.cyan(),
            platforms.join(", "),
            target.effective_tags().join(", ")
        );
    }
    if !manifest.registries.is_empty() {
        println!("  レジストリ:");
        for registry in &manifest.registries {
            println!("    • {} ({})", registry.id.cyan(), registry.host);
        }
    }
    Ok(0)
}
