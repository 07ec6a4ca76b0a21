//! 実行結果のサマリー表示 (stderr)

use colored::Colorize;
use imageflow_build::{BuildOutcome, PushResult, Report};
use std::path::Path;

pub fn print(report: &Report, out_dir: &Path) {
    eprintln!();
    for (name, target) in &report.targets {
        match &target.build {
            BuildOutcome::Succeeded { index_digest, .. } => {
                eprintln!("{} {} {}", "✓".green(), name.bold(), index_digest.as_str().dimmed());
            }
            BuildOutcome::Failed { kind, message } => {
                eprintln!("{} {} [{}]", "✗".red(), name.bold(), kind);
                eprintln!("    {}", first_line(message).red());
            }
        }

        for (registry, push) in &target.pushes {
            match push {
                PushResult::Pushed {
                    retry_count,
                    already_present,
                    ..
                } => {
                    let mut note = String::new();
                    if *already_present {
                        note.push_str(" (変更なし)");
                    }
                    if *retry_count > 0 {
                        note.push_str(&format!(" (リトライ {} 回)", retry_count));
                    }
                    eprintln!("    {} {}{}", "↑".green(), registry, note.dimmed());
                }
                PushResult::Failed { kind, message, .. } => {
                    eprintln!("    {} {} [{}] {}", "✗".red(), registry, kind, first_line(message));
                }
            }
        }
    }

    eprintln!();
    let failures = report.failures();
    if failures.is_empty() {
        eprintln!("{}", "✓ すべて完了しました".green().bold());
    } else {
        eprintln!(
            "{}",
            format!("✗ {} 件の失敗があります", failures.len()).red().bold()
        );
        eprintln!(
            "  ビルドログ: {}",
            out_dir.join("logs").display().to_string().cyan()
        );
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message)
}
