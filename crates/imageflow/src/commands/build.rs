use super::{EXIT_MANIFEST_INVALID, print_manifest_problems, resolve_manifest};
use crate::BuildArgs;
use crate::summary;
use colored::Colorize;
use imageflow_build::{
    BuildEngine, BuildLogs, BuildxBackend, CancelToken, OciRegistryClient, Orchestrator,
    PushCoordinator, RegistryAuthManager, RetryPolicy, RunProgress,
};
use imageflow_config::{Settings, SettingsOverride};
use imageflow_core::{Manifest, ManifestSettings};
use std::sync::Arc;
use std::time::Duration;

/// build コマンドを処理（戻り値は終了コード）
pub async fn handle(args: BuildArgs) -> anyhow::Result<i32> {
    let path = resolve_manifest(args.manifest.as_deref())?;

    let mut manifest = match imageflow_core::load(&path, args.push) {
        Ok(manifest) => manifest,
        Err(e) => {
            print_manifest_problems(&path, &e);
            return Ok(EXIT_MANIFEST_INVALID);
        }
    };

    let unknown: Vec<&String> = args
        .targets
        .iter()
        .filter(|name| manifest.target(name).is_none())
        .collect();
    if !unknown.is_empty() {
        for name in unknown {
            eprintln!("{} 不明なターゲット: {}", "✗".red().bold(), name);
        }
        return Ok(EXIT_MANIFEST_INVALID);
    }
    manifest.retain_targets(&args.targets);

    let settings = resolve_settings(&manifest, &args)?;
    let out_dir = settings.resolve_out_dir(&manifest.root);
    tracing::debug!(?settings, out_dir = %out_dir.display(), "Resolved settings");

    eprintln!(
        "{} {} ({} ターゲット, {})",
        "→".blue(),
        manifest.project.cyan().bold(),
        manifest.targets.len(),
        if args.push {
            format!("{} レジストリへプッシュ", manifest.registries.len())
        } else {
            "ビルドのみ".to_string()
        }
    );

    let orchestrator = assemble(&settings, &args, out_dir.clone(), manifest.targets.len())?;

    // Ctrl-C で実行中のビルドとプッシュを止める
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "⚠ 中断しています...".yellow());
            cancel.cancel();
        }
    });

    let report = orchestrator.run(&manifest, args.push).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    summary::print(&report, &out_dir);

    Ok(report.exit_code())
}

/// defaults < user settings < manifest settings < CLI
fn resolve_settings(manifest: &Manifest, args: &BuildArgs) -> anyhow::Result<Settings> {
    let out_dir = match &args.out {
        Some(dir) if dir.is_relative() => Some(std::env::current_dir()?.join(dir)),
        other => other.clone(),
    };
    let cli = SettingsOverride {
        max_parallel_builds: args.parallel,
        max_parallel_pushes: args.push_parallel,
        max_attempts: args.max_attempts,
        out_dir,
        cache: args.no_cache.then_some(false),
    };

    let mut settings = Settings::load_user()?
        .apply(&manifest_override(&manifest.settings))?
        .apply(&cli)?;
    if let Some(docker) = &args.docker {
        settings.docker_bin = docker.clone();
    }
    Ok(settings)
}

fn manifest_override(settings: &ManifestSettings) -> SettingsOverride {
    SettingsOverride {
        max_parallel_builds: settings.max_parallel_builds,
        max_parallel_pushes: settings.max_parallel_pushes,
        max_attempts: settings.max_attempts,
        ..Default::default()
    }
}

fn assemble(
    settings: &Settings,
    args: &BuildArgs,
    out_dir: std::path::PathBuf,
    total_targets: usize,
) -> anyhow::Result<Orchestrator> {
    let backend = Arc::new(BuildxBackend::new(settings.docker_bin.clone()));
    let engine = BuildEngine::new(backend, out_dir.clone())
        .with_max_parallel_builds(settings.max_parallel_builds)
        .with_cache(settings.cache)
        .with_no_cache(args.no_cache);

    let client = OciRegistryClient::new(Duration::from_secs(settings.request_timeout_secs))?;
    let auth = Arc::new(RegistryAuthManager::new(Arc::new(client)));
    let policy = RetryPolicy {
        max_attempts: settings.max_attempts,
        initial_delay: Duration::from_millis(settings.initial_backoff_ms),
        max_delay: Duration::from_millis(settings.max_backoff_ms),
        backoff_multiplier: settings.backoff_multiplier,
    };
    let pusher = PushCoordinator::new(auth, policy, settings.max_parallel_pushes);

    Ok(
        Orchestrator::new(Arc::new(engine), Arc::new(pusher), CancelToken::new())
            .with_logs(BuildLogs::Directory(out_dir.join("logs")))
            .with_progress(RunProgress::new(total_targets)),
    )
}
