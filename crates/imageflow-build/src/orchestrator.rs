//! ビルドとプッシュの実行全体を駆動する

use crate::builder::BuildEngine;
use crate::cancel::CancelToken;
use crate::log::{FileLogSink, LogSink, NullLogSink};
use crate::progress::RunProgress;
use crate::pusher::PushCoordinator;
use crate::report::{BuildOutcome, ErrorKind, Report, RunMode, TargetReport};
use chrono::Utc;
use imageflow_core::{Manifest, Registry, Target};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// ビルドログの出力先
#[derive(Debug, Clone)]
pub enum BuildLogs {
    /// `<dir>/<target>.log` に書く
    Directory(PathBuf),
    Discard,
}

pub struct Orchestrator {
    engine: Arc<BuildEngine>,
    pusher: Arc<PushCoordinator>,
    logs: BuildLogs,
    progress: RunProgress,
    cancel: CancelToken,
}

impl Orchestrator {
    /// ビルドの同時実行数は `engine`、プッシュの同時実行数は `pusher` が制限する
    pub fn new(engine: Arc<BuildEngine>, pusher: Arc<PushCoordinator>, cancel: CancelToken) -> Self {
        Self {
            engine,
            pusher,
            logs: BuildLogs::Discard,
            progress: RunProgress::hidden(),
            cancel,
        }
    }

    pub fn with_logs(mut self, logs: BuildLogs) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_progress(mut self, progress: RunProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// 全ターゲットをビルドし、`push` なら全レジストリへプッシュする
    ///
    /// 1ターゲットの失敗は他のターゲットに影響しない。
    #[tracing::instrument(skip_all, fields(project = %manifest.project, push = push))]
    pub async fn run(&self, manifest: &Manifest, push: bool) -> Report {
        let started_at = Utc::now();
        let registries: Arc<Vec<Registry>> = Arc::new(if push {
            manifest.registries.clone()
        } else {
            Vec::new()
        });

        tracing::info!(
            "Starting run: {} target(s), {} registries",
            manifest.targets.len(),
            registries.len()
        );

        let mut handles = Vec::new();
        for target in &manifest.targets {
            let task = TargetTask {
                target: target.clone(),
                engine: self.engine.clone(),
                pusher: self.pusher.clone(),
                registries: registries.clone(),
                sink: self.sink_for(&target.name),
                progress: self.progress.clone(),
                cancel: self.cancel.clone(),
            };
            handles.push((target.name.clone(), tokio::spawn(task.run())));
        }

        let mut targets = BTreeMap::new();
        for (name, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!("Task for {} aborted: {}", name, e);
                    TargetReport {
                        build: BuildOutcome::Failed {
                            kind: ErrorKind::BuildFailed,
                            message: format!("task aborted: {}", e),
                        },
                        pushes: BTreeMap::new(),
                    }
                }
            };
            targets.insert(name, report);
        }
        self.progress.finish();

        let report = Report {
            project: manifest.project.clone(),
            mode: if push { RunMode::Push } else { RunMode::BuildOnly },
            started_at,
            finished_at: Utc::now(),
            targets,
        };
        tracing::info!(
            "Run finished: {} failure(s)",
            report.failures().len()
        );
        report
    }

    fn sink_for(&self, target: &str) -> Arc<dyn LogSink> {
        match &self.logs {
            BuildLogs::Discard => Arc::new(NullLogSink),
            BuildLogs::Directory(dir) => {
                let path = dir.join(format!("{}.log", target));
                match FileLogSink::create(&path) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        tracing::warn!("Cannot open build log {}: {}", path.display(), e);
                        Arc::new(NullLogSink)
                    }
                }
            }
        }
    }
}

/// 1ターゲット分のタスク
struct TargetTask {
    target: Target,
    engine: Arc<BuildEngine>,
    pusher: Arc<PushCoordinator>,
    registries: Arc<Vec<Registry>>,
    sink: Arc<dyn LogSink>,
    progress: RunProgress,
    cancel: CancelToken,
}

impl TargetTask {
    async fn run(self) -> TargetReport {
        let name = self.target.name.clone();
        self.progress.target_started(&name);
        let build = self
            .engine
            .build(&self.target, &*self.sink, &self.cancel)
            .await;

        let report = match build {
            Ok(artifact) => {
                let outcome = BuildOutcome::Succeeded {
                    context_digest: artifact.context_digest.clone(),
                    index_digest: artifact.index_digest.clone(),
                    arch_digests: artifact.arch_digests(),
                };
                let pushes = if self.registries.is_empty() {
                    BTreeMap::new()
                } else {
                    self.progress.target_pushing(&name);
                    self.pusher
                        .push(artifact, &self.registries, &self.cancel)
                        .await
                };
                TargetReport {
                    build: outcome,
                    pushes,
                }
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.sink.write_line("engine", &e.to_string());
                TargetReport {
                    build: BuildOutcome::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                    pushes: BTreeMap::new(),
                }
            }
        };

        let ok = report.build.is_success() && report.pushes.values().all(|p| p.is_success());
        self.progress.target_finished(&name, ok);
        report
    }
}
