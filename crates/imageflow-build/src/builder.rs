use crate::artifact::{ArchImage, Artifact};
use crate::backend::{ArchBuildRequest, BuildBackend};
use crate::cancel::CancelToken;
use crate::context::{ContextBuilder, ContextInput};
use crate::error::{BuildError, BuildResult};
use crate::log::LogSink;
use crate::oci::{self, Descriptor, OciLayout};
use futures_util::future::join_all;
use imageflow_core::{Arch, Digest, Target};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// アーキテクチャ別ビルドのキャッシュ記録
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CacheRecord {
    context_digest: Digest,
    manifest: Descriptor,
}

/// ターゲットを全アーキテクチャ分ビルドして Artifact にまとめる
///
/// バックエンドの同時実行数はターゲットをまたいで `permits` で制限する。
pub struct BuildEngine {
    backend: Arc<dyn BuildBackend>,
    out_dir: PathBuf,
    cache: bool,
    no_cache: bool,
    permits: Arc<Semaphore>,
}

impl BuildEngine {
    pub fn new(backend: Arc<dyn BuildBackend>, out_dir: impl Into<PathBuf>) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            backend,
            out_dir: out_dir.into(),
            cache: true,
            no_cache: false,
            permits: Arc::new(Semaphore::new(parallelism)),
        }
    }

    /// 同時に実行するバックエンドビルド（ターゲット×アーキテクチャ）の上限
    pub fn with_max_parallel_builds(mut self, max_parallel_builds: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_parallel_builds.max(1)));
        self
    }

    /// context digest が一致する既存のビルド結果を再利用するか
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// バックエンドのレイヤーキャッシュも使わない（`--no-cache`）
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// ターゲットをビルド
    ///
    /// 全アーキテクチャが成功した場合のみ Artifact を返す。
    /// いずれかが失敗すると `BuildFailed`、キャンセル時は `Cancelled`。
    #[tracing::instrument(skip_all, fields(target = %target.name))]
    pub async fn build(
        &self,
        target: &Target,
        sink: &dyn LogSink,
        cancel: &CancelToken,
    ) -> BuildResult<Artifact> {
        self.build_inner(target, sink, cancel)
            .await
            .map_err(|e| match e {
                BuildError::Cancelled | BuildError::BuildFailed { .. } => e,
                other => BuildError::BuildFailed {
                    target: target.name.clone(),
                    backend_error: other.to_string(),
                },
            })
    }

    async fn build_inner(
        &self,
        target: &Target,
        sink: &dyn LogSink,
        cancel: &CancelToken,
    ) -> BuildResult<Artifact> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        if !target.context.is_dir() {
            return Err(BuildError::ContextNotFound(target.context.clone()));
        }
        let dockerfile = target.dockerfile_path();
        if !dockerfile.is_file() {
            return Err(BuildError::DockerfileNotFound(dockerfile));
        }

        let context_digest = self.context_digest(target, &dockerfile).await?;
        sink.write_line("engine", &format!("context digest {}", context_digest));
        tracing::info!("Building {} for {} platform(s)", target.name, target.platforms.len());

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let target_dir = self.out_dir.join(&target.name);
        let builds = target.platforms.iter().map(|arch| {
            let request = ArchBuildRequest {
                target: target.name.clone(),
                arch: arch.clone(),
                context: target.context.clone(),
                dockerfile: dockerfile.clone(),
                build_args: target.build_args.clone(),
                stage: target.stage.clone(),
                context_digest: context_digest.clone(),
                no_cache: self.no_cache,
                output_dir: target_dir.join(arch.slug()),
            };
            async move { self.build_arch(request, sink, cancel).await }
        });

        let mut images = Vec::with_capacity(target.platforms.len());
        let mut cancelled = false;
        for result in join_all(builds).await {
            match result {
                Ok(image) => images.push(image),
                Err(BuildError::Cancelled) => cancelled = true,
                Err(e) => {
                    return Err(BuildError::BuildFailed {
                        target: target.name.clone(),
                        backend_error: e.to_string(),
                    });
                }
            }
        }

        if cancelled || cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let pairs: Vec<(&Arch, &Descriptor)> =
            images.iter().map(|i| (&i.arch, &i.manifest)).collect();
        let (index, index_digest) = oci::assemble_index(&pairs)?;
        tokio::fs::create_dir_all(&target_dir).await?;
        tokio::fs::write(target_dir.join("index.json"), &index).await?;

        tracing::info!("Built {} -> {}", target.name, index_digest);
        sink.write_line("engine", &format!("index digest {}", index_digest));

        Ok(Artifact {
            target: target.name.clone(),
            context_digest,
            images,
            index,
            index_digest,
            tags: target.effective_tags(),
        })
    }

    async fn context_digest(&self, target: &Target, dockerfile: &Path) -> BuildResult<Digest> {
        let context = target.context.clone();
        let dockerfile = dockerfile.to_path_buf();
        let build_args = target.build_args.clone();
        let stage = target.stage.clone();
        let exclude = vec![self.out_dir.clone()];

        tokio::task::spawn_blocking(move || {
            ContextBuilder::context_digest(&ContextInput {
                context: &context,
                dockerfile: &dockerfile,
                build_args: &build_args,
                stage: stage.as_deref(),
                exclude: &exclude,
            })
        })
        .await
        .map_err(|e| BuildError::Backend(format!("context digest task failed: {}", e)))?
    }

    async fn build_arch(
        &self,
        request: ArchBuildRequest,
        sink: &dyn LogSink,
        cancel: &CancelToken,
    ) -> BuildResult<ArchImage> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let record_path = self.record_path(&request);
        if self.cache
            && !self.no_cache
            && let Some(image) = self.cached(&request, &record_path).await
        {
            tracing::info!("Cache hit for {}/{}", request.target, request.arch);
            sink.write_line(request.arch.as_str(), "cache hit, skipping build");
            return Ok(image);
        }

        // キャッシュヒットは permit を消費しない
        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(|_| BuildError::Cancelled)?,
            _ = cancel.cancelled() => return Err(BuildError::Cancelled),
        };
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let image = self.backend.build_arch(&request, sink).await?;

        let record = CacheRecord {
            context_digest: request.context_digest.clone(),
            manifest: image.manifest.clone(),
        };
        if let Err(e) = tokio::fs::write(&record_path, serde_json::to_vec_pretty(&record)?).await {
            tracing::warn!("Failed to write build cache {}: {}", record_path.display(), e);
        }

        Ok(image)
    }

    fn record_path(&self, request: &ArchBuildRequest) -> PathBuf {
        self.out_dir
            .join(&request.target)
            .join(format!("{}.build.json", request.arch.slug()))
    }

    async fn cached(&self, request: &ArchBuildRequest, record_path: &Path) -> Option<ArchImage> {
        let bytes = tokio::fs::read(record_path).await.ok()?;
        let record: CacheRecord = serde_json::from_slice(&bytes).ok()?;
        if record.context_digest != request.context_digest {
            return None;
        }

        let layout = OciLayout::open(&request.output_dir);
        let manifest = layout.image_manifest().await.ok()?;
        if manifest.digest != record.manifest.digest {
            return None;
        }

        Some(ArchImage {
            arch: request.arch.clone(),
            manifest,
            layout: request.output_dir.clone(),
        })
    }
}
