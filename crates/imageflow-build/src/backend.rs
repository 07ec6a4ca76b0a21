//! アーキテクチャ単位のビルドを実行するバックエンド

use crate::artifact::ArchImage;
use crate::error::{BuildError, BuildResult};
use crate::log::LogSink;
use crate::oci::OciLayout;
use async_trait::async_trait;
use imageflow_core::{Arch, Digest};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// 1アーキテクチャ分のビルド要求
#[derive(Debug, Clone)]
pub struct ArchBuildRequest {
    pub target: String,
    pub arch: Arch,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub build_args: BTreeMap<String, String>,
    pub stage: Option<String>,
    pub context_digest: Digest,
    pub no_cache: bool,
    /// OCI レイアウトの出力先
    pub output_dir: PathBuf,
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    fn name(&self) -> &str;

    /// `request.output_dir` に OCI レイアウトを書き出し、そのイメージを返す
    async fn build_arch(
        &self,
        request: &ArchBuildRequest,
        sink: &dyn LogSink,
    ) -> BuildResult<ArchImage>;
}

/// `docker buildx build` を使うバックエンド
#[derive(Debug, Clone)]
pub struct BuildxBackend {
    docker_bin: String,
}

impl Default for BuildxBackend {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl BuildxBackend {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    fn command(&self, request: &ArchBuildRequest) -> Command {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.arg("buildx").arg("build");
        cmd.arg("--platform").arg(request.arch.platform());
        cmd.arg("-f").arg(&request.dockerfile);
        cmd.arg("--output").arg(format!(
            "type=oci,dest={},tar=false,rewrite-timestamp=true",
            request.output_dir.display()
        ));
        // attestation manifest を index に混ぜない
        cmd.arg("--provenance=false");

        for (key, value) in &request.build_args {
            cmd.arg("--build-arg").arg(format!("{}={}", key, value));
        }

        if let Some(stage) = &request.stage {
            cmd.arg("--target").arg(stage);
        }

        if request.no_cache {
            cmd.arg("--no-cache");
        }

        cmd.arg(&request.context);

        // タイムスタンプを固定して再現可能なレイヤーにする
        cmd.env("SOURCE_DATE_EPOCH", "0");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl BuildBackend for BuildxBackend {
    fn name(&self) -> &str {
        "buildx"
    }

    #[tracing::instrument(skip(self, request, sink), fields(target = %request.target, arch = %request.arch))]
    async fn build_arch(
        &self,
        request: &ArchBuildRequest,
        sink: &dyn LogSink,
    ) -> BuildResult<ArchImage> {
        if request.output_dir.exists() {
            tokio::fs::remove_dir_all(&request.output_dir).await?;
        }
        if let Some(parent) = request.output_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = self.command(request).spawn().map_err(|e| {
            BuildError::Backend(format!("failed to run '{} buildx': {}", self.docker_bin, e))
        })?;

        let source = request.arch.to_string();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, last_stderr) = tokio::join!(
            forward_lines(stdout, &source, sink),
            forward_lines(stderr, &source, sink),
        );

        let status = child.wait().await?;
        if !status.success() {
            let detail = last_stderr.unwrap_or_else(|| "no output".to_string());
            return Err(BuildError::Backend(format!(
                "buildx exited with {}: {}",
                status, detail
            )));
        }

        let layout = OciLayout::open(&request.output_dir);
        let manifest = layout.image_manifest().await?;
        tracing::debug!("Built {} -> {}", request.arch, manifest.digest);

        Ok(ArchImage {
            arch: request.arch.clone(),
            manifest,
            layout: request.output_dir.clone(),
        })
    }
}

/// 子プロセスの出力を1行ずつ sink に流し、最後の空でない行を返す
async fn forward_lines<R: AsyncRead + Unpin>(
    reader: Option<R>,
    source: &str,
    sink: &dyn LogSink,
) -> Option<String> {
    let mut lines = BufReader::new(reader?).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            last = Some(line.clone());
        }
        sink.write_line(source, &line);
    }
    last
}
