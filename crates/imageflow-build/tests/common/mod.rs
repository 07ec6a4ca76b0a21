#![allow(dead_code)]

use async_trait::async_trait;
use imageflow_build::oci::{
    Descriptor, ImageIndex, ImageManifest, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST,
};
use imageflow_build::{
    ArchBuildRequest, ArchImage, Artifact, AuthError, BuildBackend, BuildEngine, BuildError,
    BuildResult, CancelToken, Credentials, LogSink, Orchestrator, PushCoordinator, PushError,
    RegistryAuthManager, RegistryClient, RegistrySession, RetryPolicy,
};
use imageflow_core::{Arch, CredentialRef, Digest, Manifest, Registry, Target};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// blobs/sha256 と index.json を持つ最小の OCI レイアウトを書く
pub fn write_layout(root: &Path, seed: &str) -> Descriptor {
    let blobs = root.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs).unwrap();
    let put = |bytes: &[u8]| {
        let digest = Digest::sha256(bytes);
        std::fs::write(blobs.join(digest.hex()), bytes).unwrap();
        digest
    };

    let config = format!("{{\"seed\":\"{}\"}}", seed);
    let layer = format!("layer-{}", seed);
    let manifest = ImageManifest {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_OCI_MANIFEST.to_string()),
        config: Descriptor {
            media_type: "application/vnd.oci.image.config.v1+json".to_string(),
            digest: put(config.as_bytes()),
            size: config.len() as u64,
            platform: None,
        },
        layers: vec![Descriptor {
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
            digest: put(layer.as_bytes()),
            size: layer.len() as u64,
            platform: None,
        }],
    };
    let bytes = serde_json::to_vec(&manifest).unwrap();
    let descriptor = Descriptor {
        media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
        digest: put(&bytes),
        size: bytes.len() as u64,
        platform: None,
    };
    let index = ImageIndex {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_OCI_INDEX.to_string()),
        manifests: vec![descriptor.clone()],
    };
    std::fs::write(root.join("index.json"), serde_json::to_vec(&index).unwrap()).unwrap();
    descriptor
}

/// 決定的なレイアウトを書くバックエンド（同時実行数を記録）
#[derive(Default)]
pub struct MockBackend {
    pub delay: Duration,
    pub fail_targets: HashSet<String>,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl MockBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn failing(target: &str) -> Self {
        Self {
            fail_targets: [target.to_string()].into_iter().collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl BuildBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn build_arch(
        &self,
        request: &ArchBuildRequest,
        sink: &dyn LogSink,
    ) -> BuildResult<ArchImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        sink.write_line(request.arch.as_str(), &format!("building {}", request.target));
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_targets.contains(&request.target) {
            return Err(BuildError::Backend("RUN make: exit code 2".to_string()));
        }

        let seed = format!("{}-{}", request.context_digest, request.arch);
        let manifest = write_layout(&request.output_dir, &seed);
        Ok(ArchImage {
            arch: request.arch.clone(),
            manifest,
            layout: request.output_dir.clone(),
        })
    }
}

/// レジストリごとの振る舞い
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub reject_auth: bool,
    /// リポジトリ -> 残りの一時的失敗回数
    pub transient_failures: HashMap<String, u32>,
    /// 常にこの失敗を返す
    pub always_fail: Option<PushError>,
}

#[derive(Default)]
pub struct RegistryState {
    pub handshakes: AtomicUsize,
    pub transfers: AtomicUsize,
    pub attempts: AtomicUsize,
    pub stored: Mutex<HashSet<(String, Digest)>>,
    pub tags: Mutex<HashMap<String, Vec<String>>>,
    pub behavior: Mutex<Behavior>,
}

/// メモリ上のレジストリ群
#[derive(Default)]
pub struct MockClient {
    registries: Mutex<HashMap<String, Arc<RegistryState>>>,
}

impl MockClient {
    pub fn state(&self, registry_id: &str) -> Arc<RegistryState> {
        self.registries
            .lock()
            .unwrap()
            .entry(registry_id.to_string())
            .or_default()
            .clone()
    }

    pub fn configure(&self, registry_id: &str, behavior: Behavior) {
        *self.state(registry_id).behavior.lock().unwrap() = behavior;
    }

    pub fn total_handshakes(&self) -> usize {
        self.registries
            .lock()
            .unwrap()
            .values()
            .map(|s| s.handshakes.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl RegistryClient for MockClient {
    async fn authenticate(
        &self,
        registry: &Registry,
        _credentials: Option<Credentials>,
    ) -> Result<Arc<dyn RegistrySession>, AuthError> {
        let state = self.state(&registry.id);
        state.handshakes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;

        if state.behavior.lock().unwrap().reject_auth {
            return Err(AuthError::new(&registry.id, "401 Unauthorized: bad token"));
        }
        Ok(Arc::new(MockSession { state }))
    }
}

pub struct MockSession {
    state: Arc<RegistryState>,
}

#[async_trait]
impl RegistrySession for MockSession {
    async fn has_digest(&self, repository: &str, digest: &Digest) -> Result<bool, PushError> {
        Ok(self
            .state
            .stored
            .lock()
            .unwrap()
            .contains(&(repository.to_string(), digest.clone())))
    }

    async fn push(
        &self,
        repository: &str,
        artifact: &Artifact,
        cancel: &CancelToken,
    ) -> Result<Digest, PushError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut behavior = self.state.behavior.lock().unwrap();
            if let Some(error) = &behavior.always_fail {
                return Err(error.clone());
            }
            if let Some(remaining) = behavior.transient_failures.get_mut(repository)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(PushError::transient("503 Service Unavailable"));
            }
        }
        if cancel.is_cancelled() {
            return Err(PushError::cancelled());
        }

        self.state.transfers.fetch_add(1, Ordering::SeqCst);
        self.state
            .stored
            .lock()
            .unwrap()
            .insert((repository.to_string(), artifact.index_digest.clone()));
        self.tag(repository, artifact).await
    }

    async fn tag(&self, repository: &str, artifact: &Artifact) -> Result<Digest, PushError> {
        let mut tags = self.state.tags.lock().unwrap();
        let known = tags.entry(repository.to_string()).or_default();
        for tag in &artifact.tags {
            if !known.contains(tag) {
                known.push(tag.clone());
            }
        }
        Ok(artifact.index_digest.clone())
    }
}

/// テスト用プロジェクト（ターゲットごとに context と Dockerfile を作る）
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn target(&self, name: &str, platforms: &[&str]) -> Target {
        let context = self.root.path().join(name);
        std::fs::create_dir_all(&context).unwrap();
        std::fs::write(context.join("Dockerfile"), format!("FROM alpine\nLABEL name={}\n", name))
            .unwrap();
        std::fs::write(context.join("app.txt"), name).unwrap();
        Target {
            name: name.to_string(),
            context,
            dockerfile: None,
            platforms: platforms.iter().map(|p| Arch::parse(p).unwrap()).collect(),
            tags: vec!["1.0.0".to_string(), "latest".to_string()],
            build_args: BTreeMap::new(),
            stage: None,
        }
    }

    pub fn manifest(&self, targets: &[&str], registries: &[&str]) -> Manifest {
        Manifest {
            project: "demo".to_string(),
            root: self.root.path().to_path_buf(),
            targets: targets
                .iter()
                .map(|t| self.target(t, &["amd64", "arm64"]))
                .collect(),
            registries: registries.iter().map(|r| registry(r)).collect(),
            ..Default::default()
        }
    }

    pub fn out_dir(&self) -> std::path::PathBuf {
        self.root.path().join(".imageflow")
    }
}

pub fn registry(id: &str) -> Registry {
    let mut registry = Registry::new(id, format!("{}.example.com", id)).with_namespace("acme");
    registry.credentials = CredentialRef::Anonymous;
    registry
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

/// 全コンポーネントを組み立てる
pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub client: Arc<MockClient>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(project: &TestProject, backend: MockBackend, max_builds: usize) -> Self {
        Self::with_client(project, backend, Arc::new(MockClient::default()), max_builds)
    }

    pub fn with_client(
        project: &TestProject,
        backend: MockBackend,
        client: Arc<MockClient>,
        max_builds: usize,
    ) -> Self {
        let backend = Arc::new(backend);
        let engine = Arc::new(
            BuildEngine::new(backend.clone(), project.out_dir()).with_max_parallel_builds(max_builds),
        );
        let auth = Arc::new(RegistryAuthManager::new(client.clone()));
        let pusher = Arc::new(PushCoordinator::new(auth, fast_retry(), 4));
        let orchestrator = Orchestrator::new(engine, pusher, CancelToken::new());
        Self {
            backend,
            client,
            orchestrator,
        }
    }
}
