//! イメージプッシュ処理
//!
//! ビルド済みの Artifact を全レジストリへ並列に転送します。

use crate::artifact::Artifact;
use crate::auth::RegistryAuthManager;
use crate::cancel::CancelToken;
use crate::client::RegistrySession;
use crate::error::PushError;
use crate::report::{ErrorKind, PushResult};
use futures_util::future::join_all;
use imageflow_core::{Digest, Registry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// 一時的な失敗に対するリトライ設定
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大試行回数（初回を含む）
    pub max_attempts: u32,

    /// 初回リトライまでの待機時間
    pub initial_delay: Duration,

    /// 待機時間の上限
    pub max_delay: Duration,

    /// バックオフ倍率
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 指定回数目の待機時間を計算
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(delay as u64).min(self.max_delay)
    }
}

enum Transfer {
    Pushed(Digest),
    AlreadyPresent(Digest),
}

/// Artifact を各レジストリへプッシュする
pub struct PushCoordinator {
    auth: Arc<RegistryAuthManager>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl PushCoordinator {
    /// `max_parallel_pushes` で同時に転送する (ターゲット, レジストリ) の数を制限
    pub fn new(auth: Arc<RegistryAuthManager>, policy: RetryPolicy, max_parallel_pushes: usize) -> Self {
        Self {
            auth,
            policy,
            permits: Arc::new(Semaphore::new(max_parallel_pushes.max(1))),
        }
    }

    /// Artifact を全レジストリへプッシュ
    ///
    /// レジストリごとの結果を独立に返す。1つの失敗は他に影響しない。
    #[tracing::instrument(skip_all, fields(target = %artifact.target))]
    pub async fn push(
        &self,
        artifact: Artifact,
        registries: &[Registry],
        cancel: &CancelToken,
    ) -> BTreeMap<String, PushResult> {
        let artifact = Arc::new(artifact);
        let pushes = registries.iter().map(|registry| {
            let artifact = artifact.clone();
            async move {
                let result = self.push_one(&artifact, registry, cancel).await;
                (registry.id.clone(), result)
            }
        });
        join_all(pushes).await.into_iter().collect()
    }

    async fn push_one(
        &self,
        artifact: &Artifact,
        registry: &Registry,
        cancel: &CancelToken,
    ) -> PushResult {
        let _permit = tokio::select! {
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return cancelled(0),
            },
            _ = cancel.cancelled() => return cancelled(0),
        };

        if cancel.is_cancelled() {
            return cancelled(0);
        }

        let session = match self.auth.session_for(registry).await {
            Ok(session) => session,
            Err(e) => {
                return PushResult::Failed {
                    kind: ErrorKind::AuthFailed,
                    message: e.to_string(),
                    retry_count: 0,
                };
            }
        };

        let repository = registry.repository(&artifact.target);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return cancelled(attempt);
            }

            match transfer(&*session, &repository, artifact, cancel).await {
                Ok(Transfer::Pushed(remote_digest)) => {
                    tracing::info!(
                        "Pushed {} to {} ({})",
                        artifact.target,
                        registry.id,
                        remote_digest
                    );
                    return PushResult::Pushed {
                        remote_digest,
                        retry_count: attempt,
                        already_present: false,
                    };
                }
                Ok(Transfer::AlreadyPresent(remote_digest)) => {
                    tracing::info!(
                        "{} already present in {}, skipping",
                        artifact.target,
                        registry.id
                    );
                    return PushResult::Pushed {
                        remote_digest,
                        retry_count: attempt,
                        already_present: true,
                    };
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Push of {} to {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        artifact.target,
                        registry.id,
                        attempt + 1,
                        self.policy.max_attempts,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return cancelled(attempt),
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Push of {} to {} failed: {}",
                        artifact.target,
                        registry.id,
                        e
                    );
                    return PushResult::Failed {
                        kind: e.kind(),
                        message: e.message,
                        retry_count: attempt,
                    };
                }
            }
        }
    }
}

/// 1回分の試行。レジストリに同じ index があれば転送しない。
async fn transfer(
    session: &dyn RegistrySession,
    repository: &str,
    artifact: &Artifact,
    cancel: &CancelToken,
) -> Result<Transfer, PushError> {
    if session.has_digest(repository, &artifact.index_digest).await? {
        // 内容は同じでもタグは新しい場合がある
        session.tag(repository, artifact).await?;
        return Ok(Transfer::AlreadyPresent(artifact.index_digest.clone()));
    }
    let remote = session.push(repository, artifact, cancel).await?;
    Ok(Transfer::Pushed(remote))
}

fn cancelled(retry_count: u32) -> PushResult {
    PushResult::Failed {
        kind: ErrorKind::Cancelled,
        message: "push cancelled".to_string(),
        retry_count,
    }
}
