//! レジストリとの通信境界

use crate::artifact::Artifact;
use crate::auth::Credentials;
use crate::cancel::CancelToken;
use crate::error::{AuthError, PushError};
use async_trait::async_trait;
use imageflow_core::{Digest, Registry};
use std::sync::Arc;

/// レジストリごとにセッションを確立するクライアント
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// 認証ハンドシェイクを行いセッションを返す
    ///
    /// `credentials` が None なら匿名アクセス。
    async fn authenticate(
        &self,
        registry: &Registry,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn RegistrySession>, AuthError>;
}

/// 認証済みのレジストリセッション
#[async_trait]
pub trait RegistrySession: Send + Sync {
    /// リポジトリに manifest (index) がすでに存在するか
    async fn has_digest(&self, repository: &str, digest: &Digest) -> Result<bool, PushError>;

    /// 成果物（blob、アーキテクチャ別 manifest、index とタグ）を転送する
    ///
    /// レイヤー転送の合間に `cancel` を確認する。戻り値はレジストリ上の index digest。
    async fn push(
        &self,
        repository: &str,
        artifact: &Artifact,
        cancel: &CancelToken,
    ) -> Result<Digest, PushError>;

    /// index を成果物の全タグで PUT する
    ///
    /// index が既に存在する場合もタグは付け直す。戻り値はレジストリ上の index digest。
    async fn tag(&self, repository: &str, artifact: &Artifact) -> Result<Digest, PushError>;
}
