//! 実行全体のキャンセルシグナル

use std::sync::Arc;
use tokio::sync::watch;

/// 全ビルド・プッシュタスクに共有されるキャンセルトークン
///
/// 各タスクは安全なチェックポイント（ビルドステップやレイヤー転送の完了後）で
/// `is_cancelled` を確認して停止する。
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// キャンセルされるまで待機
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // Sender は self が保持しているので閉じることはない
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
