use indicatif::{ProgressBar, ProgressStyle};

/// 実行全体の進捗表示（ターゲット単位）
#[derive(Clone)]
pub struct RunProgress {
    progress_bar: ProgressBar,
}

impl RunProgress {
    pub fn new(total_targets: usize) -> Self {
        let pb = ProgressBar::new(total_targets as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { progress_bar: pb }
    }

    /// 何も描画しない（非TTY・テスト用）
    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
        }
    }

    pub fn target_started(&self, name: &str) {
        self.progress_bar.set_message(format!("building {}", name));
    }

    pub fn target_pushing(&self, name: &str) {
        self.progress_bar.set_message(format!("pushing {}", name));
    }

    pub fn target_finished(&self, name: &str, ok: bool) {
        let mark = if ok { "✓" } else { "✗" };
        self.progress_bar.println(format!("  {} {}", mark, name));
        self.progress_bar.inc(1);
    }

    pub fn finish(&self) {
        self.progress_bar.finish_and_clear();
    }

    pub fn position(&self) -> u64 {
        self.progress_bar.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_counts_targets() {
        let progress = RunProgress::hidden();
        progress.target_started("api");
        progress.target_finished("api", true);
        progress.target_finished("worker", false);
        assert_eq!(progress.position(), 2);
        progress.finish();
    }
}
