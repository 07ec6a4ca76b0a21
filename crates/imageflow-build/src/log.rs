//! ビルドログの出力先
//!
//! ビルドログは呼び出し側が渡す sink にのみ書き込む。ターゲットごとに
//! 別の sink を使うので、並列ビルドのログが混ざることはない。

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait LogSink: Send + Sync {
    /// 1行書き込む（`source` はアーキテクチャ名など）
    fn write_line(&self, source: &str, line: &str);
}

/// ログを捨てる sink
#[derive(Debug, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn write_line(&self, _source: &str, _line: &str) {}
}

/// ファイルに書き込む sink
#[derive(Debug)]
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogSink {
    /// ファイルを作成（既存の内容は切り詰める）
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn write_line(&self, source: &str, line: &str) {
        if let Ok(mut file) = self.file.lock()
            && let Err(e) = writeln!(file, "[{}] {}", source, line)
        {
            tracing::warn!("Failed to write build log {}: {}", self.path.display(), e);
        }
    }
}

/// メモリに保持する sink
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn write_line(&self, source: &str, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format!("[{}] {}", source, line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_writes_prefixed_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("logs/api.log");

        let sink = FileLogSink::create(&path).unwrap();
        sink.write_line("amd64", "#1 [internal] load build definition");
        sink.write_line("arm64", "#1 DONE 0.1s");
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "[amd64] #1 [internal] load build definition\n[arm64] #1 DONE 0.1s\n"
        );
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryLogSink::new();
        sink.write_line("engine", "cache hit");
        assert_eq!(sink.lines(), vec!["[engine] cache hit".to_string()]);
    }
}
