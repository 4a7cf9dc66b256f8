//! Target executable watcher
//!
//! Rebuilding the program under debug replaces the executable. The watcher
//! polls its modification time and reports a change once the file exists
//! again, so the session can restart against the new build.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Polls one file; stops when dropped
pub struct FileWatcher {
    task: JoinHandle<()>,
}

impl FileWatcher {
    /// Watch `path`, sending `(generation, path)` on every change
    pub fn spawn(
        path: PathBuf,
        interval: Duration,
        generation: u64,
        changes: mpsc::UnboundedSender<(u64, PathBuf)>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut last = modified(&path);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = modified(&path);
                if now.is_some() && now != last {
                    tracing::debug!(path = %path.display(), "Watched file changed");
                    last = now;
                    if changes.send((generation, path.clone())).is_err() {
                        break;
                    }
                }
            }
        });
        Self { task }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_change_is_reported() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("prog");
        std::fs::write(&file, "v1").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = FileWatcher::spawn(file.clone(), Duration::from_millis(20), 3, tx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());

        let later = SystemTime::now() + Duration::from_secs(5);
        let f = std::fs::File::options().write(true).open(&file).unwrap();
        f.set_modified(later).unwrap();

        let (generation, path) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(generation, 3);
        assert_eq!(path, file);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_a_change() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("prog");
        std::fs::write(&file, "v1").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = FileWatcher::spawn(file.clone(), Duration::from_millis(20), 0, tx);
        std::fs::remove_file(&file).unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }
}
