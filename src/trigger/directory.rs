use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{InboundFile, InboundSource};
use crate::config::TriggerConfig;
use crate::constants::events;
use crate::error::Result;

/// Polls a directory for regular files it has not reported yet
///
/// Hidden files are ignored. A file that disappears is forgotten, so a file
/// that arrives again under the same name is reported again; the repository
/// decides whether it may run again. A released file is reported again while
/// it is still present.
#[derive(Debug)]
pub struct DirectoryPoller {
    directory: PathBuf,
    suffix: Option<String>,
    auto_create: bool,
    seen: HashSet<PathBuf>,
}

impl DirectoryPoller {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            suffix: None,
            auto_create: true,
            seen: HashSet::new(),
        }
    }

    pub fn from_config(config: &TriggerConfig) -> Self {
        Self {
            directory: config.inbound_directory.clone(),
            suffix: config.file_suffix.clone(),
            auto_create: config.auto_create_directory,
            seen: HashSet::new(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn accepts(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return false;
        }
        match &self.suffix {
            Some(suffix) => name.ends_with(suffix.as_str()),
            None => true,
        }
    }
}

#[async_trait]
impl InboundSource for DirectoryPoller {
    async fn poll(&mut self) -> Result<Vec<InboundFile>> {
        if self.auto_create && !tokio::fs::try_exists(&self.directory).await? {
            tokio::fs::create_dir_all(&self.directory).await?;
            info!(directory = %self.directory.display(), "Created inbound directory");
        }

        let mut present = HashSet::new();
        let mut detected = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if !self.accepts(&name.to_string_lossy()) {
                continue;
            }

            let path = tokio::fs::canonicalize(entry.path()).await?;
            if self.seen.insert(path.clone()) {
                debug!(event = events::INPUT_DETECTED, path = %path.display(), "Inbound file detected");
                detected.push(InboundFile { path: path.clone() });
            }
            present.insert(path);
        }

        self.seen.retain(|path| present.contains(path));
        detected.sort();
        Ok(detected)
    }

    fn release(&mut self, file: &InboundFile) {
        if self.seen.remove(&file.path) {
            debug!(path = %file.path.display(), "Inbound file released for another attempt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_each_file_is_reported_once() {
        let dir = TempDir::new().unwrap();
        let mut poller = DirectoryPoller::new(dir.path());

        std::fs::write(dir.path().join("b.csv"), "id\n1\n").unwrap();
        std::fs::write(dir.path().join("a.csv"), "id\n1\n").unwrap();
        std::fs::write(dir.path().join(".partial"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let first = poller.poll().await.unwrap();
        let names: Vec<_> = first
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
        assert!(first.iter().all(|f| f.path.is_absolute()));

        assert!(poller.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_suffix_filter_and_rearrival() {
        let dir = TempDir::new().unwrap();
        let mut poller = DirectoryPoller::new(dir.path()).with_suffix(".csv");
        let file = dir.path().join("dogs.csv");

        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::write(&file, "id\n").unwrap();
        assert_eq!(poller.poll().await.unwrap().len(), 1);

        std::fs::remove_file(&file).unwrap();
        assert!(poller.poll().await.unwrap().is_empty());

        std::fs::write(&file, "id\n").unwrap();
        assert_eq!(poller.poll().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_released_file_is_reported_again() {
        let dir = TempDir::new().unwrap();
        let mut poller = DirectoryPoller::new(dir.path());
        std::fs::write(dir.path().join("dogs.csv"), "id\n1\n").unwrap();

        let first = poller.poll().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(poller.poll().await.unwrap().is_empty());

        poller.release(&first[0]);
        assert_eq!(poller.poll().await.unwrap(), first);
        assert!(poller.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let inbound = dir.path().join("inbound");
        let mut poller = DirectoryPoller::new(&inbound);

        assert!(poller.poll().await.unwrap().is_empty());
        assert!(inbound.is_dir());

        let mut strict = DirectoryPoller::new(dir.path().join("absent")).with_auto_create(false);
        assert!(strict.poll().await.is_err());
    }
}
