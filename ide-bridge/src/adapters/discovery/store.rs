use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeInfo {
    pub name: String,
    pub display_name: String,
}

/// Bootstrap document a client reads to find and authenticate against the bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRecord {
    pub port: u16,
    /// Workspace roots joined with the platform path-list separator.
    pub workspace_path: String,
    pub auth_token: String,
    pub ide_info: IdeInfo,
}

impl DiscoveryRecord {
    pub fn new(port: u16, roots: &[PathBuf], auth_token: impl Into<String>, ide_info: IdeInfo) -> Self {
        let workspace_path = std::env::join_paths(roots)
            .map(|joined| joined.to_string_lossy().into_owned())
            .unwrap_or_else(|_| {
                roots
                    .iter()
                    .map(|root| root.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(PATH_LIST_SEPARATOR)
            });
        Self {
            port,
            workspace_path,
            auth_token: auth_token.into(),
            ide_info,
        }
    }
}

#[cfg(windows)]
const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: &str = ":";

/// Directory of pid-scoped discovery records plus the sticky-port memo.
#[derive(Clone, Debug)]
pub struct DiscoveryStore {
    dir: PathBuf,
    prefix: String,
}

impl DiscoveryStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, pid: u32, port: u16) -> PathBuf {
        self.dir.join(format!("{}-{}-{}.json", self.prefix, pid, port))
    }

    fn port_memo_path(&self, ppid: u32) -> PathBuf {
        self.dir.join(format!("{}-port-{}.txt", self.prefix, ppid))
    }

    /// Pid encoded in a record file name owned by this store, if `name` is one.
    fn record_pid(&self, name: &str) -> Option<u32> {
        let rest = name.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        let rest = rest.strip_suffix(".json")?;
        let (pid, port) = rest.split_once('-')?;
        port.parse::<u16>().ok()?;
        pid.parse().ok()
    }

    async fn ensure_dir(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating discovery dir at {}", self.dir.display()))
    }

    /// Replace any records for `pids` with a fresh one per pid. Returns the written paths.
    pub async fn publish(
        &self,
        record: &DiscoveryRecord,
        pids: &BTreeSet<u32>,
    ) -> anyhow::Result<Vec<PathBuf>> {
        self.ensure_dir().await?;
        self.cleanup(pids).await?;
        let json = serde_json::to_vec_pretty(record).context("serializing discovery record")?;
        let mut written = Vec::with_capacity(pids.len());
        for pid in pids {
            let path = self.record_path(*pid, record.port);
            let tmp_path = path.with_extension("json.tmp");
            fs::write(&tmp_path, &json)
                .await
                .with_context(|| format!("writing discovery tmp file {}", tmp_path.display()))?;
            fs::rename(&tmp_path, &path)
                .await
                .with_context(|| format!("publishing discovery record {}", path.display()))?;
            debug!(path = %path.display(), "discovery record written");
            written.push(path);
        }
        Ok(written)
    }

    /// Remove every record whose file name carries one of `pids`. Returns how many were removed.
    pub async fn cleanup(&self, pids: &BTreeSet<u32>) -> anyhow::Result<usize> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("listing discovery dir {}", self.dir.display())))
            }
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(pid) = self.record_pid(&name.to_string_lossy()) else {
                continue;
            };
            if !pids.contains(&pid) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(%err, path = %entry.path().display(), "failed to remove discovery record"),
            }
        }
        Ok(removed)
    }

    /// Newest record in the directory by modification time.
    pub async fn find_latest(&self) -> anyhow::Result<Option<DiscoveryRecord>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("listing discovery dir {}", self.dir.display())))
            }
        };
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            if self.record_pid(&entry.file_name().to_string_lossy()).is_none() {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if newest.as_ref().map_or(true, |(seen, _)| modified >= *seen) {
                newest = Some((modified, entry.path()));
            }
        }
        let Some((_, path)) = newest else {
            return Ok(None);
        };
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading discovery record {}", path.display()))?;
        let record = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing discovery record {}", path.display()))?;
        Ok(Some(record))
    }

    pub async fn remember_port(&self, ppid: u32, port: u16) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        let path = self.port_memo_path(ppid);
        fs::write(&path, port.to_string())
            .await
            .with_context(|| format!("writing sticky port file {}", path.display()))
    }

    /// Previously bound port for this parent process; unreadable memos count as absent.
    pub async fn recall_port(&self, ppid: u32) -> Option<u16> {
        let text = fs::read_to_string(self.port_memo_path(ppid)).await.ok()?;
        text.trim().parse().ok().filter(|port| *port != 0)
    }
}

/// Current pid plus the parent's, which is how clients launched from the host find us.
pub fn process_ids() -> BTreeSet<u32> {
    let mut pids = BTreeSet::new();
    pids.insert(std::process::id());
    if let Some(ppid) = parent_process_id() {
        pids.insert(ppid);
    }
    pids
}

#[cfg(unix)]
pub fn parent_process_id() -> Option<u32> {
    Some(std::os::unix::process::parent_id())
}

#[cfg(not(unix))]
pub fn parent_process_id() -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(port: u16) -> DiscoveryRecord {
        DiscoveryRecord::new(
            port,
            &[PathBuf::from("/w/one"), PathBuf::from("/w/two")],
            "token",
            IdeInfo {
                name: "headless".into(),
                display_name: "Headless".into(),
            },
        )
    }

    #[test]
    fn record_serializes_wire_names() {
        let value = serde_json::to_value(record(4100)).unwrap();
        assert_eq!(value["port"], 4100);
        assert_eq!(value["authToken"], "token");
        assert_eq!(value["ideInfo"]["displayName"], "Headless");
        assert_eq!(
            value["workspacePath"],
            format!("/w/one{PATH_LIST_SEPARATOR}/w/two")
        );
    }

    #[test]
    fn parses_only_own_record_names() {
        let store = DiscoveryStore::new("/tmp", "ide-bridge-server");
        assert_eq!(store.record_pid("ide-bridge-server-42-4100.json"), Some(42));
        assert_eq!(store.record_pid("ide-bridge-server-port-42.txt"), None);
        assert_eq!(store.record_pid("other-server-42-4100.json"), None);
        assert_eq!(store.record_pid("ide-bridge-server-x-4100.json"), None);
    }

    #[tokio::test]
    async fn publish_replaces_records_for_same_pids() {
        let dir = tempdir().unwrap();
        let store = DiscoveryStore::new(dir.path(), "ide-bridge-server");
        let pids: BTreeSet<u32> = [10, 11].into_iter().collect();

        store.publish(&record(4100), &pids).await.unwrap();
        let written = store.publish(&record(4200), &pids).await.unwrap();
        assert_eq!(written.len(), 2);

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|name| name.ends_with("-4200.json")));
    }

    #[tokio::test]
    async fn cleanup_spares_other_processes() {
        let dir = tempdir().unwrap();
        let store = DiscoveryStore::new(dir.path(), "ide-bridge-server");
        store
            .publish(&record(4100), &[10].into_iter().collect())
            .await
            .unwrap();
        store
            .publish(&record(4200), &[20].into_iter().collect())
            .await
            .unwrap();

        let removed = store.cleanup(&[10].into_iter().collect()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.record_path(10, 4100).exists());
        assert!(store.record_path(20, 4200).exists());
        assert_eq!(store.find_latest().await.unwrap().unwrap().port, 4200);
    }

    #[tokio::test]
    async fn find_latest_on_missing_dir_is_none() {
        let dir = tempdir().unwrap();
        let store = DiscoveryStore::new(dir.path().join("absent"), "ide-bridge-server");
        assert!(store.find_latest().await.unwrap().is_none());
        assert_eq!(store.cleanup(&process_ids()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sticky_port_roundtrip() {
        let dir = tempdir().unwrap();
        let store = DiscoveryStore::new(dir.path(), "ide-bridge-server");
        assert_eq!(store.recall_port(7).await, None);
        store.remember_port(7, 4555).await.unwrap();
        assert_eq!(store.recall_port(7).await, Some(4555));
        std::fs::write(dir.path().join("ide-bridge-server-port-8.txt"), "junk").unwrap();
        assert_eq!(store.recall_port(8).await, None);
    }

    #[test]
    fn process_ids_include_self() {
        assert!(process_ids().contains(&std::process::id()));
    }
}
