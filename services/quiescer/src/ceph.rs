//! Cluster CLI backed transport and topology.
//!
//! Shells out to the `ceph` command line tool:
//! - `tell mds.<leader> quiesce db ...` for quiesce commands
//! - `fs get <fs> --format=json` for the quiesce db leader
//! - `fs ls` / `fs dump` for filesystem discovery and the steady-state wait

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ExitCode;
use crate::shutdown::StopListener;
use crate::transport::{CommandOutput, CommandRequest, CommandTransport, NodeId, Topology};

/// Default bound on one-shot commands.
pub const DEFAULT_ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(300);

/// MDS states accepted as steady.
const STEADY_STATES: [&str; 3] = ["up:active", "up:standby", "up:standby-replay"];

/// Cluster CLI wrapper.
#[derive(Debug, Clone)]
pub struct CephCli {
    bin: String,
    cluster: String,
    one_shot_timeout: Duration,
}

impl CephCli {
    pub fn new(bin: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            cluster: cluster.into(),
            one_shot_timeout: DEFAULT_ONE_SHOT_TIMEOUT,
        }
    }

    pub fn with_one_shot_timeout(mut self, timeout: Duration) -> Self {
        self.one_shot_timeout = timeout;
        self
    }

    /// Topology lookup bound to one filesystem.
    pub fn filesystem(&self, name: impl Into<String>) -> FilesystemTopology {
        FilesystemTopology {
            cli: self.clone(),
            name: name.into(),
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--cluster")
            .arg(&self.cluster)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run the CLI, mapping exit status `n` to exit code `-n`.
    pub async fn run(&self, args: &[String], deadline: Option<Duration>) -> Result<CommandOutput> {
        debug!(bin = %self.bin, args = ?args, "Running cluster command");
        let mut cmd = self.command(args);
        let output = cmd.output();

        let output = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, output).await {
                Ok(output) => output,
                Err(_) => {
                    warn!(
                        args = ?args,
                        deadline_secs = deadline.as_secs(),
                        "Cluster command exceeded one-shot deadline"
                    );
                    return Ok(CommandOutput::new(-libc::ETIMEDOUT, ""));
                }
            },
            None => output.await,
        }
        .with_context(|| format!("failed to run {}", self.bin))?;

        let status = match output.status.code() {
            Some(code) => code,
            // killed by a signal
            None => libc::EINTR,
        };
        if status != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(status, stderr = %stderr.trim(), "Cluster command returned non-zero");
        }

        Ok(CommandOutput {
            exit_code: ExitCode(-status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    /// Run a JSON-formatted query and decode its output.
    async fn query<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T> {
        let mut args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        args.push("--format=json".to_string());

        let output = self.run(&args, None).await?;
        if !output.exit_code.is_success() {
            anyhow::bail!("`{}` failed: {}", args.join(" "), output.exit_code);
        }
        serde_json::from_str(&output.stdout)
            .with_context(|| format!("couldn't parse output of `{}`", args.join(" ")))
    }

    /// Names of every filesystem in the cluster.
    pub async fn list_filesystems(&self) -> Result<Vec<String>> {
        let listed: Vec<FsListEntry> = self.query(&["fs", "ls"]).await?;
        Ok(listed.into_iter().map(|fs| fs.name).collect())
    }

    /// Check if every MDS is active or standby.
    pub async fn is_steady(&self) -> Result<bool> {
        let dump: FsDump = self.query(&["fs", "dump"]).await?;
        Ok(dump.is_steady())
    }

    /// Poll until every MDS is active or standby.
    ///
    /// Returns `false` if stop was signaled first.
    pub async fn wait_for_steady_state(
        &self,
        poll_interval: Duration,
        mut stop: StopListener,
    ) -> Result<bool> {
        info!("Waiting for all MDSs to reach steady state");
        loop {
            if self.is_steady().await? {
                info!("All MDSs are in steady state");
                return Ok(true);
            }
            if stop.sleep(poll_interval).await {
                return Ok(false);
            }
        }
    }
}

#[async_trait]
impl CommandTransport for CephCli {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput> {
        let mut args = vec!["tell".to_string(), format!("mds.{}", request.target)];
        args.extend(request.args.iter().cloned());

        let deadline = request.one_shot.then_some(self.one_shot_timeout);
        self.run(&args, deadline).await
    }
}

/// Quiesce db leader lookup for one filesystem.
#[derive(Debug, Clone)]
pub struct FilesystemTopology {
    cli: CephCli,
    name: String,
}

#[async_trait]
impl Topology for FilesystemTopology {
    async fn current_coordinator(&self) -> Result<Option<NodeId>> {
        let fs: FsGet = self.cli.query(&["fs", "get", self.name.as_str()]).await?;
        Ok(fs.mdsmap.leader())
    }
}

// =============================================================================
// CLI output shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct FsListEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FsGet {
    mdsmap: MdsMap,
}

#[derive(Debug, Default, Deserialize)]
struct MdsMap {
    #[serde(default)]
    qdb_leader: Option<u64>,

    #[serde(default)]
    info: serde_json::Map<String, serde_json::Value>,
}

impl MdsMap {
    /// Gid 0 means no leader.
    fn leader(&self) -> Option<NodeId> {
        self.qdb_leader.filter(|gid| *gid != 0).map(NodeId)
    }
}

#[derive(Debug, Deserialize)]
struct FsDump {
    #[serde(default)]
    filesystems: Vec<FsGet>,

    #[serde(default)]
    standbys: Vec<serde_json::Value>,
}

impl FsDump {
    fn all_states(&self) -> impl Iterator<Item = &str> {
        let ranks = self
            .filesystems
            .iter()
            .flat_map(|fs| fs.mdsmap.info.values());
        ranks
            .chain(self.standbys.iter())
            .map(|info| info.get("state").and_then(|s| s.as_str()).unwrap_or("unknown"))
    }

    fn is_steady(&self) -> bool {
        self.all_states()
            .all(|state| STEADY_STATES.contains(&state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mdsmap_leader() {
        let fs: FsGet = serde_json::from_str(r#"{"mdsmap": {"qdb_leader": 4242}}"#).unwrap();
        assert_eq!(fs.mdsmap.leader(), Some(NodeId(4242)));

        let fs: FsGet = serde_json::from_str(r#"{"mdsmap": {"qdb_leader": 0}}"#).unwrap();
        assert_eq!(fs.mdsmap.leader(), None);

        let fs: FsGet = serde_json::from_str(r#"{"mdsmap": {}}"#).unwrap();
        assert_eq!(fs.mdsmap.leader(), None);
    }

    #[test]
    fn test_fs_dump_states() {
        let dump: FsDump = serde_json::from_str(
            r#"{
                "filesystems": [
                    {"mdsmap": {"info": {
                        "gid_1": {"state": "up:active"},
                        "gid_2": {"state": "up:standby-replay"}
                    }}}
                ],
                "standbys": [{"state": "up:standby"}]
            }"#,
        )
        .unwrap();
        let states: Vec<&str> = dump.all_states().collect();
        assert_eq!(states.len(), 3);
        assert!(dump.is_steady());

        let dump: FsDump = serde_json::from_str(
            r#"{"filesystems": [{"mdsmap": {"info": {"gid_1": {"state": "up:replay"}}}}]}"#,
        )
        .unwrap();
        assert!(!dump.is_steady());

        let dump: FsDump = serde_json::from_str(r#"{"standbys": [{}]}"#).unwrap();
        assert!(!dump.is_steady());
    }

    #[tokio::test]
    async fn test_is_steady_propagates_cli_failure() {
        let cli = CephCli::new("false", "ceph");
        let err = cli.is_steady().await.unwrap_err();
        assert!(err.to_string().contains("fs dump --format=json"));
    }

    #[test]
    fn test_fs_list() {
        let listed: Vec<FsListEntry> =
            serde_json::from_str(r#"[{"name": "a", "metadata_pool": "m"}, {"name": "b"}]"#)
                .unwrap();
        let names: Vec<String> = listed.into_iter().map(|fs| fs.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_exit_status_mapping() {
        // `false` exits with status 1 regardless of arguments
        let cli = CephCli::new("false", "ceph");
        let out = cli.run(&["quiesce".to_string()], None).await.unwrap();
        assert_eq!(out.exit_code, ExitCode(-1));
    }

    #[tokio::test]
    async fn test_missing_binary_is_transport_error() {
        let cli = CephCli::new("/nonexistent/ceph-binary", "ceph");
        assert!(cli.run(&[], None).await.is_err());
    }
}
