pub mod plugin;
pub mod protocol;

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::PluginsConfig;
use crate::services::plugin_host::{plugin::PreparerPlugin, protocol::Method};
use crate::services::traits::ContextPreparer;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("failed to read plugin directory {dir}: {source}")]
    Discovery {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start plugin {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin {name} handshake failed: {reason}")]
    Handshake { name: String, reason: String },

    #[error("plugin {name} did not complete its handshake within {secs} seconds")]
    HandshakeTimeout { name: String, secs: u64 },

    #[error("plugin {name} violated the protocol: {reason}")]
    Protocol { name: String, reason: String },

    #[error("plugin {name} exited unexpectedly")]
    Exited { name: String },

    #[error("plugin {name} I/O error: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin {name} {method} timed out after {secs} seconds")]
    CallTimeout {
        name: String,
        method: &'static str,
        secs: u64,
    },

    #[error("plugin {name} is stopped after an earlier failure, {method} skipped")]
    Broken { name: String, method: &'static str },

    #[error("plugin {name} {method} failed: {message}")]
    Failed {
        name: String,
        method: &'static str,
        message: String,
    },
}

/// Every plugin loaded for this job, in discovery order.
#[derive(Default)]
pub struct PluginHost {
    plugins: Vec<PreparerPlugin>,
}

impl PluginHost {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Regular files directly inside `dir`, sorted by file name. A missing
    /// directory yields nothing.
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, PluginError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PluginError::Discovery {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PluginError::Discovery {
                dir: dir.to_path_buf(),
                source,
            })?;
            let is_file = std::fs::metadata(entry.path())
                .map(|m| m.is_file())
                .unwrap_or(false);
            if is_file {
                paths.push(entry.path());
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(paths)
    }

    /// Spawns every discovered plugin and completes its handshake. If one
    /// fails, the ones already started are killed.
    #[tracing::instrument(name = "plugin_host.load", skip_all, err)]
    pub async fn load(cfg: &PluginsConfig) -> Result<Self, PluginError> {
        let Some(dir) = cfg.directory.as_deref() else {
            return Ok(Self::empty());
        };

        let mut host = Self::empty();
        for path in Self::discover(dir)? {
            match PreparerPlugin::spawn(
                &path,
                &cfg.cookie,
                Duration::from_secs(cfg.handshake_timeout_secs),
                Duration::from_secs(cfg.call_timeout_secs),
            )
            .await
            {
                Ok(plugin) => host.plugins.push(plugin),
                Err(e) => {
                    host.shutdown().await;
                    return Err(e);
                }
            }
        }

        info!(plugins = ?host.names(), "🔌 Preparer plugins loaded");
        Ok(host)
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs `prepare` on each capable plugin in order; the first error aborts.
    #[tracing::instrument(name = "plugin_host.prepare_all", skip_all, err)]
    pub async fn prepare_all(
        &mut self,
        context_dir: &Path,
        plugin_data: &BTreeMap<String, String>,
    ) -> Result<(), PluginError> {
        for plugin in self
            .plugins
            .iter_mut()
            .filter(|p| p.accepts(Method::Prepare))
        {
            plugin.prepare(context_dir, plugin_data).await?;
            info!(plugin = plugin.name(), "✅ Context prepared");
        }
        Ok(())
    }

    /// Runs `cleanup` on every capable plugin; failures are logged only.
    /// Plugins stopped after a timeout or pipe failure are skipped.
    pub async fn cleanup_all(&mut self) {
        for plugin in self.plugins.iter_mut() {
            if plugin.is_broken() {
                warn!(plugin = plugin.name(), "⚠️ Skipping cleanup of stopped plugin");
                continue;
            }
            if !plugin.accepts(Method::Cleanup) {
                continue;
            }
            if let Err(e) = plugin.cleanup().await {
                warn!(plugin = plugin.name(), error = %e, "⚠️ Plugin cleanup failed");
            }
        }
    }

    /// Kills every plugin process. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        for mut plugin in self.plugins.drain(..) {
            plugin.kill().await;
        }
    }
}

impl ContextPreparer for PluginHost {
    async fn prepare(
        &mut self,
        context_dir: &Path,
        plugin_data: &BTreeMap<String, String>,
    ) -> Result<(), PluginError> {
        self.prepare_all(context_dir, plugin_data).await.inspect_err(|e| {
            error!(error = %e, "❌ Context preparation failed");
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const COOKIE: &str = "test-cookie";

    struct Fixture {
        dir: tempfile::TempDir,
        log: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir(dir.path().join("plugins")).unwrap();
            let log = dir.path().join("calls.log");
            Self { dir, log }
        }

        fn plugins_dir(&self) -> PathBuf {
            self.dir.path().join("plugins")
        }

        fn config(&self) -> PluginsConfig {
            PluginsConfig {
                directory: Some(self.plugins_dir()),
                cookie: COOKIE.to_string(),
                handshake_timeout_secs: 5,
                call_timeout_secs: 5,
            }
        }

        /// Installs a shell plugin that logs `<name>:<method>` per call.
        fn install(&self, name: &str, handshake: &str, prepare_error: &str) {
            let script = format!(
                r#"#!/bin/sh
[ "$FOUNDRY_PLUGIN_COOKIE" = "{cookie}" ] || exit 3
echo '{handshake}'
while read -r line; do
  id=$(printf '%s' "$line" | sed 's/^{{"id":\([0-9]*\).*/\1/')
  case "$line" in
    *'"method":"prepare"'*)
      echo "{name}:prepare" >> "{log}"
      printf '{{"id":%s,"error":"{prepare_error}","warnings":["careful"]}}\n' "$id" ;;
    *'"method":"cleanup"'*)
      echo "{name}:cleanup" >> "{log}"
      printf '{{"id":%s,"error":""}}\n' "$id" ;;
  esac
done
"#,
                cookie = COOKIE,
                handshake = handshake,
                name = name,
                log = self.log.display(),
                prepare_error = prepare_error,
            );
            let path = self.plugins_dir().join(name);
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        /// Installs a plugin whose prepare replies only after `delay_secs`.
        fn install_slow(&self, name: &str, delay_secs: u64) {
            let script = format!(
                r#"#!/bin/sh
echo '{handshake}'
while read -r line; do
  id=$(printf '%s' "$line" | sed 's/^{{"id":\([0-9]*\).*/\1/')
  case "$line" in
    *'"method":"prepare"'*)
      echo "{name}:prepare" >> "{log}"
      sleep {delay}
      printf '{{"id":%s,"error":""}}\n' "$id" ;;
    *'"method":"cleanup"'*)
      echo "{name}:cleanup" >> "{log}"
      printf '{{"id":%s,"error":""}}\n' "$id" ;;
  esac
done
"#,
                handshake = FULL,
                name = name,
                log = self.log.display(),
                delay = delay_secs,
            );
            let path = self.plugins_dir().join(name);
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(&self.log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    const FULL: &str = r#"{"protocolVersion":1,"capabilities":["prepare","cleanup"]}"#;

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let cfg = PluginsConfig {
            directory: Some(PathBuf::from("/nonexistent/foundry/plugins")),
            ..Default::default()
        };
        let host = PluginHost::load(&cfg).await.unwrap();
        assert!(host.is_empty());
    }

    #[test]
    fn test_discovery_is_sorted_and_flat() {
        let fixture = Fixture::new();
        fixture.install("20-second", FULL, "");
        fixture.install("10-first", FULL, "");
        std::fs::create_dir(fixture.plugins_dir().join("nested")).unwrap();
        std::fs::write(fixture.plugins_dir().join("nested/30-hidden"), "").unwrap();

        let names: Vec<String> = PluginHost::discover(&fixture.plugins_dir())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["10-first", "20-second"]);
    }

    #[tokio::test]
    async fn test_prepare_runs_in_order() {
        let fixture = Fixture::new();
        fixture.install("10-first", FULL, "");
        fixture.install("20-second", FULL, "");

        let mut host = PluginHost::load(&fixture.config()).await.unwrap();
        assert_eq!(host.names(), vec!["10-first", "20-second"]);

        host.prepare_all(fixture.dir.path(), &BTreeMap::new())
            .await
            .unwrap();
        host.cleanup_all().await;
        host.shutdown().await;

        assert_eq!(
            fixture.calls(),
            vec![
                "10-first:prepare",
                "20-second:prepare",
                "10-first:cleanup",
                "20-second:cleanup"
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_runs_for_all_after_prepare_failure() {
        let fixture = Fixture::new();
        fixture.install("10-broken", FULL, "missing token");
        fixture.install("20-ok", FULL, "");

        let mut host = PluginHost::load(&fixture.config()).await.unwrap();
        let err = host
            .prepare_all(fixture.dir.path(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "plugin 10-broken prepare failed: missing token");

        host.cleanup_all().await;
        host.shutdown().await;

        assert_eq!(
            fixture.calls(),
            vec!["10-broken:prepare", "10-broken:cleanup", "20-ok:cleanup"]
        );
    }

    #[tokio::test]
    async fn test_timed_out_plugin_is_stopped_and_skipped() {
        let fixture = Fixture::new();
        fixture.install_slow("10-slow", 3);
        fixture.install("20-ok", FULL, "");

        let cfg = PluginsConfig {
            call_timeout_secs: 1,
            ..fixture.config()
        };
        let mut host = PluginHost::load(&cfg).await.unwrap();
        let err = host
            .prepare_all(fixture.dir.path(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::CallTimeout { ref name, .. } if name == "10-slow"));

        host.cleanup_all().await;
        host.shutdown().await;

        assert_eq!(fixture.calls(), vec!["10-slow:prepare", "20-ok:cleanup"]);
    }

    #[tokio::test]
    async fn test_capabilities_gate_calls() {
        let fixture = Fixture::new();
        fixture.install(
            "10-prepare-only",
            r#"{"protocolVersion":1,"capabilities":["prepare"]}"#,
            "",
        );

        let mut host = PluginHost::load(&fixture.config()).await.unwrap();
        host.prepare_all(fixture.dir.path(), &BTreeMap::new())
            .await
            .unwrap();
        host.cleanup_all().await;
        host.shutdown().await;

        assert_eq!(fixture.calls(), vec!["10-prepare-only:prepare"]);
    }

    #[tokio::test]
    async fn test_wrong_cookie_fails_handshake() {
        let fixture = Fixture::new();
        fixture.install("10-first", FULL, "");

        let cfg = PluginsConfig {
            cookie: "wrong".to_string(),
            ..fixture.config()
        };
        let err = PluginHost::load(&cfg).await.err().unwrap();
        assert!(matches!(err, PluginError::Exited { .. }));
    }

    #[tokio::test]
    async fn test_protocol_version_mismatch() {
        let fixture = Fixture::new();
        fixture.install(
            "10-future",
            r#"{"protocolVersion":2,"capabilities":["prepare"]}"#,
            "",
        );

        let err = PluginHost::load(&fixture.config()).await.err().unwrap();
        assert!(matches!(err, PluginError::Handshake { .. }));
    }
}
