use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tracing::{debug, warn};

use crate::services::plugin_host::{
    PluginError,
    protocol::{
        COOKIE_KEY, Capability, Handshake, Method, PROTOCOL_VERSION, PrepareParams, Request,
        Response,
    },
};

/// A running plugin process and the capabilities it announced.
pub struct PreparerPlugin {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    capabilities: Vec<Capability>,
    next_id: u64,
    call_timeout: Duration,
    /// Set once the reply stream can no longer be trusted.
    broken: bool,
}

impl PreparerPlugin {
    #[tracing::instrument(name = "plugin.spawn", skip_all, fields(path = %path.display()), err)]
    pub async fn spawn(
        path: &Path,
        cookie: &str,
        handshake_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, PluginError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut child = Command::new(path)
            .env(COOKIE_KEY, cookie)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PluginError::Spawn {
                name: name.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(PluginError::Protocol {
                name,
                reason: "stdio pipes unavailable".to_string(),
            });
        };

        let mut plugin = Self {
            name,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            capabilities: Vec::new(),
            next_id: 0,
            call_timeout,
            broken: false,
        };

        let line = tokio::time::timeout(handshake_timeout, plugin.read_line())
            .await
            .map_err(|_| PluginError::HandshakeTimeout {
                name: plugin.name.clone(),
                secs: handshake_timeout.as_secs(),
            })??;

        let handshake: Handshake =
            serde_json::from_str(&line).map_err(|e| PluginError::Handshake {
                name: plugin.name.clone(),
                reason: e.to_string(),
            })?;

        if handshake.protocol_version != PROTOCOL_VERSION {
            return Err(PluginError::Handshake {
                name: plugin.name.clone(),
                reason: format!(
                    "protocol version {} is not supported, expected {}",
                    handshake.protocol_version, PROTOCOL_VERSION
                ),
            });
        }

        plugin.capabilities = handshake.capabilities;
        debug!(name = %plugin.name, capabilities = ?plugin.capabilities, "🔌 Plugin handshake complete");
        Ok(plugin)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Whether `method` may be sent: announced and the plugin still healthy.
    pub fn accepts(&self, method: Method) -> bool {
        !self.broken && self.supports(method.capability())
    }

    pub async fn prepare(
        &mut self,
        context_dir: &Path,
        plugin_data: &BTreeMap<String, String>,
    ) -> Result<(), PluginError> {
        let params = PrepareParams {
            context_path: context_dir,
            plugin_data,
        };
        self.call(Method::Prepare, Some(params)).await
    }

    pub async fn cleanup(&mut self) -> Result<(), PluginError> {
        self.call(Method::Cleanup, None).await
    }

    /// Kills the process and reaps it.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(name = %self.name, error = %e, "Plugin already exited");
        }
    }

    async fn call(
        &mut self,
        method: Method,
        params: Option<PrepareParams<'_>>,
    ) -> Result<(), PluginError> {
        if self.broken {
            return Err(PluginError::Broken {
                name: self.name.clone(),
                method: method.as_str(),
            });
        }

        let result = self.exchange(method, params).await;
        if let Err(e) = &result
            && !matches!(e, PluginError::Failed { .. })
        {
            // a late or garbled reply would be read by the next call
            warn!(plugin = %self.name, error = %e, "⚠️ Plugin marked broken, stopping it");
            self.broken = true;
            self.kill().await;
        }
        result
    }

    async fn exchange(
        &mut self,
        method: Method,
        params: Option<PrepareParams<'_>>,
    ) -> Result<(), PluginError> {
        self.next_id += 1;
        let id = self.next_id;

        let mut line = serde_json::to_string(&Request { id, method, params }).map_err(|e| {
            PluginError::Protocol {
                name: self.name.clone(),
                reason: e.to_string(),
            }
        })?;
        line.push('\n');

        let timeout = self.call_timeout;
        let exchange = async {
            self.send_line(&line).await?;
            self.read_line().await
        };
        let reply = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| PluginError::CallTimeout {
                name: self.name.clone(),
                method: method.as_str(),
                secs: timeout.as_secs(),
            })??;

        let response: Response =
            serde_json::from_str(&reply).map_err(|e| PluginError::Protocol {
                name: self.name.clone(),
                reason: format!("invalid {} response: {}", method.as_str(), e),
            })?;

        if let Some(got) = response.id
            && got != id
        {
            return Err(PluginError::Protocol {
                name: self.name.clone(),
                reason: format!("response id {} does not match request id {}", got, id),
            });
        }

        for warning in &response.warnings {
            warn!(plugin = %self.name, method = method.as_str(), "⚠️ {}", warning);
        }

        if !response.error.is_empty() {
            return Err(PluginError::Failed {
                name: self.name.clone(),
                method: method.as_str(),
                message: response.error,
            });
        }

        Ok(())
    }

    /// Next non-blank stdout line; EOF means the plugin exited.
    async fn read_line(&mut self) -> Result<String, PluginError> {
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(line),
                Ok(None) => {
                    return Err(PluginError::Exited {
                        name: self.name.clone(),
                    });
                }
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), PluginError> {
        let written = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await
        }
        .await;
        written.map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> PluginError {
        PluginError::Io {
            name: self.name.clone(),
            source,
        }
    }
}
