use std::{collections::BTreeMap, path::PathBuf, process::Stdio};

use build_core::models::ResolvedRegistry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
};
use tracing::{debug, info};

use crate::config::BuilderConfig;
use crate::services::traits::Builder;

#[derive(Error, Debug)]
pub enum BuildError {
    /// Reported by the engine; the text is surfaced verbatim.
    #[error("{0}")]
    Failed(String),

    #[error("failed to run build engine {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build engine protocol error: {0}")]
    Protocol(String),
}

/// Everything the engine needs for one build.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    pub context_url: String,
    pub context_dir: PathBuf,
    pub image_name: String,
    pub tags: Vec<String>,
    pub registries: Vec<ResolvedRegistry>,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub cache: bool,
    pub size_limit: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct EngineResult {
    #[serde(rename = "imageURLs", default)]
    image_urls: Vec<String>,
    error: Option<String>,
}

/// Runs an external engine: options as JSON on stdin, result as the last
/// JSON line on stdout.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    command: String,
    args: Vec<String>,
}

impl ProcessBuilder {
    pub fn new(cfg: &BuilderConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            args: cfg.args.clone(),
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> BuildError {
        BuildError::Spawn {
            command: self.command.clone(),
            source,
        }
    }
}

fn parse_output(stdout: &str, exit_ok: bool, exit_desc: &str) -> Result<Vec<String>, BuildError> {
    let last = stdout.lines().rev().find(|l| !l.trim().is_empty());

    let result = match last.map(serde_json::from_str::<EngineResult>) {
        Some(Ok(result)) => result,
        Some(Err(e)) if exit_ok => {
            return Err(BuildError::Protocol(format!("unreadable result line: {}", e)));
        }
        _ if exit_ok => {
            return Err(BuildError::Protocol("engine produced no result".to_string()));
        }
        _ => return Err(BuildError::Failed(format!("build engine {}", exit_desc))),
    };

    if let Some(error) = result.error.filter(|e| !e.is_empty()) {
        return Err(BuildError::Failed(error));
    }
    if !exit_ok {
        return Err(BuildError::Failed(format!("build engine {}", exit_desc)));
    }

    Ok(result.image_urls)
}

impl Builder for ProcessBuilder {
    #[tracing::instrument(name = "process_builder.build_and_push", skip_all, fields(image = %options.image_name), err)]
    async fn build_and_push(&self, options: &BuildOptions) -> Result<Vec<String>, BuildError> {
        let input = serde_json::to_vec(options).map_err(|e| BuildError::Protocol(e.to_string()))?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&options.context_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BuildError::Protocol("engine stdio unavailable".to_string()));
        };

        let write = async {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        };
        let mut output = String::new();
        let (written, read) = tokio::join!(write, stdout.read_to_string(&mut output));
        read.map_err(|e| self.spawn_error(e))?;
        if let Err(e) = written {
            debug!(error = %e, "Engine closed stdin early");
        }

        let status = child.wait().await.map_err(|e| self.spawn_error(e))?;
        let urls = parse_output(&output, status.success(), &status.to_string())?;

        info!(count = urls.len(), "🚀 Images pushed");
        Ok(urls)
    }
}
