use crate::config::RemoteConfig;
use crate::report::SurveyReport;
use crate::survey::Surveyor;
use std::collections::HashSet;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

const STDERR_TAIL: usize = 400;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("remote survey timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote command exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("remote output is not a survey report: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Runs one survey on a named host and hands back its report.
pub trait RemoteExecutor: Send + Sync + 'static {
    fn survey(
        &self,
        host: &str,
    ) -> impl Future<Output = Result<SurveyReport, RemoteError>> + Send;
}

/// Runs the survey command on a remote host over `ssh` and decodes the JSON
/// report it prints.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
    user: Option<String>,
    remote_command: String,
    connect_timeout: Duration,
    host_timeout: Duration,
}

impl SshExecutor {
    pub fn from_config(cfg: &RemoteConfig) -> Self {
        Self {
            program: cfg.ssh_program.clone(),
            user: cfg.user.clone().filter(|u| !u.trim().is_empty()),
            remote_command: cfg.remote_command.clone(),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            host_timeout: Duration::from_secs(cfg.host_timeout_secs),
        }
    }

    fn command_args(&self, host: &str) -> Vec<String> {
        let destination = match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "--".to_string(),
            destination,
            self.remote_command.clone(),
        ]
    }
}

impl RemoteExecutor for SshExecutor {
    async fn survey(&self, host: &str) -> Result<SurveyReport, RemoteError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(host))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(host = %host, program = %self.program, "dispatching remote survey");
        let output = time::timeout(self.host_timeout, cmd.output())
            .await
            .map_err(|_| RemoteError::Timeout(self.host_timeout))?
            .map_err(|source| RemoteError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RemoteError::Exit {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL);
    text.chars().skip(skip).collect()
}

/// Surveys the machine this process runs on.
#[derive(Clone)]
pub struct LocalExecutor {
    surveyor: Arc<Surveyor>,
}

impl LocalExecutor {
    pub fn new(surveyor: Arc<Surveyor>) -> Self {
        Self { surveyor }
    }
}

impl RemoteExecutor for LocalExecutor {
    async fn survey(&self, host: &str) -> Result<SurveyReport, RemoteError> {
        Ok(self.surveyor.survey_local(host).await)
    }
}

/// Routes configured local aliases in-process and everything else over ssh.
pub struct FleetExecutor {
    ssh: SshExecutor,
    local: LocalExecutor,
    local_aliases: HashSet<String>,
}

impl FleetExecutor {
    pub fn new(cfg: &RemoteConfig, surveyor: Arc<Surveyor>) -> Self {
        Self {
            ssh: SshExecutor::from_config(cfg),
            local: LocalExecutor::new(surveyor),
            local_aliases: cfg
                .local_aliases
                .iter()
                .map(|a| a.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_local(&self, host: &str) -> bool {
        self.local_aliases.contains(&host.trim().to_ascii_lowercase())
    }
}

impl RemoteExecutor for FleetExecutor {
    async fn survey(&self, host: &str) -> Result<SurveyReport, RemoteError> {
        if self.is_local(host) {
            self.local.survey(host).await
        } else {
            self.ssh.survey(host).await
        }
    }
}
