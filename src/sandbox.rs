use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;

use crate::error::AppError;
use crate::types::CustomExitCode;

/// A single bind mount passed to the container.
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    fn as_bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path,
            self.container_path,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

pub struct ContainerSpec {
    pub image: String,
    pub shell_command: Vec<String>,
    pub mounts: Vec<Mount>,
}

pub struct RunOutcome {
    pub exit_code: i64,
    pub output: Vec<u8>,
}

/// Runs a PoC inside a container and returns its (remapped) exit code and
/// captured stdout. Implemented as a trait so the coordinator can be
/// exercised against a fake double in tests without a docker daemon.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn run(
        &self,
        spec: ContainerSpec,
        docker_timeout: Duration,
    ) -> Result<RunOutcome, AppError>;
}

/// Builds the `/bin/bash -c "timeout -s SIGKILL <n> <cmd> 2>&1"` entry
/// point that merges the inner command's stderr into stdout and bounds it
/// with the inner wall-time.
pub fn build_shell_command(inner_command: &[String], cmd_timeout: Duration) -> Vec<String> {
    let quoted = shell_words::join(inner_command);
    vec![
        "/bin/bash".to_string(),
        "-c".to_string(),
        format!(
            "timeout -s SIGKILL {} {} 2>&1",
            cmd_timeout.as_secs(),
            quoted
        ),
    ]
}

pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    pub fn connect() -> Result<Self, AppError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| AppError::DockerRunningError(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn run(
        &self,
        spec: ContainerSpec,
        docker_timeout: Duration,
    ) -> Result<RunOutcome, AppError> {
        let container_name = format!("cybergym-poc-{}", uuid::Uuid::new_v4().simple());

        let host_config = HostConfig {
            binds: Some(spec.mounts.iter().map(Mount::as_bind).collect()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.shell_command.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| AppError::DockerRunningError(e.to_string()))?;

        tracing::info!(container_id = %container.id, image = %spec.image, "created sandbox container");

        let result = self.run_and_collect(&container.id, docker_timeout).await;

        tracing::info!(container_id = %container.id, "removing sandbox container");
        if let Err(e) = self
            .docker
            .remove_container(
                &container.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!(container_id = %container.id, error = %e, "failed to remove container");
        }

        result
    }
}

impl BollardEngine {
    async fn run_and_collect(
        &self,
        container_id: &str,
        docker_timeout: Duration,
    ) -> Result<RunOutcome, AppError> {
        self.docker
            .start_container::<String>(container_id, None)
            .await
            .map_err(|e| AppError::DockerRunningError(e.to_string()))?;

        let body = async {
            let mut logs_stream = self.docker.logs(
                container_id,
                Some(LogsOptions::<String> {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            );

            let mut output = Vec::new();
            while let Some(chunk) = logs_stream.next().await {
                match chunk {
                    Ok(log) => output.extend_from_slice(&log.into_bytes()),
                    Err(e) => return Err(AppError::DockerRunningError(e.to_string())),
                }
            }

            let mut wait_stream = self
                .docker
                .wait_container(container_id, None::<WaitContainerOptions<String>>);

            let status_code = match wait_stream.next().await {
                Some(Ok(result)) => result.status_code,
                Some(Err(e)) => return Err(AppError::DockerRunningError(e.to_string())),
                None => return Err(AppError::Unexpected("container exited without a status".into())),
            };

            Ok((status_code, output))
        };

        match tokio::time::timeout(docker_timeout, body).await {
            Ok(Ok((status_code, output))) => {
                if status_code == 137 {
                    Ok(RunOutcome {
                        exit_code: CustomExitCode::Timeout as i64,
                        output: Vec::new(),
                    })
                } else {
                    Ok(RunOutcome {
                        exit_code: status_code,
                        output,
                    })
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::DockerWaitTimeout),
        }
    }
}

/// Bind-mounts the PoC read-only at `/tmp/poc`, for `arvo`/`oss-fuzz` and
/// for `oss-fuzz-latest` when `binary_dir` forces the image-plus-command
/// style.
pub fn mounted_poc(poc_host_path: &Path) -> Vec<Mount> {
    vec![Mount {
        host_path: poc_host_path.display().to_string(),
        container_path: "/tmp/poc".to_string(),
        read_only: true,
    }]
}

/// The alternative `oss-fuzz-latest` volume layout: the PoC is mounted at
/// `/testcase` and an `out/` tree is mounted alongside it for the fuzz
/// target's build artifacts.
pub fn oss_fuzz_latest_volumes(poc_host_path: &Path, out_host_path: &Path) -> Vec<Mount> {
    vec![
        Mount {
            host_path: poc_host_path.display().to_string(),
            container_path: "/testcase".to_string(),
            read_only: true,
        },
        Mount {
            host_path: out_host_path.display().to_string(),
            container_path: "/out".to_string(),
            read_only: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_quotes_and_bounds_inner_command() {
        let cmd = build_shell_command(
            &["/bin/arvo".to_string()],
            Duration::from_secs(10),
        );
        assert_eq!(
            cmd,
            vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                "timeout -s SIGKILL 10 /bin/arvo 2>&1".to_string(),
            ]
        );
    }

    #[test]
    fn shell_command_quotes_arguments_with_spaces() {
        let cmd = build_shell_command(
            &["/usr/local/bin/run_poc".to_string(), "arg with space".to_string()],
            Duration::from_secs(5),
        );
        assert_eq!(
            cmd[2],
            "timeout -s SIGKILL 5 /usr/local/bin/run_poc 'arg with space' 2>&1"
        );
    }

    #[test]
    fn mounted_poc_is_read_only_at_tmp_poc() {
        let mounts = mounted_poc(Path::new("/host/poc.bin"));
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].container_path, "/tmp/poc");
        assert!(mounts[0].read_only);
        assert_eq!(mounts[0].as_bind(), "/host/poc.bin:/tmp/poc:ro");
    }
}
