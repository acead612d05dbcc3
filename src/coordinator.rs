use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::blob::BlobStore;
use crate::checksum::verify_task;
use crate::config::Config;
use crate::db::PocStore;
use crate::error::AppError;
use crate::sandbox::{self, ContainerEngine, ContainerSpec, RunOutcome};
use crate::task_id::{self, Mode, TaskKind};
use crate::types::Payload;

/// The raw result of a submission, before `types::post_process` rewrites
/// synthetic exit codes and attaches the flag.
pub struct SubmitOutcome {
    pub task_id: String,
    pub exit_code: i64,
    pub output: String,
    pub poc_id: String,
}

/// Orchestrates the task-ID resolver, checksum verifier, PoC store, blob
/// store, and sandbox runner for one submission, and for re-verification.
pub struct Coordinator {
    store: PocStore,
    blobs: BlobStore,
    config: Config,
    engine: Arc<dyn ContainerEngine>,
}

impl Coordinator {
    pub fn new(
        store: PocStore,
        blobs: BlobStore,
        config: Config,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self {
            store,
            blobs,
            config,
            engine,
        }
    }

    pub fn store(&self) -> &PocStore {
        &self.store
    }

    pub async fn submit(&self, payload: &Payload, data: Vec<u8>, mode: Mode) -> Result<SubmitOutcome, AppError> {
        if !verify_task(&payload.task_id, &payload.agent_id, &payload.checksum, &self.config.salt) {
            return Err(AppError::InvalidChecksum);
        }

        let poc_hash = sha256_hex(&data);

        let existing = self
            .store
            .get_by_triple(&payload.agent_id, &payload.task_id, &poc_hash)
            .await?;
        if existing.len() > 1 {
            return Err(AppError::DuplicateRecords);
        }

        let poc_id = if let Some(record) = existing.into_iter().next() {
            if let Some(exit_code) = record.exit_code_for(mode) {
                let output = self.blobs.read_output(&record.poc_id, mode);
                return Ok(SubmitOutcome {
                    task_id: payload.task_id.clone(),
                    exit_code,
                    output,
                    poc_id: record.poc_id,
                });
            }
            record.poc_id
        } else {
            let poc_id = new_poc_id();
            self.blobs.write_poc(&poc_id, &data)?;
            poc_id
        };

        let record = self
            .store
            .get_or_create(&payload.agent_id, &payload.task_id, &poc_id, &poc_hash, data.len() as i64)
            .await?;

        tracing::info!(poc_id = %record.poc_id, task_id = %record.task_id, mode = mode.as_str(), "running new submission");

        let outcome = self.run_and_persist(&record.task_id, &record.poc_id, mode).await?;

        Ok(SubmitOutcome {
            task_id: payload.task_id.clone(),
            exit_code: outcome.exit_code,
            output: String::from_utf8_lossy(&outcome.output).into_owned(),
            poc_id: record.poc_id,
        })
    }

    /// Re-executes (or executes for the first time) both modes for the
    /// PoC identified by `poc_id`. `oss-fuzz-latest` tasks only ever run
    /// vul mode.
    pub async fn run_poc_id(&self, poc_id: &str, rerun: bool) -> Result<(), AppError> {
        let record = self.store.get_by_poc_id(poc_id).await?;
        if !self.blobs.poc_exists(poc_id) {
            return Err(AppError::PocBinaryMissing);
        }

        if rerun || record.vul_exit_code.is_none() {
            self.run_and_persist(&record.task_id, poc_id, Mode::Vul).await?;
        }

        let parsed = task_id::parse_task_id(&record.task_id)?;
        if parsed.kind == TaskKind::OssFuzzLatest {
            return Ok(());
        }

        if rerun || record.fix_exit_code.is_none() {
            self.run_and_persist(&record.task_id, poc_id, Mode::Fix).await?;
        }

        Ok(())
    }

    pub async fn verify_all(&self, agent_id: &str) -> Result<Vec<String>, AppError> {
        let records = self.store.get_by_agent(agent_id).await?;
        if records.is_empty() {
            return Err(AppError::NoRecordsForAgent);
        }

        let mut poc_ids = Vec::with_capacity(records.len());
        for record in &records {
            self.run_poc_id(&record.poc_id, false).await?;
            poc_ids.push(record.poc_id.clone());
        }

        Ok(poc_ids)
    }

    async fn run_and_persist(&self, task_id: &str, poc_id: &str, mode: Mode) -> Result<RunOutcome, AppError> {
        let poc_path = self.blobs.poc_bin_path(poc_id);
        if !poc_path.exists() {
            return Err(AppError::PocBinaryMissing);
        }

        let spec = self.build_spec(task_id, poc_id, mode, &poc_path)?;
        let outcome = self
            .engine
            .run(spec, Duration::from_secs(self.config.docker_timeout_secs))
            .await?;

        self.blobs.write_output(poc_id, mode, &outcome.output)?;
        self.store.update_exit_code(poc_id, mode, outcome.exit_code).await?;

        Ok(outcome)
    }

    fn build_spec(
        &self,
        task_id: &str,
        poc_id: &str,
        mode: Mode,
        poc_path: &Path,
    ) -> Result<ContainerSpec, AppError> {
        let parsed = task_id::parse_task_id(task_id)?;

        if parsed.kind == TaskKind::OssFuzzLatest {
            if mode == Mode::Fix || !self.config.enable_oss_fuzz_latest {
                return Err(AppError::OssFuzzLatestUnsupported);
            }

            let command = vec!["/usr/local/bin/run_poc".to_string()];
            let shell_command =
                sandbox::build_shell_command(&command, Duration::from_secs(self.config.cmd_timeout_secs));
            let image = "cybergym/oss-fuzz-latest:latest-vul".to_string();

            let mounts = if self.config.binary_dir.is_some() {
                sandbox::mounted_poc(poc_path)
            } else {
                let out_dir = self.blobs.path_for(poc_id).join("out");
                std::fs::create_dir_all(&out_dir)?;
                sandbox::oss_fuzz_latest_volumes(poc_path, &out_dir)
            };

            return Ok(ContainerSpec {
                image,
                shell_command,
                mounts,
            });
        }

        let resolved = task_id::resolve(task_id, mode)?;
        let shell_command =
            sandbox::build_shell_command(&resolved.command, Duration::from_secs(self.config.cmd_timeout_secs));

        Ok(ContainerSpec {
            image: resolved.image,
            shell_command,
            mounts: sandbox::mounted_poc(poc_path),
        })
    }
}

fn new_poc_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
