//! # Command-Line Engine Adapter
//!
//! Adapter for AutoDock-family docking binaries (Vina, Smina, GNINA) that
//! run as local subprocesses. One adapter instance wraps one configured
//! binary; the flavor selects argument mapping, accepted parameter ranges,
//! and the stdout table format to parse.
//!
//! Resource guarantees: every invocation runs inside its own scratch
//! directory (dropped on every exit path) and the child process is spawned
//! with kill-on-drop, so a timeout, cancellation, or panic can not leak a
//! subprocess or temp files.

use super::{EngineInfo, EngineInput, EngineOutput, EnginePort};
use crate::error::{MoldockError, Result, ValidationViolation};
use crate::models::{DockingOutcome, DockingPose};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum bytes of engine stderr/stdout kept as diagnostics.
const DIAGNOSTIC_TAIL_BYTES: usize = 16 * 1024;

/// Which docking binary family this adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFlavor {
    Vina,
    Smina,
    Gnina,
}

impl EngineFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vina => "vina",
            Self::Smina => "smina",
            Self::Gnina => "gnina",
        }
    }

    fn capabilities(&self) -> Vec<String> {
        let mut caps = vec!["rigid_docking".to_string(), "search_box".to_string()];
        if matches!(self, Self::Gnina) {
            caps.push("cnn_scoring".to_string());
        }
        if matches!(self, Self::Smina | Self::Gnina) {
            caps.push("custom_scoring".to_string());
        }
        caps
    }

    fn parameter_ranges(&self) -> BTreeMap<String, (f64, f64)> {
        let mut ranges = BTreeMap::new();
        ranges.insert("exhaustiveness".to_string(), (1.0, 64.0));
        ranges.insert("num_modes".to_string(), (1.0, 20.0));
        for axis in ["x", "y", "z"] {
            ranges.insert(format!("center_{axis}"), (-1000.0, 1000.0));
            ranges.insert(format!("size_{axis}"), (1.0, 100.0));
        }
        ranges
    }
}

/// Subprocess adapter satisfying [`EnginePort`] for one configured binary.
pub struct CommandLineEngine {
    flavor: EngineFlavor,
    binary: PathBuf,
    version: String,
    /// Directory where pose artifacts survive scratch cleanup; None drops
    /// them with the scratch dir
    artifacts_dir: Option<PathBuf>,
    /// Cancellation handles for in-flight invocations, by job id
    in_flight: DashMap<Uuid, Arc<Notify>>,
}

impl CommandLineEngine {
    pub fn new(flavor: EngineFlavor, binary: impl Into<PathBuf>) -> Self {
        Self {
            flavor,
            binary: binary.into(),
            version: "unknown".to_string(),
            artifacts_dir: None,
            in_flight: DashMap::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    fn build_args(&self, input: &EngineInput, out_file: &Path) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(receptor) = input.inputs.get("protein").or_else(|| input.inputs.get("receptor")) {
            args.push("--receptor".to_string());
            args.push(local_path(receptor));
        }
        if let Some(ligand) = input.inputs.get("ligand") {
            args.push("--ligand".to_string());
            args.push(local_path(ligand));
        }

        args.push("--out".to_string());
        args.push(out_file.display().to_string());

        for (param, flag) in [
            ("exhaustiveness", "--exhaustiveness"),
            ("num_modes", "--num_modes"),
            ("center_x", "--center_x"),
            ("center_y", "--center_y"),
            ("center_z", "--center_z"),
            ("size_x", "--size_x"),
            ("size_y", "--size_y"),
            ("size_z", "--size_z"),
        ] {
            if let Some(value) = input.params.get(param) {
                args.push(flag.to_string());
                args.push(render_number(value));
            }
        }

        if self.flavor == EngineFlavor::Gnina {
            if let Some(scoring) = input.params.get("cnn_scoring").and_then(|v| v.as_str()) {
                args.push("--cnn_scoring".to_string());
                args.push(scoring.to_string());
            }
        }

        args
    }

    /// Parse the pose table the binaries print to stdout.
    ///
    /// Vina/Smina rows: `rank  affinity  rmsd_lb  rmsd_ub`.
    /// GNINA rows: `rank  affinity  cnn_pose_score  cnn_affinity`.
    fn parse_poses(&self, stdout: &str) -> Vec<DockingPose> {
        let mut poses = Vec::new();
        for line in stdout.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                continue;
            }
            let Ok(rank) = fields[0].parse::<u32>() else {
                continue;
            };
            let Ok(affinity) = fields[1].parse::<f64>() else {
                continue;
            };

            let pose = match self.flavor {
                EngineFlavor::Gnina => DockingPose {
                    rank,
                    affinity_kcal_mol: affinity,
                    rmsd_lb: None,
                    rmsd_ub: None,
                    confidence: fields.get(2).and_then(|f| f.parse().ok()),
                },
                EngineFlavor::Vina | EngineFlavor::Smina => DockingPose {
                    rank,
                    affinity_kcal_mol: affinity,
                    rmsd_lb: fields.get(2).and_then(|f| f.parse().ok()),
                    rmsd_ub: fields.get(3).and_then(|f| f.parse().ok()),
                    confidence: None,
                },
            };
            poses.push(pose);
        }
        poses
    }

    fn persist_artifact(&self, job_id: Uuid, out_file: &Path) -> Vec<String> {
        let Some(dir) = &self.artifacts_dir else {
            return Vec::new();
        };
        if !out_file.exists() {
            return Vec::new();
        }
        let target = dir.join(format!("{job_id}_poses.pdbqt"));
        match std::fs::copy(out_file, &target) {
            Ok(_) => vec![format!("file://{}", target.display())],
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to persist pose artifact");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl EnginePort for CommandLineEngine {
    fn engine_info(&self) -> EngineInfo {
        EngineInfo {
            name: self.flavor.name().to_string(),
            version: self.version.clone(),
            capabilities: self.flavor.capabilities(),
            parameter_ranges: self.flavor.parameter_ranges(),
        }
    }

    fn validate_input(&self, input: &EngineInput) -> Vec<ValidationViolation> {
        let mut violations = Vec::new();

        if !input.inputs.contains_key("ligand") {
            violations.push(ValidationViolation::new("ligand", "ligand input is required"));
        }
        if !input.inputs.contains_key("protein") && !input.inputs.contains_key("receptor") {
            violations.push(ValidationViolation::new(
                "protein",
                "protein/receptor input is required",
            ));
        }

        for (name, (min, max)) in self.flavor.parameter_ranges() {
            if let Some(value) = input.params.get(&name).and_then(|v| v.as_f64()) {
                if value < min || value > max {
                    violations.push(ValidationViolation::new(
                        name,
                        format!("value {value} outside engine range [{min}, {max}]"),
                    ));
                }
            }
        }

        if self.flavor != EngineFlavor::Gnina && input.params.contains_key("cnn_scoring") {
            violations.push(ValidationViolation::new(
                "cnn_scoring",
                format!("not supported by the {} engine", self.flavor.name()),
            ));
        }

        violations
    }

    async fn execute(&self, input: &EngineInput, timeout: Duration) -> Result<EngineOutput> {
        let started = Instant::now();

        // Scratch dir is dropped on every exit path below.
        let scratch = tempfile::tempdir().map_err(|e| MoldockError::EngineExecution {
            detail: format!("failed to create scratch directory: {e}"),
        })?;
        let out_file = scratch.path().join("poses.pdbqt");
        let args = self.build_args(input, &out_file);

        debug!(job_id = %input.job_id, engine = self.flavor.name(), ?args, "spawning engine");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(scratch.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MoldockError::EngineUnavailable {
                name: self.flavor.name().to_string(),
                reason: format!("failed to spawn {}: {e}", self.binary.display()),
            })?;

        let cancel = Arc::new(Notify::new());
        self.in_flight.insert(input.job_id, Arc::clone(&cancel));

        // Pipes are drained concurrently with the wait: a child whose output
        // exceeds the OS pipe buffer would otherwise block on a full pipe and
        // never exit, turning a successful run into a timeout.
        let stdout_task = spawn_drain(child.stdout.take());
        let stderr_task = spawn_drain(child.stderr.take());

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(timeout) => None,
            _ = cancel.notified() => {
                self.in_flight.remove(&input.job_id);
                let _ = child.kill().await;
                info!(job_id = %input.job_id, "engine invocation cancelled");
                return Err(MoldockError::EngineExecution {
                    detail: "cancelled by caller".to_string(),
                });
            }
        };
        self.in_flight.remove(&input.job_id);

        let Some(status) = waited else {
            let _ = child.kill().await;
            warn!(job_id = %input.job_id, timeout_secs = timeout.as_secs(), "engine timed out");
            return Err(MoldockError::ExecutionTimeout {
                timeout_secs: timeout.as_secs(),
            });
        };

        let status = status.map_err(|e| MoldockError::EngineExecution {
            detail: format!("failed to reap engine process: {e}"),
        })?;

        // Full stdout is needed for pose parsing; stderr is kept only as a
        // diagnostic tail.
        let stdout_bytes = stdout_task.await.unwrap_or_default();
        let stdout = String::from_utf8_lossy(&stdout_bytes).to_string();
        let stderr = tail_of(&stderr_task.await.unwrap_or_default());

        if !status.success() {
            return Err(MoldockError::EngineExecution {
                detail: format!(
                    "{} exited with {status}; stderr: {stderr}",
                    self.flavor.name()
                ),
            });
        }

        let poses = self.parse_poses(&stdout);
        if poses.is_empty() {
            // A successful exit with no parseable poses is an engine fault,
            // not an empty result.
            return Err(MoldockError::EngineExecution {
                detail: format!(
                    "{} produced no poses; stdout: {}",
                    self.flavor.name(),
                    tail_of(&stdout_bytes)
                ),
            });
        }

        let output_refs = self.persist_artifact(input.job_id, &out_file);

        Ok(EngineOutput {
            outcome: DockingOutcome {
                poses,
                engine_version: Some(self.version.clone()),
                output_refs,
            },
            execution_time: started.elapsed(),
            diagnostics: Some(stderr),
        })
    }

    async fn health_check(&self) -> bool {
        tokio::fs::metadata(&self.binary).await.is_ok()
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        match self.in_flight.get(&job_id) {
            Some(cancel) => {
                cancel.notify_one();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn local_path(uri: &str) -> String {
    uri.strip_prefix("file://").unwrap_or(uri).to_string()
}

fn render_number(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string().trim_matches('"').to_string(),
    }
}

/// Read a pipe to EOF on its own task. A kill closes the pipe, so the task
/// always terminates even when the invocation is abandoned.
fn spawn_drain<R>(pipe: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = pipe else {
            return Vec::new();
        };
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        buf
    })
}

fn tail_of(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(DIAGNOSTIC_TAIL_BYTES);
    String::from_utf8_lossy(&buf[start..]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_with(params: serde_json::Map<String, serde_json::Value>) -> EngineInput {
        let mut inputs = BTreeMap::new();
        inputs.insert("ligand".to_string(), "file:///tmp/l1.pdbqt".to_string());
        inputs.insert("protein".to_string(), "file:///tmp/p1.pdbqt".to_string());
        EngineInput {
            job_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            inputs,
            params,
        }
    }

    #[test]
    fn test_validate_reports_all_violations() {
        let engine = CommandLineEngine::new(EngineFlavor::Vina, "/usr/bin/vina");
        let mut params = serde_json::Map::new();
        params.insert("exhaustiveness".to_string(), json!(500));
        params.insert("cnn_scoring".to_string(), json!("rescore"));

        let violations = engine.validate_input(&input_with(params));
        // out-of-range exhaustiveness + cnn_scoring unsupported by vina
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_gnina_accepts_cnn_scoring() {
        let engine = CommandLineEngine::new(EngineFlavor::Gnina, "/usr/bin/gnina");
        let mut params = serde_json::Map::new();
        params.insert("cnn_scoring".to_string(), json!("rescore"));
        assert!(engine.validate_input(&input_with(params)).is_empty());
    }

    #[test]
    fn test_parse_vina_pose_table() {
        let engine = CommandLineEngine::new(EngineFlavor::Vina, "/usr/bin/vina");
        let stdout = "\
mode |   affinity | dist from best mode
     | (kcal/mol) | rmsd l.b.| rmsd u.b.
-----+------------+----------+----------
   1       -9.1      0.000      0.000
   2       -8.4      1.922      3.813
";
        let poses = engine.parse_poses(stdout);
        assert_eq!(poses.len(), 2);
        assert_eq!(poses[0].rank, 1);
        assert_eq!(poses[0].affinity_kcal_mol, -9.1);
        assert_eq!(poses[1].rmsd_lb, Some(1.922));
        assert!(poses[0].confidence.is_none());
    }

    #[test]
    fn test_parse_gnina_pose_table_reads_cnn_score() {
        let engine = CommandLineEngine::new(EngineFlavor::Gnina, "/usr/bin/gnina");
        let stdout = "\
mode |  affinity  |  CNNscore | CNNaffinity
   1       -9.1       0.9512       -8.77
   2       -8.0       0.4403       -7.21
";
        let poses = engine.parse_poses(stdout);
        assert_eq!(poses.len(), 2);
        assert_eq!(poses[0].confidence, Some(0.9512));
    }

    #[test]
    fn test_build_args_maps_box_parameters() {
        let engine = CommandLineEngine::new(EngineFlavor::Vina, "/usr/bin/vina");
        let mut params = serde_json::Map::new();
        params.insert("exhaustiveness".to_string(), json!(8));
        params.insert("size_x".to_string(), json!(20.0));

        let input = input_with(params);
        let out = std::env::temp_dir().join("out.pdbqt");
        let args = engine.build_args(&input, &out);

        let rendered = args.join(" ");
        assert!(rendered.contains("--receptor /tmp/p1.pdbqt"));
        assert!(rendered.contains("--ligand /tmp/l1.pdbqt"));
        assert!(rendered.contains("--exhaustiveness 8"));
        assert!(rendered.contains("--size_x 20.0"));
    }

    #[tokio::test]
    async fn test_large_pose_output_completes_within_timeout() {
        use std::os::unix::fs::PermissionsExt;

        // 20k pose rows is well past the OS pipe buffer; the run must still
        // exit cleanly and parse every row.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("vina.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nawk 'BEGIN { for (i = 1; i <= 20000; i++) printf \"%d  -9.1  0.000  0.000\\n\", i }'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = CommandLineEngine::new(EngineFlavor::Vina, &script);
        let output = engine
            .execute(&input_with(serde_json::Map::new()), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.outcome.poses.len(), 20_000);
        assert_eq!(output.outcome.poses[0].affinity_kcal_mol, -9.1);
    }

    #[tokio::test]
    async fn test_health_check_fails_for_missing_binary() {
        let engine = CommandLineEngine::new(EngineFlavor::Vina, "/nonexistent/vina");
        assert!(!engine.health_check().await);
    }

    #[tokio::test]
    async fn test_cancel_without_in_flight_job_is_noop() {
        let engine = CommandLineEngine::new(EngineFlavor::Vina, "/usr/bin/vina");
        assert!(!engine.cancel(Uuid::new_v4()).await.unwrap());
    }
}
