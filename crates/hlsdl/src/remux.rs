//! Remux engines that join ordered segment files into one container without
//! re-encoding.
//!
//! An engine behaves like a small scratch file system plus a concatenation
//! command: it must be [`load`](RemuxEngine::load)ed before any other call,
//! files are written into it, [`run`](RemuxEngine::run) produces the output file,
//! and [`terminate`](RemuxEngine::terminate) releases everything it holds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use crate::HlsError;
use crate::config::{RemuxBackend, RemuxConfig};

/// Concatenate `inputs` in the given order into `output`, copying streams as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatJob {
    pub inputs: Vec<String>,
    pub output: String,
}

#[async_trait]
pub trait RemuxEngine: Send {
    async fn load(&mut self) -> Result<(), HlsError>;
    async fn write_file(&mut self, name: &str, data: Bytes) -> Result<(), HlsError>;
    async fn unlink_file(&mut self, name: &str) -> Result<(), HlsError>;
    async fn run(&mut self, job: &ConcatJob) -> Result<(), HlsError>;
    async fn read_file(&mut self, name: &str) -> Result<Bytes, HlsError>;
    async fn terminate(&mut self) -> Result<(), HlsError>;
}

/// Creates a fresh, unloaded engine for one job.
pub fn create_engine(config: &RemuxConfig) -> Box<dyn RemuxEngine> {
    match &config.backend {
        RemuxBackend::Ffmpeg { binary } => Box::new(FfmpegEngine::new(binary.clone())),
        RemuxBackend::Concat => Box::new(ConcatEngine::new()),
    }
}

/// What the configured backend can do on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentCapability {
    pub engine: &'static str,
    pub version: Option<String>,
}

/// Checks once, before any job starts, that the configured backend is usable.
pub async fn check_environment(config: &RemuxConfig) -> Result<EnvironmentCapability, HlsError> {
    match &config.backend {
        RemuxBackend::Concat => Ok(EnvironmentCapability {
            engine: "concat",
            version: None,
        }),
        RemuxBackend::Ffmpeg { binary } => {
            let output = Command::new(binary)
                .arg("-version")
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| {
                    HlsError::unsupported_environment(format!(
                        "cannot execute {}: {e}",
                        binary.display()
                    ))
                })?;
            if !output.status.success() {
                return Err(HlsError::unsupported_environment(format!(
                    "{} -version exited with {}",
                    binary.display(),
                    output.status
                )));
            }

            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|line| line.trim().to_string());
            info!(version = ?version, "Found ffmpeg");
            Ok(EnvironmentCapability {
                engine: "ffmpeg",
                version,
            })
        }
    }
}

fn check_file_name(name: &str) -> Result<(), HlsError> {
    let valid = !name.is_empty()
        && !name.contains(['/', '\\', '|', '\''])
        && name != "."
        && name != "..";
    if valid {
        Ok(())
    } else {
        Err(HlsError::Internal {
            reason: format!("invalid engine file name `{name}`"),
        })
    }
}

fn not_loaded() -> HlsError {
    HlsError::Internal {
        reason: "remux engine used before load()".to_string(),
    }
}

/// Longest `concat:` argument passed on the command line. Linux limits a single
/// argument to 128 KiB; longer jobs go through a list file.
const MAX_CONCAT_ARG_LEN: usize = 32 * 1024;

const CONCAT_LIST_FILE: &str = "inputs.txt";

/// How the inputs of a job are handed to ffmpeg.
#[derive(Debug, PartialEq, Eq)]
enum ConcatInput {
    /// `concat:a|b|...` protocol argument
    Protocol(String),
    /// Contents of a concat demuxer list file
    ListFile(String),
}

impl ConcatInput {
    fn for_job(job: &ConcatJob) -> Self {
        let arg = format!("concat:{}", job.inputs.join("|"));
        if arg.len() <= MAX_CONCAT_ARG_LEN {
            return Self::Protocol(arg);
        }
        let list = job
            .inputs
            .iter()
            .map(|name| format!("file '{name}'\n"))
            .collect();
        Self::ListFile(list)
    }
}

/// Runs `ffmpeg -i concat:a|b|... -c copy <output>` inside a per-job temporary directory.
pub struct FfmpegEngine {
    binary: PathBuf,
    workdir: Option<TempDir>,
}

impl FfmpegEngine {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            workdir: None,
        }
    }

    fn dir(&self) -> Result<&Path, HlsError> {
        self.workdir.as_ref().map(TempDir::path).ok_or_else(not_loaded)
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, HlsError> {
        check_file_name(name)?;
        Ok(self.dir()?.join(name))
    }
}

#[async_trait]
impl RemuxEngine for FfmpegEngine {
    async fn load(&mut self) -> Result<(), HlsError> {
        if self.workdir.is_none() {
            let dir = tempfile::Builder::new().prefix("hlsdl-").tempdir()?;
            debug!(path = %dir.path().display(), "Created remux work directory");
            self.workdir = Some(dir);
        }
        Ok(())
    }

    async fn write_file(&mut self, name: &str, data: Bytes) -> Result<(), HlsError> {
        let path = self.path_of(name)?;
        tokio::fs::write(path, &data).await?;
        Ok(())
    }

    async fn unlink_file(&mut self, name: &str) -> Result<(), HlsError> {
        let path = self.path_of(name)?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn run(&mut self, job: &ConcatJob) -> Result<(), HlsError> {
        for name in job.inputs.iter().chain(std::iter::once(&job.output)) {
            check_file_name(name)?;
        }
        let dir = self.dir()?;

        let input = match ConcatInput::for_job(job) {
            ConcatInput::Protocol(arg) => vec!["-i".to_string(), arg],
            ConcatInput::ListFile(list) => {
                tokio::fs::write(dir.join(CONCAT_LIST_FILE), list).await?;
                ["-f", "concat", "-safe", "0", "-i", CONCAT_LIST_FILE]
                    .map(String::from)
                    .to_vec()
            }
        };

        let output = Command::new(&self.binary)
            .current_dir(dir)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(&input)
            .args(["-c", "copy"])
            .arg(&job.output)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                HlsError::stitch(format!("failed to spawn {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HlsError::stitch(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        debug!(inputs = job.inputs.len(), output = %job.output, "ffmpeg concat finished");
        Ok(())
    }

    async fn read_file(&mut self, name: &str) -> Result<Bytes, HlsError> {
        let path = self.path_of(name)?;
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }

    async fn terminate(&mut self) -> Result<(), HlsError> {
        if let Some(dir) = self.workdir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

/// Joins inputs byte for byte in memory. MPEG-TS segments stay playable when
/// concatenated this way, so no external tool is needed.
#[derive(Default)]
pub struct ConcatEngine {
    files: Option<HashMap<String, Bytes>>,
}

impl ConcatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&mut self) -> Result<&mut HashMap<String, Bytes>, HlsError> {
        self.files.as_mut().ok_or_else(not_loaded)
    }
}

#[async_trait]
impl RemuxEngine for ConcatEngine {
    async fn load(&mut self) -> Result<(), HlsError> {
        self.files.get_or_insert_with(HashMap::new);
        Ok(())
    }

    async fn write_file(&mut self, name: &str, data: Bytes) -> Result<(), HlsError> {
        check_file_name(name)?;
        self.files()?.insert(name.to_string(), data);
        Ok(())
    }

    async fn unlink_file(&mut self, name: &str) -> Result<(), HlsError> {
        self.files()?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| HlsError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such file `{name}`"),
                ),
            })
    }

    async fn run(&mut self, job: &ConcatJob) -> Result<(), HlsError> {
        check_file_name(&job.output)?;
        let files = self.files()?;
        if job.inputs.is_empty() {
            return Err(HlsError::stitch("concat job has no inputs"));
        }

        let mut total = 0;
        for name in &job.inputs {
            let data = files
                .get(name)
                .ok_or_else(|| HlsError::stitch(format!("missing input `{name}`")))?;
            total += data.len();
        }

        let mut output = BytesMut::with_capacity(total);
        for name in &job.inputs {
            if let Some(data) = files.get(name) {
                output.extend_from_slice(data);
            }
        }
        files.insert(job.output.clone(), output.freeze());
        Ok(())
    }

    async fn read_file(&mut self, name: &str) -> Result<Bytes, HlsError> {
        self.files()?.get(name).cloned().ok_or_else(|| HlsError::Io {
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file `{name}`"),
            ),
        })
    }

    async fn terminate(&mut self) -> Result<(), HlsError> {
        self.files = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(inputs: &[&str]) -> ConcatJob {
        ConcatJob {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: "output.ts".to_string(),
        }
    }

    #[tokio::test]
    async fn concat_engine_joins_inputs_in_job_order() {
        let mut engine = ConcatEngine::new();
        engine.load().await.unwrap();
        engine.write_file("2.ts", Bytes::from_static(b"CC")).await.unwrap();
        engine.write_file("0.ts", Bytes::from_static(b"AA")).await.unwrap();

        engine.run(&job(&["0.ts", "2.ts"])).await.unwrap();
        let output = engine.read_file("output.ts").await.unwrap();
        assert_eq!(&output[..], b"AACC");
    }

    #[tokio::test]
    async fn concat_engine_requires_load() {
        let mut engine = ConcatEngine::new();
        let result = engine.write_file("0.ts", Bytes::from_static(b"A")).await;
        assert!(matches!(result, Err(HlsError::Internal { .. })));
    }

    #[tokio::test]
    async fn concat_engine_reports_missing_input() {
        let mut engine = ConcatEngine::new();
        engine.load().await.unwrap();
        engine.write_file("0.ts", Bytes::from_static(b"A")).await.unwrap();

        let result = engine.run(&job(&["0.ts", "1.ts"])).await;
        assert!(matches!(result, Err(HlsError::Stitch { .. })));
        assert!(engine.read_file("output.ts").await.is_err());
    }

    #[tokio::test]
    async fn terminate_releases_files() {
        let mut engine = ConcatEngine::new();
        engine.load().await.unwrap();
        engine.write_file("0.ts", Bytes::from_static(b"A")).await.unwrap();
        engine.terminate().await.unwrap();
        assert!(engine.read_file("0.ts").await.is_err());
    }

    #[tokio::test]
    async fn ffmpeg_engine_stores_files_in_work_directory() {
        let mut engine = FfmpegEngine::new(PathBuf::from("ffmpeg"));
        engine.load().await.unwrap();
        let dir = engine.dir().unwrap().to_path_buf();

        engine.write_file("0.ts", Bytes::from_static(b"segment")).await.unwrap();
        assert_eq!(&engine.read_file("0.ts").await.unwrap()[..], b"segment");
        engine.unlink_file("0.ts").await.unwrap();
        assert!(engine.read_file("0.ts").await.is_err());

        engine.terminate().await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn file_names_cannot_escape_the_engine() {
        let mut engine = FfmpegEngine::new(PathBuf::from("ffmpeg"));
        engine.load().await.unwrap();
        let result = engine
            .write_file("../escape.ts", Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(HlsError::Internal { .. })));
        engine.terminate().await.unwrap();
    }

    #[test]
    fn large_jobs_use_a_concat_list_file() {
        let small = job(&["0.ts", "1.ts"]);
        assert_eq!(
            ConcatInput::for_job(&small),
            ConcatInput::Protocol("concat:0.ts|1.ts".to_string())
        );

        let names: Vec<String> = (0..20_000).map(|i| format!("{i}.ts")).collect();
        let large = ConcatJob {
            inputs: names,
            output: "output.ts".to_string(),
        };
        let ConcatInput::ListFile(list) = ConcatInput::for_job(&large) else {
            panic!("expected a list file for 20000 inputs");
        };
        let lines: Vec<&str> = list.lines().collect();
        assert_eq!(lines.len(), 20_000);
        assert_eq!(lines[0], "file '0.ts'");
        assert_eq!(lines[19_999], "file '19999.ts'");
    }

    #[tokio::test]
    async fn missing_ffmpeg_binary_is_an_unsupported_environment() {
        let config = RemuxConfig {
            backend: RemuxBackend::Ffmpeg {
                binary: PathBuf::from("/nonexistent/hlsdl-test/ffmpeg"),
            },
            ..Default::default()
        };
        let result = check_environment(&config).await;
        assert!(matches!(
            result,
            Err(HlsError::UnsupportedEnvironment { .. })
        ));
    }

    #[tokio::test]
    async fn concat_backend_is_always_available() {
        let config = RemuxConfig {
            backend: RemuxBackend::Concat,
            ..Default::default()
        };
        let capability = check_environment(&config).await.unwrap();
        assert_eq!(capability.engine, "concat");
    }
}
