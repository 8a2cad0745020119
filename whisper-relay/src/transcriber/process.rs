use async_trait::async_trait;
use serde_json::Value;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument};

use super::{Transcriber, Transcript, TranscriptionError};
use crate::config::TranscriberConfig;
use crate::upload::LanguageHint;

/// Everything a finished child left behind. `exit_code` is `None` when it was killed by a signal.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs the configured speech-recognition program once per request.
#[derive(Debug, Clone)]
pub struct ProcessTranscriber {
    config: TranscriberConfig,
}

impl ProcessTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    /// Resolve the executable and confirm the entry script exists.
    pub fn check(&self) -> Result<PathBuf, TranscriptionError> {
        let executable = resolve_executable(&self.config.program).ok_or_else(|| TranscriptionError::NotConfigured {
            reason: format!("executable `{}` could not be found", self.config.program),
        })?;

        if !self.config.script.is_file() {
            return Err(TranscriptionError::NotConfigured {
                reason: format!("entry script `{}` does not exist", self.config.script.display()),
            });
        }

        Ok(executable)
    }
}

#[async_trait]
impl Transcriber for ProcessTranscriber {
    #[instrument(skip_all, fields(program = %self.config.program))]
    async fn transcribe(&self, audio: &Path, language: &LanguageHint) -> Result<Transcript, TranscriptionError> {
        let executable = self.check()?;
        let args = build_args(&self.config.script, audio, language);

        debug!(executable = %executable.display(), ?args, "Spawning transcriber");

        let mut child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Only reached on the collect error path; a normal run has already been waited on
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscriptionError::Spawn {
                program: executable.display().to_string(),
                source,
            })?;

        let outcome = collect(&mut child).await.map_err(TranscriptionError::Collect)?;

        info!(
            exit_code = ?outcome.exit_code,
            stdout_bytes = outcome.stdout.len(),
            stderr_bytes = outcome.stderr.len(),
            "Transcriber exited"
        );

        interpret_outcome(outcome)
    }
}

/// `<script> <audio> [--language <code>]`
pub fn build_args(script: &Path, audio: &Path, language: &LanguageHint) -> Vec<OsString> {
    let mut args = vec![script.as_os_str().to_owned(), audio.as_os_str().to_owned()];
    if let Some(code) = language.code() {
        args.push("--language".into());
        args.push(code.into());
    }
    args
}

/// Find `program` the way a shell would: paths are checked directly, bare names are searched
/// for on `PATH`.
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.is_absolute() || candidate.components().count() > 1 {
        // An explicit path that exists is used as given; spawning reports why it cannot run
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    search_path(program, &std::env::var_os("PATH")?)
}

/// First entry of a `PATH`-style list holding an executable `program`. Non-executable files
/// with the same name are skipped, as a shell would.
fn search_path(program: &str, path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path)
        .flat_map(|dir| with_platform_extensions(dir.join(program)))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(windows)]
fn with_platform_extensions(base: PathBuf) -> Vec<PathBuf> {
    if base.extension().is_some() {
        vec![base]
    } else {
        vec![base.with_extension("exe"), base]
    }
}

#[cfg(not(windows))]
fn with_platform_extensions(base: PathBuf) -> Vec<PathBuf> {
    vec![base]
}

/// Drain stdout and stderr together until both close, then reap the child.
async fn collect(child: &mut Child) -> io::Result<ProcessOutcome> {
    let mut stdout = child.stdout.take().ok_or_else(|| io::Error::other("stdout was not captured"))?;
    let mut stderr = child.stderr.take().ok_or_else(|| io::Error::other("stderr was not captured"))?;

    let mut out = Vec::new();
    let mut err = Vec::new();
    tokio::try_join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err))?;

    let status = child.wait().await?;

    Ok(ProcessOutcome {
        exit_code: status.code(),
        stdout: out,
        stderr: err,
    })
}

/// Map a finished process to a transcript or a failure.
///
/// Exit 0 requires stdout to be a JSON object with a string `transcription` field. Any other exit
/// is a failure whose message comes from the `error` field of a JSON object on stderr, if one can
/// be found.
pub fn interpret_outcome(outcome: ProcessOutcome) -> Result<Transcript, TranscriptionError> {
    let stdout = String::from_utf8_lossy(&outcome.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&outcome.stderr).into_owned();

    if outcome.exit_code == Some(0) {
        return match string_field(&stdout, "transcription") {
            Some(text) => Ok(Transcript::new(text)),
            None => Err(TranscriptionError::InvalidOutput { stdout }),
        };
    }

    Err(TranscriptionError::Failed {
        message: error_message(&stderr),
        exit_code: outcome.exit_code,
        stderr,
    })
}

fn string_field(json: &str, field: &str) -> Option<String> {
    let value: Value = serde_json::from_str(json.trim()).ok()?;
    value.get(field)?.as_str().map(str::to_owned)
}

/// The whole of stderr first, then its last non-empty line: the program may log warnings
/// before printing its JSON error.
fn error_message(stderr: &str) -> Option<String> {
    let parse = |s: &str| string_field(s, "error").filter(|m| !m.trim().is_empty());

    parse(stderr).or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()).and_then(parse))
}
