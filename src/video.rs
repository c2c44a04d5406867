use crate::models::VideoResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video command is empty")]
    EmptyCommand,
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {}; stderr: {}", exit_label(.exit_code), .stderr.trim())]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Turns a directory of page screenshots into a video.
#[async_trait]
pub trait VideoAssembler: Send + Sync {
    async fn assemble_video(
        &self,
        job_id: &str,
        images_dir: &Path,
    ) -> Result<VideoResult, VideoError>;
}

/// Runs an external command, by default `sh scripts/make-videos.sh`, from the
/// service's working directory. The command finds its inputs through
/// `IMAGES_DIR` and writes next to them in `OUTPUT_DIR` (the job directory).
pub struct CommandVideoAssembler {
    program: String,
    args: Vec<String>,
}

impl CommandVideoAssembler {
    /// Splits `command` on whitespace. There is no shell-style quoting, so
    /// a script path or argument containing spaces cannot be expressed;
    /// wrap such a command in a script without spaces in its path.
    pub fn from_command_line(command: &str) -> Result<Self, VideoError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(VideoError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl VideoAssembler for CommandVideoAssembler {
    async fn assemble_video(
        &self,
        job_id: &str,
        images_dir: &Path,
    ) -> Result<VideoResult, VideoError> {
        let command = self.display();
        let images_dir = std::path::absolute(images_dir).map_err(|source| VideoError::Spawn {
            command: command.clone(),
            source,
        })?;
        let job_dir = images_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        info!(target = "reel.video", job_id, command = %command, "video_command_started");
        let output = Command::new(&self.program)
            .args(&self.args)
            .env("IMAGES_DIR", &images_dir)
            .env("OUTPUT_DIR", &job_dir)
            .env("JOB_ID", job_id)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| VideoError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        if !output.status.success() {
            return Err(VideoError::Failed {
                command,
                exit_code,
                stdout,
                stderr,
            });
        }

        if !stdout.trim().is_empty() {
            info!(target = "reel.video", job_id, stdout = %stdout.trim(), "video_command_stdout");
        }
        if !stderr.trim().is_empty() {
            warn!(target = "reel.video", job_id, stderr = %stderr.trim(), "video_command_stderr");
        }
        info!(target = "reel.video", job_id, "video_command_completed");

        Ok(VideoResult {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job_images_dir() -> PathBuf {
        let root = std::env::temp_dir().join(format!("listing-reel-video-{}", Uuid::new_v4()));
        let images = root.join("images");
        std::fs::create_dir_all(&images).unwrap();
        images
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            CommandVideoAssembler::from_command_line("   "),
            Err(VideoError::EmptyCommand)
        ));
    }

    #[test]
    fn command_line_splits_on_whitespace_only() {
        let assembler =
            CommandVideoAssembler::from_command_line("sh  \"my scripts/make.sh\" --fast").unwrap();
        assert_eq!(assembler.program, "sh");
        assert_eq!(assembler.args, vec!["\"my", "scripts/make.sh\"", "--fast"]);
    }

    #[tokio::test]
    async fn surfaces_stdout_and_stderr_on_success() {
        let images = job_images_dir();
        let assembler = CommandVideoAssembler {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "echo \"dir=$IMAGES_DIR job=$JOB_ID\"; echo warn >&2".into(),
            ],
        };
        let result = assembler.assemble_video("T1", &images).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("job=T1"));
        assert!(result.stdout.contains(images.to_str().unwrap()));
        assert_eq!(result.stderr.trim(), "warn");
        let _ = std::fs::remove_dir_all(images.parent().unwrap());
    }

    #[tokio::test]
    async fn output_dir_is_the_job_directory() {
        let images = job_images_dir();
        let assembler = CommandVideoAssembler {
            program: "sh".into(),
            args: vec!["-c".into(), "ls -d \"$OUTPUT_DIR\"/images".into()],
        };
        let result = assembler.assemble_video("T1", &images).await.unwrap();
        assert_eq!(result.stdout.trim(), images.to_str().unwrap());
        let _ = std::fs::remove_dir_all(images.parent().unwrap());
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_output() {
        let images = job_images_dir();
        let assembler = CommandVideoAssembler {
            program: "sh".into(),
            args: vec!["-c".into(), "echo partial; echo boom >&2; exit 3".into()],
        };
        let err = assembler.assemble_video("T1", &images).await.unwrap_err();
        match err {
            VideoError::Failed {
                exit_code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stdout.trim(), "partial");
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        let _ = std::fs::remove_dir_all(images.parent().unwrap());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let images = job_images_dir();
        let assembler =
            CommandVideoAssembler::from_command_line("listing-reel-no-such-binary --flag").unwrap();
        let err = assembler.assemble_video("T1", &images).await.unwrap_err();
        assert!(matches!(err, VideoError::Spawn { .. }));
        let _ = std::fs::remove_dir_all(images.parent().unwrap());
    }
}
