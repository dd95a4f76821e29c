//! Output directory layout and the per-session CSV writer.
//!
//! Each session appends timing rows to its own file under
//! `<output_dir>/sessions/`, flushed per row so runs can be tailed while in
//! flight. The directory also receives a copy of the recording and the tool
//! version for provenance.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;

use crate::error::{AppResult, ConfigError};

const COLUMN_HEADER: &str = "session_id,worker_id,iteration,event,timestamp,input_line_number,comment";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line provenance written into every session file's header.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub argv: String,
    pub args_json: String,
}

#[derive(Debug, Clone)]
pub struct OutputDir {
    pub root: PathBuf,
    pub sessions: PathBuf,
}

/// Create the output directory tree.
///
/// Refuses an existing directory unless `overwrite` is set, copies the
/// recording to `recording.log`, and writes `shinycannon-version.txt`.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the directory exists without `overwrite`
/// or any filesystem step fails.
pub fn prepare_output_dir(root: &Path, overwrite: bool, recording_path: &Path) -> AppResult<OutputDir> {
    if root.exists() {
        if !overwrite {
            return Err(ConfigError::OutputDirExists {
                path: root.to_path_buf(),
            }
            .into());
        }
        std::fs::remove_dir_all(root).map_err(|err| dir_error(root, err))?;
    }

    let sessions = root.join("sessions");
    std::fs::create_dir_all(&sessions).map_err(|err| dir_error(root, err))?;
    std::fs::copy(recording_path, root.join("recording.log"))
        .map_err(|err| dir_error(root, err))?;
    std::fs::write(
        root.join("shinycannon-version.txt"),
        format!("{}\n", VERSION),
    )
    .map_err(|err| dir_error(root, err))?;

    Ok(OutputDir {
        root: root.to_path_buf(),
        sessions,
    })
}

fn dir_error(root: &Path, source: std::io::Error) -> crate::error::AppError {
    ConfigError::OutputDirIo {
        path: root.to_path_buf(),
        source,
    }
    .into()
}

/// Per-session CSV log, one file per (session, worker, iteration).
#[derive(Debug)]
pub struct SessionLog {
    file: tokio::fs::File,
    session_id: u64,
    worker_id: usize,
    iteration: u64,
}

impl SessionLog {
    /// Open the session file, write the provenance header, and record the
    /// `PLAYER_SESSION_CREATE` row.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub async fn create(
        sessions_dir: &Path,
        session_id: u64,
        worker_id: usize,
        iteration: u64,
        run_info: &RunInfo,
    ) -> AppResult<Self> {
        let path = sessions_dir.join(format!("{}_{}_{}.csv", session_id, worker_id, iteration));
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(
            format!(
                "# {}\n# {}\n{}\n",
                run_info.argv, run_info.args_json, COLUMN_HEADER
            )
            .as_bytes(),
        )
        .await?;

        let mut log = Self {
            file,
            session_id,
            worker_id,
            iteration,
        };
        log.entry("PLAYER_SESSION_CREATE", 0, "").await?;
        Ok(log)
    }

    /// Append one timing row and flush so the file can be tailed.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub async fn entry(&mut self, event: &str, line_number: usize, comment: &str) -> AppResult<()> {
        let row = format!(
            "{},{},{},{},{},{},{}\n",
            self.session_id,
            self.worker_id,
            self.iteration,
            event,
            epoch_ms(),
            line_number,
            sanitize_comment(comment)
        );
        self.file.write_all(row.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

fn sanitize_comment(comment: &str) -> String {
    comment.replace(',', ";").replace(['\r', '\n'], " ")
}
