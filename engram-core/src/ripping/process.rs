//! Rip tool process wrapper: spawns the external binary and parses its
//! line-delimited machine-readable output (spec.md §6).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{EngramError, Result};

/// One title as reported by the rip tool's info/scan mode.
#[derive(Debug, Clone, Default)]
pub struct ScannedTitle {
    pub index: u32,
    pub duration_seconds: u32,
    pub size_bytes: u64,
    pub chapter_count: u32,
    pub name: Option<String>,
    pub resolution: Option<String>,
}

/// A record parsed from a `TINFO:<i>,<code>,<lang>,<value>` line.
/// `code` follows the rip tool's field numbering; the handful this crate
/// cares about are named here, everything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TitleInfoRecord {
    index: u32,
    code: u32,
    value: String,
}

// Field codes the rip tool uses for the attributes this crate tracks.
const CODE_CHAPTER_COUNT: u32 = 8;
const CODE_DURATION: u32 = 9;
const CODE_SIZE_BYTES: u32 = 10;
const CODE_NAME: u32 = 2;
const CODE_RESOLUTION: u32 = 19;

fn parse_tinfo_line(line: &str) -> Option<TitleInfoRecord> {
    let rest = line.strip_prefix("TINFO:")?;
    let mut parts = rest.splitn(4, ',');
    let index: u32 = parts.next()?.parse().ok()?;
    let code: u32 = parts.next()?.parse().ok()?;
    let _lang = parts.next()?;
    let value = parts.next()?.trim_matches('"').to_string();
    Some(TitleInfoRecord { index, code, value })
}

fn parse_duration_hms(value: &str) -> Option<u32> {
    let mut parts = value.split(':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    Some(h * 3600 + m * 60 + s)
}

/// Progress record parsed from a `PRGV:<cur>,<total>,<max>` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRecord {
    pub current: u64,
    pub total: u64,
    pub max: u64,
}

fn parse_prgv_line(line: &str) -> Option<ProgressRecord> {
    let rest = line.strip_prefix("PRGV:")?;
    let mut parts = rest.split(',');
    let current: u64 = parts.next()?.parse().ok()?;
    let total: u64 = parts.next()?.parse().ok()?;
    let max: u64 = parts.next()?.parse().ok()?;
    Some(ProgressRecord { current, total, max })
}

/// Events streamed from `rip()` (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum RipEvent {
    TitleStarted { index: u32, expected_size: u64 },
    BytesWritten { index: u32, cumulative_bytes: u64 },
    TitleFinished { index: u32, output_path: PathBuf },
    FatalError(String),
}

/// Accumulates `TINFO:` records into [`ScannedTitle`]s as they stream in.
#[derive(Debug, Default)]
struct TitleAccumulator {
    titles: Vec<ScannedTitle>,
}

impl TitleAccumulator {
    fn title_mut(&mut self, index: u32) -> &mut ScannedTitle {
        if let Some(pos) = self.titles.iter().position(|t| t.index == index) {
            &mut self.titles[pos]
        } else {
            self.titles.push(ScannedTitle {
                index,
                ..Default::default()
            });
            self.titles.last_mut().unwrap()
        }
    }

    fn apply(&mut self, record: TitleInfoRecord) {
        let title = self.title_mut(record.index);
        match record.code {
            CODE_DURATION => {
                if let Some(seconds) = parse_duration_hms(&record.value) {
                    title.duration_seconds = seconds;
                }
            }
            CODE_SIZE_BYTES => {
                if let Ok(bytes) = record.value.parse() {
                    title.size_bytes = bytes;
                }
            }
            CODE_CHAPTER_COUNT => {
                if let Ok(count) = record.value.parse() {
                    title.chapter_count = count;
                }
            }
            CODE_NAME => title.name = Some(record.value),
            CODE_RESOLUTION => title.resolution = Some(record.value),
            _ => {}
        }
    }
}

/// Invokes the external rip tool's binary. A thin seam so tests can swap
/// in a fake rip tool that prints a scripted transcript.
pub struct RipTool {
    pub binary_path: PathBuf,
    pub scan_timeout: Duration,
}

impl RipTool {
    pub fn new(binary_path: impl Into<PathBuf>, scan_timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            scan_timeout,
        }
    }

    /// Runs the tool in info mode against `drive_id` and returns the
    /// titles it reports.
    pub async fn scan(&self, drive_id: &str) -> Result<Vec<ScannedTitle>> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("info").arg(format!("dev:{drive_id}"));
        cmd.arg("-r"); // machine-readable, line-delimited records
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            EngramError::ExternalTool(format!("failed to launch rip tool: {e}"))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngramError::ExternalTool("rip tool stdout unavailable".into()))?;

        let mut accumulator = TitleAccumulator::default();
        let parse = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| EngramError::ExternalTool(format!("reading rip tool output: {e}")))?
            {
                if let Some(record) = parse_tinfo_line(&line) {
                    accumulator.apply(record);
                } else {
                    debug!(line, "ignoring unrecognized rip tool output line");
                }
            }
            Ok::<(), EngramError>(())
        };

        timeout(self.scan_timeout, parse)
            .await
            .map_err(|_| EngramError::ExternalTool("rip tool scan timed out".into()))??;

        let status = wait_for_exit(&mut child).await?;
        if !status.success() && accumulator.titles.is_empty() {
            return Err(EngramError::ExternalTool(format!(
                "rip tool exited with {status}"
            )));
        }

        Ok(accumulator.titles)
    }

    /// Spawns the tool in extraction mode. The caller drives the returned
    /// child process's stdout through [`stream_rip_events`].
    pub fn spawn_rip(&self, drive_id: &str, selected_indices: &[u32], staging_dir: &Path) -> Result<Child> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("mkv").arg(format!("dev:{drive_id}"));
        let indices = selected_indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        cmd.arg(indices);
        cmd.arg(staging_dir);
        cmd.arg("-r");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        cmd.spawn()
            .map_err(|e| EngramError::ExternalTool(format!("failed to launch rip tool: {e}")))
    }
}

async fn wait_for_exit(child: &mut Child) -> Result<std::process::ExitStatus> {
    child
        .wait()
        .await
        .map_err(|e| EngramError::ExternalTool(format!("waiting for rip tool exit: {e}")))
}

/// Parses one line of the rip tool's extraction-mode transcript into a
/// [`RipEvent`], tracking which title each `PRGV` line belongs to via the
/// most recently started title (the tool streams progress for exactly one
/// title at a time).
pub fn parse_rip_line(line: &str, current_title: Option<u32>, expected_size: u64) -> Option<RipEvent> {
    if let Some(record) = parse_prgv_line(line) {
        let index = current_title?;
        let cumulative = if record.max > 0 {
            (record.current as u128 * expected_size.max(record.total) as u128 / record.max as u128) as u64
        } else {
            record.current
        };
        return Some(RipEvent::BytesWritten {
            index,
            cumulative_bytes: cumulative,
        });
    }
    if let Some(msg) = line.strip_prefix("MSG:") {
        warn!(msg, "rip tool message");
        return None;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tinfo_duration_and_size() {
        let mut acc = TitleAccumulator::default();
        acc.apply(parse_tinfo_line(r#"TINFO:0,9,0,"01:28:32""#).unwrap());
        acc.apply(parse_tinfo_line(r#"TINFO:0,10,0,"28711029963""#).unwrap());
        acc.apply(parse_tinfo_line(r#"TINFO:0,8,0,"32""#).unwrap());

        let title = &acc.titles[0];
        assert_eq!(title.duration_seconds, 5312);
        assert_eq!(title.size_bytes, 28_711_029_963);
        assert_eq!(title.chapter_count, 32);
    }

    #[test]
    fn ignores_unrelated_codes() {
        assert!(parse_tinfo_line(r#"TINFO:1,27,0,"some flag""#).is_some());
    }

    #[test]
    fn parses_prgv_progress() {
        let record = parse_prgv_line("PRGV:12345,0,65536").unwrap();
        assert_eq!(record.current, 12345);
        assert_eq!(record.max, 65536);
    }

    #[test]
    fn non_matching_lines_are_ignored() {
        assert!(parse_tinfo_line("some unrelated log line").is_none());
        assert!(parse_prgv_line("some unrelated log line").is_none());
    }
}
