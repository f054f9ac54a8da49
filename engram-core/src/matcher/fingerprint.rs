//! Audio fingerprinting (spec.md §4.5): extract chunks, transcribe them,
//! and score each transcript against the subtitle reference corpus.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{EngramError, Result};
use crate::matcher::subtitle::SubtitleFile;

#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub chunk_duration: Duration,
    pub start_offsets: Vec<Duration>,
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_secs(30),
            start_offsets: vec![
                Duration::from_secs(300),
                Duration::from_secs(900),
                Duration::from_secs(1800),
            ],
        }
    }
}

/// Extracts mono 16kHz audio chunks from a title with ffmpeg
/// (spec.md §6: `-ss`, `-t`, `-vn`, `-ac 1`, `-ar 16000`).
#[derive(Clone)]
pub struct ChunkExtractor {
    ffmpeg_path: PathBuf,
}

impl ChunkExtractor {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub async fn extract(&self, source: &Path, plan: &ChunkPlan, scratch_dir: &Path) -> Vec<PathBuf> {
        let mut chunks = Vec::with_capacity(plan.start_offsets.len());
        for (i, offset) in plan.start_offsets.iter().enumerate() {
            let out = scratch_dir.join(format!("chunk_{i}.wav"));
            match self.extract_one(source, *offset, plan.chunk_duration, &out).await {
                Ok(()) => chunks.push(out),
                Err(e) => warn!(error = %e, chunk = i, "chunk extraction failed, skipping"),
            }
        }
        chunks
    }

    async fn extract_one(
        &self,
        source: &Path,
        start: Duration,
        duration: Duration,
        out: &Path,
    ) -> Result<()> {
        let status = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-ss")
            .arg(start.as_secs().to_string())
            .arg("-i")
            .arg(source)
            .arg("-t")
            .arg(duration.as_secs().to_string())
            .arg("-vn")
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg("16000")
            .arg(out)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| EngramError::ExternalTool(format!("failed to launch ffmpeg: {e}")))?;

        if !status.success() {
            return Err(EngramError::ExternalTool(format!(
                "ffmpeg exited with {status} extracting chunk at {start:?}"
            )));
        }
        Ok(())
    }
}

/// A speech-to-text engine, treated as an external collaborator with
/// capability "blocking CPU/GPU call, returns plain text" (spec.md §4.5).
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

/// One chunk's best candidates against the reference corpus.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub episode_code: String,
    pub score: f64,
    pub coverage: f64,
}

/// Word-overlap similarity between a transcript and a subtitle's text.
/// A stand-in for a proper audio/text alignment model: cheap, deterministic,
/// and good enough to rank candidates relative to one another.
fn similarity(transcript: &str, subtitle_text: &str) -> f64 {
    let transcript_words: std::collections::HashSet<&str> =
        transcript.split_whitespace().collect();
    let subtitle_words: std::collections::HashSet<&str> =
        subtitle_text.split_whitespace().collect();
    if transcript_words.is_empty() || subtitle_words.is_empty() {
        return 0.0;
    }
    let intersection = transcript_words.intersection(&subtitle_words).count();
    intersection as f64 / transcript_words.len() as f64
}

/// Transcribes each chunk and scores it against every subtitle in the
/// reference corpus, returning the top candidate per chunk.
pub async fn fingerprint_chunks(
    transcriber: &dyn Transcriber,
    chunks: &[PathBuf],
    corpus: &[SubtitleFile],
) -> Vec<ChunkCandidate> {
    let mut candidates = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let transcript = match transcriber.transcribe(chunk).await {
            Ok(text) => text,
            Err(e) => {
                warn!(chunk = %chunk.display(), error = %e, "transcription failed, skipping chunk");
                continue;
            }
        };

        let mut best: Option<ChunkCandidate> = None;
        for subtitle in corpus {
            let score = similarity(&transcript, &subtitle.text);
            let code = crate::matcher::subtitle::canonical_episode_code(subtitle.season, subtitle.episode);
            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                best = Some(ChunkCandidate {
                    episode_code: code,
                    score,
                    coverage: 1.0,
                });
            }
        }

        if let Some(candidate) = best {
            debug!(episode = %candidate.episode_code, score = candidate.score, "chunk scored");
            candidates.push(candidate);
        }
    }
    candidates
}

/// [`Transcriber`] backed by an external speech-to-text binary (a
/// whisper.cpp-style CLI build), invoked once per chunk the same way
/// [`crate::ripping::process::RipTool`] shells out to the rip tool:
/// spawn, wait, read stdout.
pub struct ProcessTranscriber {
    binary_path: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessTranscriber {
    pub fn new(binary_path: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self { binary_path: binary_path.into(), extra_args }
    }
}

#[async_trait]
impl Transcriber for ProcessTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let output = Command::new(&self.binary_path)
            .args(&self.extra_args)
            .arg("--output-txt")
            .arg("--file")
            .arg(audio_path)
            .output()
            .await
            .map_err(|e| EngramError::ExternalTool(format!("failed to launch transcriber: {e}")))?;

        if !output.status.success() {
            return Err(EngramError::ExternalTool(format!(
                "transcriber exited with {} for {}",
                output.status,
                audio_path.display()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| EngramError::ExternalTool(format!("transcriber produced non-utf8 output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_one_for_identical_text() {
        assert!((similarity("hello world", "hello world") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn similarity_is_zero_for_disjoint_text() {
        assert_eq!(similarity("hello world", "goodbye moon"), 0.0);
    }

    #[test]
    fn similarity_handles_empty_input() {
        assert_eq!(similarity("", "hello"), 0.0);
        assert_eq!(similarity("hello", ""), 0.0);
    }
}
