//! Pre-flight tool detection (spec.md §1.6): search `PATH`, then
//! platform-specific common install locations, and confirm the binary's
//! own output looks like the right tool before trusting it.

use std::path::Path;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use tokio::process::Command;
use tokio::time::timeout;

use crate::dto::{
    DetectToolsResponse, ToolDetectionResult, ValidateToolRequest, ValidateToolResponse,
};
use crate::errors::AppResult;
use crate::state::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(target_os = "windows")]
fn makemkv_search_paths() -> &'static [&'static str] {
    &[
        r"C:\Program Files (x86)\MakeMKV\makemkvcon64.exe",
        r"C:\Program Files\MakeMKV\makemkvcon64.exe",
        r"C:\Program Files (x86)\MakeMKV\makemkvcon.exe",
        r"C:\Program Files\MakeMKV\makemkvcon.exe",
    ]
}

#[cfg(not(target_os = "windows"))]
fn makemkv_search_paths() -> &'static [&'static str] {
    &[
        "/usr/bin/makemkvcon",
        "/usr/local/bin/makemkvcon",
        "/snap/bin/makemkvcon",
        "/var/lib/flatpak/exports/bin/com.makemkv.MakeMKV",
    ]
}

#[cfg(target_os = "windows")]
fn ffmpeg_search_paths() -> &'static [&'static str] {
    &[
        r"C:\tools\ffmpeg\bin\ffmpeg.exe",
        r"C:\ffmpeg\bin\ffmpeg.exe",
        r"C:\Program Files\ffmpeg\bin\ffmpeg.exe",
    ]
}

#[cfg(not(target_os = "windows"))]
fn ffmpeg_search_paths() -> &'static [&'static str] {
    &["/usr/bin/ffmpeg", "/usr/local/bin/ffmpeg"]
}

fn which(name: &str) -> Option<String> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        candidate.is_file().then(|| candidate.display().to_string())
    })
}

async fn run_probe(path: &str, args: &[&str]) -> Option<(bool, String)> {
    let output = timeout(PROBE_TIMEOUT, Command::new(path).args(args).output())
        .await
        .ok()?
        .ok()?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Some((output.status.success(), combined))
}

async fn validate_makemkv_binary(path: &str) -> ToolDetectionResult {
    match run_probe(path, &[]).await {
        Some((_, output)) => {
            let lower = output.to_lowercase();
            if !lower.contains("makemkvcon") && !lower.contains("makemkv") {
                return ToolDetectionResult {
                    found: false,
                    path: None,
                    version: None,
                    error: Some("not a valid MakeMKV executable".to_string()),
                };
            }
            let version = output
                .lines()
                .find(|line| {
                    let lower = line.to_lowercase();
                    lower.contains("version") || lower.contains("v1.") || lower.contains("v2.")
                })
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| "MakeMKV (version not detectable)".to_string());
            ToolDetectionResult { found: true, path: Some(path.to_string()), version: Some(version), error: None }
        }
        None => ToolDetectionResult {
            found: false,
            path: Some(path.to_string()),
            version: None,
            error: Some("command timed out or failed to launch".to_string()),
        },
    }
}

async fn validate_ffmpeg_binary(path: &str) -> ToolDetectionResult {
    match run_probe(path, &["-version"]).await {
        Some((true, output)) => {
            let version = output.lines().next().unwrap_or("unknown").to_string();
            ToolDetectionResult { found: true, path: Some(path.to_string()), version: Some(version), error: None }
        }
        Some((false, _)) => ToolDetectionResult {
            found: false,
            path: Some(path.to_string()),
            version: None,
            error: Some("non-zero exit code".to_string()),
        },
        None => ToolDetectionResult {
            found: false,
            path: Some(path.to_string()),
            version: None,
            error: Some("command timed out or failed to launch".to_string()),
        },
    }
}

async fn detect_makemkv() -> ToolDetectionResult {
    for name in ["makemkvcon64", "makemkvcon"] {
        if let Some(found) = which(name) {
            let result = validate_makemkv_binary(&found).await;
            if result.found {
                return result;
            }
        }
    }
    for path in makemkv_search_paths() {
        if Path::new(path).is_file() {
            let result = validate_makemkv_binary(path).await;
            if result.found {
                return result;
            }
        }
    }
    ToolDetectionResult { found: false, path: None, version: None, error: Some("MakeMKV not found".to_string()) }
}

async fn detect_ffmpeg() -> ToolDetectionResult {
    if let Some(found) = which("ffmpeg") {
        let result = validate_ffmpeg_binary(&found).await;
        if result.found {
            return result;
        }
    }
    for path in ffmpeg_search_paths() {
        if Path::new(path).is_file() {
            let result = validate_ffmpeg_binary(path).await;
            if result.found {
                return result;
            }
        }
    }
    ToolDetectionResult { found: false, path: None, version: None, error: Some("FFmpeg not found".to_string()) }
}

pub async fn detect_tools(State(_state): State<AppState>) -> AppResult<Json<DetectToolsResponse>> {
    Ok(Json(DetectToolsResponse {
        makemkv: detect_makemkv().await,
        ffmpeg: detect_ffmpeg().await,
        platform: std::env::consts::OS,
    }))
}

pub async fn validate_makemkv(
    Json(request): Json<ValidateToolRequest>,
) -> AppResult<Json<ValidateToolResponse>> {
    if !Path::new(&request.path).is_file() {
        return Ok(Json(ValidateToolResponse {
            valid: false,
            error: Some("file not found at specified path".to_string()),
            version: None,
        }));
    }
    let result = validate_makemkv_binary(&request.path).await;
    Ok(Json(ValidateToolResponse { valid: result.found, error: result.error, version: result.version }))
}

pub async fn validate_ffmpeg(
    Json(request): Json<ValidateToolRequest>,
) -> AppResult<Json<ValidateToolResponse>> {
    let path = if request.path.is_empty() {
        match which("ffmpeg") {
            Some(found) => found,
            None => {
                return Ok(Json(ValidateToolResponse {
                    valid: false,
                    error: Some("ffmpeg not found in system PATH".to_string()),
                    version: None,
                }))
            }
        }
    } else if Path::new(&request.path).is_file() {
        request.path
    } else {
        return Ok(Json(ValidateToolResponse {
            valid: false,
            error: Some("file not found at specified path".to_string()),
            version: None,
        }));
    };
    let result = validate_ffmpeg_binary(&path).await;
    Ok(Json(ValidateToolResponse { valid: result.found, error: result.error, version: result.version }))
}
