//! SQLite persistence (spec.md §3, §9): jobs, titles, and settings.
//!
//! Schema is created with `CREATE TABLE IF NOT EXISTS` and then brought
//! up to date with a fixed list of idempotent `ALTER TABLE ADD COLUMN`
//! statements, so an existing database file from an older build upgrades
//! in place without a migration framework.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::error::{EngramError, Result};
use crate::models::{
    ConflictResolution, ContentType, Job, JobState, MatchDetails, Progress, SubtitleProgress,
    Title, TitleState,
};
use crate::settings::Settings;
use crate::state_machine::{JobStore, TitleStore};

const CREATE_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    drive_id        TEXT NOT NULL,
    volume_label    TEXT NOT NULL,
    content_type    TEXT NOT NULL DEFAULT 'unknown',
    detected_title  TEXT,
    detected_season INTEGER,
    disc_number     INTEGER NOT NULL DEFAULT 1,
    staging_path    TEXT,
    progress_percent REAL NOT NULL DEFAULT 0,
    progress_speed  TEXT,
    progress_eta_seconds INTEGER,
    progress_current_title_index INTEGER,
    progress_total_titles INTEGER,
    subtitle_downloaded INTEGER NOT NULL DEFAULT 0,
    subtitle_total  INTEGER NOT NULL DEFAULT 0,
    subtitle_failed INTEGER NOT NULL DEFAULT 0,
    state           TEXT NOT NULL DEFAULT 'idle',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    error_message   TEXT,
    review_reason   TEXT
)
"#;

const CREATE_TITLES: &str = r#"
CREATE TABLE IF NOT EXISTS titles (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id              INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    title_index         INTEGER NOT NULL,
    duration_seconds    INTEGER NOT NULL,
    expected_size_bytes INTEGER NOT NULL DEFAULT 0,
    actual_size_bytes   INTEGER NOT NULL DEFAULT 0,
    chapter_count       INTEGER NOT NULL DEFAULT 0,
    is_selected         INTEGER NOT NULL DEFAULT 1,
    output_filename     TEXT,
    state               TEXT NOT NULL DEFAULT 'pending',
    matched_episode     TEXT,
    match_confidence    REAL NOT NULL DEFAULT 0,
    match_details       TEXT NOT NULL DEFAULT '{}',
    conflict_resolution TEXT,
    organized_from      TEXT,
    organized_to        TEXT,
    is_extra            INTEGER NOT NULL DEFAULT 0,
    skipped             INTEGER NOT NULL DEFAULT 0,
    error_message       TEXT
)
"#;

const CREATE_SETTINGS: &str = r#"
CREATE TABLE IF NOT EXISTS app_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    movies_library_path TEXT,
    tv_library_path TEXT,
    staging_path TEXT,
    conflict_resolution_default TEXT NOT NULL DEFAULT 'ask',
    matcher_min_confidence REAL NOT NULL DEFAULT 0.6
)
"#;

/// Additive migrations applied in order, each tolerating "duplicate
/// column name" because sqlite has no `IF NOT EXISTS` for `ADD COLUMN`.
const MIGRATIONS: &[&str] = &[
    "ALTER TABLE app_config ADD COLUMN max_concurrent_matches INTEGER NOT NULL DEFAULT 2",
    "ALTER TABLE titles ADD COLUMN video_resolution TEXT",
    "ALTER TABLE titles ADD COLUMN edition TEXT",
    "ALTER TABLE app_config ADD COLUMN analyst_movie_min_duration INTEGER NOT NULL DEFAULT 4800",
    "ALTER TABLE app_config ADD COLUMN analyst_tv_duration_variance INTEGER NOT NULL DEFAULT 120",
    "ALTER TABLE app_config ADD COLUMN analyst_tv_min_cluster_size INTEGER NOT NULL DEFAULT 3",
    "ALTER TABLE app_config ADD COLUMN analyst_tv_min_duration INTEGER NOT NULL DEFAULT 1080",
    "ALTER TABLE app_config ADD COLUMN analyst_tv_max_duration INTEGER NOT NULL DEFAULT 4200",
    "ALTER TABLE app_config ADD COLUMN analyst_movie_dominance_threshold REAL NOT NULL DEFAULT 0.6",
    "ALTER TABLE app_config ADD COLUMN ripping_file_poll_interval REAL NOT NULL DEFAULT 5.0",
    "ALTER TABLE app_config ADD COLUMN ripping_stability_checks INTEGER NOT NULL DEFAULT 3",
    "ALTER TABLE app_config ADD COLUMN ripping_file_ready_timeout REAL NOT NULL DEFAULT 600.0",
    "ALTER TABLE app_config ADD COLUMN sentinel_poll_interval REAL NOT NULL DEFAULT 2.0",
];

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the database at `path`, sets WAL and
    /// `synchronous=NORMAL`, and brings the schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        let is_memory = path == Path::new(":memory:");
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| EngramError::Store(format!("invalid database path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // An in-memory database only lives on one connection; a pool of
        // several would each see their own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if is_memory { 1 } else { 8 })
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_JOBS).execute(&self.pool).await?;
        sqlx::query(CREATE_TITLES).execute(&self.pool).await?;
        sqlx::query(CREATE_SETTINGS).execute(&self.pool).await?;
        sqlx::query("INSERT OR IGNORE INTO app_config (id) VALUES (1)")
            .execute(&self.pool)
            .await?;

        for stmt in MIGRATIONS {
            match sqlx::query(stmt).execute(&self.pool).await {
                Ok(_) => {}
                Err(sqlx::Error::Database(db_err))
                    if db_err.message().contains("duplicate column name") => {}
                Err(e) => return Err(EngramError::Store(e.to_string())),
            }
        }

        info!("database schema up to date");
        Ok(())
    }

    // -- jobs --------------------------------------------------------

    pub async fn create_job(&self, drive_id: &str, volume_label: &str) -> Result<Job> {
        let now = Utc::now();
        let id = sqlx::query(
            r#"INSERT INTO jobs (drive_id, volume_label, state, created_at, updated_at)
               VALUES (?, ?, 'idle', ?, ?)"#,
        )
        .bind(drive_id)
        .bind(volume_label)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_job(id).await
    }

    pub async fn get_job(&self, id: i64) -> Result<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngramError::Store(format!("job {id} not found")))?;
        row_to_job(&row)
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// The drive's single active (non-terminal) job, if any (spec.md §5:
    /// at most one active job per drive).
    pub async fn active_job_for_drive(&self, drive_id: &str) -> Result<Option<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE drive_id = ? AND state NOT IN ('completed', 'failed') \
             ORDER BY created_at DESC",
        )
        .bind(drive_id)
        .fetch_all(&self.pool)
        .await?;
        match rows.first() {
            Some(row) => Ok(Some(row_to_job(row)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_job(&self, id: i64) -> Result<()> {
        let job = self.get_job(id).await?;
        if !job.state.is_terminal() {
            return Err(EngramError::Internal(format!(
                "refusing to delete job {id} in non-terminal state {:?}",
                job.state
            )));
        }
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_job_identification(
        &self,
        id: i64,
        content_type: ContentType,
        detected_title: Option<&str>,
        detected_season: Option<u32>,
        review_reason: Option<&str>,
    ) -> Result<Job> {
        sqlx::query(
            r#"UPDATE jobs SET content_type = ?, detected_title = ?, detected_season = ?,
               review_reason = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(content_type.as_str())
        .bind(detected_title)
        .bind(detected_season.map(|s| s as i64))
        .bind(review_reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_job(id).await
    }

    pub async fn update_job_progress(&self, id: i64, progress: &Progress) -> Result<Job> {
        sqlx::query(
            r#"UPDATE jobs SET progress_percent = ?, progress_speed = ?, progress_eta_seconds = ?,
               progress_current_title_index = ?, progress_total_titles = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(progress.percent)
        .bind(progress.speed.as_deref())
        .bind(progress.eta_seconds.map(|v| v as i64))
        .bind(progress.current_title_index.map(|v| v as i64))
        .bind(progress.total_titles.map(|v| v as i64))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_job(id).await
    }

    pub async fn update_subtitle_progress(&self, id: i64, progress: &SubtitleProgress) -> Result<Job> {
        sqlx::query(
            "UPDATE jobs SET subtitle_downloaded = ?, subtitle_total = ?, subtitle_failed = ?, updated_at = ? WHERE id = ?",
        )
        .bind(progress.downloaded as i64)
        .bind(progress.total as i64)
        .bind(progress.failed as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_job(id).await
    }

    pub async fn set_job_error(&self, id: i64, message: &str) -> Result<Job> {
        sqlx::query("UPDATE jobs SET error_message = ?, updated_at = ? WHERE id = ?")
            .bind(message)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_job(id).await
    }

    // -- titles -------------------------------------------------------

    pub async fn create_title(&self, job_id: i64, title_index: u32, duration_seconds: u32) -> Result<Title> {
        let id = sqlx::query(
            "INSERT INTO titles (job_id, title_index, duration_seconds, state) VALUES (?, ?, ?, 'pending')",
        )
        .bind(job_id)
        .bind(title_index as i64)
        .bind(duration_seconds as i64)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_title(id).await
    }

    pub async fn get_title(&self, id: i64) -> Result<Title> {
        let row = sqlx::query("SELECT * FROM titles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngramError::Store(format!("title {id} not found")))?;
        row_to_title(&row)
    }

    pub async fn titles_for_job(&self, job_id: i64) -> Result<Vec<Title>> {
        let rows = sqlx::query("SELECT * FROM titles WHERE job_id = ? ORDER BY title_index ASC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_title).collect()
    }

    pub async fn update_title_match(
        &self,
        id: i64,
        matched_episode: Option<&str>,
        match_confidence: f64,
        match_details: &MatchDetails,
    ) -> Result<Title> {
        let details_json = serde_json::to_string(match_details)
            .map_err(|e| EngramError::Store(format!("serializing match details: {e}")))?;
        sqlx::query(
            "UPDATE titles SET matched_episode = ?, match_confidence = ?, match_details = ? WHERE id = ?",
        )
        .bind(matched_episode)
        .bind(match_confidence)
        .bind(details_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_title(id).await
    }

    pub async fn update_title_organization(
        &self,
        id: i64,
        organized_from: Option<&Path>,
        organized_to: Option<&Path>,
    ) -> Result<Title> {
        sqlx::query("UPDATE titles SET organized_from = ?, organized_to = ? WHERE id = ?")
            .bind(organized_from.map(|p| p.display().to_string()))
            .bind(organized_to.map(|p| p.display().to_string()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_title(id).await
    }

    /// Flips a title out of rip selection, for titles the analyst
    /// identified as a "Play All" concatenation (spec.md §4.3): never
    /// ripped, so never counted against the job's title set.
    pub async fn set_title_selected(&self, id: i64, is_selected: bool) -> Result<Title> {
        sqlx::query("UPDATE titles SET is_selected = ? WHERE id = ?")
            .bind(is_selected)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_title(id).await
    }

    /// Marks a title as a bonus-feature "extra" rather than a matched
    /// episode (spec.md §4.6's `tv_extra_path` routing).
    pub async fn set_title_extra(&self, id: i64, is_extra: bool) -> Result<Title> {
        sqlx::query("UPDATE titles SET is_extra = ? WHERE id = ?")
            .bind(is_extra)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_title(id).await
    }

    /// Marks a title skipped by conflict-resolution policy (spec.md
    /// §4.6 `skip`): the existing destination file is left untouched and
    /// the title completes without ever being organized.
    pub async fn set_title_skipped(&self, id: i64, skipped: bool) -> Result<Title> {
        sqlx::query("UPDATE titles SET skipped = ? WHERE id = ?")
            .bind(skipped)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_title(id).await
    }

    pub async fn set_title_error(&self, id: i64, message: &str) -> Result<Title> {
        sqlx::query("UPDATE titles SET error_message = ? WHERE id = ?")
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_title(id).await
    }

    // -- settings -------------------------------------------------------

    pub async fn get_settings(&self) -> Result<Settings> {
        let row = sqlx::query("SELECT * FROM app_config WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        row_to_settings(&row)
    }

    pub async fn update_settings(&self, settings: &Settings) -> Result<Settings> {
        sqlx::query(
            r#"UPDATE app_config SET
                movies_library_path = ?, tv_library_path = ?, staging_path = ?,
                conflict_resolution_default = ?, matcher_min_confidence = ?,
                max_concurrent_matches = ?, analyst_movie_min_duration = ?,
                analyst_tv_duration_variance = ?, analyst_tv_min_cluster_size = ?,
                analyst_tv_min_duration = ?, analyst_tv_max_duration = ?,
                analyst_movie_dominance_threshold = ?, ripping_file_poll_interval = ?,
                ripping_stability_checks = ?, ripping_file_ready_timeout = ?,
                sentinel_poll_interval = ?
               WHERE id = 1"#,
        )
        .bind(settings.movies_library_path.as_ref().map(|p| p.display().to_string()))
        .bind(settings.tv_library_path.as_ref().map(|p| p.display().to_string()))
        .bind(settings.staging_path.as_ref().map(|p| p.display().to_string()))
        .bind(settings.conflict_resolution_default.as_str())
        .bind(settings.matcher_min_confidence)
        .bind(settings.max_concurrent_matches as i64)
        .bind(settings.analyst_movie_min_duration as i64)
        .bind(settings.analyst_tv_duration_variance as i64)
        .bind(settings.analyst_tv_min_cluster_size as i64)
        .bind(settings.analyst_tv_min_duration as i64)
        .bind(settings.analyst_tv_max_duration as i64)
        .bind(settings.analyst_movie_dominance_threshold)
        .bind(settings.ripping_file_poll_interval)
        .bind(settings.ripping_stability_checks as i64)
        .bind(settings.ripping_file_ready_timeout)
        .bind(settings.sentinel_poll_interval)
        .execute(&self.pool)
        .await?;
        self.get_settings().await
    }
}

fn parse_state<T>(value: &str, parse: impl Fn(&str) -> Option<T>, what: &str) -> Result<T> {
    parse(value).ok_or_else(|| EngramError::Store(format!("unrecognized {what} {value:?}")))
}

fn job_state_from_str(value: &str) -> Option<JobState> {
    Some(match value {
        "idle" => JobState::Idle,
        "identifying" => JobState::Identifying,
        "review_needed" => JobState::ReviewNeeded,
        "ripping" => JobState::Ripping,
        "matching" => JobState::Matching,
        "organizing" => JobState::Organizing,
        "completed" => JobState::Completed,
        "failed" => JobState::Failed,
        _ => return None,
    })
}

fn content_type_from_str(value: &str) -> Option<ContentType> {
    Some(match value {
        "tv" => ContentType::Tv,
        "movie" => ContentType::Movie,
        "unknown" => ContentType::Unknown,
        _ => return None,
    })
}

fn title_state_from_str(value: &str) -> Option<TitleState> {
    Some(match value {
        "pending" => TitleState::Pending,
        "ripping" => TitleState::Ripping,
        "matching" => TitleState::Matching,
        "matched" => TitleState::Matched,
        "review" => TitleState::Review,
        "completed" => TitleState::Completed,
        "failed" => TitleState::Failed,
        _ => return None,
    })
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let state: String = row.try_get("state")?;
    let content_type: String = row.try_get("content_type")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Job {
        id: row.try_get("id")?,
        drive_id: row.try_get("drive_id")?,
        volume_label: row.try_get("volume_label")?,
        content_type: parse_state(&content_type, content_type_from_str, "content type")?,
        detected_title: row.try_get("detected_title")?,
        detected_season: row
            .try_get::<Option<i64>, _>("detected_season")?
            .map(|v| v as u32),
        disc_number: row.try_get::<i64, _>("disc_number")? as u32,
        staging_path: row
            .try_get::<Option<String>, _>("staging_path")?
            .map(std::path::PathBuf::from),
        progress: Progress {
            percent: row.try_get("progress_percent")?,
            speed: row.try_get("progress_speed")?,
            eta_seconds: row
                .try_get::<Option<i64>, _>("progress_eta_seconds")?
                .map(|v| v as u64),
            current_title_index: row
                .try_get::<Option<i64>, _>("progress_current_title_index")?
                .map(|v| v as u32),
            total_titles: row
                .try_get::<Option<i64>, _>("progress_total_titles")?
                .map(|v| v as u32),
        },
        subtitle_progress: SubtitleProgress {
            downloaded: row.try_get::<i64, _>("subtitle_downloaded")? as u32,
            total: row.try_get::<i64, _>("subtitle_total")? as u32,
            failed: row.try_get::<i64, _>("subtitle_failed")? as u32,
        },
        state: parse_state(&state, job_state_from_str, "job state")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        error_message: row.try_get("error_message")?,
        review_reason: row.try_get("review_reason")?,
    })
}

fn row_to_title(row: &sqlx::sqlite::SqliteRow) -> Result<Title> {
    let state: String = row.try_get("state")?;
    let details_json: String = row.try_get("match_details")?;
    let match_details: MatchDetails = serde_json::from_str(&details_json)
        .map_err(|e| EngramError::Store(format!("decoding match details: {e}")))?;
    let conflict_resolution: Option<String> = row.try_get("conflict_resolution")?;

    Ok(Title {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        title_index: row.try_get::<i64, _>("title_index")? as u32,
        duration_seconds: row.try_get::<i64, _>("duration_seconds")? as u32,
        expected_size_bytes: row.try_get::<i64, _>("expected_size_bytes")? as u64,
        actual_size_bytes: row.try_get::<i64, _>("actual_size_bytes")? as u64,
        chapter_count: row.try_get::<i64, _>("chapter_count")? as u32,
        is_selected: row.try_get("is_selected")?,
        output_filename: row.try_get("output_filename")?,
        video_resolution: row.try_get("video_resolution")?,
        edition: row.try_get("edition")?,
        state: parse_state(&state, title_state_from_str, "title state")?,
        matched_episode: row.try_get("matched_episode")?,
        match_confidence: row.try_get("match_confidence")?,
        match_details,
        conflict_resolution: match conflict_resolution {
            Some(s) => Some(parse_state(&s, ConflictResolution::parse, "conflict resolution")?),
            None => None,
        },
        organized_from: row
            .try_get::<Option<String>, _>("organized_from")?
            .map(std::path::PathBuf::from),
        organized_to: row
            .try_get::<Option<String>, _>("organized_to")?
            .map(std::path::PathBuf::from),
        is_extra: row.try_get("is_extra")?,
        skipped: row.try_get("skipped")?,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_settings(row: &sqlx::sqlite::SqliteRow) -> Result<Settings> {
    let conflict_resolution_default: String = row.try_get("conflict_resolution_default")?;
    Ok(Settings {
        movies_library_path: row
            .try_get::<Option<String>, _>("movies_library_path")?
            .map(std::path::PathBuf::from),
        tv_library_path: row
            .try_get::<Option<String>, _>("tv_library_path")?
            .map(std::path::PathBuf::from),
        staging_path: row
            .try_get::<Option<String>, _>("staging_path")?
            .map(std::path::PathBuf::from),
        conflict_resolution_default: parse_state(
            &conflict_resolution_default,
            ConflictResolution::parse,
            "conflict resolution",
        )?,
        matcher_min_confidence: row.try_get("matcher_min_confidence")?,
        max_concurrent_matches: row.try_get::<i64, _>("max_concurrent_matches")? as usize,
        analyst_movie_min_duration: row.try_get::<i64, _>("analyst_movie_min_duration")? as u32,
        analyst_tv_duration_variance: row.try_get::<i64, _>("analyst_tv_duration_variance")? as u32,
        analyst_tv_min_cluster_size: row.try_get::<i64, _>("analyst_tv_min_cluster_size")? as usize,
        analyst_tv_min_duration: row.try_get::<i64, _>("analyst_tv_min_duration")? as u32,
        analyst_tv_max_duration: row.try_get::<i64, _>("analyst_tv_max_duration")? as u32,
        analyst_movie_dominance_threshold: row.try_get("analyst_movie_dominance_threshold")?,
        ripping_file_poll_interval: row.try_get("ripping_file_poll_interval")?,
        ripping_stability_checks: row.try_get::<i64, _>("ripping_stability_checks")? as u32,
        ripping_file_ready_timeout: row.try_get("ripping_file_ready_timeout")?,
        sentinel_poll_interval: row.try_get("sentinel_poll_interval")?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngramError::Store(format!("decoding timestamp {value:?}: {e}")))
}

#[async_trait]
impl JobStore for Store {
    async fn commit_job_state(&self, job_id: i64, state: JobState) -> Result<Job> {
        sqlx::query("UPDATE jobs SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        self.get_job(job_id).await
    }
}

#[async_trait]
impl TitleStore for Store {
    async fn commit_title_state(&self, title_id: i64, state: TitleState) -> Result<Title> {
        sqlx::query("UPDATE titles SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(title_id)
            .execute(&self.pool)
            .await?;
        self.get_title(title_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_memory() -> Store {
        Store::open(Path::new(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn creates_and_fetches_a_job() {
        let store = open_memory().await;
        let job = store.create_job("E:", "ARRESTED_DEVELOPMENT_S01").await.unwrap();
        assert_eq!(job.state, JobState::Idle);

        let fetched = store.get_job(job.id).await.unwrap();
        assert_eq!(fetched.volume_label, "ARRESTED_DEVELOPMENT_S01");
    }

    #[tokio::test]
    async fn rejects_deleting_a_non_terminal_job() {
        let store = open_memory().await;
        let job = store.create_job("E:", "SOME_DISC").await.unwrap();
        assert!(store.delete_job(job.id).await.is_err());
    }

    #[tokio::test]
    async fn at_most_one_active_job_per_drive() {
        let store = open_memory().await;
        let job = store.create_job("E:", "SOME_DISC").await.unwrap();
        let active = store.active_job_for_drive("E:").await.unwrap();
        assert_eq!(active.unwrap().id, job.id);

        store.commit_job_state(job.id, JobState::Identifying).await.unwrap();
        store.commit_job_state(job.id, JobState::Failed).await.unwrap();
        assert!(store.active_job_for_drive("E:").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settings_round_trip_with_defaults() {
        let store = open_memory().await;
        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings.matcher_min_confidence, 0.6);
        assert_eq!(settings.analyst_tv_min_cluster_size, 3);

        let mut updated = settings.clone();
        updated.matcher_min_confidence = 0.75;
        let saved = store.update_settings(&updated).await.unwrap();
        assert_eq!(saved.matcher_min_confidence, 0.75);
    }

    #[tokio::test]
    async fn title_state_commits_through_job_store_trait() {
        let store = open_memory().await;
        let job = store.create_job("E:", "SOME_DISC").await.unwrap();
        let title = store.create_title(job.id, 0, 6000).await.unwrap();

        let committed = TitleStore::commit_title_state(&store, title.id, TitleState::Ripping)
            .await
            .unwrap();
        assert_eq!(committed.state, TitleState::Ripping);
    }
}
