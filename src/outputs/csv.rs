//! CSV archive: the durable output of every run.
//!
//! # File Format
//!
//! ```text
//! \u{feff}source,published_date,title,url,collected_at,date_origin,title_translated
//! gov-policy,2025-05-06,Notice on grain reserves,https://example.gov/n.html,2025-05-06T08:00:00Z,feed,
//! ```
//!
//! UTF-8 with a leading byte order mark so spreadsheet tools pick the right
//! encoding. Rows already in the file are copied verbatim and new rows go
//! after them.
//!
//! An archive written with an older or reordered header keeps that header.
//! New rows are laid out by column name to match it, and canonical columns
//! the archive lacks are left out. A header with neither `title` nor `url`
//! cannot be deduplicated against and is refused.
//!
//! # Commit
//!
//! The merged file is written to a hidden sibling, synced, then renamed over
//! the archive. A reader sees either the old file or the new one.
//!
//! If the commit fails, [`PersistenceSink::rescue`] saves the staged records
//! to `<stem>.rescue-<timestamp>.csv` beside the archive (or in the system
//! temp directory) so a run never loses what it fetched.

use crate::config::DedupBy;
use crate::error::HarvestError;
use crate::filter::HistoryIndex;
use crate::models::{CanonicalRecord, DedupKey};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

pub const HEADER: [&str; 7] = [
    "source",
    "published_date",
    "title",
    "url",
    "collected_at",
    "date_origin",
    "title_translated",
];

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Durable storage for canonical records.
pub trait PersistenceSink {
    /// Identity keys of everything already stored. A missing archive is empty.
    async fn load_history(&self) -> Result<HistoryIndex, HarvestError>;

    /// Merge `records` into storage and return how many were written.
    ///
    /// `dedup_by` gives the identity policy of each record's source; a record
    /// whose key is already stored is skipped.
    async fn append(
        &self,
        records: &[CanonicalRecord],
        dedup_by: &(dyn Fn(&CanonicalRecord) -> DedupBy + Sync),
    ) -> Result<usize, HarvestError>;

    /// Save records that could not be committed somewhere an operator can
    /// find them, and return where.
    async fn rescue(
        &self,
        records: &[CanonicalRecord],
        collected_at: DateTime<Utc>,
    ) -> Result<PathBuf, HarvestError>;
}

#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

/// Column positions of the identity fields in an existing file.
#[derive(Debug, Clone, Copy)]
struct Columns {
    source: Option<usize>,
    title: Option<usize>,
    url: Option<usize>,
}

impl Columns {
    fn from_headers(path: &Path, headers: &StringRecord) -> Result<Self, HarvestError> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let columns = Self {
            source: find("source"),
            title: find("title"),
            url: find("url"),
        };
        if columns.title.is_none() && columns.url.is_none() {
            return Err(HarvestError::persistence(
                path,
                format!("archive header has neither a `title` nor a `url` column: {headers:?}"),
            ));
        }
        Ok(columns)
    }

    fn keys(&self, row: &StringRecord) -> Vec<DedupKey> {
        let field = |col: Option<usize>| col.and_then(|i| row.get(i));
        let mut keys = Vec::with_capacity(2);
        if let Some(url) = field(self.url).map(str::trim).filter(|u| !u.is_empty()) {
            keys.push(DedupKey::Url(url.to_string()));
        }
        if let Some(title) = field(self.title).filter(|t| !t.trim().is_empty()) {
            keys.push(DedupKey::title(field(self.source).unwrap_or(""), title));
        }
        keys
    }
}

#[derive(Debug)]
struct Archive {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Archive {
    fn history(&self, path: &Path) -> Result<HistoryIndex, HarvestError> {
        let columns = Columns::from_headers(path, &self.headers)?;
        Ok(self.rows.iter().flat_map(|row| columns.keys(row)).collect())
    }
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<stem>.rescue-<YYYYMMDDTHHMMSSZ>.csv`
    fn rescue_name(&self, collected_at: DateTime<Utc>) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        format!("{stem}.rescue-{}.csv", collected_at.format("%Y%m%dT%H%M%SZ"))
    }

    async fn read_archive(&self) -> Result<Option<Archive>, HarvestError> {
        match fs::read(&self.path).await {
            Ok(bytes) => parse_archive(&self.path, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HarvestError::persistence(&self.path, e)),
        }
    }
}

fn parse_archive(path: &Path, bytes: &[u8]) -> Result<Archive, HarvestError> {
    let bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes);
    let mut headers = reader
        .headers()
        .map_err(|e| HarvestError::persistence(path, e))?
        .clone();
    // zero-byte file
    if headers.is_empty() {
        headers = canonical_headers();
    }
    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| HarvestError::persistence(path, e))?;
    Ok(Archive { headers, rows })
}

/// Value of one canonical column, or `None` for a column this crate does not write.
fn record_field(record: &CanonicalRecord, column: &str) -> Option<String> {
    let value = match column {
        "source" => record.source_id.clone(),
        "published_date" => record.published_date.to_string(),
        "title" => record.title.clone(),
        "url" => record.url.clone().unwrap_or_default(),
        "collected_at" => record.collected_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "date_origin" => record.date_origin().to_string(),
        "title_translated" => record.title_translated.clone().unwrap_or_default(),
        _ => return None,
    };
    Some(value)
}

/// Lay a record out in the column order of `headers`.
fn record_row(headers: &StringRecord, record: &CanonicalRecord) -> Vec<String> {
    headers
        .iter()
        .map(|column| record_field(record, column.trim()).unwrap_or_default())
        .collect()
}

fn canonical_headers() -> StringRecord {
    StringRecord::from(HEADER.to_vec())
}

/// Serialize header, existing rows and new rows into the file body.
fn render(
    path: &Path,
    headers: &StringRecord,
    existing: &[StringRecord],
    fresh: &[&CanonicalRecord],
) -> Result<Vec<u8>, HarvestError> {
    let mut buf = BOM.to_vec();
    {
        let mut writer = WriterBuilder::new().flexible(true).from_writer(&mut buf);
        let io_err = |e: csv::Error| HarvestError::persistence(path, e);
        writer.write_record(headers).map_err(io_err)?;
        for row in existing {
            writer.write_record(row).map_err(io_err)?;
        }
        for record in fresh {
            writer.write_record(record_row(headers, record)).map_err(io_err)?;
        }
        writer
            .flush()
            .map_err(|e| HarvestError::persistence(path, e))?;
    }
    Ok(buf)
}

/// Write `bytes` to a sibling temp file, sync it, and rename it over `path`.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), HarvestError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| HarvestError::persistence(path, "archive path has no file name"))?;
    let tmp = dir.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(HarvestError::persistence(path, e));
    }
    debug!(bytes = bytes.len(), "Archive replaced");
    Ok(())
}

impl PersistenceSink for CsvSink {
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    async fn load_history(&self) -> Result<HistoryIndex, HarvestError> {
        let history = match self.read_archive().await? {
            Some(archive) => archive.history(&self.path)?,
            None => {
                info!("No archive yet; starting with empty history");
                HistoryIndex::new()
            }
        };
        info!(keys = history.len(), "Loaded history");
        Ok(history)
    }

    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), new = records.len()))]
    async fn append(
        &self,
        records: &[CanonicalRecord],
        dedup_by: &(dyn Fn(&CanonicalRecord) -> DedupBy + Sync),
    ) -> Result<usize, HarvestError> {
        let archive = self.read_archive().await?;
        if records.is_empty() && archive.is_some() {
            info!("No new records; archive left unchanged");
            return Ok(0);
        }

        let (headers, existing, mut history) = match archive {
            Some(archive) => {
                let history = archive.history(&self.path)?;
                let found: Vec<&str> = archive.headers.iter().map(str::trim).collect();
                if found != HEADER {
                    let missing: Vec<&str> =
                        HEADER.iter().copied().filter(|c| !found.contains(c)).collect();
                    warn!(
                        ?found,
                        ?missing,
                        "Archive header differs; keeping it and laying out new rows to match"
                    );
                }
                (archive.headers, archive.rows, history)
            }
            None => {
                if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(dir)
                        .await
                        .map_err(|e| HarvestError::persistence(dir, e))?;
                }
                (canonical_headers(), Vec::new(), HistoryIndex::new())
            }
        };

        let mut fresh = Vec::with_capacity(records.len());
        for record in records {
            let key = record.dedup_key(dedup_by(record));
            if history.contains(&key) {
                warn!(source = %record.source_id, title = %record.title, "Already in archive at commit; skipped");
                continue;
            }
            history.insert(key);
            fresh.push(record);
        }

        let body = render(&self.path, &headers, &existing, &fresh)?;
        write_atomic(&self.path, &body).await?;
        info!(
            existing = existing.len(),
            written = fresh.len(),
            "Committed archive"
        );
        Ok(fresh.len())
    }

    #[instrument(level = "info", skip_all, fields(records = records.len()))]
    async fn rescue(
        &self,
        records: &[CanonicalRecord],
        collected_at: DateTime<Utc>,
    ) -> Result<PathBuf, HarvestError> {
        let name = self.rescue_name(collected_at);
        let fresh: Vec<&CanonicalRecord> = records.iter().collect();
        let body = render(&self.path, &canonical_headers(), &[], &fresh)?;

        let beside = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.join(&name),
            _ => PathBuf::from(&name),
        };
        let mut last_err = None;
        for target in [beside, std::env::temp_dir().join(&name)] {
            match fs::write(&target, &body).await {
                Ok(()) => {
                    warn!(path = %target.display(), "Uncommitted records saved");
                    return Ok(target);
                }
                Err(e) => {
                    debug!(path = %target.display(), error = %e, "Cannot write rescue file here");
                    last_err = Some(HarvestError::persistence(&target, e));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| HarvestError::persistence(&self.path, "no rescue location")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DateOrigin, PublishedDate};
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    fn record(source: &str, title: &str, url: Option<&str>, day: Option<u32>) -> CanonicalRecord {
        CanonicalRecord {
            source_id: source.to_string(),
            published_date: match day {
                Some(d) => PublishedDate::Known {
                    date: NaiveDate::from_ymd_opt(2025, 5, d).unwrap(),
                    origin: DateOrigin::Feed,
                },
                None => PublishedDate::Unknown,
            },
            title: title.to_string(),
            url: url.map(str::to_string),
            collected_at: Utc.with_ymd_and_hms(2025, 5, 6, 8, 0, 0).unwrap(),
            title_translated: None,
        }
    }

    fn by_url(_: &CanonicalRecord) -> DedupBy {
        DedupBy::Url
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_history() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("none.csv"));
        assert!(sink.load_history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_commit_writes_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        let sink = CsvSink::new(&path);
        assert_eq!(sink.append(&[], &by_url).await.unwrap(), 0);

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(BOM));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert_eq!(text, format!("{}\n", HEADER.join(",")));
    }

    #[tokio::test]
    async fn test_bom_and_non_ascii_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = CsvSink::new(&path);
        let mut r = record("gov", "关于印发《实施方案》的通知", Some("https://example.gov/a.html"), Some(5));
        r.title_translated = Some("Notice on the implementation plan".into());
        assert_eq!(sink.append(&[r.clone()], &by_url).await.unwrap(), 1);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..3], BOM);
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert!(text.contains(
            "gov,2025-05-05,关于印发《实施方案》的通知,https://example.gov/a.html,2025-05-06T08:00:00Z,feed,Notice on the implementation plan"
        ));

        let history = sink.load_history().await.unwrap();
        assert!(history.contains(&DedupKey::Url("https://example.gov/a.html".into())));
        assert!(history.contains(&DedupKey::title("gov", "关于印发《实施方案》的通知")));
    }

    #[tokio::test]
    async fn test_existing_rows_are_kept_verbatim_and_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let original = "\u{feff}source,published_date,title,url,collected_at,date_origin,title_translated\n\
                        old,unknown,\"Quoted, with comma\",,2024-01-01T00:00:00Z,unknown,\n";
        std::fs::write(&path, original).unwrap();

        let sink = CsvSink::new(&path);
        let history = sink.load_history().await.unwrap();
        assert!(history.contains(&DedupKey::title("old", "quoted, with comma")));

        sink.append(&[record("new", "Fresh item", Some("https://n.example/1"), Some(6))], &by_url)
            .await
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(original));
        assert!(text.ends_with("new,2025-05-06,Fresh item,https://n.example/1,2025-05-06T08:00:00Z,feed,\n"));
    }

    #[tokio::test]
    async fn test_commit_skips_rows_already_stored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = CsvSink::new(&path);
        let a = record("gov", "Item A", Some("https://example.gov/a"), Some(1));
        let b = record("gov", "Item B", Some("https://example.gov/b"), Some(2));
        assert_eq!(sink.append(&[a.clone()], &by_url).await.unwrap(), 1);
        assert_eq!(sink.append(&[a, b.clone(), b], &by_url).await.unwrap(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_no_records_leaves_existing_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "custom,header\nkeep,me\n").unwrap();
        let sink = CsvSink::new(&path);
        assert_eq!(sink.append(&[], &by_url).await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "custom,header\nkeep,me\n");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("out.csv"));
        sink.append(&[record("gov", "Item", None, None)], &by_url).await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_reordered_legacy_header_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let original = "title,url,source\nOld headline,https://o.example/1,legacy\n";
        std::fs::write(&path, original).unwrap();
        let sink = CsvSink::new(&path);

        let history = sink.load_history().await.unwrap();
        assert!(history.contains(&DedupKey::Url("https://o.example/1".into())));
        assert!(history.contains(&DedupKey::title("legacy", "Old headline")));

        let fresh = record("new", "Fresh item", Some("https://n.example/1"), Some(6));
        assert_eq!(sink.append(&[fresh], &by_url).await.unwrap(), 1);

        let bytes = std::fs::read(&path).unwrap();
        let text = std::str::from_utf8(bytes.strip_prefix(BOM).unwrap()).unwrap();
        assert_eq!(text, format!("{original}Fresh item,https://n.example/1,new\n"));

        let history = sink.load_history().await.unwrap();
        assert!(history.contains(&DedupKey::Url("https://o.example/1".into())));
        assert!(history.contains(&DedupKey::Url("https://n.example/1".into())));

        let again = record("legacy", "Old headline", Some("https://o.example/1"), Some(1));
        assert_eq!(sink.append(&[again], &by_url).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_header_without_identity_columns_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "custom,header\nkeep,me\n").unwrap();
        let sink = CsvSink::new(&path);

        assert!(matches!(
            sink.load_history().await,
            Err(HarvestError::PersistenceFailure { .. })
        ));
        let result = sink
            .append(&[record("gov", "Item", Some("https://example.gov/i"), Some(1))], &by_url)
            .await;
        assert!(matches!(result, Err(HarvestError::PersistenceFailure { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "custom,header\nkeep,me\n");
    }

    #[tokio::test]
    async fn test_commit_check_follows_source_dedup_policy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = CsvSink::new(&path);
        let stored = record("gnews", "First headline", Some("https://news.example/r"), Some(1));
        assert_eq!(sink.append(&[stored], &by_url).await.unwrap(), 1);

        // aggregator redirect reused for a different story
        let next = record("gnews", "Second headline", Some("https://news.example/r"), Some(2));
        let by_title = |_: &CanonicalRecord| DedupBy::Title;
        assert_eq!(sink.append(&[next.clone()], &by_title).await.unwrap(), 1);
        assert_eq!(sink.append(&[next], &by_title).await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_rescue_writes_beside_the_archive() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("out.csv"));
        let records = vec![
            record("gov", "Item A", Some("https://example.gov/a"), Some(1)),
            record("gov", "Item B", Some("https://example.gov/b"), Some(2)),
        ];
        let at = Utc.with_ymd_and_hms(2025, 5, 7, 6, 0, 0).unwrap();

        let saved = sink.rescue(&records, at).await.unwrap();
        assert_eq!(saved, dir.path().join("out.rescue-20250507T060000Z.csv"));
        let text = std::fs::read_to_string(&saved).unwrap();
        assert!(text.starts_with('\u{feff}'));
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("https://example.gov/b"));
        assert!(!dir.path().join("out.csv").exists());
    }
}
