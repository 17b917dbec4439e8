//! Read-only inventory of recently modified files under an upload root.
//!
//! Touches nothing but the filesystem it reads. Categories are derived from
//! path segments for the operator's benefit only.

use crate::models::audit::{AuditCategory, AuditReport, AuditSummary, FileRecord};
use chrono::{DateTime, Duration, Utc};
use md5::Context;
use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    time::SystemTime,
};
use walkdir::WalkDir;

/// Trailing window used when none is given.
pub const DEFAULT_AUDIT_DAYS: u32 = 6;

/// Cutoff `days` before `now`, clamped to the earliest representable instant.
pub fn cutoff_for(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Walk `root` and record every regular file modified at or after `cutoff`.
///
/// Unreadable entries are logged and skipped; the scan itself never fails.
pub fn scan(root: &Path, cutoff: DateTime<Utc>) -> Vec<FileRecord> {
    let mut records = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "cannot stat file");
                continue;
            }
        };
        let Some(modified) = meta.modified().ok().map(to_utc) else {
            continue;
        };
        if modified < cutoff {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map(slash_path)
            .unwrap_or_else(|_| slash_path(entry.path()));
        let hash = match hash_file(entry.path()) {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "cannot hash file");
                format!("ERROR: {err}")
            }
        };

        records.push(FileRecord {
            category: categorize(&relative),
            extension: entry
                .path()
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
                .unwrap_or_default(),
            path: relative,
            size: meta.len(),
            created: meta.created().ok().map(to_utc),
            modified,
            accessed: meta.accessed().ok().map(to_utc),
            hash,
        });
    }
    tracing::debug!(root = %root.display(), files = records.len(), "audit scan finished");
    records
}

/// Group by category, total counts and sizes, newest file first.
pub fn summarize(mut records: Vec<FileRecord>, cutoff: DateTime<Utc>, days: u32) -> AuditReport {
    let mut summary = AuditSummary::default();
    for record in &records {
        summary.total_files += 1;
        summary.total_size += record.size;
        let entry = summary.categories.entry(record.category).or_default();
        entry.count += 1;
        entry.size += record.size;
    }
    records.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));

    AuditReport {
        timestamp: Utc::now(),
        audit_period_days: days,
        cutoff,
        summary,
        files: records,
    }
}

/// Category from path segments; the first matching rule wins.
pub fn categorize(relative: &str) -> AuditCategory {
    let has = |segment: &str| relative.split('/').any(|s| s == segment);
    if has("activities") {
        AuditCategory::Activity
    } else if has("documents") {
        AuditCategory::Document
    } else if has("events") {
        AuditCategory::Event
    } else if has("avatars") {
        AuditCategory::Avatar
    } else if has("news") {
        AuditCategory::News
    } else {
        AuditCategory::General
    }
}

/// Human-readable size with two decimals, e.g. `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Plain-text rendering of `report`.
pub fn render_text(report: &AuditReport) -> String {
    let rule = |c: char, n: usize| c.to_string().repeat(n);
    let mut lines = vec![
        rule('=', 80),
        "UPLOADS DIRECTORY AUDIT REPORT".to_string(),
        rule('=', 80),
        format!("Audit date: {}", format_time(report.timestamp)),
        format!(
            "Period: {} days (since {})",
            report.audit_period_days,
            format_time(report.cutoff)
        ),
        String::new(),
        "SUMMARY:".to_string(),
        rule('-', 40),
        format!("Total files: {}", report.summary.total_files),
        format!("Total size: {}", format_size(report.summary.total_size)),
        String::new(),
        "BY CATEGORY:".to_string(),
        rule('-', 40),
    ];
    for (category, data) in &report.summary.categories {
        lines.push(format!(
            "{}: {} files ({})",
            category,
            data.count,
            format_size(data.size)
        ));
    }
    lines.push(String::new());
    lines.push("FILES:".to_string());
    lines.push(rule('-', 80));
    lines.push(format!("{:<20}{:<12}{:<22}{}", "Modified", "Size", "Category", "File"));
    lines.push(rule('-', 80));
    for file in &report.files {
        lines.push(format!(
            "{:<20}{:<12}{:<22}{}",
            format_time(file.modified),
            format_size(file.size),
            file.category.label(),
            file.path
        ));
    }
    lines.push(String::new());
    lines.push("MD5 HASHES:".to_string());
    lines.push(rule('-', 80));
    for file in &report.files {
        lines.push(format!("{}  {}", file.hash, file.path));
    }
    lines.join("\n")
}

/// Write `uploads-audit-<ts>.log` and `uploads-audit-<ts>.json` under `dir`.
pub fn write_reports(report: &AuditReport, dir: &Path) -> io::Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)?;
    let stamp = report.timestamp.format("%Y-%m-%dT%H-%M-%S");
    let text_path = dir.join(format!("uploads-audit-{stamp}.log"));
    let json_path = dir.join(format!("uploads-audit-{stamp}.json"));
    fs::write(&text_path, render_text(report))?;
    fs::write(&json_path, serde_json::to_vec_pretty(report)?)?;
    Ok((text_path, json_path))
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut ctx = Context::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

fn to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn touch(path: &Path, contents: &[u8], age: StdDuration) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    const DAY: StdDuration = StdDuration::from_secs(24 * 3600);

    #[test]
    fn oversized_windows_clamp_instead_of_overflowing() {
        let now = Utc::now();
        assert_eq!(cutoff_for(now, 1), now - chrono::Duration::days(1));
        assert_eq!(cutoff_for(now, 4_000_000_000), DateTime::<Utc>::MIN_UTC);
        assert_eq!(cutoff_for(now, u32::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn only_files_inside_the_window_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("documents/recent.pdf"), b"recent", DAY);
        touch(&dir.path().join("avatars/old.png"), b"old", DAY * 10);

        let cutoff = cutoff_for(Utc::now(), 6);
        let records = scan(dir.path(), cutoff);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.path, "documents/recent.pdf");
        assert_eq!(record.category, AuditCategory::Document);
        assert_eq!(record.extension, ".pdf");
        assert_eq!(record.size, 6);
        assert_eq!(record.hash, format!("{:x}", md5::compute(b"recent")));

        let report = summarize(records, cutoff, 6);
        assert_eq!(report.summary.total_files, 1);
        assert_eq!(report.files.len(), 1);
    }

    #[test]
    fn summary_groups_and_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("news/a.jpg"), &[0u8; 100], DAY * 3);
        touch(&dir.path().join("news/b.jpg"), &[0u8; 50], DAY);
        touch(&dir.path().join("events/c.jpg"), &[0u8; 10], DAY * 2);
        touch(&dir.path().join("misc.txt"), b"x", DAY * 4);

        let cutoff = cutoff_for(Utc::now(), 6);
        let report = summarize(scan(dir.path(), cutoff), cutoff, 6);

        assert_eq!(report.summary.total_files, 4);
        assert_eq!(report.summary.total_size, 161);
        let news = report.summary.categories[&AuditCategory::News];
        assert_eq!((news.count, news.size), (2, 150));
        assert_eq!(report.summary.categories[&AuditCategory::Event].count, 1);
        assert_eq!(report.summary.categories[&AuditCategory::General].count, 1);

        let order: Vec<_> = report.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(order, vec!["news/b.jpg", "events/c.jpg", "news/a.jpg", "misc.txt"]);
    }

    #[test]
    fn categories_follow_path_segments() {
        assert_eq!(categorize("activities/2024/x.pdf"), AuditCategory::Activity);
        assert_eq!(categorize("documents/x.pdf"), AuditCategory::Document);
        assert_eq!(categorize("avatars/1.png"), AuditCategory::Avatar);
        assert_eq!(categorize("newsletter/x.pdf"), AuditCategory::General);
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5 MB");
    }

    #[test]
    fn reports_are_written_side_by_side() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("documents/ata.pdf"), b"ata", DAY);
        let out = tempfile::tempdir().unwrap();

        let cutoff = cutoff_for(Utc::now(), 6);
        let report = summarize(scan(root.path(), cutoff), cutoff, 6);
        let (text, json) = write_reports(&report, out.path()).unwrap();

        let text = fs::read_to_string(text).unwrap();
        assert!(text.contains("Total files: 1"));
        assert!(text.contains(&format!("{:x}  documents/ata.pdf", md5::compute(b"ata"))));

        let parsed: AuditReport = serde_json::from_slice(&fs::read(json).unwrap()).unwrap();
        assert_eq!(parsed, report);
    }
}
