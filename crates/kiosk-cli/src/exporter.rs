use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use kiosk_core::report::WeeklyReport;
use tracing::{debug, info};

const REPORT_PREFIX: &str = "report-";
const REPORT_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct ReportExport {
    pub dir: PathBuf,
    pub retention_days: u64,
}

impl ReportExport {
    pub fn write(&self, report: &WeeklyReport, now: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let attachment = report.to_attachment()?;
        let path = self.dir.join(&attachment.filename);
        let tmp = self.dir.join(format!("{}.tmp", attachment.filename));
        fs::write(&tmp, &attachment.bytes)?;
        fs::rename(&tmp, &path)?;
        info!(path=%path.display(), rows = report.rows.len(), "weekly report written");

        let pruned = prune_old_report_files(&self.dir, self.retention_days, now)?;
        if pruned > 0 {
            info!(pruned, "expired reports removed");
        }
        Ok(path)
    }
}

pub(crate) fn prune_old_report_files(
    out_dir: &Path,
    retention_days: u64,
    now: DateTime<Utc>,
) -> Result<usize> {
    let today = now.date_naive();
    let cutoff = today
        .checked_sub_days(Days::new(retention_days))
        .unwrap_or(today);

    let mut removed = 0;
    for entry in fs::read_dir(out_dir)? {
        let path = entry?.path();
        let Some(date_part) = path
            .file_name()
            .and_then(|v| v.to_str())
            .and_then(|n| n.strip_prefix(REPORT_PREFIX))
            .and_then(|n| n.strip_suffix(REPORT_SUFFIX))
        else {
            continue;
        };

        let Ok(file_date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => debug!(path=%path.display(), error=%err, "could not prune report"),
            }
        }
    }

    Ok(removed)
}
