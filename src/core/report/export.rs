use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::core::config::CostConfig;
use crate::core::formatter::{format_file_stamp, format_go_duration};
use crate::core::models::report::CostReport;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to write report to {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report")]
    Serialize(#[from] serde_json::Error),
}

/// Name of the file a report is exported to:
/// `{begin:%Y-%m-%d-%H-%M}.{go duration}.json`.
pub fn report_file_name(report: &CostReport, duration: Duration) -> String {
    format!(
        "{}.{}.json",
        format_file_stamp(&report.report.begin),
        format_go_duration(duration)
    )
}

/// Write `report` as pretty JSON into the configured output directory and
/// return the final path. The file only appears once fully written; an
/// existing file with the same name is replaced.
pub fn write_report(
    config: &CostConfig,
    report: &CostReport,
    duration: Duration,
) -> Result<PathBuf, ExportError> {
    let dir = config.output_dir();
    let path = dir.join(report_file_name(report, duration));
    let json = serde_json::to_vec_pretty(report)?;

    std::fs::create_dir_all(&dir).map_err(|source| ExportError::Io {
        path: dir.clone(),
        source,
    })?;
    let tmp = temp_path(&path);
    if let Err(source) = std::fs::write(&tmp, &json) {
        let _ = std::fs::remove_file(&tmp);
        return Err(ExportError::Io { path: tmp, source });
    }
    if let Err(source) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(ExportError::Io { path, source });
    }

    info!(path = %path.display(), id = %report.id, "wrote cost report");
    Ok(path)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}
