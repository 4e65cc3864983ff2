//! Report rows and the serialization collaborator.
//!
//! Serialization is a black box behind `ReportSerializer` — the engine hands
//! rows over and records the returned artifact reference.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ReportError;

/// One consultation record in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    /// Consultation date, "YYYY-MM-DD".
    pub consultation_date: String,
    /// Slot start, "HH:MM".
    pub start_time: String,
    /// Slot end, "HH:MM".
    pub end_time: String,
    /// Fixed location field.
    pub location: String,
    /// Extracted student id, empty when absent.
    pub student_id: String,
    /// Extracted student name, empty when absent.
    pub student_name: String,
    /// Sanitized request body.
    pub request_text: String,
    /// Sanitized response body.
    pub response_text: String,
}

/// Opaque reference to a serialized report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub path: PathBuf,
}

/// Serializes report rows into an artifact.
#[async_trait]
pub trait ReportSerializer: Send + Sync {
    async fn serialize(
        &self,
        job_id: Uuid,
        rows: &[ReportRow],
    ) -> Result<ReportArtifact, ReportError>;
}

/// Writes one CSV file per job under a configured directory.
pub struct CsvReportWriter {
    dir: PathBuf,
}

/// Column headers, matching the consultation report template.
const HEADERS: [&str; 8] = [
    "상담일",
    "시작시간",
    "종료시간",
    "장소",
    "학번",
    "이름",
    "상담요청 내용",
    "교수 답변",
];

impl CsvReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn render(rows: &[ReportRow]) -> String {
        let mut out = String::new();
        out.push_str(&HEADERS.map(csv_field).join(","));
        out.push_str("\r\n");
        for row in rows {
            let fields = [
                row.consultation_date.as_str(),
                row.start_time.as_str(),
                row.end_time.as_str(),
                row.location.as_str(),
                row.student_id.as_str(),
                row.student_name.as_str(),
                row.request_text.as_str(),
                row.response_text.as_str(),
            ];
            out.push_str(&fields.map(csv_field).join(","));
            out.push_str("\r\n");
        }
        out
    }
}

/// Quote a CSV field, doubling embedded quotes.
fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[async_trait]
impl ReportSerializer for CsvReportWriter {
    async fn serialize(
        &self,
        job_id: Uuid,
        rows: &[ReportRow],
    ) -> Result<ReportArtifact, ReportError> {
        let path = self.dir.join(format!("consultation_report_{job_id}.csv"));
        let content = Self::render(rows);

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, content.as_bytes()).await?;

        info!(path = %path.display(), rows = rows.len(), "Report written");
        Ok(ReportArtifact { path })
    }
}

/// Test double: collects rows in memory and returns a fixed artifact path.
pub struct MemoryReportSink {
    pub rows: tokio::sync::Mutex<Vec<ReportRow>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self {
            rows: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryReportSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportSerializer for MemoryReportSink {
    async fn serialize(
        &self,
        job_id: Uuid,
        rows: &[ReportRow],
    ) -> Result<ReportArtifact, ReportError> {
        self.rows.lock().await.extend(rows.iter().cloned());
        Ok(ReportArtifact {
            path: Path::new("memory").join(job_id.to_string()),
        })
    }
}
