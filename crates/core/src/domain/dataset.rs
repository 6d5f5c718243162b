use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// Reference to an uploaded tabular dataset. Read-only after creation;
/// re-uploading under the same name supersedes the previous handle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub id: DatasetId,
    pub name: String,
    pub row_count: u32,
    pub column_names: Vec<String>,
    pub path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
}

/// Header and row statistics extracted while validating an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvSummary {
    pub column_names: Vec<String>,
    pub row_count: u32,
}

/// Validate raw CSV content the way the upload intake requires: non-empty,
/// and a header with at least two comma-separated columns.
pub fn summarize_csv(content: &str) -> Result<CsvSummary, DomainError> {
    let mut lines = content.lines();
    let header = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| DomainError::InvalidDataset("empty csv content".to_string()))?;

    let column_names =
        header.split(',').map(|column| column.trim().to_string()).collect::<Vec<_>>();
    if column_names.len() < 2 || column_names.iter().any(String::is_empty) {
        return Err(DomainError::InvalidDataset(format!(
            "header must contain at least two named columns, got `{header}`"
        )));
    }

    let row_count = lines.filter(|line| !line.trim().is_empty()).count() as u32;
    Ok(CsvSummary { column_names, row_count })
}

/// A contiguous block of data rows rendered as retrievable text.
/// Row numbers are 1-based and exclude the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowExcerpt {
    pub row_start: u32,
    pub row_end: u32,
    pub text: String,
}

/// Split the data rows of a CSV into excerpts of at most `rows_per_excerpt`
/// rows each, prefixed with the header so every excerpt is self-describing.
pub fn row_excerpts(content: &str, rows_per_excerpt: u32) -> Vec<RowExcerpt> {
    let rows_per_excerpt = rows_per_excerpt.max(1) as usize;
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };

    let rows = lines.collect::<Vec<_>>();
    let mut excerpts = Vec::new();
    for (chunk_index, chunk) in rows.chunks(rows_per_excerpt).enumerate() {
        let row_start = (chunk_index * rows_per_excerpt) as u32 + 1;
        let row_end = row_start + chunk.len() as u32 - 1;
        let mut text = String::from(header);
        for row in chunk {
            text.push('\n');
            text.push_str(row);
        }
        excerpts.push(RowExcerpt { row_start, row_end, text });
    }
    excerpts
}

#[cfg(test)]
mod tests {
    use crate::errors::DomainError;

    use super::{row_excerpts, summarize_csv};

    const LEDGER: &str = "date,asset,amount\n2024-01-02,BTC,0.5\n2024-01-09,ETH,2.0\n2024-02-01,BTC,-0.1\n";

    #[test]
    fn summarizes_valid_csv() {
        let summary = summarize_csv(LEDGER).expect("valid csv");
        assert_eq!(summary.column_names, vec!["date", "asset", "amount"]);
        assert_eq!(summary.row_count, 3);
    }

    #[test]
    fn rejects_empty_content() {
        assert!(matches!(summarize_csv(""), Err(DomainError::InvalidDataset(_))));
        assert!(matches!(summarize_csv("\n\n"), Err(DomainError::InvalidDataset(_))));
    }

    #[test]
    fn rejects_single_column_header() {
        assert!(matches!(summarize_csv("amount\n1\n2\n"), Err(DomainError::InvalidDataset(_))));
    }

    #[test]
    fn excerpts_carry_header_and_row_ranges() {
        let excerpts = row_excerpts(LEDGER, 2);
        assert_eq!(excerpts.len(), 2);
        assert_eq!((excerpts[0].row_start, excerpts[0].row_end), (1, 2));
        assert_eq!((excerpts[1].row_start, excerpts[1].row_end), (3, 3));
        assert!(excerpts[0].text.starts_with("date,asset,amount"));
        assert!(excerpts[1].text.contains("2024-02-01,BTC,-0.1"));
    }

    #[test]
    fn excerpting_headerless_content_yields_nothing() {
        assert!(row_excerpts("", 10).is_empty());
    }
}
