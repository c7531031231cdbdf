use calamine::{open_workbook, Data, Reader, Xlsx};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const SHEET_NAME: &str = "Sheet1";

/// Upper bound on data rows; extraction never reads past this.
const MAX_ROWS: usize = 10_000;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("failed to open workbook: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("row {row}: repository id present but pull-request id is missing or not an integer")]
    BadPrId { row: usize },
}

/// Read the repository-id -> pull-request-id mapping from a workbook.
///
/// Layout: sheet "Sheet1", header in row 1, data from row 2; column 1 holds
/// the repository id, column 2 the pull-request id. Reading stops at the
/// first row with an empty repository-id cell, even if later rows contain
/// data, or after 10000 rows.
pub fn repo_groups(path: &Path) -> Result<BTreeMap<String, Vec<u64>>, SheetError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = workbook.worksheet_range(SHEET_NAME)?;

    let rows = range
        .rows()
        .skip(1)
        .map(|row| (repo_cell(row.first()), pr_cell(row.get(1))));
    let groups = extract_groups(rows)?;
    debug!(repos = groups.len(), "extracted repository groups from sheet");
    Ok(groups)
}

/// Grouping and stop rules, independent of the workbook format. Rows are
/// (repository id, pull-request id) cell pairs in sheet order.
fn extract_groups(
    rows: impl Iterator<Item = (Option<String>, Option<u64>)>,
) -> Result<BTreeMap<String, Vec<u64>>, SheetError> {
    let mut groups: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for (index, (repo_id, pr_id)) in rows.take(MAX_ROWS).enumerate() {
        let Some(repo_id) = repo_id else {
            break;
        };
        // Sheet row number: 1 header row, 1-based numbering.
        let row = index + 2;
        let pr_id = pr_id.ok_or(SheetError::BadPrId { row })?;
        groups.entry(repo_id).or_default().push(pr_id);
    }
    Ok(groups)
}

fn repo_cell(cell: Option<&Data>) -> Option<String> {
    match cell {
        Some(Data::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Data::Empty) | Some(Data::String(_)) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn pr_cell(cell: Option<&Data>) -> Option<u64> {
    match cell {
        Some(Data::Int(i)) if *i >= 0 => Some(*i as u64),
        Some(Data::Float(f)) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
        Some(Data::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(repo: Option<&str>, pr: Option<u64>) -> (Option<String>, Option<u64>) {
        (repo.map(str::to_string), pr)
    }

    #[test]
    fn test_groups_rows_by_repo() {
        let rows = vec![
            row(Some("repo-a"), Some(1)),
            row(Some("repo-b"), Some(2)),
            row(Some("repo-a"), Some(3)),
        ];
        let groups = extract_groups(rows.into_iter()).unwrap();
        assert_eq!(groups.get("repo-a"), Some(&vec![1, 3]));
        assert_eq!(groups.get("repo-b"), Some(&vec![2]));
    }

    #[test]
    fn test_stops_at_first_empty_repo_cell() {
        // A gap in column 1 ends extraction even though data follows.
        let rows = vec![
            row(Some("repo-a"), Some(1)),
            row(None, None),
            row(Some("repo-b"), Some(2)),
        ];
        let groups = extract_groups(rows.into_iter()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get("repo-a"), Some(&vec![1]));
    }

    #[test]
    fn test_missing_pr_id_in_kept_row_is_an_error() {
        let rows = vec![row(Some("repo-a"), Some(1)), row(Some("repo-a"), None)];
        let err = extract_groups(rows.into_iter()).unwrap_err();
        assert!(matches!(err, SheetError::BadPrId { row: 3 }));
    }

    #[test]
    fn test_row_cap() {
        let rows = (0..MAX_ROWS + 50).map(|i| row(Some("repo-a"), Some(i as u64)));
        let groups = extract_groups(rows).unwrap();
        assert_eq!(groups.get("repo-a").unwrap().len(), MAX_ROWS);
    }

    #[test]
    fn test_cell_conversions() {
        assert_eq!(repo_cell(Some(&Data::String("  repo ".to_string()))), Some("repo".to_string()));
        assert_eq!(repo_cell(Some(&Data::String("  ".to_string()))), None);
        assert_eq!(repo_cell(Some(&Data::Empty)), None);
        assert_eq!(repo_cell(None), None);

        assert_eq!(pr_cell(Some(&Data::Float(42.0))), Some(42));
        assert_eq!(pr_cell(Some(&Data::Int(7))), Some(7));
        assert_eq!(pr_cell(Some(&Data::String("19".to_string()))), Some(19));
        assert_eq!(pr_cell(Some(&Data::String("x".to_string()))), None);
        assert_eq!(pr_cell(Some(&Data::Empty)), None);
    }
}
