// ABOUTME: Table include/exclude filtering for export and clone
// ABOUTME: Validated once up front, then consulted per table name

use crate::error::TransferError;
use crate::utils::validate_identifier;

/// Which tables an operation touches.
///
/// Exclusions win over inclusions; an empty filter includes everything.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Option<Vec<String>>,
    exclude: Vec<String>,
}

impl TableFilter {
    /// A filter that includes every table.
    pub fn all() -> TableFilter {
        TableFilter::default()
    }

    pub fn new(
        include: Option<Vec<String>>,
        exclude: Vec<String>,
    ) -> Result<TableFilter, TransferError> {
        if let Some(tables) = &include {
            for t in tables {
                validate_identifier(t)?;
            }
        }
        for t in &exclude {
            validate_identifier(t)?;
        }
        Ok(TableFilter { include, exclude })
    }

    pub fn includes(&self, table: &str) -> bool {
        if self.exclude.iter().any(|t| t == table) {
            return false;
        }
        match &self.include {
            Some(tables) => tables.iter().any(|t| t == table),
            None => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_includes_everything() {
        let f = TableFilter::all();
        assert!(f.includes("users"));
        assert!(f.includes("anything_at_all"));
        assert!(f.is_empty());
    }

    #[test]
    fn test_include_list_restricts() {
        let f = TableFilter::new(Some(vec!["users".to_string(), "orders".to_string()]), vec![])
            .unwrap();
        assert!(f.includes("users"));
        assert!(f.includes("orders"));
        assert!(!f.includes("audit_log"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let f = TableFilter::new(
            Some(vec!["users".to_string(), "orders".to_string()]),
            vec!["orders".to_string()],
        )
        .unwrap();
        assert!(f.includes("users"));
        assert!(!f.includes("orders"));
    }

    #[test]
    fn test_invalid_table_names_rejected() {
        assert!(TableFilter::new(Some(vec!["users; DROP TABLE x".to_string()]), vec![]).is_err());
        assert!(TableFilter::new(None, vec!["bad name".to_string()]).is_err());
    }
}
