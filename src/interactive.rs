// ABOUTME: Interactive terminal prompt for merge conflict decisions
// ABOUTME: Builds the pure decision function the engine consumes

use crate::schema::TableSchema;
use crate::transfer::merge::{ConflictAction, ConflictDecider};
use dialoguer::{theme::ColorfulTheme, Select};

/// A decider that asks on the terminal, once per (table, source) pair.
///
/// The engine caches every answer, so each collision is asked exactly
/// once per merge run.
pub fn prompt_decider() -> ConflictDecider {
    Box::new(
        |table: &str, source: &str, existing: Option<&TableSchema>| {
            let detail = existing
                .map(|t| format!("{} column(s)", t.columns.len()))
                .unwrap_or_else(|| "unknown shape".to_string());
            let items = [
                "Skip (leave target table untouched)",
                "Replace (drop and recreate from this source)",
                "Append (insert rows into the existing table)",
                "Rename (create as a new table named after the source)",
            ];
            let choice = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(format!(
                    "Table '{}' from '{}' already exists in the target ({})",
                    table, source, detail
                ))
                .items(&items)
                .default(0)
                .interact()
                .unwrap_or(0);
            match choice {
                1 => ConflictAction::Replace,
                2 => ConflictAction::Append,
                3 => ConflictAction::Rename,
                _ => ConflictAction::Skip,
            }
        },
    )
}

/// A decider that always answers the same way; used by `--on-conflict`
/// and by tests.
pub fn fixed_decider(action: ConflictAction) -> ConflictDecider {
    Box::new(move |_, _, _| action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_decider_is_constant() {
        let decide = fixed_decider(ConflictAction::Rename);
        assert_eq!(decide("users", "shop1", None), ConflictAction::Rename);
        assert_eq!(decide("orders", "shop2", None), ConflictAction::Rename);
    }
}
