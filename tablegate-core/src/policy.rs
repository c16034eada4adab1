//! Table access policy: the forbidden-table blacklist.
//!
//! The policy is a pure predicate over table names. It is built once at
//! startup from configuration, never mutated afterwards, and shared by
//! reference (`Arc<dyn TableAccessPolicy>`) across all concurrent requests.

use std::collections::HashSet;

/// Decides whether a logical table may be exposed to generic CRUD and query
/// operations.
///
/// Blacklist semantics: tables are allowed by default and denied only when
/// listed. Comparisons are ordinal and case-insensitive everywhere.
///
/// # Object Safety
/// This trait is object-safe; services hold it as `Arc<dyn TableAccessPolicy>`
/// so alternate adapters (database-backed, role-based) can be swapped in
/// without touching the orchestrating services.
pub trait TableAccessPolicy: Send + Sync {
    /// Returns true when the table may be accessed.
    ///
    /// Blank or whitespace-only names are never allowed.
    fn is_allowed(&self, table: &str) -> bool;

    /// The raw denial list, as configured (trimmed, deduplicated).
    ///
    /// The query safety validator scans SQL text for these names.
    fn forbidden_tables(&self) -> &[String];
}

/// Policy backed by a static configuration-supplied list.
///
/// Blank entries in the source list are discarded and duplicates (compared
/// case-insensitively) are folded at construction, so the membership test
/// stays a single O(1) lowercased lookup.
#[derive(Debug, Clone, Default)]
pub struct StaticTablePolicy {
    forbidden: Vec<String>,
    lookup: HashSet<String>,
}

impl StaticTablePolicy {
    /// Builds the policy from a configured list of forbidden table names.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut forbidden = Vec::new();
        let mut lookup = HashSet::new();
        for entry in tables {
            let trimmed = entry.as_ref().trim();
            if trimmed.is_empty() {
                continue;
            }
            if lookup.insert(trimmed.to_lowercase()) {
                forbidden.push(trimmed.to_string());
            }
        }
        Self { forbidden, lookup }
    }

    /// A policy with an empty blacklist: every non-blank table is allowed.
    pub fn allow_all() -> Self {
        Self::default()
    }
}

impl TableAccessPolicy for StaticTablePolicy {
    fn is_allowed(&self, table: &str) -> bool {
        let trimmed = table.trim();
        if trimmed.is_empty() {
            return false;
        }
        !self.lookup.contains(&trimmed.to_lowercase())
    }

    fn forbidden_tables(&self) -> &[String] {
        &self.forbidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let policy = StaticTablePolicy::new(["usuarios"]);

        assert!(!policy.is_allowed("usuarios"));
        assert!(!policy.is_allowed("USUARIOS"));
        assert!(!policy.is_allowed("Usuarios"));
        assert!(policy.is_allowed("productos"));
    }

    #[test]
    fn test_blank_table_is_never_allowed() {
        let policy = StaticTablePolicy::allow_all();

        assert!(!policy.is_allowed(""));
        assert!(!policy.is_allowed("   "));
        assert!(!policy.is_allowed("\t\n"));
    }

    #[test]
    fn test_empty_blacklist_allows_everything_non_blank() {
        let policy = StaticTablePolicy::allow_all();

        assert!(policy.is_allowed("anything"));
        assert!(policy.is_allowed("UsErS"));
        assert!(policy.forbidden_tables().is_empty());
    }

    #[test]
    fn test_blank_entries_discarded_and_duplicates_folded() {
        let policy = StaticTablePolicy::new(["  secrets  ", "", "   ", "SECRETS", "audit_log"]);

        assert_eq!(policy.forbidden_tables(), &["secrets", "audit_log"]);
        assert!(!policy.is_allowed("Secrets"));
        assert!(!policy.is_allowed("audit_log"));
    }

    #[test]
    fn test_lookup_trims_input() {
        let policy = StaticTablePolicy::new(["secrets"]);

        assert!(!policy.is_allowed("  secrets  "));
        assert!(policy.is_allowed("  items  "));
    }
}
