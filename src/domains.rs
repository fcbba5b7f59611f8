//! Allowed research domains and the default fallback rule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A source domain administratively permitted for research
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowedDomain {
    pub id: i64,
    pub domain: String,
    pub label: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Case-normalize a domain as entered by an administrator
pub fn normalize_domain(raw: &str) -> Result<String> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(Error::invalid_input("Domain cannot be empty"));
    }
    Ok(normalized)
}

/// Resolve the domain set for one research invocation: the active allowlist
/// entries, or the fixed defaults when none are configured
pub fn resolve_domains(active: &[AllowedDomain], defaults: &[String]) -> Vec<String> {
    if active.is_empty() {
        return defaults.to_vec();
    }
    active.iter().map(|d| d.domain.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str) -> AllowedDomain {
        AllowedDomain {
            id: 1,
            domain: name.to_string(),
            label: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn normalization_trims_and_lowercases() {
        assert_eq!(normalize_domain("  HKMA.gov.HK ").unwrap(), "hkma.gov.hk");
        assert!(normalize_domain("   ").is_err());
    }

    #[test]
    fn empty_allowlist_falls_back_to_defaults() {
        let defaults = vec!["hkma.gov.hk".to_string(), "ifec.org.hk".to_string()];
        assert_eq!(resolve_domains(&[], &defaults), defaults);
    }

    #[test]
    fn configured_domains_replace_defaults() {
        let defaults = vec!["hkma.gov.hk".to_string()];
        let active = vec![domain("example.edu")];
        assert_eq!(resolve_domains(&active, &defaults), vec!["example.edu"]);
    }
}
