//! Reminder profiles: which lead times each obligation family gets.
//!
//! Profiles ship embedded in the binary; a per-document `lead_times`
//! override stored alongside the document always wins over the profile.

use std::sync::LazyLock;

use serde::Deserialize;

use crate::db::DocumentKind;

#[derive(Debug, Deserialize)]
struct ProfileConfig {
    debts: DebtProfile,
    documents: DocumentProfiles,
}

#[derive(Debug, Deserialize)]
struct DebtProfile {
    thresholds: Vec<i32>,
}

#[derive(Debug, Deserialize)]
struct DocumentProfiles {
    default: Vec<i32>,
    #[serde(default)]
    overrides: Vec<DocumentOverride>,
}

#[derive(Debug, Deserialize)]
struct DocumentOverride {
    kind: String,
    thresholds: Vec<i32>,
}

static PROFILES: LazyLock<Result<ProfileConfig, String>> =
    LazyLock::new(|| parse_profiles(include_str!("reminder_profiles.toml")));

fn parse_profiles(raw: &str) -> Result<ProfileConfig, String> {
    let parsed: ProfileConfig =
        toml::from_str(raw).map_err(|e| format!("invalid reminder profile TOML: {}", e))?;
    if parsed.debts.thresholds.is_empty() || parsed.documents.default.is_empty() {
        return Err("reminder profiles must not be empty".to_string());
    }
    for threshold in parsed
        .debts
        .thresholds
        .iter()
        .chain(parsed.documents.default.iter())
        .chain(parsed.documents.overrides.iter().flat_map(|o| &o.thresholds))
    {
        if *threshold < 0 {
            return Err(format!("negative reminder threshold {}", threshold));
        }
    }
    Ok(parsed)
}

fn profiles() -> Result<&'static ProfileConfig, String> {
    match &*PROFILES {
        Ok(config) => Ok(config),
        Err(err) => Err(err.clone()),
    }
}

pub fn debt_thresholds() -> Result<&'static [i32], String> {
    Ok(profiles()?.debts.thresholds.as_slice())
}

pub fn document_thresholds(kind: DocumentKind) -> Result<&'static [i32], String> {
    let documents = &profiles()?.documents;
    for override_entry in &documents.overrides {
        if override_entry.kind == kind.as_str() {
            return Ok(override_entry.thresholds.as_slice());
        }
    }
    Ok(documents.default.as_slice())
}

/// The furthest-out threshold across every profile. Scans never need to
/// look past `today + max_horizon_days()`.
pub fn max_horizon_days() -> Result<i64, String> {
    let config = profiles()?;
    let max = config
        .debts
        .thresholds
        .iter()
        .chain(config.documents.default.iter())
        .chain(config.documents.overrides.iter().flat_map(|o| &o.thresholds))
        .copied()
        .max()
        .unwrap_or(0);
    Ok(i64::from(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debt_profile_includes_due_day() {
        let thresholds = debt_thresholds().expect("profiles parse");
        assert!(thresholds.contains(&0));
        assert!(thresholds.contains(&180));
    }

    #[test]
    fn document_default_excludes_due_day() {
        let thresholds = document_thresholds(DocumentKind::Other).expect("profiles parse");
        assert!(!thresholds.contains(&0));
        assert_eq!(thresholds.first(), Some(&90));
    }

    #[test]
    fn per_kind_overrides_replace_the_default() {
        let certificate =
            document_thresholds(DocumentKind::Certificate).expect("profiles parse");
        assert_eq!(certificate, &[60, 30, 15, 7, 3]);
        let contract = document_thresholds(DocumentKind::Contract).expect("profiles parse");
        assert_eq!(contract, &[90, 60, 30, 15, 7]);
        let area = document_thresholds(DocumentKind::AreaDocument).expect("profiles parse");
        assert_eq!(area.first(), Some(&180));
    }

    #[test]
    fn max_horizon_covers_every_profile() {
        assert_eq!(max_horizon_days().expect("profiles parse"), 180);
    }

    #[test]
    fn parse_rejects_negative_threshold() {
        let raw = "[debts]\nthresholds = [-1]\n[documents]\ndefault = [30]\n";
        assert!(parse_profiles(raw).is_err());
    }
}
