//! Role classifier: maps free-text role labels to a canonical role.
//!
//! The user base is bilingual, so each role is recognised in English, in
//! Russian and in the common romanized spellings of the Russian word.

use serde::{Deserialize, Serialize};

/// Roles the notification rules care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    Storekeeper,
    Head,
    Manager,
    Unknown,
}

const STOREKEEPER_LABELS: &[&str] = &[
    "storekeeper",
    "store keeper",
    "store-keeper",
    "кладовщик",
    "кладовщица",
    "kladovshchik",
    "kladovshik",
    "kladovschik",
    "kladovshchitsa",
];

const HEAD_LABELS: &[&str] = &[
    "head",
    "chief",
    "руководитель",
    "начальник",
    "старший",
    "rukovoditel",
    "nachalnik",
    "starshiy",
];

const MANAGER_LABELS: &[&str] = &["manager", "менеджер", "menedzher", "menedzer", "menedger"];

/// Normalize a raw role label. Never fails; unrecognised input is `Unknown`.
pub fn normalize_role(raw: &str) -> CanonicalRole {
    let label = raw.trim().to_lowercase().replace('ё', "е");

    if STOREKEEPER_LABELS.contains(&label.as_str()) {
        CanonicalRole::Storekeeper
    } else if HEAD_LABELS.contains(&label.as_str()) {
        CanonicalRole::Head
    } else if MANAGER_LABELS.contains(&label.as_str()) {
        CanonicalRole::Manager
    } else {
        CanonicalRole::Unknown
    }
}

impl std::fmt::Display for CanonicalRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalRole::Storekeeper => write!(f, "storekeeper"),
            CanonicalRole::Head => write!(f, "head"),
            CanonicalRole::Manager => write!(f, "manager"),
            CanonicalRole::Unknown => write!(f, "unknown"),
        }
    }
}
