//! Programming DSL document shape.
//!
//! The DSL slot's `content` union (`asset_id | {pool, policy} | {collection,
//! policy}`) is a tagged sum type with three variants rather than duck
//! typing over a loosely shaped map.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    Sequential,
    Random,
}

/// What a slot plays: a fixed asset, or a pool/collection picked by policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SlotContent {
    Pool {
        pool: String,
        policy: SelectionPolicy,
        #[serde(default)]
        rating_max: Option<String>,
    },
    Collection {
        collection: String,
        policy: SelectionPolicy,
        #[serde(default)]
        rating_max: Option<String>,
    },
    Asset(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    /// Local "HH:MM" start time.
    pub start: String,
    pub slot_minutes: i64,
    pub content: SlotContent,
    #[serde(default)]
    pub title: Option<String>,
}

/// A reusable named list of slots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub slots: Vec<Slot>,
}

/// Either a literal slot list for a day, or a reference to a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DaySchedule {
    TemplateRef { r#use: String },
    Slots(Vec<Slot>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgrammingDocument {
    pub channel: String,
    pub broadcast_day: String,
    pub timezone: String,
    #[serde(default)]
    pub templates: HashMap<String, Template>,
    /// pool_id -> ordered collection ids.
    #[serde(default)]
    pub pools: HashMap<String, Vec<String>>,
    /// keyed by day name ("monday") or literal date ("2026-01-01").
    pub schedule: HashMap<String, DaySchedule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_content_asset_variant_round_trips() {
        let yaml = "foo-ep-1";
        let content: SlotContent = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(content, SlotContent::Asset("foo-ep-1".to_string()));
    }

    #[test]
    fn slot_content_pool_variant_parses() {
        let yaml = "pool: sitcoms\npolicy: sequential\n";
        let content: SlotContent = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            content,
            SlotContent::Pool {
                pool: "sitcoms".to_string(),
                policy: SelectionPolicy::Sequential,
                rating_max: None,
            }
        );
    }
}
