//! Agreement document schema
//!
//! An agreement owns its dimensions, their indicators and the indicators'
//! tasks. The whole subtree is embedded in one document, so every write to
//! the aggregate is a single atomic replace and deleting a dimension drops
//! everything below it. Replaces are conditional on `version`, so two writers
//! that read the same document cannot both land.

use bson::{doc, Document};
use chrono::NaiveDate;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const AGREEMENT_COLLECTION: &str = "agreements";

/// Agreement document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgreementDoc {
    #[serde(rename = "_id")]
    pub id: i64,

    #[serde(default)]
    pub metadata: Metadata,

    /// Bumped by every replace; a write only lands on the version it was read at
    #[serde(default)]
    pub version: i64,

    pub title: String,

    #[serde(default)]
    pub description: String,

    pub start_date: NaiveDate,

    pub end_date: NaiveDate,

    /// Cleared when a reviewer finalizes the agreement
    #[serde(default = "default_true")]
    pub active: bool,

    /// User that created the agreement
    pub creator_id: i64,

    /// Org unit of the creator at creation time
    pub org_unit_id: i64,

    #[serde(default)]
    pub dimensions: Vec<DimensionDoc>,
}

fn default_true() -> bool {
    true
}

impl Default for AgreementDoc {
    fn default() -> Self {
        Self {
            id: 0,
            metadata: Metadata::default(),
            version: 0,
            title: String::new(),
            description: String::new(),
            start_date: NaiveDate::default(),
            end_date: NaiveDate::default(),
            active: true,
            creator_id: 0,
            org_unit_id: 0,
            dimensions: Vec::new(),
        }
    }
}

/// Weighted category within an agreement
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DimensionDoc {
    pub id: i64,
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub responsible_ids: Vec<i64>,
    #[serde(default)]
    pub indicators: Vec<IndicatorDoc>,
}

/// Measurable goal within a dimension
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct IndicatorDoc {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Target score, 0..=100
    pub target: Option<f64>,
    /// Achieved score, 0..=100
    pub evaluation: Option<f64>,
    #[serde(default)]
    pub considerations: String,
    /// Unset only for rows imported without a work line
    pub work_line_id: Option<i64>,
    #[serde(default)]
    pub tasks: Vec<TaskDoc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TaskDoc {
    pub id: i64,
    pub description: String,
    pub deadline: Option<NaiveDate>,
    pub completed_on: Option<NaiveDate>,
    /// Stored evidence filename
    pub evidence: Option<String>,
    pub observation: Option<String>,
}

impl DimensionDoc {
    pub fn is_responsible(&self, user_id: i64) -> bool {
        self.responsible_ids.contains(&user_id)
    }
}

impl AgreementDoc {
    /// Whether the user is responsible for at least one dimension
    pub fn has_responsible(&self, user_id: i64) -> bool {
        self.dimensions.iter().any(|d| d.is_responsible(user_id))
    }

    pub fn dimension_index(&self, dimension_id: i64) -> Option<usize> {
        self.dimensions.iter().position(|d| d.id == dimension_id)
    }

    /// Position of an indicator as (dimension, indicator)
    pub fn indicator_index(&self, indicator_id: i64) -> Option<(usize, usize)> {
        self.dimensions.iter().enumerate().find_map(|(d, dimension)| {
            dimension
                .indicators
                .iter()
                .position(|i| i.id == indicator_id)
                .map(|i| (d, i))
        })
    }

    /// Position of a task as (dimension, indicator, task)
    pub fn task_index(&self, task_id: i64) -> Option<(usize, usize, usize)> {
        self.dimensions.iter().enumerate().find_map(|(d, dimension)| {
            dimension.indicators.iter().enumerate().find_map(|(i, indicator)| {
                indicator
                    .tasks
                    .iter()
                    .position(|t| t.id == task_id)
                    .map(|t| (d, i, t))
            })
        })
    }

    /// Every user referenced as a dimension responsible, deduplicated
    pub fn responsible_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .dimensions
            .iter()
            .flat_map(|d| d.responsible_ids.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl IntoIndexes for AgreementDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "creator_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("creator_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "dimensions.id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("dimension_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "dimensions.indicators.id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("indicator_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "dimensions.indicators.tasks.id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("task_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "dimensions.responsible_ids": 1 },
                Some(
                    IndexOptions::builder()
                        .name("responsible_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AgreementDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgreementDoc {
        AgreementDoc {
            id: 1,
            title: "Convenio".into(),
            creator_id: 5,
            dimensions: vec![
                DimensionDoc {
                    id: 10,
                    responsible_ids: vec![7, 8],
                    ..Default::default()
                },
                DimensionDoc {
                    id: 11,
                    responsible_ids: vec![8],
                    indicators: vec![IndicatorDoc {
                        id: 100,
                        tasks: vec![TaskDoc {
                            id: 1000,
                            ..Default::default()
                        }],
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_locate_nested_nodes() {
        let agreement = sample();
        assert_eq!(agreement.dimension_index(11), Some(1));
        assert_eq!(agreement.indicator_index(100), Some((1, 0)));
        assert_eq!(agreement.task_index(1000), Some((1, 0, 0)));
        assert_eq!(agreement.task_index(1), None);
    }

    #[test]
    fn test_responsibles() {
        let agreement = sample();
        assert!(agreement.has_responsible(7));
        assert!(!agreement.has_responsible(5));
        assert_eq!(agreement.responsible_ids(), vec![7, 8]);
    }

    #[test]
    fn test_bson_roundtrip_keeps_dates_as_strings() {
        let mut agreement = sample();
        agreement.start_date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let doc = bson::to_document(&agreement).unwrap();
        assert_eq!(doc.get_str("start_date").unwrap(), "2025-01-01");
        assert_eq!(doc.get_i64("_id").unwrap(), 1);

        let back: AgreementDoc = bson::from_document(doc).unwrap();
        assert_eq!(back, agreement);
    }
}
