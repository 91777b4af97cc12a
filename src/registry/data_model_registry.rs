//! Data Model Registry
//!
//! Per data model: the CDE tree and where each dataset lives. Built from the
//! capability info and metadata the local nodes report; data models whose
//! metadata disagrees between nodes are left out and kept in `conflicts`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, warn};

use crate::registry::data_model::{CommonDataElement, DataModelMetadata};

/// What one local node reported for one data model
#[derive(Debug, Clone)]
pub struct NodeDataModel {
    pub node_id: String,
    pub metadata: DataModelMetadata,
    pub datasets: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DataModelRegistry {
    data_models: BTreeMap<String, DataModelMetadata>,
    datasets_locations: BTreeMap<String, BTreeMap<String, String>>,
    conflicts: BTreeMap<String, Vec<String>>,
}

impl DataModelRegistry {
    pub fn new(
        data_models: BTreeMap<String, DataModelMetadata>,
        datasets_locations: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Self {
        Self {
            data_models,
            datasets_locations,
            conflicts: BTreeMap::new(),
        }
    }

    /// Aggregates node reports, dropping data models with conflicting metadata
    pub fn from_reports(reports: impl IntoIterator<Item = NodeDataModel>) -> Self {
        let mut data_models: BTreeMap<String, DataModelMetadata> = BTreeMap::new();
        let mut datasets_locations: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut conflicts: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for report in reports {
            let key = report.metadata.data_model();

            match data_models.get(&key) {
                Some(known) => {
                    let conflicting = known.find_conflicting_fields(&report.metadata);
                    if !conflicting.is_empty() {
                        error!(
                            data_model = %key,
                            node_id = %report.node_id,
                            fields = ?conflicting,
                            "Data model metadata conflicts between nodes"
                        );
                        conflicts.entry(key.clone()).or_default().extend(conflicting);
                    }
                }
                None => {
                    data_models.insert(key.clone(), report.metadata);
                }
            }

            let locations = datasets_locations.entry(key.clone()).or_default();
            for dataset in report.datasets {
                match locations.get(&dataset) {
                    Some(owner) if owner != &report.node_id => {
                        warn!(
                            data_model = %key,
                            dataset = %dataset,
                            kept = %owner,
                            ignored = %report.node_id,
                            "Dataset reported by more than one node"
                        );
                    }
                    Some(_) => {}
                    None => {
                        locations.insert(dataset, report.node_id.clone());
                    }
                }
            }
        }

        for key in conflicts.keys() {
            data_models.remove(key);
            datasets_locations.remove(key);
        }

        Self {
            data_models,
            datasets_locations,
            conflicts: conflicts
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
        }
    }

    pub fn data_models(&self) -> &BTreeMap<String, DataModelMetadata> {
        &self.data_models
    }

    pub fn datasets_locations(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.datasets_locations
    }

    /// Data models excluded because nodes disagree on them, with the conflicting codes
    pub fn conflicts(&self) -> &BTreeMap<String, Vec<String>> {
        &self.conflicts
    }

    pub fn is_empty(&self) -> bool {
        self.data_models.is_empty() && self.datasets_locations.is_empty()
    }

    pub fn data_model_exists(&self, data_model: &str) -> bool {
        self.datasets_locations.contains_key(data_model)
    }

    pub fn dataset_exists(&self, data_model: &str, dataset: &str) -> bool {
        self.datasets_locations
            .get(data_model)
            .map(|datasets| datasets.contains_key(dataset))
            .unwrap_or(false)
    }

    pub fn get_cdes(&self, data_model: &str) -> Option<BTreeMap<String, CommonDataElement>> {
        self.data_models
            .get(data_model)
            .map(DataModelMetadata::flatten_variables)
    }

    pub fn get_node_ids_with_any_of_datasets(
        &self,
        data_model: &str,
        datasets: &[String],
    ) -> Vec<String> {
        let Some(locations) = self.datasets_locations.get(data_model) else {
            return Vec::new();
        };
        let nodes: BTreeSet<&String> = datasets
            .iter()
            .filter_map(|dataset| locations.get(dataset))
            .collect();
        nodes.into_iter().cloned().collect()
    }

    /// The requested datasets that live on `node_id`
    pub fn get_node_specific_datasets(
        &self,
        node_id: &str,
        data_model: &str,
        requested_datasets: &[String],
    ) -> Vec<String> {
        let Some(locations) = self.datasets_locations.get(data_model) else {
            return Vec::new();
        };
        requested_datasets
            .iter()
            .filter(|dataset| locations.get(*dataset).map(String::as_str) == Some(node_id))
            .cloned()
            .collect()
    }

    pub fn get_all_available_datasets_per_data_model(&self) -> BTreeMap<String, Vec<String>> {
        self.datasets_locations
            .iter()
            .map(|(dm, datasets)| (dm.clone(), datasets.keys().cloned().collect()))
            .collect()
    }
}
