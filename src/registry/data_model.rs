//! Data model metadata (CDE trees)

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A described, typed variable of a data model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonDataElement {
    pub code: String,
    pub label: String,
    pub sql_type: String,
    pub is_categorical: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub enumerations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub variables: Vec<CommonDataElement>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Group {
    fn collect_variables(&self, out: &mut BTreeMap<String, CommonDataElement>) {
        for variable in &self.variables {
            out.insert(variable.code.clone(), variable.clone());
        }
        for subgroup in &self.groups {
            subgroup.collect_variables(out);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModelMetadata {
    pub code: String,
    pub version: String,
    pub label: String,
    #[serde(default)]
    pub variables: Vec<CommonDataElement>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub longitudinal: bool,
}

impl DataModelMetadata {
    /// `code:version`, the key data models are addressed by
    pub fn data_model(&self) -> String {
        format!("{}:{}", self.code, self.version)
    }

    /// Depth-first walk of the CDE tree into `code -> CDE`
    ///
    /// Top-level variables come first; variables found deeper in the group
    /// forest overwrite earlier ones with the same code.
    pub fn flatten_variables(&self) -> BTreeMap<String, CommonDataElement> {
        let mut flattened = BTreeMap::new();
        for variable in &self.variables {
            flattened.insert(variable.code.clone(), variable.clone());
        }
        for group in &self.groups {
            group.collect_variables(&mut flattened);
        }
        flattened
    }

    /// Codes whose CDE differs between the two trees, including codes only one side has
    pub fn find_conflicting_fields(&self, other: &DataModelMetadata) -> Vec<String> {
        let mine = self.flatten_variables();
        let theirs = other.flatten_variables();
        let codes: BTreeSet<&String> = mine.keys().chain(theirs.keys()).collect();
        codes
            .into_iter()
            .filter(|code| mine.get(*code) != theirs.get(*code))
            .cloned()
            .collect()
    }
}

// Metadata files use the data-catalogue field names.

#[derive(Deserialize)]
struct EnumerationSource {
    code: String,
    label: String,
}

#[derive(Deserialize)]
struct CdeSource {
    code: String,
    label: String,
    sql_type: String,
    #[serde(rename = "isCategorical")]
    is_categorical: bool,
    #[serde(rename = "minValue", default)]
    min_value: Option<f64>,
    #[serde(rename = "maxValue", default)]
    max_value: Option<f64>,
    #[serde(default)]
    enumerations: Vec<EnumerationSource>,
}

#[derive(Deserialize)]
struct GroupSource {
    code: String,
    label: String,
    #[serde(default)]
    variables: Vec<CdeSource>,
    #[serde(default)]
    groups: Vec<GroupSource>,
}

#[derive(Deserialize)]
struct DataModelSource {
    code: String,
    version: String,
    label: String,
    variables: Vec<CdeSource>,
    groups: Vec<GroupSource>,
    #[serde(default)]
    longitudinal: bool,
}

impl From<CdeSource> for CommonDataElement {
    fn from(src: CdeSource) -> Self {
        let enumerations = if src.enumerations.is_empty() {
            None
        } else {
            Some(
                src.enumerations
                    .into_iter()
                    .map(|e| (e.code, e.label))
                    .collect(),
            )
        };
        Self {
            code: src.code,
            label: src.label,
            sql_type: src.sql_type,
            is_categorical: src.is_categorical,
            min: src.min_value,
            max: src.max_value,
            enumerations,
        }
    }
}

impl From<GroupSource> for Group {
    fn from(src: GroupSource) -> Self {
        Self {
            code: src.code,
            label: src.label,
            variables: src.variables.into_iter().map(Into::into).collect(),
            groups: src.groups.into_iter().map(Into::into).collect(),
        }
    }
}

/// Parses a data model metadata document (`isCategorical`, `minValue`, nested `groups`, ...)
pub fn parse_data_model_metadata(raw: &str) -> serde_json::Result<DataModelMetadata> {
    let src: DataModelSource = serde_json::from_str(raw)?;
    Ok(DataModelMetadata {
        code: src.code,
        version: src.version,
        label: src.label,
        variables: src.variables.into_iter().map(Into::into).collect(),
        groups: src.groups.into_iter().map(Into::into).collect(),
        longitudinal: src.longitudinal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"{
        "code": "dementia",
        "version": "0.1",
        "label": "Dementia",
        "variables": [
            {"code": "dataset", "label": "Dataset", "sql_type": "text", "isCategorical": true,
             "enumerations": [{"code": "edsd", "label": "EDSD"}, {"code": "ppmi", "label": "PPMI"}]}
        ],
        "groups": [
            {
                "code": "brain", "label": "Brain",
                "variables": [
                    {"code": "leftamygdala", "label": "Left Amygdala", "sql_type": "real",
                     "isCategorical": false, "minValue": 0.0, "maxValue": 3.0}
                ],
                "groups": [
                    {"code": "scores", "label": "Scores", "variables": [
                        {"code": "minimentalstate", "label": "MMSE", "sql_type": "int",
                         "isCategorical": false, "minValue": 0, "maxValue": 30}
                    ]}
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_catalogue_format() {
        let metadata = parse_data_model_metadata(METADATA).unwrap();
        assert_eq!(metadata.data_model(), "dementia:0.1");
        assert!(!metadata.longitudinal);

        let dataset = &metadata.variables[0];
        assert!(dataset.is_categorical);
        assert_eq!(
            dataset.enumerations.as_ref().unwrap().get("edsd"),
            Some(&"EDSD".to_string())
        );

        let flat = metadata.flatten_variables();
        assert_eq!(
            flat.keys().collect::<Vec<_>>(),
            vec!["dataset", "leftamygdala", "minimentalstate"]
        );
        assert_eq!(flat["minimentalstate"].max, Some(30.0));
    }

    #[test]
    fn deeper_occurrences_win() {
        let mut metadata = parse_data_model_metadata(METADATA).unwrap();
        let mut shadow = metadata.variables[0].clone();
        shadow.label = "Shadowed".into();
        metadata.groups[0].groups[0].variables.push(shadow);

        assert_eq!(metadata.flatten_variables()["dataset"].label, "Shadowed");
    }

    #[test]
    fn conflicting_fields_are_symmetric() {
        let a = parse_data_model_metadata(METADATA).unwrap();
        let mut b = a.clone();
        assert!(a.find_conflicting_fields(&b).is_empty());

        b.groups[0].variables[0].max = Some(4.0);
        b.variables.push(CommonDataElement {
            code: "extra".into(),
            label: "Extra".into(),
            sql_type: "int".into(),
            is_categorical: false,
            min: None,
            max: None,
            enumerations: None,
        });

        assert_eq!(a.find_conflicting_fields(&b), vec!["extra", "leftamygdala"]);
        assert_eq!(b.find_conflicting_fields(&a), vec!["extra", "leftamygdala"]);
    }

    #[test]
    fn longitudinal_defaults_to_false_but_is_read() {
        let raw = r#"{"code": "x", "version": "1", "label": "X",
                      "variables": [], "groups": [], "longitudinal": true}"#;
        assert!(parse_data_model_metadata(raw).unwrap().longitudinal);
    }
}
