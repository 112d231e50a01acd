//! Registry model: which group and resource collections exist

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limits::validate_collection_name;

/// Collection name of a resource's versions
pub const VERSIONS: &str = "versions";

/// Name of a resource's metadata sub-object
pub const META: &str = "meta";

/// Registry-level model document
pub const MODEL: &str = "model";

/// Registry-level capabilities document
pub const CAPABILITIES: &str = "capabilities";

const RESERVED: &[&str] = &[VERSIONS, META, MODEL, CAPABILITIES, "labels"];

/// The registry model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub groups: BTreeMap<String, GroupModel>,
}

/// A group collection and the resource collections it holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupModel {
    pub plural: String,
    pub singular: String,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceModel>,
}

/// A resource collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceModel {
    pub plural: String,
    pub singular: String,

    /// Whether clients may choose the latest version. When false the server
    /// alone decides and any client `islatest` must agree with it.
    #[serde(default = "default_true")]
    pub setlatest: bool,

    /// Maximum versions kept per resource (0 = unlimited)
    #[serde(default)]
    pub maxversions: usize,
}

fn default_true() -> bool {
    true
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a model document
    pub fn from_json(text: &str) -> Result<Self> {
        let model: Model = serde_json::from_str(text)?;
        model.validate()?;
        Ok(model)
    }

    pub fn with_group(mut self, group: GroupModel) -> Self {
        self.groups.insert(group.plural.clone(), group);
        self
    }

    pub fn group(&self, plural: &str) -> Option<&GroupModel> {
        self.groups.get(plural)
    }

    pub fn resource(&self, group: &str, resource: &str) -> Option<&ResourceModel> {
        self.group(group).and_then(|g| g.resource(resource))
    }

    pub fn validate(&self) -> Result<()> {
        for (key, group) in &self.groups {
            check_names(key, &group.plural, &group.singular)?;
            for (rkey, resource) in &group.resources {
                check_names(rkey, &resource.plural, &resource.singular)?;
            }
        }
        Ok(())
    }
}

fn check_names(key: &str, plural: &str, singular: &str) -> Result<()> {
    if key != plural {
        return Err(Error::Validation(format!(
            "Model key \"{}\" doesn't match plural \"{}\"",
            key, plural
        )));
    }
    validate_collection_name(plural)?;
    validate_collection_name(singular)?;
    if plural == singular {
        return Err(Error::Validation(format!(
            "Plural and singular names must differ: \"{}\"",
            plural
        )));
    }
    if RESERVED.contains(&plural) || RESERVED.contains(&singular) {
        return Err(Error::Validation(format!(
            "\"{}\" uses a reserved name",
            plural
        )));
    }
    Ok(())
}

impl GroupModel {
    pub fn new(plural: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            singular: singular.into(),
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, resource: ResourceModel) -> Self {
        self.resources.insert(resource.plural.clone(), resource);
        self
    }

    pub fn resource(&self, plural: &str) -> Option<&ResourceModel> {
        self.resources.get(plural)
    }
}

impl ResourceModel {
    pub fn new(plural: impl Into<String>, singular: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            singular: singular.into(),
            setlatest: true,
            maxversions: 0,
        }
    }

    /// Clients can't pick the latest version
    pub fn server_controlled(mut self) -> Self {
        self.setlatest = false;
        self
    }

    pub fn with_max_versions(mut self, max: usize) -> Self {
        self.maxversions = max;
        self
    }

    pub fn latest_is_server_controlled(&self) -> bool {
        !self.setlatest
    }
}

/// A position in the entity hierarchy, as seen through the model
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Level<'m> {
    Registry,
    Group(&'m GroupModel),
    Resource(&'m GroupModel, &'m ResourceModel),
    Version(&'m GroupModel, &'m ResourceModel),
}

impl<'m> Level<'m> {
    /// The level reached by descending into collection `plural`
    pub fn child(&self, model: &'m Model, plural: &str) -> Option<Level<'m>> {
        match self {
            Self::Registry => model.group(plural).map(Level::Group),
            Self::Group(g) => g.resource(plural).map(|r| Level::Resource(g, r)),
            Self::Resource(g, r) if plural == VERSIONS => Some(Level::Version(g, r)),
            _ => None,
        }
    }

    /// Names of the collections nested directly under this level
    pub fn collections(&self, model: &'m Model) -> Vec<&'m str> {
        match self {
            Self::Registry => model.groups.keys().map(String::as_str).collect(),
            Self::Group(g) => g.resources.keys().map(String::as_str).collect(),
            Self::Resource(..) => vec![VERSIONS],
            Self::Version(..) => Vec::new(),
        }
    }

    /// Single-document sub-objects that may be inlined but never expanded
    /// with a wildcard
    pub fn documents(&self) -> &'static [&'static str] {
        match self {
            Self::Registry => &[MODEL, CAPABILITIES],
            Self::Resource(..) => &[META],
            _ => &[],
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_model() -> Model {
    Model::new()
        .with_group(
            GroupModel::new("endpoints", "endpoint")
                .with_resource(ResourceModel::new("messages", "message")),
        )
        .with_group(
            GroupModel::new("schemagroups", "schemagroup")
                .with_resource(ResourceModel::new("schemas", "schema").server_controlled()),
        )
}
