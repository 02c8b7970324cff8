use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blob::blob_store::BlobRef;
use crate::storage::attributes::NestedAttributesMap;

pub type EntityId = Uuid;

/// A logical package version grouping assets, e.g. all files of `org.example:lib:1.0`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: EntityId,
    pub bucket: String,
    pub format: String,
    /// unique per bucket
    pub key: String,
    pub group: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub attributes: NestedAttributesMap,
}

/// A single stored file, optionally belonging to a component
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: EntityId,
    pub bucket: String,
    pub component: Option<EntityId>,
    pub format: String,
    /// unique per bucket and component
    pub key: String,
    /// the repository path
    pub name: String,
    pub blob_ref: Option<BlobRef>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub last_updated: Option<SystemTime>,
    pub attributes: NestedAttributesMap,
}

pub trait Record {
    fn id(&self) -> EntityId;
    fn bucket(&self) -> &str;
    fn attributes(&self) -> &NestedAttributesMap;
    fn attributes_mut(&mut self) -> &mut NestedAttributesMap;

    /// A named property: one of the record's own fields, or a dot separated attribute path
    fn property(&self, name: &str) -> Option<&str>;
}

impl Record for Component {
    fn id(&self) -> EntityId {
        self.id
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn attributes(&self) -> &NestedAttributesMap {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut NestedAttributesMap {
        &mut self.attributes
    }

    fn property(&self, name: &str) -> Option<&str> {
        match name {
            "key" => Some(&self.key),
            "format" => Some(&self.format),
            "name" => Some(&self.name),
            "group" => self.group.as_deref(),
            "version" => self.version.as_deref(),
            _ => self.attributes.get_path(name),
        }
    }
}

impl Record for Asset {
    fn id(&self) -> EntityId {
        self.id
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn attributes(&self) -> &NestedAttributesMap {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut NestedAttributesMap {
        &mut self.attributes
    }

    fn property(&self, name: &str) -> Option<&str> {
        match name {
            "key" => Some(&self.key),
            "format" => Some(&self.format),
            "name" => Some(&self.name),
            "content_type" => self.content_type.as_deref(),
            _ => self.attributes.get_path(name),
        }
    }
}
