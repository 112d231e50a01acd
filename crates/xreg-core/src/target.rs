//! Request targets: which part of the registry a URL path addresses

use std::fmt;

use crate::error::{Error, Result};
use crate::model::{Level, Model, CAPABILITIES, META, MODEL, VERSIONS};

/// Address of one group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub plural: String,
    pub id: String,
}

/// Address of one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub group: GroupKey,
    pub plural: String,
    pub id: String,
}

impl GroupKey {
    pub fn new(plural: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            id: id.into(),
        }
    }

    pub fn xid(&self) -> String {
        format!("/{}/{}", self.plural, self.id)
    }

    pub fn resource(&self, plural: impl Into<String>, id: impl Into<String>) -> ResourceKey {
        ResourceKey {
            group: self.clone(),
            plural: plural.into(),
            id: id.into(),
        }
    }
}

impl ResourceKey {
    pub fn xid(&self) -> String {
        format!("{}/{}/{}", self.group.xid(), self.plural, self.id)
    }

    pub fn meta_xid(&self) -> String {
        format!("{}/{}", self.xid(), META)
    }

    pub fn version_xid(&self, vid: &str) -> String {
        format!("{}/{}/{}", self.xid(), VERSIONS, vid)
    }
}

/// A parsed request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Registry,
    Model,
    Capabilities,
    Groups(String),
    Group(GroupKey),
    Resources(GroupKey, String),
    Resource(ResourceKey),
    Meta(ResourceKey),
    Versions(ResourceKey),
    Version(ResourceKey, String),
}

impl Target {
    /// Resolve a URL path such as `/endpoints/e1/messages` against the model
    pub fn parse(path: &str, model: &Model) -> Result<Self> {
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let unknown = || Error::NotFound(format!("/{}", segs.join("/")));

        let target = match segs.as_slice() {
            [] => Target::Registry,
            [MODEL] => Target::Model,
            [CAPABILITIES] => Target::Capabilities,
            [g, rest @ ..] => {
                let group = model.group(g).ok_or_else(unknown)?;
                match rest {
                    [] => Target::Groups(g.to_string()),
                    [gid] => Target::Group(GroupKey::new(*g, *gid)),
                    [gid, r, rest @ ..] => {
                        group.resource(r).ok_or_else(unknown)?;
                        let gkey = GroupKey::new(*g, *gid);
                        match rest {
                            [] => Target::Resources(gkey, r.to_string()),
                            [rid] => Target::Resource(gkey.resource(*r, *rid)),
                            [rid, META] => Target::Meta(gkey.resource(*r, *rid)),
                            [rid, VERSIONS] => Target::Versions(gkey.resource(*r, *rid)),
                            [rid, VERSIONS, vid] => {
                                Target::Version(gkey.resource(*r, *rid), vid.to_string())
                            }
                            _ => return Err(unknown()),
                        }
                    }
                }
            }
        };
        Ok(target)
    }

    /// Model level of the entities this target returns
    pub fn level<'m>(&self, model: &'m Model) -> Option<Level<'m>> {
        let group_level = |plural: &str| Level::Registry.child(model, plural);
        match self {
            Self::Registry => Some(Level::Registry),
            Self::Model | Self::Capabilities => None,
            Self::Groups(g) => group_level(g),
            Self::Group(k) => group_level(&k.plural),
            Self::Resources(k, r) => group_level(&k.plural)?.child(model, r),
            Self::Resource(k) | Self::Meta(k) => {
                group_level(&k.group.plural)?.child(model, &k.plural)
            }
            Self::Versions(k) | Self::Version(k, _) => group_level(&k.group.plural)?
                .child(model, &k.plural)?
                .child(model, VERSIONS),
        }
    }

    /// Whether the target is a collection rather than a single entity
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Self::Groups(_) | Self::Resources(..) | Self::Versions(_)
        )
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry => f.write_str("/"),
            Self::Model => write!(f, "/{}", MODEL),
            Self::Capabilities => write!(f, "/{}", CAPABILITIES),
            Self::Groups(g) => write!(f, "/{}", g),
            Self::Group(k) => f.write_str(&k.xid()),
            Self::Resources(k, r) => write!(f, "{}/{}", k.xid(), r),
            Self::Resource(k) => f.write_str(&k.xid()),
            Self::Meta(k) => f.write_str(&k.meta_xid()),
            Self::Versions(k) => write!(f, "{}/{}", k.xid(), VERSIONS),
            Self::Version(k, v) => f.write_str(&k.version_xid(v)),
        }
    }
}
