//! xreg core - path-addressable registry entities
//!
//! This crate provides the attribute path language, the nested document
//! engine, the registry entity tree with its version lifecycle, and the
//! filter/inline engines that shape rendered responses.

pub mod entity;
pub mod error;
pub mod filter;
pub mod inline;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod object;
pub mod ops;
pub mod path;
pub mod record;
pub mod render;
pub mod target;
pub mod tree;

pub use entity::{Entity, EntityKind, EntityUid};
pub use error::{Error, Result};
pub use filter::{Filter, FilterError, Selection};
pub use inline::{Inline, InlineError};
pub use lifecycle::{LifecycleError, ResourceState};
pub use model::{GroupModel, Level, Model, ResourceModel};
pub use object::TreeError;
pub use ops::{Incoming, WriteMode, WriteOptions};
pub use path::{Path, PathError, PathPart};
pub use record::{ChangeSet, EntityRecord, PropRow, PropValue};
pub use render::{capabilities, Renderer};
pub use target::{GroupKey, ResourceKey, Target};
pub use tree::{GroupNode, RegistryTree, ResourceNode};
