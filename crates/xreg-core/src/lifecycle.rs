//! Version lifecycle of a resource: latest selection and stickiness

use std::cmp::Ordering;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::entity::{Entity, LATEST_VERSION_ID, LATEST_VERSION_STICKY, NEXT_VERSION_ID};
use crate::error::Result;
use crate::limits::validate_id;
use crate::model::ResourceModel;
use crate::tree::ResourceNode;

/// Rejected version operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Version \"{0}\" not found")]
    VersionNotFound(String),

    #[error("Version \"{0}\" already exists")]
    VersionExists(String),

    #[error("{0} must always have a latest version")]
    LatestRequired(String),

    #[error("The latest version of {0} is chosen by the server")]
    LatestServerControlled(String),

    #[error("Replacement latest version \"{0}\" must be another existing version")]
    InvalidReplacement(String),
}

/// Version ids order numerically when both are numbers
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Oldest first: creation time, then id
fn by_age(a: &Entity, b: &Entity) -> Ordering {
    a.created_at()
        .cmp(b.created_at())
        .then_with(|| compare_ids(&a.id, &b.id))
}

/// Whether a resource currently has versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState<'a> {
    NoVersions,
    HasVersions { latest: &'a str },
}

impl ResourceNode {
    pub fn latest_id(&self) -> Option<&str> {
        self.meta.get_str(LATEST_VERSION_ID)
    }

    pub fn latest(&self) -> Option<&Entity> {
        self.versions.get(self.latest_id()?)
    }

    pub fn latest_mut(&mut self) -> Option<&mut Entity> {
        let id = self.latest_id()?.to_string();
        self.versions.get_mut(&id)
    }

    pub fn is_latest(&self, vid: &str) -> bool {
        self.latest_id() == Some(vid)
    }

    pub fn is_sticky(&self) -> bool {
        self.meta.get_bool(LATEST_VERSION_STICKY).unwrap_or(false)
    }

    pub fn state(&self) -> ResourceState<'_> {
        match self.latest_id() {
            Some(latest) if !self.versions.is_empty() => ResourceState::HasVersions { latest },
            _ => ResourceState::NoVersions,
        }
    }

    /// Next free numeric version id, advancing the counter kept on meta
    pub fn next_version_id(&mut self) -> String {
        let mut next = self
            .meta
            .attributes()
            .get(NEXT_VERSION_ID)
            .and_then(Value::as_u64)
            .unwrap_or(1);
        while self.versions.contains_key(&next.to_string()) {
            next += 1;
        }
        self.meta.set_system(NEXT_VERSION_ID, Value::from(next + 1));
        next.to_string()
    }

    /// Newest version by creation time, ties broken by id
    pub fn newest_version(&self, excluding: Option<&str>) -> Option<&str> {
        self.versions
            .values()
            .filter(|v| Some(v.id.as_str()) != excluding)
            .max_by(|a, b| by_age(a, b))
            .map(|v| v.id.as_str())
    }

    fn point_to(&mut self, vid: &str) {
        if !self.is_latest(vid) {
            debug!("Latest version of {} is now {}", self.entity.xid, vid);
            self.meta
                .set_system(LATEST_VERSION_ID, Value::String(vid.to_string()));
        }
    }

    fn set_sticky(&mut self, sticky: bool) {
        if self.is_sticky() != sticky {
            self.meta
                .set_system(LATEST_VERSION_STICKY, Value::Bool(sticky));
        }
    }

    /// Add a version and decide whether it becomes the latest.
    ///
    /// `islatest` is the client's explicit request, if any. Returns the id of
    /// the new version.
    pub fn add_version(
        &mut self,
        policy: &ResourceModel,
        requested: Option<&str>,
        islatest: Option<bool>,
    ) -> Result<String> {
        let first = self.versions.is_empty();
        let computed = first || !self.is_sticky();
        let (becomes_latest, sticky) = if policy.latest_is_server_controlled() {
            if islatest.is_some_and(|req| req != computed) {
                return Err(LifecycleError::LatestServerControlled(self.entity.xid.clone()).into());
            }
            (computed, false)
        } else {
            match islatest {
                Some(false) if first => {
                    return Err(LifecycleError::LatestRequired(self.entity.xid.clone()).into())
                }
                Some(req) => (req, true),
                None => (computed, self.is_sticky()),
            }
        };

        let vid = match requested {
            Some(vid) => {
                validate_id(vid)?;
                if self.versions.contains_key(vid) {
                    return Err(LifecycleError::VersionExists(vid.to_string()).into());
                }
                vid.to_string()
            }
            None => self.next_version_id(),
        };

        let version = self.new_version(&vid);
        self.versions.insert(vid.clone(), version);
        if becomes_latest {
            self.point_to(&vid);
        }
        self.set_sticky(sticky);
        self.prune(policy.maxversions);
        Ok(vid)
    }

    /// Make `vid` the latest and pin it there
    pub fn set_latest(&mut self, vid: &str) -> Result<()> {
        if !self.versions.contains_key(vid) {
            return Err(LifecycleError::VersionNotFound(vid.to_string()).into());
        }
        self.point_to(vid);
        self.set_sticky(true);
        Ok(())
    }

    /// Let the server pick the latest again: the newest version wins
    pub fn unstick(&mut self) {
        self.set_sticky(false);
        if let Some(newest) = self.newest_version(None).map(str::to_string) {
            self.point_to(&newest);
        }
    }

    /// Check a client's `islatest` on an existing version, applying it when
    /// clients control the latest pointer
    pub fn apply_latest_flag(&mut self, policy: &ResourceModel, vid: &str, islatest: bool) -> Result<()> {
        let current = self.is_latest(vid);
        if policy.latest_is_server_controlled() {
            if islatest != current {
                return Err(LifecycleError::LatestServerControlled(self.entity.xid.clone()).into());
            }
            return Ok(());
        }
        match (islatest, current) {
            (true, _) => self.set_latest(vid),
            (false, true) => Err(LifecycleError::LatestRequired(self.entity.xid.clone()).into()),
            (false, false) => Ok(()),
        }
    }

    /// Remove a version. Removing the latest requires naming its replacement.
    pub fn delete_version(&mut self, vid: &str, replacement: Option<&str>) -> Result<Entity> {
        if !self.versions.contains_key(vid) {
            return Err(LifecycleError::VersionNotFound(vid.to_string()).into());
        }
        if let Some(r) = replacement {
            if r == vid || !self.versions.contains_key(r) {
                return Err(LifecycleError::InvalidReplacement(r.to_string()).into());
            }
        }
        if self.is_latest(vid) && replacement.is_none() {
            return Err(LifecycleError::LatestRequired(self.entity.xid.clone()).into());
        }

        if let Some(r) = replacement {
            self.set_latest(r)?;
        }
        let removed = self
            .versions
            .remove(vid)
            .ok_or_else(|| LifecycleError::VersionNotFound(vid.to_string()))?;
        debug!("Deleted version {}", removed.xid);
        Ok(removed)
    }

    /// Drop the oldest non-latest versions beyond `max` (0 keeps all)
    fn prune(&mut self, max: usize) {
        if max == 0 {
            return;
        }
        while self.versions.len() > max {
            let oldest = self
                .versions
                .values()
                .filter(|v| !self.is_latest(&v.id))
                .min_by(|a, b| by_age(a, b))
                .map(|v| v.id.clone());
            match oldest {
                Some(id) => {
                    debug!("Pruning version {} of {}", id, self.entity.xid);
                    self.versions.remove(&id);
                }
                None => break,
            }
        }
    }
}
