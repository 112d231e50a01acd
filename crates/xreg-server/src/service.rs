//! Registry service: one transaction per request over a storage backend

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use xreg_core::{
    Filter, Inline, Model, Path, RegistryTree, Renderer, Target, WriteMode, WriteOptions,
};
use xreg_storage::StorageBackend;

use crate::error::{ServiceError, ServiceResult};

pub const DEFAULT_REGISTRY_ID: &str = "xreg";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Write verbs understood by [`RegistryService::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Put,
    Patch,
    Post,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Outcome of a write
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub created: bool,
    /// URL of a newly created entity
    pub location: Option<String>,
    /// Rendering of what was written; `None` after a delete
    pub body: Option<Value>,
}

/// Holds the backend and model; every request loads the tree, runs one
/// core operation and commits the resulting change set.
pub struct RegistryService<S: StorageBackend + ?Sized> {
    storage: Arc<S>,
    model: Arc<Model>,
    registry_id: String,
    base_url: String,
    gate: Mutex<()>,
}

impl<S: StorageBackend + ?Sized> RegistryService<S> {
    pub fn new(storage: Arc<S>, model: Model) -> Self {
        Self {
            storage,
            model: Arc::new(model),
            registry_id: DEFAULT_REGISTRY_ID.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            gate: Mutex::new(()),
        }
    }

    pub fn with_registry_id(mut self, id: impl Into<String>) -> Self {
        self.registry_id = id.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make sure the registry entity exists in storage
    pub async fn initialize(&self) -> ServiceResult<()> {
        self.storage.initialize().await?;
        self.transaction(|_| Ok(())).await
    }

    pub async fn health_check(&self) -> ServiceResult<bool> {
        Ok(self.storage.health_check().await?)
    }

    async fn load(&self) -> ServiceResult<RegistryTree> {
        let records = self.storage.get_all_entities().await?;
        Ok(RegistryTree::from_records(&self.registry_id, records)?)
    }

    /// Run `f` against a freshly loaded tree and commit its changes. Any
    /// error drops the tree without writing.
    pub async fn transaction<T, F>(&self, f: F) -> ServiceResult<T>
    where
        F: FnOnce(&mut RegistryTree) -> ServiceResult<T> + Send,
        T: Send,
    {
        let _guard = self.gate.lock().await;
        let mut tree = self.load().await?;
        let out = f(&mut tree)?;

        let changes = tree.changes();
        if !changes.is_empty() {
            self.storage.apply_changes(&changes).await?;
            tracing::debug!(
                "Committed {} saved and {} deleted entities",
                changes.saved.len(),
                changes.deleted.len()
            );
            tree.mark_committed();
        }
        Ok(out)
    }

    /// Render a target with the given `inline=` and `filter=` values
    pub async fn get(
        &self,
        target: &Target,
        inline: &[String],
        filter: &[String],
    ) -> ServiceResult<Value> {
        let model = &*self.model;
        let (inline, filter) = match target.level(model) {
            Some(level) => (
                Inline::parse(inline, model, level).map_err(xreg_core::Error::from)?,
                Filter::parse(filter, model, level).map_err(xreg_core::Error::from)?,
            ),
            None if inline.is_empty() && filter.is_empty() => (Inline::none(), Filter::default()),
            None => {
                return Err(ServiceError::BadRequest(format!(
                    "{} doesn't support inline or filter",
                    target
                )))
            }
        };

        // Reads go through the gate too, so they never see a half-applied write.
        self.transaction(|tree| {
            Ok(Renderer::new(model, tree, &self.base_url).render(target, &inline, &filter)?)
        })
        .await
    }

    /// Apply a PUT/PATCH/POST/DELETE to `target`
    pub async fn write(
        &self,
        action: Action,
        target: &Target,
        body: Value,
        opts: WriteOptions,
    ) -> ServiceResult<Reply> {
        let model = &*self.model;
        let mode = match action {
            Action::Patch => WriteMode::Merge,
            _ => WriteMode::Replace,
        };

        self.transaction(move |tree| {
            let (created, shown, ids) = match (action, target) {
                (Action::Put | Action::Patch, Target::Registry) => {
                    tree.update_registry(model, body, mode, &opts)?;
                    (false, Some(target.clone()), None)
                }
                (Action::Put | Action::Patch, Target::Group(key)) => {
                    let created = tree.write_group(model, key, body, mode, &opts)?;
                    (created, Some(target.clone()), None)
                }
                (Action::Post, Target::Groups(plural)) => {
                    let ids = tree.upsert_groups(model, plural, body)?;
                    (false, Some(target.clone()), Some(ids))
                }
                (Action::Put | Action::Patch, Target::Resource(key)) => {
                    let created = tree.write_resource(model, key, body, mode, &opts)?;
                    (created, Some(target.clone()), None)
                }
                (Action::Post, Target::Resources(group, plural)) => {
                    let ids = tree.upsert_resources(model, group, plural, body)?;
                    (false, Some(target.clone()), Some(ids))
                }
                (Action::Post, Target::Resource(key)) => {
                    let vid = tree.add_version(model, key, body, &opts)?;
                    (true, Some(Target::Version(key.clone(), vid)), None)
                }
                (Action::Patch, Target::Meta(key)) => {
                    tree.patch_meta(model, key, body, &opts)?;
                    (false, Some(target.clone()), None)
                }
                (Action::Post, Target::Versions(key)) => {
                    let ids = tree.upsert_versions(model, key, body, &opts)?;
                    (false, Some(target.clone()), Some(ids))
                }
                (Action::Put | Action::Patch, Target::Version(key, vid)) => {
                    let created = tree.write_version(model, key, vid, body, mode, &opts)?;
                    (created, Some(target.clone()), None)
                }
                (Action::Delete, Target::Group(key)) => {
                    tree.delete_group(key, &opts)?;
                    (false, None, None)
                }
                (Action::Delete, Target::Resource(key)) => {
                    tree.delete_resource(key, &opts)?;
                    (false, None, None)
                }
                (Action::Delete, Target::Version(key, vid)) => {
                    tree.delete_version(model, key, vid, &opts)?;
                    (false, None, None)
                }
                _ => {
                    tracing::warn!("Rejected {} on {}", action, target);
                    return Err(ServiceError::MethodNotAllowed {
                        method: action.to_string(),
                        target: target.to_string(),
                    });
                }
            };

            let Some(shown) = shown else {
                tracing::info!("Deleted {}", target);
                return Ok(Reply {
                    created: false,
                    location: None,
                    body: None,
                });
            };

            let renderer = Renderer::new(model, tree, &self.base_url);
            let mut body = renderer.render(&shown, &Inline::none(), &Filter::default())?;
            if let Some(ids) = ids {
                body = only(body, &ids);
            }
            let location = created.then(|| format!("{}{}", self.base_url, shown));
            if created {
                tracing::info!("Created {}", shown);
            }
            Ok(Reply {
                created,
                location,
                body: Some(body),
            })
        })
        .await
    }

    /// Set one attribute of the entity `target` names, addressed by a
    /// display path such as `labels.stage` or `list[2]`
    pub async fn set_attribute(
        &self,
        target: &Target,
        path: &str,
        value: Value,
        opts: WriteOptions,
    ) -> ServiceResult<Value> {
        let path = Path::parse(path).map_err(xreg_core::Error::from)?;
        let model = &*self.model;
        self.transaction(move |tree| {
            tree.set_attribute(target, &path, value, &opts)?;
            Ok(Renderer::new(model, tree, &self.base_url).render(
                target,
                &Inline::none(),
                &Filter::default(),
            )?)
        })
        .await
    }
}

/// Keep only the entries of a collection map whose ids were written
fn only(value: Value, ids: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(id, _)| ids.contains(id))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}
