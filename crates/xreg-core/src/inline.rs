//! Inline selectors: which nested collections are expanded in a response

use thiserror::Error;

use crate::limits::validate_inline_count;
use crate::model::{Level, Model, CAPABILITIES, MODEL};
use crate::path::{Path, PathError, STORAGE_DELIM};

const ALL: &str = "*";
const WILDCARD_SUFFIX: &str = ".*";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InlineError {
    #[error("{0}")]
    Path(#[from] PathError),

    #[error("\"{0}\" doesn't name a nested collection")]
    UnknownPath(String),

    #[error("\"{0}\" can't end with a wildcard")]
    WildcardNotAllowed(String),

    #[error("{0}")]
    Limit(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Selector {
    /// Abstract rendering of the selected path
    path: String,
    wildcard: bool,
}

/// Parsed `inline=` parameters, relative to the request target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inline {
    all: bool,
    selectors: Vec<Selector>,
}

impl Inline {
    /// Expand nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Expand everything except the registry's model and capabilities
    pub fn all() -> Self {
        Self {
            all: true,
            selectors: Vec::new(),
        }
    }

    pub fn parse<S: AsRef<str>>(
        params: &[S],
        model: &Model,
        level: Level<'_>,
    ) -> Result<Self, InlineError> {
        let mut inline = Self::none();

        for param in params {
            for item in param.as_ref().split(',').map(str::trim) {
                if item.is_empty() {
                    continue;
                }
                if item == ALL {
                    inline.all = true;
                    continue;
                }

                let (text, wildcard) = match item.strip_suffix(WILDCARD_SUFFIX) {
                    Some(prefix) => (prefix, true),
                    None => (item, false),
                };
                let path = Path::parse(text)?;
                validate(item, &path, wildcard, model, level)?;
                inline.selectors.push(Selector {
                    path: path.to_abstract(),
                    wildcard,
                });
            }
        }

        validate_inline_count(inline.selectors.len())
            .map_err(|e| InlineError::Limit(e.to_string()))?;
        Ok(inline)
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.selectors.is_empty()
    }

    /// Decide whether the collection at `path` (abstract rendering, relative
    /// to the request target) is expanded
    pub fn should_inline(&self, path: &str) -> bool {
        if self.all && path != MODEL && path != CAPABILITIES {
            return true;
        }
        self.selectors.iter().any(|sel| {
            sel.path == path
                || is_prefix(path, &sel.path)
                || (sel.wildcard && is_prefix(&sel.path, path))
        })
    }
}

/// `prefix` names an ancestor of `path`
fn is_prefix(prefix: &str, path: &str) -> bool {
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path[prefix.len()..].starts_with(STORAGE_DELIM)
}

fn validate(
    item: &str,
    path: &Path,
    wildcard: bool,
    model: &Model,
    level: Level<'_>,
) -> Result<(), InlineError> {
    if path.is_empty() {
        return Err(InlineError::UnknownPath(item.to_string()));
    }

    let mut current = level;
    let last = path.len() - 1;
    for (i, part) in path.parts().iter().enumerate() {
        let name = part
            .key()
            .ok_or_else(|| InlineError::UnknownPath(item.to_string()))?;
        if let Some(next) = current.child(model, name) {
            current = next;
            continue;
        }
        if i == last && current.documents().contains(&name) {
            if wildcard {
                return Err(InlineError::WildcardNotAllowed(item.to_string()));
            }
            return Ok(());
        }
        return Err(InlineError::UnknownPath(item.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample_model;

    fn parse(params: &[&str]) -> Result<Inline, InlineError> {
        Inline::parse(params, &sample_model(), Level::Registry)
    }

    #[test]
    fn test_exact_and_ancestors() {
        let inline = parse(&["endpoints.messages"]).unwrap();
        assert!(inline.should_inline("endpoints"));
        assert!(inline.should_inline("endpoints,messages"));
        assert!(!inline.should_inline("endpoints,messages,versions"));
        assert!(!inline.should_inline("schemagroups"));
    }

    #[test]
    fn test_wildcard_selector() {
        let inline = parse(&["endpoints.*"]).unwrap();
        assert!(inline.should_inline("endpoints"));
        assert!(inline.should_inline("endpoints,messages,versions"));
        assert!(inline.should_inline("endpoints,messages,meta"));
        assert!(!inline.should_inline("endpointsx"));
        assert!(!inline.should_inline("schemagroups"));
    }

    #[test]
    fn test_global_wildcard() {
        let inline = parse(&["*"]).unwrap();
        assert!(inline.should_inline("schemagroups,schemas,versions"));
        assert!(!inline.should_inline("model"));
        assert!(!inline.should_inline("capabilities"));

        let inline = parse(&["*", "model"]).unwrap();
        assert!(inline.should_inline("model"));
    }

    #[test]
    fn test_comma_separated_and_repeated() {
        let inline = parse(&["endpoints, schemagroups.schemas", "capabilities"]).unwrap();
        assert!(inline.should_inline("endpoints"));
        assert!(inline.should_inline("schemagroups,schemas"));
        assert!(inline.should_inline("capabilities"));
        assert!(!inline.is_empty());
        assert!(parse(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            parse(&["nope"]),
            Err(InlineError::UnknownPath("nope".to_string()))
        );
        assert_eq!(
            parse(&["endpoints.messages.meta.*"]),
            Err(InlineError::WildcardNotAllowed(
                "endpoints.messages.meta.*".to_string()
            ))
        );
        assert!(matches!(
            parse(&["model.*"]),
            Err(InlineError::WildcardNotAllowed(_))
        ));
        assert!(parse(&["endpoints.messages.meta"]).is_ok());
        assert!(matches!(parse(&["endpoints..x"]), Err(InlineError::Path(_))));
        assert!(matches!(
            parse(&["endpoints.meta"]),
            Err(InlineError::UnknownPath(_))
        ));
    }

    #[test]
    fn test_relative_to_target_level() {
        let model = sample_model();
        let group = Level::Registry.child(&model, "endpoints").unwrap();
        let inline = Inline::parse(&["messages.versions"], &model, group).unwrap();
        assert!(inline.should_inline("messages"));
        assert!(Inline::parse(&["endpoints"], &model, group).is_err());
    }
}
