//! Input validation limits for ids, attribute names and query sizes

/// Maximum length for entity ids (128 chars)
pub const MAX_ID_LEN: usize = 128;

/// Maximum length for top-level attribute names (63 chars)
pub const MAX_ATTRIBUTE_NAME_LEN: usize = 63;

/// Maximum length for collection plural/singular names (58 chars)
pub const MAX_COLLECTION_NAME_LEN: usize = 58;

/// Maximum nesting depth of an attribute path (64)
pub const MAX_PATH_DEPTH: usize = 64;

/// Maximum expressions across all filter parameters of one request (64)
pub const MAX_FILTER_EXPRESSIONS: usize = 64;

/// Maximum inline selectors in one request (64)
pub const MAX_INLINE_SELECTORS: usize = 64;

/// Validation error type
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyId,
    IdTooLong { len: usize, max: usize },
    InvalidIdChar { id: String, ch: char },
    InvalidAttributeName(String),
    InvalidCollectionName(String),
    PathTooDeep { depth: usize, max: usize },
    TooManyFilters { count: usize, max: usize },
    TooManyInlines { count: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "Id cannot be empty"),
            Self::IdTooLong { len, max } => {
                write!(f, "Id too long: {} chars (max {})", len, max)
            }
            Self::InvalidIdChar { id, ch } => {
                write!(f, "Invalid character '{}' in id \"{}\"", ch, id)
            }
            Self::InvalidAttributeName(name) => {
                write!(f, "Invalid attribute name \"{}\"", name)
            }
            Self::InvalidCollectionName(name) => {
                write!(f, "Invalid collection name \"{}\"", name)
            }
            Self::PathTooDeep { depth, max } => {
                write!(f, "Attribute path too deep: {} parts (max {})", depth, max)
            }
            Self::TooManyFilters { count, max } => {
                write!(f, "Too many filter expressions: {} (max {})", count, max)
            }
            Self::TooManyInlines { count, max } => {
                write!(f, "Too many inline values: {} (max {})", count, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate an entity id (group, resource or version id)
pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::IdTooLong {
            len: id.len(),
            max: MAX_ID_LEN,
        });
    }
    if let Some(ch) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '@')))
    {
        return Err(ValidationError::InvalidIdChar {
            id: id.to_string(),
            ch,
        });
    }
    Ok(())
}

/// Validate a top-level attribute name: `[a-z_][a-z0-9_]*`
pub fn validate_attribute_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_start || !valid_rest || name.len() > MAX_ATTRIBUTE_NAME_LEN {
        return Err(ValidationError::InvalidAttributeName(name.to_string()));
    }
    Ok(())
}

/// Validate a model collection name (plural or singular)
pub fn validate_collection_name(name: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_COLLECTION_NAME_LEN || validate_attribute_name(name).is_err() {
        return Err(ValidationError::InvalidCollectionName(name.to_string()));
    }
    Ok(())
}

/// Validate attribute path depth
pub fn validate_path_depth(depth: usize) -> Result<(), ValidationError> {
    if depth > MAX_PATH_DEPTH {
        return Err(ValidationError::PathTooDeep {
            depth,
            max: MAX_PATH_DEPTH,
        });
    }
    Ok(())
}

/// Validate the number of filter expressions in a request
pub fn validate_filter_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_FILTER_EXPRESSIONS {
        return Err(ValidationError::TooManyFilters {
            count,
            max: MAX_FILTER_EXPRESSIONS,
        });
    }
    Ok(())
}

/// Validate the number of inline selectors in a request
pub fn validate_inline_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_INLINE_SELECTORS {
        return Err(ValidationError::TooManyInlines {
            count,
            max: MAX_INLINE_SELECTORS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("v1.0-beta_2~x@y").is_ok());
        assert_eq!(validate_id(""), Err(ValidationError::EmptyId));
        assert!(validate_id(&"x".repeat(200)).is_err());
        assert!(matches!(
            validate_id("a/b"),
            Err(ValidationError::InvalidIdChar { ch: '/', .. })
        ));
    }

    #[test]
    fn test_validate_attribute_name() {
        assert!(validate_attribute_name("description").is_ok());
        assert!(validate_attribute_name("_x9").is_ok());
        assert!(validate_attribute_name("Upper").is_err());
        assert!(validate_attribute_name("9lives").is_err());
        assert!(validate_attribute_name("").is_err());
        assert!(validate_attribute_name(&"a".repeat(64)).is_err());
    }
}
