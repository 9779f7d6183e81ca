//! Categories (file types) and paired-category resolution
//!
//! Categories follow a fixed naming convention. A primary category name ends
//! with `_P`, optionally followed by qualifiers (`SGV_P_MATCHED`). Replacing
//! that trailing segment with `""` yields the output category and with `_M`
//! the meta category:
//!
//! ```
//! use ferro_join::category::{Category, META_SUFFIX, OUTPUT_SUFFIX};
//!
//! let primary = Category::new("SSM_P").unwrap();
//! assert_eq!(primary.resolve_paired(OUTPUT_SUFFIX).unwrap().name(), "SSM");
//! assert_eq!(primary.resolve_paired(META_SUFFIX).unwrap().name(), "SSM_M");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};

use crate::error::JoinError;

/// Suffix that turns a primary category into its output category
pub const OUTPUT_SUFFIX: &str = "";
/// Suffix that turns a primary category into its meta category
pub const META_SUFFIX: &str = "_M";

/// Trailing role marker of a primary category, with optional qualifiers
static PRIMARY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"_P(_\w*)*$").unwrap());

/// Categories produced and consumed by the release pipeline
#[rustfmt::skip]
pub const KNOWN_CATEGORIES: &[&str] = &[
    "SSM_P", "SSM_M", "SSM",
    "CNSM_P", "CNSM_M", "CNSM",
    "STSM_P", "STSM_M", "STSM",
    "SGV_P_MATCHED", "SGV_M", "SGV",
    "CNGV_P_MATCHED", "CNGV_M", "CNGV",
    "STGV_P_MATCHED", "STGV_M", "STGV",
    "PEXP_P", "PEXP_M", "PEXP",
    "METH_ARRAY_P", "METH_ARRAY_M", "METH_ARRAY",
    "METH_SEQ_P", "METH_SEQ_M", "METH_SEQ",
    "EXP_ARRAY_P", "EXP_ARRAY_M", "EXP_ARRAY",
    "EXP_SEQ_P", "EXP_SEQ_M", "EXP_SEQ",
    "MIRNA_SEQ_P", "MIRNA_SEQ_M", "MIRNA_SEQ",
    "JCN_P", "JCN_M", "JCN",
];

static REGISTRY: Lazy<Vec<Category>> = Lazy::new(|| {
    KNOWN_CATEGORIES
        .iter()
        .map(|name| Category::from_name(name.to_string()))
        .collect()
});

/// Structural role of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryRole {
    /// Fine-grained observation records
    Primary,
    /// Small companion records joined into primary records
    Meta,
    /// Joined output
    Output,
}

impl CategoryRole {
    /// Derive the role from a category name
    pub fn from_name(name: &str) -> Self {
        if PRIMARY_PATTERN.is_match(name) {
            CategoryRole::Primary
        } else if name.ends_with(META_SUFFIX) {
            CategoryRole::Meta
        } else {
            CategoryRole::Output
        }
    }
}

impl fmt::Display for CategoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryRole::Primary => write!(f, "primary"),
            CategoryRole::Meta => write!(f, "meta"),
            CategoryRole::Output => write!(f, "output"),
        }
    }
}

/// A source or target grouping of records (a file type).
///
/// Equality, ordering and hashing use the name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category {
    name: String,
    role: CategoryRole,
}

impl Category {
    /// Create a category, deriving its role from the name.
    ///
    /// Names are upper-cased. Any non-empty name is accepted; use
    /// [`Category::parse`] to restrict to the registry.
    pub fn new(name: impl AsRef<str>) -> Result<Self, JoinError> {
        let name = name.as_ref().trim().to_uppercase();
        if name.is_empty() {
            return Err(JoinError::UnknownCategory { name });
        }
        Ok(Self::from_name(name))
    }

    /// Look up a registered category by name (case-insensitive)
    pub fn parse(name: &str) -> Result<Self, JoinError> {
        let upper = name.trim().to_uppercase();
        REGISTRY
            .iter()
            .find(|c| c.name == upper)
            .cloned()
            .ok_or_else(|| JoinError::UnknownCategory {
                name: name.to_string(),
            })
    }

    fn from_name(name: String) -> Self {
        let role = CategoryRole::from_name(&name);
        Self { name, role }
    }

    fn with_role(name: String, role: CategoryRole) -> Self {
        Self { name, role }
    }

    /// Category name, e.g. `SSM_P`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Structural role
    pub fn role(&self) -> CategoryRole {
        self.role
    }

    /// Whether this is a meta category
    pub fn is_meta(&self) -> bool {
        self.role == CategoryRole::Meta
    }

    /// Whether this is a primary category
    pub fn is_primary(&self) -> bool {
        self.role == CategoryRole::Primary
    }

    /// Directory name used for this category's files
    pub fn dir_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Resolve the sibling category by replacing the trailing primary
    /// marker with `target_suffix`.
    ///
    /// This is a pure string transform: the result is not looked up in the
    /// registry. Fails with [`JoinError::UnresolvableCategory`] when the name
    /// has no primary marker or nothing is left of it.
    pub fn resolve_paired(&self, target_suffix: &str) -> Result<Category, JoinError> {
        resolve_paired(self, target_suffix)
    }

    /// Output category of a primary category
    pub fn output_of(&self) -> Result<Category, JoinError> {
        resolve_paired(self, OUTPUT_SUFFIX)
    }

    /// Meta category of a primary category
    pub fn meta_of(&self) -> Result<Category, JoinError> {
        resolve_paired(self, META_SUFFIX)
    }
}

/// See [`Category::resolve_paired`]
pub fn resolve_paired(category: &Category, target_suffix: &str) -> Result<Category, JoinError> {
    let unresolvable = || JoinError::UnresolvableCategory {
        name: category.name.clone(),
    };

    if !PRIMARY_PATTERN.is_match(&category.name) {
        return Err(unresolvable());
    }
    let name = PRIMARY_PATTERN
        .replace(&category.name, NoExpand(target_suffix))
        .into_owned();
    if name.is_empty() {
        return Err(unresolvable());
    }

    let role = match target_suffix {
        OUTPUT_SUFFIX => CategoryRole::Output,
        META_SUFFIX => CategoryRole::Meta,
        _ => CategoryRole::from_name(&name),
    };
    Ok(Category::with_role(name, role))
}

/// All registered categories
pub fn registry() -> &'static [Category] {
    &REGISTRY
}

/// Registered meta categories
pub fn meta_categories() -> impl Iterator<Item = &'static Category> {
    REGISTRY.iter().filter(|c| c.is_meta())
}

/// Registered primary categories
pub fn primary_categories() -> impl Iterator<Item = &'static Category> {
    REGISTRY.iter().filter(|c| c.is_primary())
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Category {}

impl Hash for Category {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Category {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Category {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl TryFrom<String> for Category {
    type Error = JoinError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Category::new(name)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.name
    }
}
