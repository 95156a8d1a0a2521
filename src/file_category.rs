/// Rule-based file categorization by extension.
///
/// A [`RuleSet`] is an ordered list of named categories, each owning a set of
/// lowercase extensions. Classification looks only at the file name, so it is
/// a pure function of the name and the rule snapshot it is given.
///
/// # Examples
///
/// ```
/// use tidywatch::file_category::{Classification, RuleSet};
///
/// let rules = RuleSet::default();
/// assert_eq!(rules.classify("report.PDF"), Classification::Category("PDFs".to_string()));
/// assert_eq!(rules.classify("notes.txt"), Classification::Unmatched);
/// ```
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::rule_store::is_internal_file_name;

/// Errors raised while building or editing a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The same extension is claimed by two categories.
    #[error("extension .{extension} is listed under both '{first}' and '{second}'")]
    DuplicateExtension {
        extension: String,
        first: String,
        second: String,
    },
    /// A category name that cannot be used as a subfolder of the watched root.
    #[error("invalid category name '{0}'")]
    InvalidCategoryName(String),
    /// An extension that is empty or could never match a file name.
    #[error("invalid extension '{extension}' in category '{category}'")]
    InvalidExtension { category: String, extension: String },
    /// The category name appears twice.
    #[error("category '{0}' is defined more than once")]
    DuplicateCategory(String),
}

/// A named destination subfolder and the extensions routed into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Subfolder name inside the watched root.
    pub name: String,
    /// Normalised extensions (lowercase, no leading dot), in user order.
    pub extensions: Vec<String>,
}

/// Outcome of classifying a single file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The file belongs in the named category.
    Category(String),
    /// No category claims the file's extension.
    Unmatched,
}

impl Classification {
    pub fn is_unmatched(&self) -> bool {
        matches!(self, Classification::Unmatched)
    }
}

/// Ordered extension -> category mapping.
///
/// Construction validates the whole set, so every extension belongs to
/// exactly one category and lookups never depend on iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    categories: Vec<Category>,
    index: HashMap<String, usize>,
}

impl RuleSet {
    /// Builds a rule set from `(category, extensions)` pairs in order.
    ///
    /// Extensions may be written with or without the leading dot and in any
    /// case; they are stored normalised.
    pub fn new<I, N, E, S>(entries: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = (N, E)>,
        N: Into<String>,
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut categories: Vec<Category> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (name, extensions) in entries {
            let name = name.into().trim().to_string();
            validate_category_name(&name)?;
            if categories.iter().any(|c| c.name == name) {
                return Err(RuleError::DuplicateCategory(name));
            }

            let position = categories.len();
            let mut normalised = Vec::new();
            for raw in extensions {
                let extension = normalize_extension(raw.as_ref()).ok_or_else(|| {
                    RuleError::InvalidExtension {
                        category: name.clone(),
                        extension: raw.as_ref().to_string(),
                    }
                })?;

                match index.get(&extension) {
                    // Same category listing an extension twice is harmless.
                    Some(&owner) if owner == position => continue,
                    Some(&owner) => {
                        return Err(RuleError::DuplicateExtension {
                            extension,
                            first: categories[owner].name.clone(),
                            second: name,
                        });
                    }
                    None => {
                        index.insert(extension.clone(), position);
                        normalised.push(extension);
                    }
                }
            }

            categories.push(Category {
                name,
                extensions: normalised,
            });
        }

        Ok(Self { categories, index })
    }

    /// Categories in their defined order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Looks up a category by name.
    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Returns the category for `file_name`, matching its extension
    /// case-insensitively.
    pub fn classify(&self, file_name: &str) -> Classification {
        let extension = Path::new(file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());

        match extension.and_then(|ext| self.index.get(&ext)) {
            Some(&position) => Classification::Category(self.categories[position].name.clone()),
            None => Classification::Unmatched,
        }
    }

    /// Returns a copy with `name` mapped to `extensions`.
    ///
    /// An existing category keeps its position and has its extension list
    /// replaced; a new one is appended.
    pub fn with_category<S: AsRef<str>>(
        &self,
        name: &str,
        extensions: &[S],
    ) -> Result<Self, RuleError> {
        let name = name.trim();
        let replacement: Vec<String> = extensions.iter().map(|e| e.as_ref().to_string()).collect();
        let mut entries: Vec<(String, Vec<String>)> = self
            .categories
            .iter()
            .map(|c| (c.name.clone(), c.extensions.clone()))
            .collect();

        match entries.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, exts)) => *exts = replacement,
            None => entries.push((name.to_string(), replacement)),
        }

        Self::new(entries)
    }

    /// Returns a copy without the named category, or `None` if it is absent.
    pub fn without_category(&self, name: &str) -> Option<Self> {
        self.category(name)?;
        let entries = self
            .categories
            .iter()
            .filter(|c| c.name != name)
            .map(|c| (c.name.clone(), c.extensions.clone()));

        // Removing a category cannot introduce a conflict.
        Self::new(entries).ok()
    }
}

impl Default for RuleSet {
    /// The rule set written when no rules document exists yet.
    fn default() -> Self {
        let defaults: [(&str, &[&str]); 5] = [
            ("PDFs", &[".pdf"]),
            ("Images", &[".jpg", ".jpeg", ".png", ".gif"]),
            ("Videos", &[".mp4", ".mkv", ".avi"]),
            ("Word", &[".docx", ".pptx"]),
            ("Data", &[".csv"]),
        ];

        let mut categories = Vec::with_capacity(defaults.len());
        let mut index = HashMap::new();
        for (position, (name, extensions)) in defaults.iter().enumerate() {
            let extensions: Vec<String> = extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .collect();
            for extension in &extensions {
                index.insert(extension.clone(), position);
            }
            categories.push(Category {
                name: name.to_string(),
                extensions,
            });
        }

        Self { categories, index }
    }
}

impl Serialize for RuleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.categories.len()))?;
        for category in &self.categories {
            let dotted: Vec<String> = category
                .extensions
                .iter()
                .map(|e| format!(".{}", e))
                .collect();
            map.serialize_entry(&category.name, &dotted)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RuleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RuleSetVisitor;

        impl<'de> Visitor<'de> for RuleSetVisitor {
            type Value = RuleSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category name to a list of extensions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RuleSet, A::Error> {
                // Collected in document order; serde_json's Map would sort keys.
                let mut entries: Vec<(String, Vec<String>)> = Vec::new();
                while let Some((name, extensions)) = access.next_entry::<String, Vec<String>>()? {
                    entries.push((name, extensions));
                }
                RuleSet::new(entries).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_map(RuleSetVisitor)
    }
}

/// Lowercases and strips the leading dot; `None` if the result can never
/// match a file extension.
pub(crate) fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let extension = trimmed.strip_prefix('.').unwrap_or(trimmed).to_lowercase();
    let unusable = extension.is_empty()
        || extension
            .chars()
            .any(|c| c == '.' || c == '/' || c == '\\' || c.is_whitespace());

    if unusable { None } else { Some(extension) }
}

fn validate_category_name(name: &str) -> Result<(), RuleError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || is_internal_file_name(name);

    if invalid {
        Err(RuleError::InvalidCategoryName(name.to_string()))
    } else {
        Ok(())
    }
}
