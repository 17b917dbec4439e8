//! File categories and their visibility.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// The kind of file a stored object holds. Fixed when the object is created;
/// it decides the object's prefix and default visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Avatar,
    News,
    Activity,
    Document,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Avatar,
        Category::News,
        Category::Activity,
        Category::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Avatar => "avatar",
            Category::News => "news",
            Category::Activity => "activity",
            Category::Document => "document",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known category.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown category `{0}`")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    /// Accepts the singular names plus the plural directory names used by
    /// the legacy upload tree (`avatars`, `activities`, `documents`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avatar" | "avatars" => Ok(Category::Avatar),
            "news" => Ok(Category::News),
            "activity" | "activities" => Ok(Category::Activity),
            "document" | "documents" => Ok(Category::Document),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

/// Whether an object is readable by anyone or gated by its ACL rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    /// Client-facing route segment objects of this visibility are served under.
    pub fn route_prefix(&self) -> &'static str {
        match self {
            Visibility::Public => "public-objects",
            Visibility::Private => "objects",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!("invalid visibility `{other}`")),
        }
    }
}
