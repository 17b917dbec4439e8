//! src/services/path_codec.rs
//!
//! Pure translation between the three address spaces of stored files:
//!
//! - legacy local paths: `/uploads/<legacy_dir>/<relative>`
//! - cloud object paths: `/<bucket>/<prefix>/<relative>`
//! - externalized paths: `/public-objects/<prefix>/<relative>` or
//!   `/objects/<prefix>/<relative>`
//!
//! The live upload handlers and the offline migration both go through the
//! one category table held here.

use crate::models::{
    category::{Category, Visibility},
    policy::{AccessPolicy, AclRule},
};
use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Root of every legacy filesystem reference.
pub const LEGACY_ROOT: &str = "/uploads/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown category `{0}`")]
    UnknownCategory(String),
    #[error("malformed object path `{0}`")]
    MalformedPath(String),
}

impl From<crate::models::category::UnknownCategory> for CodecError {
    fn from(err: crate::models::category::UnknownCategory) -> Self {
        CodecError::UnknownCategory(err.0)
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Where one category's files live, in every address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryLayout {
    /// Directory name under the legacy `uploads/` root.
    pub legacy_dir: &'static str,
    /// Object-name prefix inside the bucket.
    pub prefix: &'static str,
    pub visibility: Visibility,
    pub description: &'static str,
}

/// Default category table. Already-issued links depend on these values.
pub fn default_layouts() -> BTreeMap<Category, CategoryLayout> {
    BTreeMap::from([
        (
            Category::Avatar,
            CategoryLayout {
                legacy_dir: "avatars",
                prefix: "public/avatars",
                visibility: Visibility::Public,
                description: "User profile images",
            },
        ),
        (
            Category::News,
            CategoryLayout {
                legacy_dir: "news",
                prefix: "public/news",
                visibility: Visibility::Public,
                description: "News article images",
            },
        ),
        (
            Category::Activity,
            CategoryLayout {
                legacy_dir: "activities",
                prefix: ".private/activities",
                visibility: Visibility::Private,
                description: "Legislative activity documents",
            },
        ),
        (
            Category::Document,
            CategoryLayout {
                legacy_dir: "documents",
                prefix: ".private/documents",
                visibility: Visibility::Private,
                description: "Official documents",
            },
        ),
    ])
}

/// A cloud object path split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudPath {
    pub bucket: String,
    pub object_name: String,
}

impl CloudPath {
    pub fn new(bucket: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_name: object_name.into(),
        }
    }
}

impl std::fmt::Display for CloudPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{}", self.bucket, self.object_name)
    }
}

/// Table-driven, side-effect-free path translation.
#[derive(Debug, Clone)]
pub struct PathCodec {
    bucket: String,
    layouts: BTreeMap<Category, CategoryLayout>,
}

impl PathCodec {
    /// Codec over the default category table.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self::with_layouts(bucket, default_layouts())
    }

    pub fn with_layouts(
        bucket: impl Into<String>,
        layouts: BTreeMap<Category, CategoryLayout>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            layouts,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Registered categories with their layouts, in a stable order.
    pub fn layouts(&self) -> impl Iterator<Item = (Category, &CategoryLayout)> {
        self.layouts.iter().map(|(c, l)| (*c, l))
    }

    pub fn layout(&self, category: Category) -> CodecResult<&CategoryLayout> {
        self.layouts
            .get(&category)
            .ok_or_else(|| CodecError::UnknownCategory(category.to_string()))
    }

    /// `/<bucket>/<prefix>/<relative>` for a file of `category`.
    pub fn encode_cloud_path(&self, category: Category, relative: &str) -> CodecResult<String> {
        let layout = self.layout(category)?;
        Ok(format!(
            "/{}/{}/{}",
            self.bucket,
            layout.prefix,
            relative.trim_start_matches('/')
        ))
    }

    /// `/uploads/<legacy_dir>/<relative>` for a file of `category`.
    pub fn encode_legacy(&self, category: Category, relative: &str) -> CodecResult<String> {
        let layout = self.layout(category)?;
        Ok(format!(
            "{}{}/{}",
            LEGACY_ROOT,
            layout.legacy_dir,
            relative.trim_start_matches('/')
        ))
    }

    /// Split `/<bucket>/<object name>` into its parts. The leading slash is optional.
    pub fn parse_cloud_path(&self, path: &str) -> CodecResult<CloudPath> {
        parse_cloud_path(path)
    }

    /// Replace the bucket segment with the route prefix for `visibility`,
    /// keeping the rest of the path unchanged.
    pub fn externalize(&self, cloud_path: &str, visibility: Visibility) -> CodecResult<String> {
        let parsed = parse_cloud_path(cloud_path)?;
        Ok(format!(
            "/{}/{}",
            visibility.route_prefix(),
            parsed.object_name
        ))
    }

    /// Inverse of [`externalize`](Self::externalize): resolve a client-facing
    /// path back into the configured bucket.
    pub fn internalize(&self, external: &str) -> CodecResult<(CloudPath, Visibility)> {
        let trimmed = external.trim_start_matches('/');
        let (route, rest) = trimmed
            .split_once('/')
            .ok_or_else(|| CodecError::MalformedPath(external.to_string()))?;
        let visibility = match route {
            "public-objects" => Visibility::Public,
            "objects" => Visibility::Private,
            _ => return Err(CodecError::MalformedPath(external.to_string())),
        };
        if rest.is_empty() || rest.split('/').any(|seg| seg == "..") {
            return Err(CodecError::MalformedPath(external.to_string()));
        }
        Ok((CloudPath::new(self.bucket.clone(), rest), visibility))
    }

    /// Rewrite a legacy `/uploads/...` reference into its externalized form.
    ///
    /// Longest matching legacy prefix wins. `None` means the path is not a
    /// known legacy reference and must be left as it is.
    pub fn map_legacy_path(&self, legacy: &str) -> Option<String> {
        self.layouts
            .values()
            .map(|layout| (format!("{}{}/", LEGACY_ROOT, layout.legacy_dir), layout))
            .filter(|(prefix, _)| legacy.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, layout)| {
                format!(
                    "/{}/{}/{}",
                    layout.visibility.route_prefix(),
                    layout.prefix,
                    &legacy[prefix.len()..]
                )
            })
    }

    /// Fresh object name for an upload of `category`.
    ///
    /// Documents are grouped by year and month of issue.
    pub fn new_object_name(&self, category: Category, now: DateTime<Utc>) -> CodecResult<String> {
        let layout = self.layout(category)?;
        let id = Uuid::new_v4();
        Ok(match category {
            Category::Document => format!(
                "{}/{}/{:02}/{}",
                layout.prefix,
                now.year(),
                now.month(),
                id
            ),
            _ => format!("{}/{}", layout.prefix, id),
        })
    }

    /// Policy stamped on objects of `category` unless a caller overrides it.
    pub fn default_policy(&self, category: Category, owner: &str) -> CodecResult<AccessPolicy> {
        let layout = self.layout(category)?;
        Ok(policy_for(layout.visibility, owner))
    }
}

/// Policy for a given visibility: private objects are readable by administrators.
pub fn policy_for(visibility: Visibility, owner: &str) -> AccessPolicy {
    match visibility {
        Visibility::Public => AccessPolicy::public(owner),
        Visibility::Private => AccessPolicy::private(owner, vec![AclRule::admin_read()]),
    }
}

/// Split `/<bucket>/<object name>`; both parts must be non-empty.
pub fn parse_cloud_path(path: &str) -> CodecResult<CloudPath> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.split_once('/') {
        Some((bucket, object_name)) if !bucket.is_empty() && !object_name.is_empty() => {
            Ok(CloudPath::new(bucket, object_name))
        }
        _ => Err(CodecError::MalformedPath(path.to_string())),
    }
}
