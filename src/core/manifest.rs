//! Build manifest (compose file) reading and the artifacts it declares.

use serde::Serialize;
use serde_yml::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One service entry that names an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub service: String,
    pub image: String,
    /// True when the service has a `build` section and is produced locally.
    pub buildable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    pub path: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

/// A locally built (or locally present) image, as the manifest declares it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    pub local_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl BuildArtifact {
    /// Split a declared reference into name and tag. A `:` only counts as a tag
    /// separator after the last `/`, so registry ports are left alone.
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        if reference.contains('@') {
            return Self {
                local_name: reference.to_string(),
                tag: None,
            };
        }

        let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[name_start..].rfind(':') {
            Some(offset) => {
                let split = name_start + offset;
                Self {
                    local_name: reference[..split].to_string(),
                    tag: Some(reference[split + 1..].to_string()),
                }
            }
            None => Self {
                local_name: reference.to_string(),
                tag: None,
            },
        }
    }

    /// The reference as declared: `name` or `name:tag`.
    pub fn reference(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{}:{}", self.local_name, tag),
            None => self.local_name.clone(),
        }
    }
}

impl BuildManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::build_manifest_invalid(path.display().to_string(), e.to_string())
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let display = path.display().to_string();
        let doc: Value = serde_yml::from_str(content)
            .map_err(|e| Error::build_manifest_invalid(&display, e.to_string()))?;

        let services = match doc.get("services") {
            None | Some(Value::Null) => {
                return Ok(Self {
                    path: path.to_path_buf(),
                    entries: Vec::new(),
                })
            }
            Some(Value::Mapping(services)) => services,
            Some(_) => {
                return Err(Error::build_manifest_invalid(
                    &display,
                    "'services' must be a mapping",
                ))
            }
        };

        let mut entries = Vec::new();
        for (name, service) in services {
            let service_name = name.as_str().unwrap_or_default().to_string();
            let image = match service.get("image") {
                Some(Value::String(image)) if !image.trim().is_empty() => image.trim().to_string(),
                Some(Value::String(_)) | None => continue,
                Some(_) => {
                    return Err(Error::build_manifest_invalid(
                        &display,
                        format!("service '{}' has a non-string image", service_name),
                    ))
                }
            };
            entries.push(ManifestEntry {
                service: service_name,
                image,
                buildable: service.get("build").is_some(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Declared image names in manifest order, duplicates included.
    pub fn image_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.image.clone()).collect()
    }

    pub fn artifacts(&self) -> Vec<BuildArtifact> {
        self.entries
            .iter()
            .map(|e| BuildArtifact::parse(&e.image))
            .collect()
    }

    pub fn has_non_buildable(&self) -> bool {
        self.entries.iter().any(|e| !e.buildable)
    }
}
