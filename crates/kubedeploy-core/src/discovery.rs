//! Template discovery: enumerate, render, split, validate, materialize
//!
//! Every document that survives discovery has a materialized file on disk
//! (used later by apply/replace) and a dry-run-validated `(kind, name)`.
//! The temp directory lives as long as the returned set.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{DeployError, Result};
use crate::kubectl::{Kubectl, RunOptions};
use crate::renderer::{Bindings, Renderer};
use crate::resource::Resource;

/// Suffixes discovery recognizes; `.j2` files go through the renderer
const TEMPLATE_SUFFIXES: [&str; 4] = [".yml", ".yaml", ".yml.j2", ".yaml.j2"];

/// Discovered resources plus the temp directory their manifests live in
#[derive(Debug)]
pub struct DiscoveredResources {
    pub resources: Vec<Resource>,
    _tempdir: TempDir,
}

pub struct TemplateDiscovery<'a> {
    template_dir: PathBuf,
    bindings: Bindings,
    renderer: &'a dyn Renderer,
}

impl<'a> TemplateDiscovery<'a> {
    pub fn new(template_dir: PathBuf, bindings: Bindings, renderer: &'a dyn Renderer) -> Self {
        Self {
            template_dir,
            bindings,
            renderer,
        }
    }

    /// All template files directly inside `dir`, sorted by name
    pub fn template_files(dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                TEMPLATE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
            })
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Run the full discovery pipeline against the cluster
    pub fn discover(&self, kubectl: &Kubectl) -> Result<DiscoveredResources> {
        let tempdir = TempDir::new()?;
        let mut resources = Vec::new();
        let mut seen_ids = HashSet::new();

        for file in Self::template_files(&self.template_dir) {
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let raw = fs::read_to_string(&file)?;

            let rendered = if filename.ends_with(".j2") {
                self.renderer
                    .render(&filename, &raw, &self.bindings)
                    .map_err(|e| match e {
                        DeployError::Render { template, reason } => DeployError::InvalidTemplate {
                            template,
                            reason,
                            rendered: raw.clone(),
                        },
                        other => other,
                    })?
            } else {
                raw
            };

            let stem = document_stem(&filename);
            for (index, document) in split_documents(&rendered).into_iter().enumerate() {
                serde_yaml::from_str::<serde_yaml::Value>(&document).map_err(|e| {
                    DeployError::InvalidTemplate {
                        template: filename.clone(),
                        reason: format!("YAML parse error: {}", e),
                        rendered: document.clone(),
                    }
                })?;

                let path = tempdir.path().join(format!("{}-{:02}.yml", stem, index));
                fs::write(&path, &document)?;

                for resource in self.validate_document(kubectl, &filename, &path, &document)? {
                    if !seen_ids.insert(resource.id()) {
                        return Err(DeployError::InvalidTemplate {
                            template: filename.clone(),
                            reason: format!("{} is defined more than once", resource.id()),
                            rendered: document.clone(),
                        });
                    }
                    resources.push(resource);
                }
            }
        }

        Ok(DiscoveredResources {
            resources,
            _tempdir: tempdir,
        })
    }

    /// Dry-run the materialized document and turn the `kind/name` output
    /// into resources
    fn validate_document(
        &self,
        kubectl: &Kubectl,
        filename: &str,
        path: &Path,
        document: &str,
    ) -> Result<Vec<Resource>> {
        let path_arg = path.to_string_lossy();
        let result = kubectl.run(
            &["create", "-f", &path_arg, "--dry-run", "--output=name"],
            RunOptions::default().log_failure(false),
        )?;
        if !result.success() {
            return Err(DeployError::InvalidTemplate {
                template: filename.to_string(),
                reason: result.stderr.trim().to_string(),
                rendered: document.to_string(),
            });
        }

        let mut resources = Vec::new();
        for line in result.stdout.lines().filter(|line| !line.trim().is_empty()) {
            let (kind_part, name) = line.trim().split_once('/').ok_or_else(|| {
                DeployError::InvalidTemplate {
                    template: filename.to_string(),
                    reason: format!("unparseable dry-run output line '{}'", line),
                    rendered: document.to_string(),
                }
            })?;
            // "deployment.apps/web" carries the API group after the kind
            let kind = kind_part.split('.').next().unwrap_or(kind_part);
            resources.push(Resource::for_kind(
                kind,
                name,
                kubectl.namespace(),
                kubectl.context(),
                Some(path.to_path_buf()),
            ));
        }
        Ok(resources)
    }
}

fn document_stem(filename: &str) -> String {
    filename
        .trim_end_matches(".j2")
        .trim_end_matches(".yaml")
        .trim_end_matches(".yml")
        .to_string()
}

/// Split a multi-document stream on `---` lines, discarding documents that
/// are blank or comment-only
fn split_documents(text: &str) -> Vec<String> {
    let mut documents = vec![String::new()];
    for line in text.lines() {
        if line.trim_end() == "---" {
            documents.push(String::new());
        } else {
            let current = documents.last_mut().expect("list starts non-empty");
            current.push_str(line);
            current.push('\n');
        }
    }
    documents
        .into_iter()
        .filter(|doc| {
            !doc.lines()
                .all(|line| line.trim().is_empty() || line.trim().starts_with('#'))
        })
        .collect()
}
