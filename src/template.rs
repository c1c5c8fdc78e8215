//! Canonical document outlines and their lookup indexes.
//!
//! Templates ship as JSON in `templates/` and are compiled into the binary.
//! A template directory may add more (or replace a built-in by name) at
//! startup; after that the registry is read-only.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::AnalysisError;
use crate::normalize::strip_numbering;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("srs.json", include_str!("../templates/srs.json")),
    ("sdd.json", include_str!("../templates/sdd.json")),
];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse template {origin}: {source}")]
    Parse {
        origin: String,
        source: serde_json::Error,
    },
    #[error("template '{template}' repeats title '{title}' after normalization")]
    DuplicateTitle { template: String, title: String },
    #[error("template '{0}' has no sections")]
    Empty(String),
}

/// A top-level section of an outline with its ordered subsections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainSection {
    /// Canonical title including numbering, e.g. `"3 System Description"`.
    pub title: String,
    #[serde(default)]
    pub subsections: Vec<String>,
}

/// A named, ordered outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sections: Vec<MainSection>,
    #[serde(skip)]
    index: OnceCell<TemplateIndex>,
}

/// A template title together with its position among its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTitle {
    pub title: String,
    pub position: usize,
}

/// Stripped-title lookups, built once per template.
#[derive(Debug, Clone, Default)]
pub struct TemplateIndex {
    /// Stripped main titles in template order.
    section_keys: Vec<String>,
    sections: HashMap<String, IndexedTitle>,
    /// Per main section position: stripped subsection title → subsection.
    subsections: Vec<HashMap<String, IndexedTitle>>,
    /// Per main section position: stripped subsection titles in order.
    subsection_keys: Vec<Vec<String>>,
    /// Every stripped subsection title → owning main section position.
    subsection_owner: HashMap<String, usize>,
    /// Every stripped subsection title in template order.
    all_subsection_keys: Vec<String>,
}

impl TemplateIndex {
    fn build(template: &Template) -> Self {
        let mut index = TemplateIndex::default();

        for (position, section) in template.sections.iter().enumerate() {
            let key = strip_numbering(&section.title);
            index.section_keys.push(key.clone());
            index.sections.insert(
                key,
                IndexedTitle {
                    title: section.title.clone(),
                    position,
                },
            );

            let mut subs = HashMap::new();
            let mut keys = Vec::new();
            for (sub_position, sub) in section.subsections.iter().enumerate() {
                let sub_key = strip_numbering(sub);
                subs.insert(
                    sub_key.clone(),
                    IndexedTitle {
                        title: sub.clone(),
                        position: sub_position,
                    },
                );
                index.subsection_owner.insert(sub_key.clone(), position);
                index.all_subsection_keys.push(sub_key.clone());
                keys.push(sub_key);
            }
            index.subsections.push(subs);
            index.subsection_keys.push(keys);
        }

        index
    }

    pub fn section(&self, stripped: &str) -> Option<&IndexedTitle> {
        self.sections.get(stripped)
    }

    pub fn section_keys(&self) -> &[String] {
        &self.section_keys
    }

    pub fn subsection(&self, section_position: usize, stripped: &str) -> Option<&IndexedTitle> {
        self.subsections.get(section_position)?.get(stripped)
    }

    pub fn subsection_keys(&self, section_position: usize) -> &[String] {
        self.subsection_keys
            .get(section_position)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_subsection_keys(&self) -> &[String] {
        &self.all_subsection_keys
    }

    /// Main section position owning a stripped subsection title, if any.
    pub fn subsection_owner(&self, stripped: &str) -> Option<usize> {
        self.subsection_owner.get(stripped).copied()
    }
}

impl Template {
    pub fn new(name: impl Into<String>, sections: Vec<MainSection>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            sections,
            index: OnceCell::new(),
        }
    }

    pub fn index(&self) -> &TemplateIndex {
        self.index.get_or_init(|| TemplateIndex::build(self))
    }

    pub fn section_titles(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.title.as_str())
    }

    /// Titles must stay unique once numbering and formatting are stripped.
    pub fn check(&self) -> Result<(), TemplateError> {
        if self.sections.is_empty() {
            return Err(TemplateError::Empty(self.name.clone()));
        }

        // Main and subsection titles share one namespace.
        let mut seen = HashSet::new();
        for section in &self.sections {
            if !seen.insert(strip_numbering(&section.title)) {
                return Err(TemplateError::DuplicateTitle {
                    template: self.name.clone(),
                    title: section.title.clone(),
                });
            }
            for sub in &section.subsections {
                if !seen.insert(strip_numbering(sub)) {
                    return Err(TemplateError::DuplicateTitle {
                        template: self.name.clone(),
                        title: sub.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn parse(origin: &str, json: &str) -> Result<Self, TemplateError> {
        let template: Template =
            serde_json::from_str(json).map_err(|source| TemplateError::Parse {
                origin: origin.to_string(),
                source,
            })?;
        template.check()?;
        Ok(template)
    }
}

/// Read-only set of templates, shared across requests.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<Template>>,
}

impl TemplateRegistry {
    /// The outlines compiled into the binary (`SRS`, `SDD`).
    pub fn builtin() -> Result<Self, TemplateError> {
        let mut templates = HashMap::new();
        for (origin, json) in BUILTIN_TEMPLATES {
            let template = Template::parse(origin, json)?;
            templates.insert(template.name.clone(), Arc::new(template));
        }
        Ok(Self { templates })
    }

    /// Built-ins plus every `*.json` in `dir`; a missing directory is fine.
    pub fn load_with_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut registry = Self::builtin()?;

        if !dir.exists() {
            info!("Template directory {:?} not found, using built-ins only", dir);
            return Ok(registry);
        }

        let entries = std::fs::read_dir(dir).map_err(|source| TemplateError::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let path = entry
                .map_err(|source| TemplateError::Read {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let json = std::fs::read_to_string(&path).map_err(|source| {
                    TemplateError::Read {
                        path: path.clone(),
                        source,
                    }
                })?;
                let template = Template::parse(&path.display().to_string(), &json)?;
                info!("Loaded template: {} from {:?}", template.name, path);
                registry
                    .templates
                    .insert(template.name.clone(), Arc::new(template));
            }
        }

        Ok(registry)
    }

    pub fn from_templates(templates: Vec<Template>) -> Result<Self, TemplateError> {
        let mut map = HashMap::new();
        for template in templates {
            template.check()?;
            map.insert(template.name.clone(), Arc::new(template));
        }
        Ok(Self { templates: map })
    }

    /// Look a template up by name, case-insensitively.
    pub fn get(&self, name: &str) -> Result<Arc<Template>, AnalysisError> {
        if let Some(template) = self.templates.get(name) {
            return Ok(template.clone());
        }
        self.templates
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, t)| t.clone())
            .ok_or_else(|| AnalysisError::UnknownTemplate {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Sorted template names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_load() {
        let registry = TemplateRegistry::builtin().unwrap();
        assert_eq!(registry.names(), vec!["SDD".to_string(), "SRS".to_string()]);

        let srs = registry.get("srs").unwrap();
        assert_eq!(srs.sections[0].title, "Abstract");
        assert_eq!(srs.sections[1].title, "1 Introduction");
    }

    #[test]
    fn test_unknown_template() {
        let registry = TemplateRegistry::builtin().unwrap();
        let err = registry.get("PRD").unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownTemplate { .. }));
    }

    #[test]
    fn test_index_lookups() {
        let registry = TemplateRegistry::builtin().unwrap();
        let srs = registry.get("SRS").unwrap();
        let index = srs.index();

        let intro = index.section("introduction").unwrap();
        assert_eq!(intro.title, "1 Introduction");
        assert_eq!(intro.position, 1);

        let purpose = index.subsection(1, "purpose of this document").unwrap();
        assert_eq!(purpose.title, "1.1 Purpose of this document");
        assert_eq!(purpose.position, 0);

        assert_eq!(index.subsection_owner("problem statement"), Some(3));
        assert!(index.subsection(1, "problem statement").is_none());
        assert_eq!(index.section_keys().len(), srs.sections.len());
    }

    #[test]
    fn test_duplicate_titles_rejected() {
        let template = Template::new(
            "Dup",
            vec![
                MainSection {
                    title: "1 Introduction".into(),
                    subsections: vec![],
                },
                MainSection {
                    title: "2  INTRODUCTION".into(),
                    subsections: vec![],
                },
            ],
        );
        assert!(matches!(
            template.check(),
            Err(TemplateError::DuplicateTitle { .. })
        ));
    }

    #[test]
    fn test_subsection_repeating_main_title_rejected() {
        let template = Template::new(
            "Overlap",
            vec![
                MainSection {
                    title: "1 Introduction".into(),
                    subsections: vec!["1.1 Scope".into()],
                },
                MainSection {
                    title: "2 Design".into(),
                    subsections: vec!["2.1 Introduction".into()],
                },
            ],
        );
        match template.check() {
            Err(TemplateError::DuplicateTitle { title, .. }) => assert_eq!(title, "2.1 Introduction"),
            other => panic!("expected duplicate title, got {:?}", other),
        }
    }

    #[test]
    fn test_directory_overrides_and_extends() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("prd.json"),
            r#"{"name":"PRD","sections":[{"title":"1 Goals"},{"title":"2 Non-Goals"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = TemplateRegistry::load_with_dir(dir.path()).unwrap();
        assert_eq!(registry.names(), vec!["PRD", "SDD", "SRS"]);
        assert_eq!(registry.get("PRD").unwrap().sections.len(), 2);
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let registry = TemplateRegistry::load_with_dir(Path::new("/nonexistent/templates")).unwrap();
        assert_eq!(registry.names().len(), 2);
    }
}
