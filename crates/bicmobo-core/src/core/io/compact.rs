//! Per-trial copies of the detector description with design parameters applied.
//!
//! Compact files are small, hand-written XML documents; edits are limited to setting one
//! attribute on the start tag of the element whose `name` attribute matches, and to
//! redirecting `<include ref="..."/>` entries of the top-level description to the edited
//! copies. Everything else in the documents is preserved byte for byte.

use crate::core::config::models::{CompactTarget, DetectorConfig};
use crate::core::models::parameter::ParameterValue;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("No <{element}> element named '{name}' in '{file}'")]
    ElementNotFound {
        file: String,
        element: String,
        name: String,
    },
}

/// Writes the edited geometry of one trial into its own directory.
pub struct GeometryEditor<'a> {
    detector: &'a DetectorConfig,
    dir: PathBuf,
    tag: String,
    edited: BTreeMap<PathBuf, PathBuf>,
}

impl<'a> GeometryEditor<'a> {
    pub fn new(detector: &'a DetectorConfig, dir: impl Into<PathBuf>, tag: &str) -> Self {
        Self {
            detector,
            dir: dir.into(),
            tag: tag.to_string(),
            edited: BTreeMap::new(),
        }
    }

    /// Applies one parameter to the trial's copy of its compact file, creating the copy
    /// on first use.
    pub fn apply(
        &mut self,
        target: &CompactTarget,
        value: &ParameterValue,
    ) -> Result<PathBuf, GeometryError> {
        let copy = match self.edited.get(&target.compact) {
            Some(existing) => existing.clone(),
            None => {
                let source = self.detector.path.join(&target.compact);
                let copy = tagged_copy_path(&self.dir, &target.compact, &self.tag);
                let parent = copy.parent().unwrap_or(&self.dir);
                std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
                std::fs::copy(&source, &copy).map_err(|e| io_error(&source, e))?;
                self.edited.insert(target.compact.clone(), copy.clone());
                copy
            }
        };

        let xml = std::fs::read_to_string(&copy).map_err(|e| io_error(&copy, e))?;
        let rendered = value.with_units(target.units.as_deref());
        let updated = set_attribute(&xml, &target.element, &target.name, &target.attribute, &rendered)
            .ok_or_else(|| GeometryError::ElementNotFound {
                file: copy.to_string_lossy().to_string(),
                element: target.element.clone(),
                name: target.name.clone(),
            })?;
        std::fs::write(&copy, updated).map_err(|e| io_error(&copy, e))?;
        debug!(
            "Set {}@{}='{}' in {:?}",
            target.name, target.attribute, rendered, copy
        );
        Ok(copy)
    }

    /// Compact copies written so far, keyed by their path relative to the detector.
    pub fn edited(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.edited
    }

    /// Writes the trial's top-level description. Without edits the installed description
    /// is returned unchanged.
    pub fn finish(self) -> Result<PathBuf, GeometryError> {
        let original = self.detector.config_file();
        if self.edited.is_empty() {
            return Ok(original);
        }
        let xml = std::fs::read_to_string(&original).map_err(|e| io_error(&original, e))?;
        let redirected = redirect_includes(&xml, &self.edited);
        let path = self
            .dir
            .join(format!("{}_{}.xml", self.detector.config, self.tag));
        std::fs::write(&path, redirected).map_err(|e| io_error(&path, e))?;
        Ok(path)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> GeometryError {
    GeometryError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

/// Location of a compact copy inside the trial's geometry directory. The compact's
/// directory relative to the detector is mirrored so equally named files stay apart.
fn tagged_copy_path(dir: &Path, compact: &Path, tag: &str) -> PathBuf {
    let stem = compact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "compact".to_string());
    let mut path = dir.to_path_buf();
    if let Some(parent) = compact.parent() {
        for component in parent.components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
    }
    path.push(format!("{}_{}.xml", stem, tag));
    path
}

/// Sets `attribute` on the first `<element ... name="name" ...>` start tag. Returns
/// `None` when no such element exists.
pub fn set_attribute(
    xml: &str,
    element: &str,
    name: &str,
    attribute: &str,
    value: &str,
) -> Option<String> {
    let tag_re = Regex::new(&format!(
        r#"<{}\b[^>]*?\sname\s*=\s*"{}"[^>]*?(/?)>"#,
        regex::escape(element),
        regex::escape(name)
    ))
    .ok()?;
    let attr_re = Regex::new(&format!(r#"(\s{}\s*=\s*)"[^"]*""#, regex::escape(attribute))).ok()?;

    let found = tag_re.captures(xml)?;
    let whole = found.get(0)?;
    let start_tag = whole.as_str();

    let escaped = escape_attribute(value);
    let new_tag = if attr_re.is_match(start_tag) {
        attr_re
            .replace(start_tag, |caps: &Captures| format!(r#"{}"{}""#, &caps[1], escaped))
            .into_owned()
    } else {
        let close_len = if found.get(1).is_some_and(|m| !m.as_str().is_empty()) {
            2
        } else {
            1
        };
        let (head, close) = start_tag.split_at(start_tag.len() - close_len);
        format!(r#"{} {}="{}"{}"#, head.trim_end(), attribute, escaped, close)
    };

    let mut out = String::with_capacity(xml.len() + value.len());
    out.push_str(&xml[..whole.start()]);
    out.push_str(&new_tag);
    out.push_str(&xml[whole.end()..]);
    Some(out)
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// Points `<include ref="..."/>` entries whose reference ends with an edited compact
/// path at the edited copy. The longest matching compact path wins.
fn redirect_includes(xml: &str, edited: &BTreeMap<PathBuf, PathBuf>) -> String {
    let Ok(include_re) = Regex::new(r#"(<include\s[^>]*?ref\s*=\s*")([^"]*)(")"#) else {
        return xml.to_string();
    };
    include_re
        .replace_all(xml, |caps: &Captures| {
            let reference = &caps[2];
            let replacement = edited
                .iter()
                .filter(|(relative, _)| Path::new(reference).ends_with(relative.as_path()))
                .max_by_key(|(relative, _)| relative.components().count())
                .map(|(_, copy)| copy.display().to_string())
                .unwrap_or_else(|| reference.to_string());
            format!("{}{}{}", &caps[1], replacement, &caps[3])
        })
        .into_owned()
}
