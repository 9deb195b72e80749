//! Theme validation.
//!
//! Every check runs and reports. An incomplete manifest still gets its
//! parent and its required templates checked, so one pass shows everything
//! wrong with a theme. Validation never writes.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::error::ThemeError;
use crate::domain::kind::is_safe_segment;
use crate::domain::layout::EXPECTED_DIRS;
use crate::domain::manifest::{SettingKind, SettingKindError, ThemeManifest};
use crate::infra::fs::FileProbe;

use super::hierarchy::TemplateResolver;
use super::inheritance::InheritanceResolver;
use super::manifest::ManifestLoader;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub theme: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn new(theme: &str) -> Self {
        Self {
            theme: theme.to_string(),
            ..Default::default()
        }
    }

    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }

    pub fn into_error(self) -> ThemeError {
        ThemeError::ValidationFailed {
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

pub struct ThemeValidator {
    manifests: Arc<ManifestLoader>,
    inheritance: Arc<InheritanceResolver>,
    templates: Arc<TemplateResolver>,
    probe: FileProbe,
    required_templates: Vec<String>,
    runtime_version: String,
}

impl ThemeValidator {
    pub fn new(
        manifests: Arc<ManifestLoader>,
        inheritance: Arc<InheritanceResolver>,
        templates: Arc<TemplateResolver>,
        probe: FileProbe,
        required_templates: Vec<String>,
        runtime_version: impl Into<String>,
    ) -> Self {
        Self {
            manifests,
            inheritance,
            templates,
            probe,
            required_templates,
            runtime_version: runtime_version.into(),
        }
    }

    pub async fn validate(&self, theme: &str) -> ValidationReport {
        let mut report = ValidationReport::new(theme);

        self.check_layout(theme, &mut report).await;

        let mut complete = false;
        let mut declared_parent = None;
        match self.manifests.read_raw(theme).await {
            Ok(raw) => {
                declared_parent = raw
                    .value
                    .get("parent")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|parent| !parent.is_empty())
                    .map(str::to_string);
                let missing = raw.missing_required_fields();
                for field in &missing {
                    report
                        .errors
                        .push(format!("missing required manifest field `{field}`"));
                }
                match raw.into_manifest(theme) {
                    Ok(manifest) => {
                        self.check_identity(theme, &manifest, &mut report);
                        self.check_custom_settings(&manifest, &mut report);
                        self.check_screenshots(theme, &manifest, &mut report).await;
                        complete = missing.is_empty();
                    }
                    Err(err) => report.errors.push(err.to_string()),
                }
            }
            Err(err) => report.errors.push(err.to_string()),
        }

        if complete {
            match self.inheritance.hierarchy(theme).await {
                Ok(_) => self.check_required_templates(theme, &mut report).await,
                Err(err) => {
                    match declared_parent {
                        Some(_) => report.errors.push(format!("parent theme: {err}")),
                        None => report.errors.push(err.to_string()),
                    }
                    self.check_required_templates_on_disk(theme, None, &mut report)
                        .await;
                }
            }
        } else {
            // The theme's own manifest cannot enter the resolver; check its
            // parent chain and its templates directory directly.
            let parent = match declared_parent.as_deref() {
                Some(parent) => match self.inheritance.hierarchy(parent).await {
                    Ok(chain) if chain.iter().any(|name| name == theme) => {
                        report.errors.push(format!(
                            "parent theme `{parent}` inherits back from `{theme}`"
                        ));
                        None
                    }
                    Ok(_) => Some(parent),
                    Err(err) => {
                        report
                            .errors
                            .push(format!("parent theme `{parent}`: {err}"));
                        None
                    }
                },
                None => None,
            };
            self.check_required_templates_on_disk(theme, parent, &mut report)
                .await;
        }

        debug!(
            target = "application::validator",
            theme,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "theme validated"
        );
        report.finish()
    }

    async fn check_layout(&self, theme: &str, report: &mut ValidationReport) {
        let theme_dir = self.manifests.layout().theme_dir(theme);
        for dir in EXPECTED_DIRS {
            if !self.probe.is_dir(&theme_dir.join(dir)).await {
                report
                    .warnings
                    .push(format!("expected directory `{dir}/` is missing"));
            }
        }
    }

    fn check_identity(&self, theme: &str, manifest: &ThemeManifest, report: &mut ValidationReport) {
        if !manifest.name.is_empty() && manifest.name != theme {
            report.warnings.push(format!(
                "manifest name `{}` does not match directory `{theme}`",
                manifest.name
            ));
        }
        if !manifest.version.is_empty() && !is_semver(&manifest.version) {
            report.warnings.push(format!(
                "version `{}` is not in MAJOR.MINOR.PATCH form",
                manifest.version
            ));
        }
        if manifest
            .author
            .as_ref()
            .and_then(|author| author.name.as_deref())
            .is_none_or(|name| name.trim().is_empty())
        {
            report.warnings.push("author name is recommended".to_string());
        }
        if manifest.config.posts_per_page.is_none() {
            report.warnings.push(format!(
                "postsPerPage is not set; defaulting to {}",
                manifest.config.posts_per_page_or_default()
            ));
        }
        if let Some(requires) = manifest.requires.as_deref() {
            match compare_versions(&self.runtime_version, strip_requirement(requires)) {
                Some(Ordering::Less) => report.warnings.push(format!(
                    "theme requires runtime {requires}, running {}",
                    self.runtime_version
                )),
                Some(_) => {}
                None => report
                    .warnings
                    .push(format!("could not interpret runtime requirement `{requires}`")),
            }
        }
    }

    fn check_custom_settings(&self, manifest: &ThemeManifest, report: &mut ValidationReport) {
        for (key, definition) in &manifest.config.custom {
            match definition.kind() {
                Err(SettingKindError::Missing) => report
                    .errors
                    .push(format!("custom setting `{key}` is missing a type")),
                Err(SettingKindError::Unknown(kind)) => report
                    .errors
                    .push(format!("custom setting `{key}` has unknown type `{kind}`")),
                Ok(SettingKind::Select)
                    if definition.options.as_ref().is_none_or(|options| options.is_empty()) =>
                {
                    report
                        .errors
                        .push(format!("custom setting `{key}` is a select without options"));
                }
                Ok(_) => {}
            }
            if let (Some(min), Some(max)) = (definition.min, definition.max)
                && min > max
            {
                report.errors.push(format!(
                    "custom setting `{key}` has min {min} greater than max {max}"
                ));
            }
            if definition
                .label
                .as_deref()
                .is_none_or(|label| label.trim().is_empty())
            {
                report
                    .warnings
                    .push(format!("custom setting `{key}` has no label"));
            }
        }
    }

    async fn check_screenshots(
        &self,
        theme: &str,
        manifest: &ThemeManifest,
        report: &mut ValidationReport,
    ) {
        let Some(screenshots) = manifest.screenshots.as_ref() else {
            return;
        };
        let theme_dir = self.manifests.layout().theme_dir(theme);
        for path in screenshots.paths() {
            let relative = path.trim_start_matches('/');
            if !self.probe.is_file(&theme_dir.join(relative)).await {
                report
                    .warnings
                    .push(format!("screenshot `{path}` not found"));
            }
        }
    }

    async fn check_required_templates(&self, theme: &str, report: &mut ValidationReport) {
        for name in &self.required_templates {
            match self
                .templates
                .resolve_named_in(theme, std::slice::from_ref(name))
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => report
                    .errors
                    .push(format!("required template `{name}` is missing")),
                Err(err) => report.errors.push(err.to_string()),
            }
        }
    }

    /// Required templates from `theme`'s default templates directory, then
    /// from `parent`'s chain when it resolved.
    async fn check_required_templates_on_disk(
        &self,
        theme: &str,
        parent: Option<&str>,
        report: &mut ValidationReport,
    ) {
        let layout = self.manifests.layout();
        for name in &self.required_templates {
            if is_safe_segment(theme) && self.probe.is_file(&layout.template_path(theme, name)).await
            {
                continue;
            }
            let inherited = match parent {
                Some(parent) => matches!(
                    self.templates
                        .resolve_named_in(parent, std::slice::from_ref(name))
                        .await,
                    Ok(Some(_))
                ),
                None => false,
            };
            if !inherited {
                report
                    .errors
                    .push(format!("required template `{name}` is missing"));
            }
        }
    }
}

fn strip_requirement(requirement: &str) -> &str {
    requirement
        .trim()
        .trim_start_matches(['>', '=', '^', '~', 'v', ' '])
}

fn version_fields(version: &str) -> Option<Vec<u64>> {
    let core = version.trim().trim_start_matches('v');
    let core = core.split(['-', '+']).next()?;
    core.split('.')
        .map(|field| field.parse::<u64>().ok())
        .collect()
}

fn is_semver(version: &str) -> bool {
    version_fields(version).is_some_and(|fields| fields.len() == 3)
}

/// Field-wise numeric comparison; missing trailing fields count as zero.
pub fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    let left = version_fields(left)?;
    let right = version_fields(right)?;
    let len = left.len().max(right.len());
    for idx in 0..len {
        let a = left.get(idx).copied().unwrap_or(0);
        let b = right.get(idx).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}
