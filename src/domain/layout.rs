//! On-disk layout of installed themes.
//!
//! ```text
//! <root>/<theme>/theme.json      (or theme.toml)
//! <root>/<theme>/templates/<name>.<ext>
//! <root>/<theme>/templates/pages/<name>.<ext>
//! <root>/<theme>/partials/<name>.<ext>
//! <root>/<theme>/assets/
//! <root>/<theme>/helpers/
//! ```

use std::path::{Path, PathBuf};

pub const MANIFEST_FILE_NAMES: &[&str] = &["theme.json", "theme.toml"];
pub const TEMPLATES_DIR: &str = "templates";
pub const PAGE_TEMPLATES_DIR: &str = "pages";
pub const PARTIALS_DIR: &str = "partials";
pub const ASSETS_DIR: &str = "assets";
pub const HELPERS_DIR: &str = "helpers";

/// Directories every theme root is expected to carry.
pub const EXPECTED_DIRS: &[&str] = &[TEMPLATES_DIR, PARTIALS_DIR, ASSETS_DIR];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeLayout {
    root: PathBuf,
    extension: String,
}

impl ThemeLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.').to_string();
        Self {
            root: root.into(),
            extension,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn theme_dir(&self, theme: &str) -> PathBuf {
        self.root.join(theme)
    }

    pub fn manifest_candidates(&self, theme: &str) -> Vec<PathBuf> {
        let dir = self.theme_dir(theme);
        MANIFEST_FILE_NAMES.iter().map(|name| dir.join(name)).collect()
    }

    pub fn templates_dir(&self, theme: &str) -> PathBuf {
        self.theme_dir(theme).join(TEMPLATES_DIR)
    }

    pub fn page_templates_dir(&self, theme: &str) -> PathBuf {
        self.templates_dir(theme).join(PAGE_TEMPLATES_DIR)
    }

    pub fn partials_dir(&self, theme: &str) -> PathBuf {
        self.theme_dir(theme).join(PARTIALS_DIR)
    }

    pub fn assets_dir(&self, theme: &str) -> PathBuf {
        self.theme_dir(theme).join(ASSETS_DIR)
    }

    pub fn helpers_dir(&self, theme: &str) -> PathBuf {
        self.theme_dir(theme).join(HELPERS_DIR)
    }

    /// `<name>.<ext>`
    pub fn file_name(&self, name: &str) -> String {
        format!("{name}.{}", self.extension)
    }

    pub fn template_path(&self, theme: &str, name: &str) -> PathBuf {
        self.templates_dir(theme).join(self.file_name(name))
    }

    pub fn partial_path(&self, theme: &str, name: &str) -> PathBuf {
        self.partials_dir(theme).join(self.file_name(name))
    }

    /// Theme that owns `path`, if it lives under the themes root.
    pub fn owning_theme(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        relative
            .components()
            .next()
            .and_then(|component| component.as_os_str().to_str())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_paths_under_theme_root() {
        let layout = ThemeLayout::new("/srv/themes", ".tmpl");
        assert_eq!(layout.extension(), "tmpl");
        assert_eq!(
            layout.template_path("base", "index"),
            PathBuf::from("/srv/themes/base/templates/index.tmpl")
        );
        assert_eq!(
            layout.partial_path("base", "header"),
            PathBuf::from("/srv/themes/base/partials/header.tmpl")
        );
    }

    #[test]
    fn owning_theme_uses_whole_components() {
        let layout = ThemeLayout::new("/srv/themes", "tmpl");
        assert_eq!(
            layout.owning_theme(Path::new("/srv/themes/base2/templates/x.tmpl")),
            Some("base2".to_string())
        );
        assert_eq!(layout.owning_theme(Path::new("/elsewhere/x.tmpl")), None);
    }
}
