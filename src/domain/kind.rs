//! Content kinds and their template hierarchies.
//!
//! Each kind maps to a fixed list of candidate template names ordered from
//! most to least specific. `{slug}` and `{id}` placeholders are filled from
//! [`TemplateParams`]; a candidate whose placeholder has no value is skipped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SLUG_PLACEHOLDER: &str = "{slug}";
const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Post,
    Page,
    Home,
    Category,
    Tag,
    Author,
    Search,
    NotFound,
    Error,
}

impl ContentKind {
    pub const ALL: [ContentKind; 9] = [
        ContentKind::Post,
        ContentKind::Page,
        ContentKind::Home,
        ContentKind::Category,
        ContentKind::Tag,
        ContentKind::Author,
        ContentKind::Search,
        ContentKind::NotFound,
        ContentKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Page => "page",
            ContentKind::Home => "home",
            ContentKind::Category => "category",
            ContentKind::Tag => "tag",
            ContentKind::Author => "author",
            ContentKind::Search => "search",
            ContentKind::NotFound => "not_found",
            ContentKind::Error => "error",
        }
    }

    /// Candidate patterns, most specific first.
    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            ContentKind::Post => &["post-{slug}", "post-{id}", "post", "single", "index"],
            ContentKind::Page => &["page-{slug}", "page-{id}", "page", "single", "index"],
            ContentKind::Home => &["front-page", "home", "index"],
            ContentKind::Category => &[
                "category-{slug}",
                "category-{id}",
                "category",
                "archive",
                "index",
            ],
            ContentKind::Tag => &["tag-{slug}", "tag-{id}", "tag", "archive", "index"],
            ContentKind::Author => &["author-{slug}", "author-{id}", "author", "archive", "index"],
            ContentKind::Search => &["search", "index"],
            ContentKind::NotFound => &["404", "error", "index"],
            ContentKind::Error => &["error", "index"],
        }
    }

    /// Expand the hierarchy for `params`, dropping candidates whose
    /// placeholders cannot be filled.
    pub fn candidates(self, params: &TemplateParams) -> Vec<String> {
        self.patterns()
            .iter()
            .filter_map(|pattern| substitute(pattern, params))
            .collect()
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown content kind `{0}`")]
pub struct UnknownContentKind(pub String);

impl FromStr for ContentKind {
    type Err = UnknownContentKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "post" | "single" => Ok(ContentKind::Post),
            "page" => Ok(ContentKind::Page),
            "home" => Ok(ContentKind::Home),
            "category" => Ok(ContentKind::Category),
            "tag" => Ok(ContentKind::Tag),
            "author" => Ok(ContentKind::Author),
            "search" => Ok(ContentKind::Search),
            "not_found" | "404" => Ok(ContentKind::NotFound),
            "error" => Ok(ContentKind::Error),
            other => Err(UnknownContentKind(other.to_string())),
        }
    }
}

/// Optional identifiers used to fill hierarchy placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParams {
    pub slug: Option<String>,
    pub id: Option<u64>,
}

impl TemplateParams {
    pub fn slug(slug: impl Into<String>) -> Self {
        Self {
            slug: Some(slug.into()),
            id: None,
        }
    }

    pub fn id(id: u64) -> Self {
        Self {
            slug: None,
            id: Some(id),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    fn usable_slug(&self) -> Option<&str> {
        self.slug
            .as_deref()
            .filter(|slug| is_safe_segment(slug))
    }
}

fn substitute(pattern: &str, params: &TemplateParams) -> Option<String> {
    let mut candidate = pattern.to_string();
    if candidate.contains(SLUG_PLACEHOLDER) {
        candidate = candidate.replace(SLUG_PLACEHOLDER, params.usable_slug()?);
    }
    if candidate.contains(ID_PLACEHOLDER) {
        candidate = candidate.replace(ID_PLACEHOLDER, &params.id?.to_string());
    }
    Some(candidate)
}

/// A name usable as a single file-name component.
pub fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_candidates_with_slug_and_id() {
        let params = TemplateParams::slug("hello").with_id(7);
        assert_eq!(
            ContentKind::Post.candidates(&params),
            vec!["post-hello", "post-7", "post", "single", "index"]
        );
    }

    #[test]
    fn unresolved_placeholders_are_skipped() {
        assert_eq!(
            ContentKind::Tag.candidates(&TemplateParams::default()),
            vec!["tag", "archive", "index"]
        );
        assert_eq!(
            ContentKind::Category.candidates(&TemplateParams::id(3)),
            vec!["category-3", "category", "archive", "index"]
        );
    }

    #[test]
    fn unsafe_slug_is_treated_as_absent() {
        let params = TemplateParams::slug("../secret");
        assert_eq!(
            ContentKind::Page.candidates(&params),
            vec!["page", "single", "index"]
        );
    }

    #[test]
    fn every_hierarchy_ends_in_index() {
        for kind in ContentKind::ALL {
            assert_eq!(kind.patterns().last(), Some(&"index"), "{kind}");
            assert_eq!(kind.as_str().parse::<ContentKind>(), Ok(kind));
        }
    }
}
