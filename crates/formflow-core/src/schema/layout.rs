//! Layout: sections, groups, tabs and steps over declared fields

use crate::Expr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SectionKind {
    #[default]
    Section,
    Group,
    Tab,
    Step,
}

/// A named block of fields that can be hidden as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub kind: SectionKind,
    #[serde(default)]
    pub title: Option<String>,
    pub fields: Vec<String>,
    /// Section is visible only while this holds
    #[serde(default)]
    pub condition: Option<Expr>,
}

impl Section {
    pub fn new(id: impl Into<String>, kind: SectionKind, fields: Vec<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: None,
            fields,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Layout {
    pub sections: Vec<Section>,
}

impl Layout {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Sections that list the given field
    pub fn sections_of<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Section> {
        self.sections
            .iter()
            .filter(move |s| s.fields.iter().any(|f| f == field))
    }
}
