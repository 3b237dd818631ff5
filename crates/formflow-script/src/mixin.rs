//! Reusable field groups merged into schemas
//!
//! A [`Mixin`] carries fields, actions and named rules. Applying it with a
//! prefix renames every field to `{prefix}_{name}` and rewrites the mixin's
//! own expressions to match, so two copies of the same mixin (billing and
//! shipping addresses, say) can live in one schema.

use crate::error::{Error, Result};
use formflow_core::{Action, Expr, Field, FieldType, FieldValidation, Format, Schema};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A named group of fields, actions and rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mixin {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Named rules added to the schema as-is (rules are not prefixed)
    #[serde(default)]
    pub rules: IndexMap<String, Expr>,
}

impl Mixin {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            fields: Vec::new(),
            actions: Vec::new(),
            rules: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_rule(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.rules.insert(name.into(), expr);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidMixin("mixin id is empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidMixin(format!("mixin '{}' has no name", self.id)));
        }
        let mut names = IndexSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(Error::InvalidMixin(format!(
                    "mixin '{}' has a field without a name",
                    self.id
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(Error::InvalidMixin(format!(
                    "duplicate field '{}' in mixin '{}'",
                    field.name, self.id
                )));
            }
        }
        Ok(())
    }

    /// Fields and actions as they would appear in a schema under `prefix`
    fn prefixed(&self, prefix: Option<&str>) -> (Vec<Field>, Vec<Action>) {
        let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
            return (self.fields.clone(), self.actions.clone());
        };
        let own: IndexSet<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        let mut rename = |name: &mut String| {
            if own.contains(name.as_str()) {
                *name = format!("{}_{}", prefix, name);
            }
        };

        let fields = self
            .fields
            .iter()
            .map(|field| {
                let mut field = field.clone();
                rename(&mut field.name);
                field.visit_expr_fields_mut(&mut rename);
                field
            })
            .collect();
        let actions = self
            .actions
            .iter()
            .map(|action| {
                let mut action = action.clone();
                action.id = format!("{}_{}", prefix, action.id);
                if let Some(condition) = &mut action.condition {
                    condition.visit_fields_mut(&mut rename);
                }
                action
            })
            .collect();
        (fields, actions)
    }
}

/// Registry of available mixins
///
/// An explicit value: callers create one, register what they need and pass
/// it to whatever composes schemas.
#[derive(Debug, Clone, Default)]
pub struct MixinRegistry {
    mixins: IndexMap<String, Mixin>,
}

impl MixinRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the standard address and contact mixins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for mixin in [address_mixin(), contact_mixin()] {
            registry.mixins.insert(mixin.id.clone(), mixin);
        }
        registry
    }

    pub fn register(&mut self, mixin: Mixin) -> Result<()> {
        mixin.validate()?;
        if self.mixins.contains_key(&mixin.id) {
            return Err(Error::DuplicateDefinition(format!("mixin '{}'", mixin.id)));
        }
        self.mixins.insert(mixin.id.clone(), mixin);
        Ok(())
    }

    /// Replace a registered mixin
    pub fn update(&mut self, mixin: Mixin) -> Result<()> {
        mixin.validate()?;
        match self.mixins.get_mut(&mixin.id) {
            Some(slot) => {
                *slot = mixin;
                Ok(())
            }
            None => Err(Error::UnknownMixin(mixin.id)),
        }
    }

    pub fn get(&self, id: &str) -> Result<&Mixin> {
        self.mixins
            .get(id)
            .ok_or_else(|| Error::UnknownMixin(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.mixins.contains_key(id)
    }

    /// Registered mixins in registration order
    pub fn list(&self) -> impl Iterator<Item = &Mixin> {
        self.mixins.values()
    }

    pub fn len(&self) -> usize {
        self.mixins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mixins.is_empty()
    }

    pub fn unregister(&mut self, id: &str) -> Result<Mixin> {
        self.mixins
            .shift_remove(id)
            .ok_or_else(|| Error::UnknownMixin(id.to_string()))
    }

    /// Merge a mixin into `schema`
    ///
    /// Either everything is added or, on a name conflict, nothing is.
    pub fn apply(&self, schema: &mut Schema, id: &str, prefix: Option<&str>) -> Result<()> {
        let mixin = self.get(id)?;
        let (fields, actions) = mixin.prefixed(prefix);
        let conflict = |kind: &'static str, name: &str| Error::MixinConflict {
            mixin: id.to_string(),
            kind,
            name: name.to_string(),
        };

        if let Some(field) = fields.iter().find(|f| schema.has_field(&f.name)) {
            return Err(conflict("field", &field.name));
        }
        if let Some(action) = actions.iter().find(|a| schema.action(&a.id).is_some()) {
            return Err(conflict("action", &action.id));
        }
        if let Some((name, _)) = mixin
            .rules
            .iter()
            .find(|(name, expr)| schema.rules.get(*name).is_some_and(|e| e != *expr))
        {
            return Err(conflict("rule", name));
        }

        debug!(mixin = id, schema = %schema.name, fields = fields.len(), ?prefix, "mixin applied");
        schema.fields.extend(fields);
        schema.actions.extend(actions);
        for (name, expr) in &mixin.rules {
            schema.rules.entry(name.clone()).or_insert_with(|| expr.clone());
        }
        schema.applied_mixins.push(id.to_string());
        Ok(())
    }

    /// Apply every mixin the schema references, then check the result
    pub fn compose(&self, mut schema: Schema) -> Result<Schema> {
        let pending = std::mem::take(&mut schema.mixins);
        for reference in &pending {
            self.apply(&mut schema, &reference.name, reference.prefix.as_deref())?;
        }
        schema.validate()?;
        Ok(schema)
    }
}

fn address_mixin() -> Mixin {
    let text = |name: &str, label: &str, max: usize| {
        Field::new(name, FieldType::Text)
            .with_label(label)
            .with_validation(FieldValidation::length(None, Some(max)))
    };
    Mixin {
        description: Some("Postal address".to_string()),
        ..Mixin::new("address_fields", "Address Fields")
    }
    .with_field(text("street_address", "Street Address", 200).required())
    .with_field(text("street_address_2", "Street Address 2", 200))
    .with_field(text("city", "City", 100).required())
    .with_field(text("state_province", "State/Province", 100))
    .with_field(text("postal_code", "Postal Code", 20))
    .with_field(
        Field::new("country", FieldType::Select)
            .with_label("Country")
            .required()
            .with_default("US"),
    )
}

fn contact_mixin() -> Mixin {
    Mixin {
        description: Some("Contact details".to_string()),
        ..Mixin::new("contact_fields", "Contact Fields")
    }
    .with_field(
        Field::new("email", FieldType::Email)
            .with_label("Email")
            .with_validation(FieldValidation::format(Format::Email)),
    )
    .with_field(Field::new("phone", FieldType::Text).with_label("Phone"))
    .with_field(
        Field::new("website", FieldType::Url)
            .with_label("Website")
            .with_validation(FieldValidation::format(Format::Url)),
    )
}
