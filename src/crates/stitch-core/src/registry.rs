//! Stitch template registry
//!
//! A registry is a plain value. Compilers keep a seeded base registry and
//! clone it at the start of every compile, so definitions and synthesized
//! variants never leak from one compile into the next.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::builtins::BUILTIN_STITCHES;
use crate::template::{StitchTemplate, SPEC_SENTINEL};
use crate::variants::{self, parse_variant_name};
use crate::{Result, TemplateError};

#[derive(Debug, Clone, Default)]
pub struct Registry {
    templates: HashMap<String, Arc<StitchTemplate>>,
    /// Names defined by the pattern itself; built-ins may be shadowed once
    defined: HashSet<String>,
}

impl Registry {
    /// Registry with no templates at all
    pub fn empty() -> Self {
        Registry::default()
    }

    /// Registry seeded with the built-in stitch dictionary
    pub fn builtin() -> Result<Self> {
        let mut registry = Registry::empty();
        for (name, raw) in BUILTIN_STITCHES {
            let template = StitchTemplate::parse(name, raw)?;
            registry.templates.insert(name.to_string(), Arc::new(template));
        }
        Ok(registry)
    }

    /// Register a template under `name`
    ///
    /// Built-in names may be redefined once; a second definition of the same
    /// name fails with [`TemplateError::Duplicate`].
    pub fn define(&mut self, name: &str, template: StitchTemplate) -> Result<Arc<StitchTemplate>> {
        if !self.defined.insert(name.to_string()) {
            return Err(TemplateError::Duplicate(name.to_string()));
        }
        let template = Arc::new(StitchTemplate {
            name: name.to_string(),
            ..template
        });
        log::debug!("defined stitch '{}'", name);
        self.templates.insert(name.to_string(), Arc::clone(&template));
        Ok(template)
    }

    /// Register a raw `&...` spec under `name`
    pub fn define_spec(&mut self, name: &str, raw: &str) -> Result<Arc<StitchTemplate>> {
        let template = StitchTemplate::parse(name, raw)?;
        self.define(name, template)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Look up an existing template without synthesizing variants
    pub fn lookup(&self, name: &str) -> Result<Arc<StitchTemplate>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::Unknown(name.to_string()))
    }

    /// Look up `name`, synthesizing an `Ntog`/`Ninc` variant on first use
    pub fn resolve(&mut self, name: &str) -> Result<Arc<StitchTemplate>> {
        match self.templates.get(name) {
            Some(template) => Ok(Arc::clone(template)),
            None => self.synthesize(name),
        }
    }

    /// Build and cache the variant named by a trailing `Ntog`/`Ninc` suffix
    pub fn synthesize(&mut self, name: &str) -> Result<Arc<StitchTemplate>> {
        let (base, count, kind) =
            parse_variant_name(name).ok_or_else(|| TemplateError::Unknown(name.to_string()))?;
        let base = self.lookup(base).map_err(|_| TemplateError::Unknown(name.to_string()))?;
        let template = Arc::new(variants::derive(&base, name, count, kind)?);
        log::debug!("synthesized stitch '{}' from '{}'", name, base.name);
        self.templates.insert(name.to_string(), Arc::clone(&template));
        Ok(template)
    }

    /// Define `new_name` as a rescaled copy of `base`
    ///
    /// `base` may itself be a not-yet-synthesized variant name.
    pub fn rescale(&mut self, base: &str, new_name: &str, height: f64, width: f64) -> Result<Arc<StitchTemplate>> {
        let base = self.resolve(base)?;
        let template = variants::rescale(&base, new_name, height, width)?;
        self.define(new_name, template)
    }

    /// Sorted template names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Whether `rhs` is a raw template spec rather than notation text
pub fn is_raw_spec(rhs: &str) -> bool {
    rhs.trim_start().starts_with(SPEC_SENTINEL)
}
