//! `ValidatorOptions` / `ValidationPlan`: a small config type a caller
//! builds once, compiled into an immutable plan the validator consumes on
//! every `validate` call (mirrors the teacher's `ValidatorConfig`/
//! `ValidationPlan` split) — resolving root profile URLs against the
//! repository up front turns an unknown-profile typo into a single
//! up-front [`crate::error::Error::UnknownProfile`] instead of a silent
//! no-op deep in the walk.

use crate::error::{Error, Result};
use crate::issue::IssueSeverity;
use fhirkit_model::{Repository, StructureDefinition};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatUnknownExtensions {
    Allow,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    pub root_profiles: Vec<String>,
    pub treat_unknown_extensions: TreatUnknownExtensions,
    pub severity_cutoff: IssueSeverity,
}

impl ValidatorOptions {
    pub fn for_profile(url: impl Into<String>) -> Self {
        Self { root_profiles: vec![url.into()], treat_unknown_extensions: TreatUnknownExtensions::Allow, severity_cutoff: IssueSeverity::Debug }
    }

    pub fn compile(&self, repository: &Arc<Repository>) -> Result<ValidationPlan> {
        let root_profiles = self
            .root_profiles
            .iter()
            .map(|url| repository.structure_definition(url).ok_or_else(|| Error::UnknownProfile(url.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(ValidationPlan {
            root_profiles,
            treat_unknown_extensions: self.treat_unknown_extensions,
            severity_cutoff: self.severity_cutoff,
        })
    }
}

/// The compiled form of [`ValidatorOptions`]: root profiles already
/// resolved to their `StructureDefinition`s.
#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub root_profiles: Vec<Arc<StructureDefinition>>,
    pub treat_unknown_extensions: TreatUnknownExtensions,
    pub severity_cutoff: IssueSeverity,
}
