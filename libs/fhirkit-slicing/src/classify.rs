//! Slice compilation and classification (spec §4.4 steps 2-3).

use fhirkit_fhirpath::{ConformsToChecker, EvalContext};
use fhirkit_model::{ElementDefinitionSlicing, Snapshot, SlicingRules};
use fhirkit_values::Element;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::condition::Condition;
use crate::discriminator::compile_discriminator;
use crate::error::Result;

pub struct CompiledSlice {
    pub slice_name: String,
    conditions: Vec<Box<dyn Condition>>,
}

pub struct CompiledSlicing {
    pub ordered: bool,
    pub rules: SlicingRules,
    pub slices: Vec<CompiledSlice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceAssignment {
    Slice(usize),
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceIssue {
    /// `closed` rules: this member matched no slice.
    UnmatchedClosed { member_index: usize },
    /// `ordered`: this member matched a slice that precedes one already
    /// matched by an earlier member.
    OutOfOrder { member_index: usize, slice_name: String },
    /// `openAtEnd`: this unmatched member was followed by a later member
    /// that did match a slice.
    UnmatchedBeforeEnd { member_index: usize },
    /// `reportOther`: an unmatched member, allowed but flagged.
    ReportOther { member_index: usize },
}

pub struct ClassificationResult {
    pub assignments: Vec<SliceAssignment>,
    pub issues: Vec<SliceIssue>,
}

/// Compile a slicing declared at `anchor_path` (e.g. `"Observation.component"`)
/// using the slice root element definitions found via
/// `snapshot.slices_of(anchor_path)`, in declaration order.
#[instrument(skip_all, fields(anchor_path))]
pub fn compile_slicing(
    snapshot: &Snapshot,
    anchor_path: &str,
    slicing: &ElementDefinitionSlicing,
    conforms_to_checker: Option<&Arc<dyn ConformsToChecker>>,
) -> Result<CompiledSlicing> {
    let mut slices = Vec::new();
    for slice_root in snapshot.slices_of(anchor_path) {
        let slice_name = slice_root.slice_name.clone().unwrap_or_default();
        let mut conditions = Vec::new();
        for discriminator in slicing.discriminator.iter().flatten() {
            conditions.push(compile_discriminator(snapshot, anchor_path, slice_root, discriminator, conforms_to_checker)?);
        }
        slices.push(CompiledSlice { slice_name, conditions });
    }
    Ok(CompiledSlicing { ordered: slicing.ordered.unwrap_or(false), rules: slicing.rules, slices })
}

impl CompiledSlicing {
    /// Classify each array member in order, per spec §4.4 step 3.
    pub fn classify(&self, ctx: &EvalContext, members: &[Element]) -> Result<ClassificationResult> {
        let mut assignments = Vec::with_capacity(members.len());
        let mut issues = Vec::new();
        let mut last_matched_slice: Option<usize> = None;

        for (index, member) in members.iter().enumerate() {
            let mut matched = None;
            for (slice_index, slice) in self.slices.iter().enumerate() {
                let mut all_match = true;
                for condition in &slice.conditions {
                    if !condition.matches(ctx, member)? {
                        all_match = false;
                        break;
                    }
                }
                if all_match {
                    matched = Some(slice_index);
                    break;
                }
            }

            match matched {
                Some(slice_index) => {
                    if self.ordered {
                        if let Some(last) = last_matched_slice {
                            if slice_index < last {
                                issues.push(SliceIssue::OutOfOrder { member_index: index, slice_name: self.slices[slice_index].slice_name.clone() });
                            }
                        }
                        last_matched_slice = Some(slice_index);
                    }
                    assignments.push(SliceAssignment::Slice(slice_index));
                }
                None => {
                    assignments.push(SliceAssignment::Unmatched);
                    match self.rules {
                        SlicingRules::Closed => issues.push(SliceIssue::UnmatchedClosed { member_index: index }),
                        SlicingRules::Open | SlicingRules::OpenAtEnd => {}
                        SlicingRules::ReportOther => issues.push(SliceIssue::ReportOther { member_index: index }),
                    }
                }
            }
        }

        if self.rules == SlicingRules::OpenAtEnd {
            let last_matched_index = assignments.iter().rposition(|a| matches!(a, SliceAssignment::Slice(_)));
            if let Some(last_matched_index) = last_matched_index {
                for (index, assignment) in assignments.iter().enumerate() {
                    if index < last_matched_index && matches!(assignment, SliceAssignment::Unmatched) {
                        issues.push(SliceIssue::UnmatchedBeforeEnd { member_index: index });
                    }
                }
            }
        }

        if !issues.is_empty() {
            warn!(issue_count = issues.len(), "slice classification raised issues");
        }
        Ok(ClassificationResult { assignments, issues })
    }
}
