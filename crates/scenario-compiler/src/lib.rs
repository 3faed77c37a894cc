//! Scenario compiler.
//!
//! Turns recorded or hand-written steps into executable steps: each
//! interaction gets a ranked list of selector candidates and each click gets
//! the success conditions implied by the step that follows it. Everything in
//! this crate is pure and browser-free.

pub mod candidates;
pub mod compiler;
pub mod conditions;
pub mod validate;

pub use candidates::{
    generate_candidates, generate_ranked, is_stable_selector, quote, simplify_selector,
    text_contains_selector, text_selector, CandidateHints, CandidateTier, RankedCandidate,
};
pub use compiler::{compile, text_only_locator, CompileWarning, Compiled};
pub use conditions::{condition_locator, infer_conditions, Inference};
pub use validate::{validate, IssueKind, StepShape, ValidationIssue};
