//! Duplicate detection and merging of POIs within a city tree.

pub mod merge;
pub mod similarity;

pub use merge::{
    auto_merge, choose_keep, merge_pair, plan_with_keep, resolve, FieldValue, MergeError,
    MergeFailure, MergePlan, MergeReport, PoiField,
};
pub use similarity::{
    find_duplicates, scope_pois, CategoryOrNameRule, DedupConfig, DedupScope, DuplicateDetector,
    DuplicatePair, DuplicateRule, NameGatedRule, PairScanner, RuleKind, Signals,
};
