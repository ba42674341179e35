// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;

/// Everything that can go wrong while lowering a pattern tree to bytecode.
///
/// The backend never partially succeeds: the first error encountered aborts
/// the whole compilation (see `spec.md` §7).
#[derive(Clone, Debug, thiserror::Error)]
pub enum CompileError {
    /// A tree shape the backend deliberately does not implement, e.g.
    /// backward lookaround, `\K`, conditionals, recursion, relative
    /// backreferences, or a character predicate node.
    #[error("unsupported regex feature: {0}")]
    Unsupported(UnsupportedFeature),

    /// A symbolic or named backreference with no matching capture anywhere
    /// in the tree.
    #[error("backreference to unresolved capture {0}")]
    UncapturedReference(CaptureRef),

    /// The compiled program exceeded its configured size limit.
    #[error("compiled program size {size} exceeds limit {limit}")]
    SizeLimitExceeded { size: usize, limit: usize },

    /// The parser handed the compiler a tree shape that violates an
    /// invariant of §3 (e.g. a quantifier with `low > high` that wasn't
    /// already filtered, or a dangling address token). This always
    /// indicates a bug upstream of the compiler, not a user error.
    #[error("unreachable: {0}")]
    Unreachable(String),
}

/// Identifies which disallowed construct triggered `CompileError::Unsupported`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UnsupportedFeature {
    #[error("backward lookbehind")]
    Lookbehind,
    #[error("negative backward lookbehind")]
    NegativeLookbehind,
    #[error("`\\K` reset-start-of-match assertion")]
    ResetStartOfMatch,
    #[error("whole-pattern recursion")]
    RecursesWholePattern,
    #[error("relative backreference")]
    RelativeBackreference,
    #[error("conditional pattern")]
    Conditional,
    #[error("absent function")]
    AbsentFunction,
    #[error("bare consumer node outside of a matcher")]
    Consumer,
    #[error("character predicate node")]
    CharacterPredicate,
    /// An atom the parser could not model more specifically than
    /// `Atom::Unconverted` (spec.md §3); the descriptor is whatever the
    /// parser recorded about it.
    #[error("unconverted atom: {0}")]
    Custom(String),
}

/// A reference that failed to resolve, for error reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureRef {
    Symbolic(u32),
    Named(String),
}

impl fmt::Display for CaptureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureRef::Symbolic(id) => write!(f, "#{id}"),
            CaptureRef::Named(name) => write!(f, "{name:?}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
