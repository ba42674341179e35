// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The pattern tree: the intermediate representation the code generator
//! consumes. The surface syntax parser that produces these values is out of
//! scope for this crate — it only needs to agree on this shape.

use crate::options::{OptionChange, OptionSequence};

/// A node in the parsed-regex intermediate representation.
///
/// This is a plain tagged-variant tree, not a parser AST: it already has
/// capture numbering resolved structurally (capture order is the order
/// `Capture` nodes occur, left to right) and already carries resolved
/// matching-option deltas rather than raw syntax like `(?i)`.
#[derive(Clone, Debug)]
pub enum PatternTree {
    /// An ordered sequence matched in turn.
    Concatenation(Vec<PatternTree>),
    /// An ordered choice: the first alternative that matches wins.
    OrderedChoice(Vec<PatternTree>),
    /// A numbered (and optionally named) capture group.
    Capture {
        name: Option<String>,
        /// The id a `PatternTree::Atom(Atom::SymbolicReference)` elsewhere
        /// in the tree may use to refer to this capture before numbering is
        /// known. `None` for the implicit whole-match capture.
        ref_id: Option<u32>,
        child: Box<PatternTree>,
        transform: Option<TransformId>,
    },
    /// A non-capturing group of some kind (plain, atomic, lookaround, or an
    /// option-changing scope).
    NonCapturingGroup {
        kind: GroupKind,
        child: Box<PatternTree>,
    },
    /// A repetition of `child`, `amount` times, with a greediness mode.
    Quantification {
        amount: Amount,
        kind: QuantifierKind,
        child: Box<PatternTree>,
    },
    /// A single matchable or option-changing leaf.
    Atom(Atom),
    /// A custom (non-builtin) character class.
    CustomCharacterClass(CustomCharacterClass),
    /// A literal string of characters, matched back to back.
    QuotedLiteral(String),
    /// A user-supplied matching function. Consumes input (or not) and
    /// optionally produces a value that overrides the default substring
    /// capture value.
    Matcher(MatcherId),
    /// A node that carries no runtime semantics (comments, non-semantic
    /// whitespace in extended mode, etc).
    Trivia,
    /// Matches the empty string unconditionally.
    Empty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKind {
    Plain,
    AtomicNonCapturing,
    Lookahead,
    NegativeLookahead,
    Lookbehind,
    NegativeLookbehind,
    ChangeMatchingOptions(OptionSequenceHandle),
}

/// An indirection to an interned `OptionSequence`, kept small and `Copy` so
/// `GroupKind`/`Atom` stay cheap to clone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptionSequenceHandle(pub u32);

/// A repetition bound. `high == None` means unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Amount {
    pub low: u32,
    pub high: Option<u32>,
}

impl Amount {
    pub fn new(low: u32, high: Option<u32>) -> Amount {
        Amount { low, high }
    }

    /// `(low=0, high=0)` or `low > high`: the quantifier consumes its child
    /// zero times under every possible trip count, so it lowers to nothing.
    pub fn is_no_op(&self) -> bool {
        match self.high {
            Some(0) => true,
            Some(high) => self.low > high,
            None => false,
        }
    }

    /// Number of trips beyond `low` that are still optional. `None` means
    /// unbounded.
    pub fn extra_trips(&self) -> Option<u32> {
        self.high.map(|h| h.saturating_sub(self.low))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantifierKind {
    Eager,
    Reluctant,
    Possessive,
    /// Resolve against `MatchingOptions::default_quantification_kind`.
    DefaultFromOptions,
}

/// A matchable or option-changing leaf node.
#[derive(Clone, Debug)]
pub enum Atom {
    /// Any character, including newlines.
    Any,
    /// Any character except a newline.
    AnyNonNewline,
    /// `.`, resolved against `dotMatchesNewline` at lowering time.
    Dot,
    Char(char),
    /// A single Unicode scalar value, distinct from `Char` because scalar
    /// mode lowers it without the grapheme-boundary elision logic.
    Scalar(char),
    CharacterClass(BuiltinClass),
    Assertion(AssertionKind),
    /// An absolute or named backreference, already resolved to a kind by
    /// the parser.
    Backreference(BackreferenceKind),
    /// A reference to a capture by its pre-numbering id; resolved against
    /// `referenced_capture_offsets` at `assemble` time.
    SymbolicReference(u32),
    ChangeMatchingOptions(OptionSequenceHandle),
    /// An atom the parser could not model more specifically; not lowerable.
    Unconverted(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinClass {
    Digit,
    NotDigit,
    Word,
    NotWord,
    Whitespace,
    NotWhitespace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssertionKind {
    StartOfSubject,
    EndOfSubject,
    EndOfSubjectBeforeNewline,
    StartOfLine,
    EndOfLine,
    TextSegment,
    NotTextSegment,
    WordBoundary,
    NotWordBoundary,
    FirstMatchingPositionInSubject,
    /// `\K`; always `Unsupported` at lowering time (see spec.md §4.4).
    ResetStartOfMatch,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackreferenceKind {
    Absolute(u32),
    Named(String),
    Relative(i32),
    RecursesWholePattern,
}

/// A custom character class: a set of ranges and negated/positive class
/// members, with an inversion flag.
#[derive(Clone, Debug)]
pub struct CustomCharacterClass {
    pub ranges: Vec<(char, char)>,
    pub members: Vec<ClassMember>,
    pub inverted: bool,
}

#[derive(Clone, Debug)]
pub enum ClassMember {
    Builtin(BuiltinClass),
    Nested(Box<CustomCharacterClass>),
}

impl CustomCharacterClass {
    /// True when this class can be represented as a 128-bit ASCII bitset —
    /// i.e. every range lies entirely within `0..=0x7F` and there are no
    /// nested/builtin members (or the class is inverted over such a set,
    /// which the bitset instruction also models).
    pub fn is_ascii_bitset_convertible(&self) -> bool {
        self.members.is_empty()
            && self.ranges.iter().all(|&(lo, hi)| (lo as u32) <= 0x7F && (hi as u32) <= 0x7F)
    }

    /// A class whose only member is `.` with `inverted == false` lowers to
    /// a plain `Atom::Dot` (spec.md §4.4, CustomCharacterClass).
    pub fn is_plain_any(&self) -> bool {
        !self.inverted
            && self.members.is_empty()
            && self.ranges == [('\u{0}', char::MAX)]
    }
}

/// Opaque handle into the parser's transform-function table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransformId(pub u32);

/// Opaque handle into the parser's matcher-function table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatcherId(pub u32);

/// The full input the code generator consumes: a pattern tree together with
/// the option-change sequences its `OptionSequenceHandle`s index into. A
/// parser hands off both at once, the same way the builder's own intern
/// tables travel alongside the instructions that reference them.
#[derive(Clone, Debug)]
pub struct PatternGraph {
    pub root: PatternTree,
    option_sequences: Vec<OptionSequence>,
}

impl PatternGraph {
    pub fn new(root: PatternTree, option_sequences: Vec<OptionSequence>) -> PatternGraph {
        PatternGraph { root, option_sequences }
    }

    /// Resolves a handle recorded on `GroupKind::ChangeMatchingOptions` or
    /// `Atom::ChangeMatchingOptions` back to its option-change list.
    pub fn option_sequence(&self, handle: OptionSequenceHandle) -> &[OptionChange] {
        &self.option_sequences[handle.0 as usize]
    }
}

impl PatternTree {
    /// True iff matching this subtree always advances the input position by
    /// at least one unit — the structural predicate of spec.md §4.4 that
    /// guards the general quantification loop against infinite looping on
    /// zero-width matches.
    pub fn guarantees_forward_progress(&self) -> bool {
        match self {
            PatternTree::OrderedChoice(children) => {
                !children.is_empty() && children.iter().all(|c| c.guarantees_forward_progress())
            }
            PatternTree::Concatenation(children) => {
                children.iter().any(|c| c.guarantees_forward_progress())
            }
            PatternTree::Capture { child, .. } => child.guarantees_forward_progress(),
            PatternTree::NonCapturingGroup { kind, child } => match kind {
                GroupKind::Lookahead
                | GroupKind::NegativeLookahead
                | GroupKind::Lookbehind
                | GroupKind::NegativeLookbehind => false,
                _ => child.guarantees_forward_progress(),
            },
            PatternTree::Quantification { amount, child, .. } => {
                amount.low >= 1 && child.guarantees_forward_progress()
            }
            PatternTree::Atom(atom) => !matches!(
                atom,
                Atom::ChangeMatchingOptions(_) | Atom::Assertion(_)
            ),
            PatternTree::CustomCharacterClass(_) => true,
            PatternTree::QuotedLiteral(s) => !s.is_empty(),
            PatternTree::Matcher(_) | PatternTree::Trivia | PatternTree::Empty => false,
        }
    }

    /// Strips away the layers spec.md §4.4's fast-quantify specialization is
    /// asked to see through: single-child non-capturing groups and
    /// single-character quoted literals that are really just one atom.
    pub fn unwrap_for_fast_quantify(&self) -> &PatternTree {
        match self {
            PatternTree::NonCapturingGroup {
                kind: GroupKind::Plain,
                child,
            } => child.unwrap_for_fast_quantify(),
            PatternTree::QuotedLiteral(s) if s.chars().count() == 1 => self,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_atom(c: char) -> PatternTree {
        PatternTree::Atom(Atom::Char(c))
    }

    #[test]
    fn concatenation_forward_progress_if_any_child_does() {
        let tree = PatternTree::Concatenation(vec![
            PatternTree::Atom(Atom::ChangeMatchingOptions(OptionSequenceHandle(0))),
            char_atom('a'),
        ]);
        assert!(tree.guarantees_forward_progress());
    }

    #[test]
    fn alternation_requires_all_branches() {
        let progressing = PatternTree::OrderedChoice(vec![char_atom('a'), char_atom('b')]);
        assert!(progressing.guarantees_forward_progress());

        let not_progressing = PatternTree::OrderedChoice(vec![
            char_atom('a'),
            PatternTree::Empty,
        ]);
        assert!(!not_progressing.guarantees_forward_progress());
    }

    #[test]
    fn lookaround_never_guarantees_progress() {
        let tree = PatternTree::NonCapturingGroup {
            kind: GroupKind::Lookahead,
            child: Box::new(char_atom('a')),
        };
        assert!(!tree.guarantees_forward_progress());
    }

    #[test]
    fn zero_trip_quantifier_does_not_guarantee_progress() {
        let tree = PatternTree::Quantification {
            amount: Amount::new(0, None),
            kind: QuantifierKind::Eager,
            child: Box::new(char_atom('a')),
        };
        assert!(!tree.guarantees_forward_progress());
    }

    #[test]
    fn amount_no_op_cases() {
        assert!(Amount::new(0, Some(0)).is_no_op());
        assert!(Amount::new(3, Some(2)).is_no_op());
        assert!(!Amount::new(0, Some(1)).is_no_op());
        assert!(!Amount::new(0, None).is_no_op());
    }

    #[test]
    fn ascii_bitset_convertible_detects_non_ascii_ranges() {
        let ascii = CustomCharacterClass {
            ranges: vec![('a', 'z')],
            members: vec![],
            inverted: false,
        };
        assert!(ascii.is_ascii_bitset_convertible());

        let non_ascii = CustomCharacterClass {
            ranges: vec![('a', '\u{1F600}')],
            members: vec![],
            inverted: false,
        };
        assert!(!non_ascii.is_ascii_bitset_convertible());
    }
}
