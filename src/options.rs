// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Matching-options tracking: a scoped stack of option flags, and the
//! directives that update it. See spec.md §4.3.

use crate::tree::QuantifierKind;

/// The semantic level at which matching proceeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemanticLevel {
    GraphemeCluster,
    UnicodeScalar,
}

/// A single flag flip or value assignment, as produced by `(?i)`-style
/// syntax or a DSL option-change call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionChange {
    CaseInsensitive(bool),
    DotMatchesNewline(bool),
    AnchorsMatchNewlines(bool),
    SemanticLevel(SemanticLevel),
    DefaultQuantificationKind(QuantifierKind),
    SimpleUnicodeBoundaries(bool),
    AsciiWord(bool),
}

/// An ordered list of option changes, applied together. Interned by the
/// pattern tree builder and referenced via `OptionSequenceHandle`.
pub type OptionSequence = Vec<OptionChange>;

/// One level of the matching-options stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchingOptions {
    pub case_insensitive: bool,
    pub dot_matches_newline: bool,
    pub anchors_match_newlines: bool,
    pub semantic_level: SemanticLevel,
    pub default_quantification_kind: QuantifierKind,
    pub uses_simple_unicode_boundaries: bool,
    pub uses_ascii_word: bool,
}

impl Default for MatchingOptions {
    fn default() -> MatchingOptions {
        MatchingOptions {
            case_insensitive: false,
            dot_matches_newline: false,
            anchors_match_newlines: false,
            semantic_level: SemanticLevel::GraphemeCluster,
            default_quantification_kind: QuantifierKind::Eager,
            uses_simple_unicode_boundaries: false,
            uses_ascii_word: false,
        }
    }
}

impl MatchingOptions {
    /// Resolve a `QuantifierKind::DefaultFromOptions` against the current
    /// default.
    pub fn resolve_quantifier_kind(&self, kind: QuantifierKind) -> QuantifierKind {
        match kind {
            QuantifierKind::DefaultFromOptions => self.default_quantification_kind,
            other => other,
        }
    }

    fn apply(&mut self, change: OptionChange) {
        match change {
            OptionChange::CaseInsensitive(v) => self.case_insensitive = v,
            OptionChange::DotMatchesNewline(v) => self.dot_matches_newline = v,
            OptionChange::AnchorsMatchNewlines(v) => self.anchors_match_newlines = v,
            OptionChange::SemanticLevel(v) => self.semantic_level = v,
            OptionChange::DefaultQuantificationKind(v) => self.default_quantification_kind = v,
            OptionChange::SimpleUnicodeBoundaries(v) => self.uses_simple_unicode_boundaries = v,
            OptionChange::AsciiWord(v) => self.uses_ascii_word = v,
        }
    }

    /// Applies a whole option-change sequence, in order. Used both by the
    /// options stack (for the current scope) and directly by the code
    /// generator against `initialOptions`, which lives outside the stack
    /// (spec.md §4.3).
    pub fn apply_all(&mut self, seq: &[OptionChange]) {
        for &change in seq {
            self.apply(change);
        }
    }
}

/// The scoped stack of option sets the code generator consults and mutates
/// while walking the tree. `begin_scope`/`end_scope` give every
/// `NonCapturingGroup`/`Capture` a lexical window; option writes inside a
/// scope never leak past its `end_scope`.
#[derive(Clone, Debug)]
pub struct MatchingOptionsStack {
    stack: Vec<MatchingOptions>,
}

impl MatchingOptionsStack {
    pub fn new(initial: MatchingOptions) -> MatchingOptionsStack {
        MatchingOptionsStack { stack: vec![initial] }
    }

    pub fn current(&self) -> MatchingOptions {
        *self.stack.last().expect("options stack is never empty")
    }

    /// Push a copy of the current options onto the stack, returning a guard
    /// that pops it back off on drop — including on an early `?` return
    /// from inside the scope, so callers never have to remember to call
    /// `end_scope` manually (see SPEC_FULL.md §B, `MatchingOptions::snapshot`).
    pub fn begin_scope(&mut self) {
        let top = self.current();
        self.stack.push(top);
    }

    pub fn end_scope(&mut self) {
        self.stack.pop();
        debug_assert!(!self.stack.is_empty(), "popped the base options scope");
    }

    /// Apply an option-change sequence to the current (innermost) scope.
    pub fn apply_to_current(&mut self, seq: &[OptionChange]) {
        let top = self.stack.last_mut().expect("options stack is never empty");
        top.apply_all(seq);
    }
}

/// RAII guard pairing `begin_scope`/`end_scope` so a scope is always closed,
/// even when the code generator bails out early via `?`.
pub struct OptionsScopeGuard<'a> {
    stack: &'a mut MatchingOptionsStack,
}

impl<'a> OptionsScopeGuard<'a> {
    pub fn new(stack: &'a mut MatchingOptionsStack) -> OptionsScopeGuard<'a> {
        stack.begin_scope();
        OptionsScopeGuard { stack }
    }

    pub fn options(&self) -> MatchingOptions {
        self.stack.current()
    }

    pub fn apply(&mut self, seq: &[OptionChange]) {
        self.stack.apply_to_current(seq);
    }

    /// Reborrows the underlying stack so recursive lowering calls can keep
    /// using it while this guard is still alive and holding its scope open.
    pub fn stack_mut(&mut self) -> &mut MatchingOptionsStack {
        self.stack
    }
}

impl Drop for OptionsScopeGuard<'_> {
    fn drop(&mut self) {
        self.stack.end_scope();
    }
}
