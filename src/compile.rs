// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The code generator: lowers a `PatternTree` into a `Program` by walking it
//! depth-first and emitting instructions through a `Builder` (spec.md §4.4).
//!
//! Every `emit_*` method here takes its `Builder` and `MatchingOptionsStack`
//! as explicit parameters rather than stashing them on `self`, so an option
//! scope guard borrowing the stack doesn't block the rest of the lowering
//! from using the builder at the same time.

use crate::builder::{Builder, ConsumeDescriptor, Program};
use crate::error::{CaptureRef, CompileError, Result, UnsupportedFeature};
use crate::inst::{self, QuantifyBody, QuantifyKind, QuantifyPayload, MAX_STORABLE_TRIPS};
use crate::options::{MatchingOptions, MatchingOptionsStack, OptionsScopeGuard, SemanticLevel};
use crate::tree::{
    Amount, Atom, BackreferenceKind, CustomCharacterClass, GroupKind, PatternGraph, PatternTree,
    QuantifierKind,
};

#[cfg(feature = "trace")]
fn trace_entry(label: &str) {
    tracing::trace!(target: "regex_backend::compile", %label, "entering compiler stage");
}
#[cfg(not(feature = "trace"))]
fn trace_entry(_label: &str) {}

#[cfg(feature = "trace")]
fn trace_fast_quantify(body: &QuantifyBody, kind: QuantifyKind) {
    tracing::trace!(target: "regex_backend::compile", ?body, ?kind, "fast-quantify specialization chosen");
}
#[cfg(not(feature = "trace"))]
fn trace_fast_quantify(_body: &QuantifyBody, _kind: QuantifyKind) {}

#[cfg(feature = "trace")]
fn trace_size(size: usize, limit: usize) {
    tracing::trace!(target: "regex_backend::compile", size, limit, "checked compiled program size");
}
#[cfg(not(feature = "trace"))]
fn trace_size(_size: usize, _limit: usize) {}

/// Flags controlling optional transformations the compiler applies; the
/// compiled program's observable matching semantics never depend on these
/// (spec.md §6, "compile-options flag bundle").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Disables every optimization pass: ASCII fast paths, boundary-check
    /// elision, and the fast-quantify specialization (spec.md §1, §4.4).
    pub disable_optimizations: bool,
    /// Upper bound, in emitted instruction words, a compiled program may
    /// not exceed. Mirrors the size-limit guardrail the starting point's
    /// own compiler enforces (SPEC_FULL.md §B).
    pub size_limit: usize,
}

/// A generous default: large enough that no realistic hand-written pattern
/// trips it, small enough to catch a pathologically generated one.
pub const DEFAULT_SIZE_LIMIT: usize = 10 * (1 << 20);

impl Default for CompileOptions {
    fn default() -> CompileOptions {
        CompileOptions {
            disable_optimizations: false,
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }
}

/// Lowers `graph` to a `Program`, starting from `initial_options` (spec.md
/// §6, "an options value representing the initial matching options").
pub fn compile(
    graph: &PatternGraph,
    initial_options: MatchingOptions,
    compile_options: CompileOptions,
) -> Result<Program> {
    trace_entry("compile");
    let compiler = Compiler { graph, compile_options };
    let mut builder = Builder::new(initial_options);
    let mut options = MatchingOptionsStack::new(initial_options);
    compiler.emit_root(&mut builder, &mut options)?;
    trace_entry("assemble");
    let program = builder.assemble()?;
    trace_size(program.words.len(), compile_options.size_limit);
    if program.words.len() > compile_options.size_limit {
        return Err(CompileError::SizeLimitExceeded {
            size: program.words.len(),
            limit: compile_options.size_limit,
        });
    }
    Ok(program)
}

/// True for characters that participate in case folding — i.e. have a
/// distinct upper/lower form — used to skip emitting case-insensitive
/// matching machinery for characters case doesn't apply to (spec.md §4.4).
fn is_cased(c: char) -> bool {
    c.is_uppercase() || c.is_lowercase()
}

/// A 128-bit ASCII membership bitset, one bit per code point `0..=0x7F`.
fn ascii_bitset_from_ranges(ranges: &[(char, char)], inverted: bool) -> [u8; 16] {
    let mut bits = [0u8; 16];
    for &(lo, hi) in ranges {
        for cp in (lo as u32)..=(hi as u32) {
            if cp <= 0x7F {
                bits[(cp / 8) as usize] |= 1 << (cp % 8);
            }
        }
    }
    if inverted {
        for byte in bits.iter_mut() {
            *byte = !*byte;
        }
    }
    bits
}

/// Holds only the compiler's read-only configuration (the pattern graph and
/// compile-time flags); all mutable state lives in the `Builder` and
/// `MatchingOptionsStack` threaded explicitly through every method.
struct Compiler<'g> {
    graph: &'g PatternGraph,
    compile_options: CompileOptions,
}

impl<'g> Compiler<'g> {
    /// Wraps the whole tree in the implicit capture 0 (spec.md §4.4,
    /// "emitRoot").
    fn emit_root(&self, builder: &mut Builder, options: &mut MatchingOptionsStack) -> Result<()> {
        let whole_match = builder.whole_match_capture();
        builder.emit_begin_capture(whole_match);
        self.emit_node(builder, options, &self.graph.root)?;
        builder.emit_end_capture(whole_match);
        builder.emit_accept();
        Ok(())
    }

    /// Dispatches on the node's variant. Returns `Some(value)` only when
    /// `node` is a `Matcher` that produced a value register the enclosing
    /// `Capture` should adopt (spec.md §4.4, "Matcher").
    fn emit_node(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        node: &PatternTree,
    ) -> Result<Option<inst::ValueReg>> {
        match node {
            PatternTree::Concatenation(children) => {
                for child in children {
                    self.emit_node(builder, options, child)?;
                }
                Ok(None)
            }
            PatternTree::OrderedChoice(children) => {
                self.emit_alternation(builder, options, children)?;
                Ok(None)
            }
            PatternTree::Capture { name, ref_id, child, transform } => {
                self.emit_capture(builder, options, name.clone(), *ref_id, child, *transform)?;
                Ok(None)
            }
            PatternTree::NonCapturingGroup { kind, child } => {
                self.emit_group(builder, options, kind, child)?;
                Ok(None)
            }
            PatternTree::Quantification { amount, kind, child } => {
                self.emit_quantification(builder, options, *amount, *kind, child)?;
                Ok(None)
            }
            PatternTree::Atom(atom) => {
                self.emit_atom(builder, options, atom)?;
                Ok(None)
            }
            PatternTree::CustomCharacterClass(ccc) => {
                self.emit_custom_character_class(builder, options, ccc)?;
                Ok(None)
            }
            PatternTree::QuotedLiteral(s) => {
                self.emit_quoted_literal(builder, options, s)?;
                Ok(None)
            }
            PatternTree::Matcher(id) => Ok(Some(self.emit_matcher(builder, *id))),
            PatternTree::Trivia | PatternTree::Empty => Ok(None),
        }
    }

    // -- capture / group --------------------------------------------------

    fn emit_capture(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        name: Option<String>,
        ref_id: Option<u32>,
        child: &PatternTree,
        transform: Option<crate::tree::TransformId>,
    ) -> Result<()> {
        let mut guard = OptionsScopeGuard::new(options);
        let cap = builder.alloc_capture(name, ref_id);
        builder.emit_begin_capture(cap);
        let value = self.emit_node(builder, guard.stack_mut(), child)?;
        builder.emit_end_capture(cap);
        if let Some(value) = value {
            builder.emit_capture_value(value, cap);
        }
        if let Some(transform) = transform {
            let f = builder.intern_transform_fn(transform);
            builder.emit_transform_capture(cap, f);
        }
        Ok(())
    }

    fn emit_group(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        kind: &GroupKind,
        child: &PatternTree,
    ) -> Result<()> {
        let mut guard = OptionsScopeGuard::new(options);
        match kind {
            GroupKind::Lookahead => self.emit_lookaround(builder, guard.stack_mut(), child, false),
            GroupKind::NegativeLookahead => {
                self.emit_lookaround(builder, guard.stack_mut(), child, true)
            }
            GroupKind::Lookbehind => {
                Err(CompileError::Unsupported(UnsupportedFeature::Lookbehind))
            }
            GroupKind::NegativeLookbehind => {
                Err(CompileError::Unsupported(UnsupportedFeature::NegativeLookbehind))
            }
            GroupKind::ChangeMatchingOptions(handle) => {
                // Same leading-atom rule as the bare `(?i)` atom (spec.md
                // §4.4): if nothing matchable precedes this group, its
                // change also becomes the program's initial options,
                // even though it only scopes `child` for compilation.
                let changes = self.graph.option_sequence(*handle);
                builder.note_option_change_if_leading(|o| o.apply_all(changes));
                guard.apply(changes);
                self.emit_node(builder, guard.stack_mut(), child).map(|_| ())
            }
            GroupKind::AtomicNonCapturing => self.emit_atomic(builder, guard.stack_mut(), child),
            GroupKind::Plain => self.emit_node(builder, guard.stack_mut(), child).map(|_| ()),
        }
    }

    /// Lookahead / negative lookahead: a zero-width assertion that always
    /// rewinds the input position (spec.md §4.4).
    fn emit_lookaround(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        child: &PatternTree,
        negative: bool,
    ) -> Result<()> {
        let success = builder.make_address();
        let intercept = builder.make_address();
        builder.emit_save_to(success);
        builder.emit_save_to(intercept);
        self.emit_node(builder, options, child)?;
        builder.emit_clear_through(intercept);
        if negative {
            builder.emit_clear();
        }
        builder.emit_fail();
        builder.label(intercept);
        if !negative {
            builder.emit_clear();
        }
        builder.emit_fail();
        builder.label(success);
        Ok(())
    }

    /// Atomic non-capturing group: commits on success via `saveAddress`
    /// (resume-only, doesn't restore position), so backtracking can't
    /// re-enter the group's internals (spec.md §4.4).
    fn emit_atomic(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        child: &PatternTree,
    ) -> Result<()> {
        let success = builder.make_address();
        let intercept = builder.make_address();
        builder.emit_save_address_to(success);
        builder.emit_save_to(intercept);
        self.emit_node(builder, options, child)?;
        builder.emit_clear_through(intercept);
        builder.emit_fail();
        builder.label(intercept);
        builder.emit_clear();
        builder.emit_fail();
        builder.label(success);
        Ok(())
    }

    // -- alternation -------------------------------------------------------

    /// `save(next); <child>; branch(done)` per alternative but the last,
    /// which falls straight through to `done` (spec.md §4.4).
    fn emit_alternation(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        children: &[PatternTree],
    ) -> Result<()> {
        let (last, rest) = match children.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        let done = builder.make_address();
        for child in rest {
            let next = builder.make_address();
            builder.emit_save_to(next);
            self.emit_node(builder, options, child)?;
            builder.emit_branch_to(done);
            builder.label(next);
        }
        self.emit_node(builder, options, last)?;
        builder.label(done);
        Ok(())
    }

    // -- quantification ------------------------------------------------------

    fn emit_quantification(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        amount: Amount,
        kind: QuantifierKind,
        child: &PatternTree,
    ) -> Result<()> {
        if amount.is_no_op() {
            return Ok(());
        }
        let resolved_kind = options.current().resolve_quantifier_kind(kind);
        let min_trips = amount.low;
        let extra_trips = amount.extra_trips();

        if !self.compile_options.disable_optimizations
            && resolved_kind != QuantifierKind::Reluctant
            && options.current().semantic_level == SemanticLevel::GraphemeCluster
            && min_trips <= MAX_STORABLE_TRIPS
            && extra_trips.map_or(true, |n| n <= MAX_STORABLE_TRIPS)
        {
            if let Some(body) = self.fast_quantify_body(builder, options, child) {
                let qkind = match resolved_kind {
                    QuantifierKind::Eager => QuantifyKind::Eager,
                    QuantifierKind::Possessive => QuantifyKind::Possessive,
                    QuantifierKind::Reluctant | QuantifierKind::DefaultFromOptions => {
                        unreachable!("reluctant/unresolved kinds excluded above")
                    }
                };
                let payload =
                    QuantifyPayload { kind: qkind, min_trips, extra_trips, body };
                trace_fast_quantify(&payload.body, payload.kind);
                builder.emit_quantify(payload);
                return Ok(());
            }
        }

        self.emit_general_quantify_loop(builder, options, min_trips, extra_trips, resolved_kind, child)
    }

    /// Recognizes the simple-body shapes spec.md §4.4 lists as eligible for
    /// the `quantify` super-instruction. Returns `None` to fall through to
    /// the general loop for anything else (including cased characters under
    /// case-insensitive matching, since `QuantifyBody` carries no
    /// case-insensitive bit).
    fn fast_quantify_body(
        &self,
        builder: &mut Builder,
        options: &MatchingOptionsStack,
        child: &PatternTree,
    ) -> Option<QuantifyBody> {
        let opts = options.current();
        match child.unwrap_for_fast_quantify() {
            PatternTree::Atom(Atom::Char(c)) if c.is_ascii() && !(opts.case_insensitive && is_cased(*c)) => {
                Some(QuantifyBody::AsciiChar(*c as u8))
            }
            PatternTree::QuotedLiteral(s) => {
                let mut chars = s.chars();
                let only = chars.next()?;
                if chars.next().is_some() || !only.is_ascii() {
                    return None;
                }
                if opts.case_insensitive && is_cased(only) {
                    return None;
                }
                Some(QuantifyBody::AsciiChar(only as u8))
            }
            PatternTree::Atom(Atom::Any) => Some(QuantifyBody::Any),
            PatternTree::Atom(Atom::AnyNonNewline) => Some(QuantifyBody::AnyNonNewline),
            PatternTree::Atom(Atom::Dot) => {
                if opts.dot_matches_newline {
                    Some(QuantifyBody::Any)
                } else {
                    Some(QuantifyBody::AnyNonNewline)
                }
            }
            PatternTree::Atom(Atom::CharacterClass(class)) => Some(QuantifyBody::BuiltinClass(*class)),
            PatternTree::CustomCharacterClass(ccc) if ccc.is_ascii_bitset_convertible() => {
                let bits = ascii_bitset_from_ranges(&ccc.ranges, ccc.inverted);
                Some(QuantifyBody::AsciiBitset(builder.intern_ascii_bitset(bits)))
            }
            _ => None,
        }
    }

    /// The general quantification loop of spec.md §4.4, used whenever the
    /// fast-quantify specialization doesn't apply.
    fn emit_general_quantify_loop(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        min_trips: u32,
        extra_trips: Option<u32>,
        kind: QuantifierKind,
        child: &PatternTree,
    ) -> Result<()> {
        let min_reg = (min_trips > 1).then(|| builder.alloc_int_reg_with_initial(min_trips));
        let extra_reg = match extra_trips {
            Some(n) if n > 0 => Some(builder.alloc_int_reg_with_initial(n)),
            _ => None,
        };
        if kind == QuantifierKind::Possessive {
            builder.push_empty_save_point();
        }

        let needs_progress_guard = extra_trips.is_none() && !child.guarantees_forward_progress();
        let start_pos_reg = needs_progress_guard.then(|| builder.alloc_pos_reg());

        let min_trips_control = builder.make_address();
        let loop_body = builder.make_address();
        let exit_policy = builder.make_address();
        let exit = builder.make_address();

        builder.label(min_trips_control);
        match min_trips {
            0 => builder.emit_branch_to(exit_policy),
            1 => {}
            _ => {
                let reg = min_reg.expect("min_trips > 1 always allocates min_reg");
                builder.emit_cond_branch_zero_else_decrement(exit_policy, reg);
            }
        }

        builder.label(loop_body);
        if let Some(pos_reg) = start_pos_reg {
            builder.emit_move_current_position(pos_reg);
        }
        self.emit_node(builder, options, child)?;
        if let Some(pos_reg) = start_pos_reg {
            builder.emit_cond_branch_same_position(exit, pos_reg);
        }
        if min_trips > 1 {
            builder.emit_branch_to(min_trips_control);
        }

        builder.label(exit_policy);
        match extra_trips {
            None => {}
            Some(0) => builder.emit_branch_to(exit),
            Some(_) => {
                let reg = extra_reg.expect("extra_trips > 0 always allocates extra_reg");
                builder.emit_cond_branch_zero_else_decrement(exit, reg);
            }
        }
        match kind {
            QuantifierKind::Eager => builder.emit_split_saving(loop_body, exit),
            QuantifierKind::Possessive => {
                builder.emit_clear();
                builder.emit_split_saving(loop_body, exit);
            }
            QuantifierKind::Reluctant => builder.emit_save_to(loop_body),
            QuantifierKind::DefaultFromOptions => {
                unreachable!("resolved against options before reaching the loop")
            }
        }

        builder.label(exit);
        Ok(())
    }

    // -- atoms -------------------------------------------------------------

    fn emit_atom(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        atom: &Atom,
    ) -> Result<()> {
        match atom {
            Atom::Char(c) => self.emit_char(builder, options.current(), *c),
            Atom::Scalar(s) => self.emit_scalar(builder, options.current(), *s),
            Atom::Any => self.emit_any(builder, options.current()),
            Atom::AnyNonNewline => self.emit_any_non_newline(builder, options.current()),
            Atom::Dot => {
                if options.current().dot_matches_newline {
                    self.emit_any(builder, options.current())
                } else {
                    self.emit_any_non_newline(builder, options.current())
                }
            }
            Atom::CharacterClass(class) => {
                let is_scalar = options.current().semantic_level == SemanticLevel::UnicodeScalar;
                // No option in this design governs ASCII-only builtin-class
                // matching (spec.md §4.3 lists the recognized options
                // non-exhaustively); see DESIGN.md.
                builder.emit_match_builtin(*class, false, is_scalar);
                Ok(())
            }
            Atom::Assertion(kind) => self.emit_assertion(builder, options.current(), *kind),
            Atom::Backreference(kind) => self.emit_backreference(builder, kind),
            Atom::SymbolicReference(id) => {
                builder.build_unresolved_reference(*id);
                Ok(())
            }
            Atom::ChangeMatchingOptions(handle) => {
                let changes = self.graph.option_sequence(*handle);
                builder.note_option_change_if_leading(|o| o.apply_all(changes));
                options.apply_to_current(changes);
                Ok(())
            }
            Atom::Unconverted(descriptor) => {
                Err(CompileError::Unsupported(UnsupportedFeature::Custom(descriptor.clone())))
            }
        }
    }

    fn emit_char(&self, builder: &mut Builder, opts: MatchingOptions, c: char) -> Result<()> {
        if opts.semantic_level == SemanticLevel::UnicodeScalar {
            let ci = opts.case_insensitive && is_cased(c);
            builder.emit_match_scalar(c, ci, false);
            return Ok(());
        }
        if opts.case_insensitive && is_cased(c) {
            if !self.compile_options.disable_optimizations && c.is_ascii() {
                builder.emit_match_scalar(c, true, true);
            } else {
                let element = builder.intern_char_element(c);
                builder.emit_match(element, true);
            }
            return Ok(());
        }
        if !self.compile_options.disable_optimizations && c.is_ascii() {
            builder.emit_match_scalar(c, false, true);
            return Ok(());
        }
        let element = builder.intern_char_element(c);
        builder.emit_match(element, false);
        Ok(())
    }

    fn emit_scalar(&self, builder: &mut Builder, opts: MatchingOptions, s: char) -> Result<()> {
        if opts.semantic_level == SemanticLevel::GraphemeCluster {
            return self.emit_char(builder, opts, s);
        }
        let ci = opts.case_insensitive && is_cased(s);
        builder.emit_match_scalar(s, ci, false);
        Ok(())
    }

    fn emit_any(&self, builder: &mut Builder, opts: MatchingOptions) -> Result<()> {
        if opts.semantic_level == SemanticLevel::GraphemeCluster {
            builder.emit_advance(1);
        } else {
            let f = builder.intern_consume_fn(ConsumeDescriptor::ScalarNext);
            builder.emit_consume_by(f);
        }
        Ok(())
    }

    fn emit_any_non_newline(&self, builder: &mut Builder, opts: MatchingOptions) -> Result<()> {
        let descriptor = if opts.semantic_level == SemanticLevel::GraphemeCluster {
            ConsumeDescriptor::AnyNonNewlineGrapheme
        } else {
            ConsumeDescriptor::AnyNonNewlineScalar
        };
        let f = builder.intern_consume_fn(descriptor);
        builder.emit_consume_by(f);
        Ok(())
    }

    fn emit_assertion(
        &self,
        builder: &mut Builder,
        opts: MatchingOptions,
        kind: crate::tree::AssertionKind,
    ) -> Result<()> {
        if kind == crate::tree::AssertionKind::ResetStartOfMatch {
            return Err(CompileError::Unsupported(UnsupportedFeature::ResetStartOfMatch));
        }
        let payload = inst::AssertionPayload {
            kind,
            anchors_match_newlines: opts.anchors_match_newlines,
            simple_unicode_boundaries: opts.uses_simple_unicode_boundaries,
            ascii_word: opts.uses_ascii_word,
            semantic_level_is_scalar: opts.semantic_level == SemanticLevel::UnicodeScalar,
        };
        let f = builder.intern_assertion(payload);
        builder.emit_assert_by(f);
        Ok(())
    }

    fn emit_backreference(&self, builder: &mut Builder, kind: &BackreferenceKind) -> Result<()> {
        match kind {
            BackreferenceKind::RecursesWholePattern => {
                Err(CompileError::Unsupported(UnsupportedFeature::RecursesWholePattern))
            }
            BackreferenceKind::Relative(_) => {
                Err(CompileError::Unsupported(UnsupportedFeature::RelativeBackreference))
            }
            BackreferenceKind::Absolute(idx) => {
                builder.emit_backreference(inst::CapReg(*idx));
                Ok(())
            }
            BackreferenceKind::Named(name) => {
                let idx = builder
                    .capture_index_for_name(name)
                    .ok_or_else(|| CompileError::UncapturedReference(CaptureRef::Named(name.clone())))?;
                builder.emit_backreference(inst::CapReg(idx));
                Ok(())
            }
        }
    }

    fn emit_matcher(&self, builder: &mut Builder, id: crate::tree::MatcherId) -> inst::ValueReg {
        let f = builder.intern_matcher_fn(id);
        let value = builder.alloc_value_reg();
        builder.emit_match_by(f, value);
        value
    }

    // -- character classes / literals ---------------------------------------

    fn emit_custom_character_class(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        ccc: &CustomCharacterClass,
    ) -> Result<()> {
        if ccc.is_plain_any() {
            return self.emit_atom(builder, options, &Atom::Dot);
        }
        let opts = options.current();
        let is_scalar = opts.semantic_level == SemanticLevel::UnicodeScalar;
        if !self.compile_options.disable_optimizations && ccc.is_ascii_bitset_convertible() {
            let bits = ascii_bitset_from_ranges(&ccc.ranges, ccc.inverted);
            let idx = builder.intern_ascii_bitset(bits);
            builder.emit_match_bitset(idx, is_scalar);
            return Ok(());
        }
        let descriptor = ConsumeDescriptor::CustomClass {
            ranges: ccc.ranges.iter().map(|&(a, b)| (a as u32, b as u32)).collect(),
            inverted: ccc.inverted,
            is_scalar,
        };
        let f = builder.intern_consume_fn(descriptor);
        builder.emit_consume_by(f);
        Ok(())
    }

    fn emit_quoted_literal(
        &self,
        builder: &mut Builder,
        options: &mut MatchingOptionsStack,
        s: &str,
    ) -> Result<()> {
        let opts = options.current();
        if !self.compile_options.disable_optimizations
            && opts.semantic_level == SemanticLevel::GraphemeCluster
            && !s.is_empty()
            && s.is_ascii()
            && !(opts.case_insensitive && s.chars().any(is_cased))
        {
            let chars: Vec<char> = s.chars().collect();
            let last = chars.len() - 1;
            for (i, c) in chars.into_iter().enumerate() {
                builder.emit_match_scalar(c, false, i == last);
            }
            return Ok(());
        }
        for c in s.chars() {
            self.emit_char(builder, opts, c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Inst;
    use crate::options::OptionChange;
    use crate::tree::{
        AssertionKind, CustomCharacterClass, GroupKind, OptionSequenceHandle, QuantifierKind,
        TransformId,
    };

    fn char_atom(c: char) -> PatternTree {
        PatternTree::Atom(Atom::Char(c))
    }

    fn compile_tree(root: PatternTree) -> Program {
        let graph = PatternGraph::new(root, Vec::new());
        compile(&graph, MatchingOptions::default(), CompileOptions::default()).unwrap()
    }

    fn decoded(program: &Program) -> Vec<Inst> {
        program.words.iter().map(|w| inst::decode(*w)).collect()
    }

    /// E1: `a` (ASCII, grapheme mode, default options).
    #[test]
    fn single_ascii_char_is_scalar_match_with_boundary_check() {
        let program = compile_tree(char_atom('a'));
        let insts = decoded(&program);
        assert_eq!(
            insts,
            vec![
                Inst::BeginCapture(inst::CapReg(0)),
                Inst::MatchScalar { scalar: 'a', case_insensitive: false, boundary_check: true },
                Inst::EndCapture(inst::CapReg(0)),
                Inst::Accept,
            ]
        );
    }

    /// E2: `(?i)A` in grapheme mode.
    #[test]
    fn leading_case_insensitive_option_change_becomes_initial_options() {
        let mut option_sequences = Vec::new();
        option_sequences.push(vec![OptionChange::CaseInsensitive(true)]);
        let root = PatternTree::Concatenation(vec![
            PatternTree::Atom(Atom::ChangeMatchingOptions(OptionSequenceHandle(0))),
            char_atom('A'),
        ]);
        let graph = PatternGraph::new(root, option_sequences);
        let program =
            compile(&graph, MatchingOptions::default(), CompileOptions::default()).unwrap();
        assert!(program.initial_options.case_insensitive);
        let insts = decoded(&program);
        assert!(insts.contains(&Inst::MatchScalar {
            scalar: 'A',
            case_insensitive: true,
            boundary_check: true,
        }));
    }

    /// E3: `a|b`.
    #[test]
    fn alternation_emits_one_save_and_one_branch() {
        let root = PatternTree::OrderedChoice(vec![char_atom('a'), char_atom('b')]);
        let program = compile_tree(root);
        let insts = decoded(&program);
        let saves = insts.iter().filter(|i| matches!(i, Inst::Save(_))).count();
        let branches = insts.iter().filter(|i| matches!(i, Inst::Branch(_))).count();
        assert_eq!(saves, 1);
        assert_eq!(branches, 1);
        assert!(insts.contains(&Inst::MatchScalar {
            scalar: 'a',
            case_insensitive: false,
            boundary_check: true
        }));
        assert!(insts.contains(&Inst::MatchScalar {
            scalar: 'b',
            case_insensitive: false,
            boundary_check: true
        }));
    }

    /// E4: `a*` (eager) fast-quantifies to a single `quantify` instruction.
    #[test]
    fn eager_star_over_ascii_char_is_single_quantify_instruction() {
        let root = PatternTree::Quantification {
            amount: Amount::new(0, None),
            kind: QuantifierKind::Eager,
            child: Box::new(char_atom('a')),
        };
        let program = compile_tree(root);
        let insts = decoded(&program);
        let quantifies: Vec<&Inst> = insts.iter().filter(|i| matches!(i, Inst::Quantify(_))).collect();
        assert_eq!(quantifies.len(), 1);
        match quantifies[0] {
            Inst::Quantify(p) => {
                assert_eq!(p.kind, QuantifyKind::Eager);
                assert_eq!(p.min_trips, 0);
                assert_eq!(p.extra_trips, None);
                assert_eq!(p.body, QuantifyBody::AsciiChar(b'a'));
            }
            _ => unreachable!(),
        }
        assert!(!insts.iter().any(|i| matches!(i, Inst::SplitSaving { .. })));
    }

    /// E5: `(?>a|b)` wraps the alternation in the atomic scaffold.
    #[test]
    fn atomic_group_wraps_child_with_commit_scaffold() {
        let root = PatternTree::NonCapturingGroup {
            kind: GroupKind::AtomicNonCapturing,
            child: Box::new(PatternTree::OrderedChoice(vec![char_atom('a'), char_atom('b')])),
        };
        let program = compile_tree(root);
        let insts = decoded(&program);
        let save_addresses = insts.iter().filter(|i| matches!(i, Inst::SaveAddress(_))).count();
        let clears = insts.iter().filter(|i| matches!(i, Inst::Clear)).count();
        let clear_throughs = insts.iter().filter(|i| matches!(i, Inst::ClearThrough(_))).count();
        let fails = insts.iter().filter(|i| matches!(i, Inst::Fail)).count();
        assert_eq!(save_addresses, 1);
        assert_eq!(clears, 1);
        assert_eq!(clear_throughs, 1);
        assert_eq!(fails, 2);
    }

    /// E6: `(.*?);` is a reluctant general loop, no fast-quantify.
    #[test]
    fn reluctant_quantifier_never_uses_fast_quantify() {
        let root = PatternTree::Concatenation(vec![
            PatternTree::Quantification {
                amount: Amount::new(0, None),
                kind: QuantifierKind::Reluctant,
                child: Box::new(PatternTree::Atom(Atom::Dot)),
            },
            char_atom(';'),
        ]);
        let program = compile_tree(root);
        let insts = decoded(&program);
        assert!(!insts.iter().any(|i| matches!(i, Inst::Quantify(_))));
        // Reluctant exit policy is `save(loopBody)`.
        assert!(insts.iter().any(|i| matches!(i, Inst::Save(_))));
    }

    #[test]
    fn possessive_quantifier_emits_ratchet_and_exit_clear() {
        let root = PatternTree::Quantification {
            amount: Amount::new(0, None),
            kind: QuantifierKind::Possessive,
            // A non-fast-quantify-eligible body (a capture) forces the general loop.
            child: Box::new(PatternTree::Capture {
                name: None,
                ref_id: None,
                child: Box::new(char_atom('a')),
                transform: None,
            }),
        };
        let program = compile_tree(root);
        let insts = decoded(&program);
        assert!(insts.iter().any(|i| matches!(i, Inst::SaveAddress(_))));
        assert!(insts.iter().any(|i| matches!(i, Inst::Clear)));
        assert!(insts.iter().any(|i| matches!(i, Inst::SplitSaving { .. })));
    }

    #[test]
    fn unbounded_quantifier_over_non_progressing_child_gets_position_guard() {
        let root = PatternTree::Quantification {
            amount: Amount::new(0, None),
            kind: QuantifierKind::Eager,
            child: Box::new(PatternTree::NonCapturingGroup {
                kind: GroupKind::Lookahead,
                child: Box::new(char_atom('a')),
            }),
        };
        let program = compile_tree(root);
        let insts = decoded(&program);
        assert!(insts.iter().any(|i| matches!(i, Inst::MoveCurrentPosition(_))));
        assert!(insts.iter().any(|i| matches!(i, Inst::CondBranchSamePosition(..))));
    }

    #[test]
    fn zero_trip_quantifier_compiles_to_no_body_instructions() {
        let root = PatternTree::Quantification {
            amount: Amount::new(0, Some(0)),
            kind: QuantifierKind::Eager,
            child: Box::new(char_atom('a')),
        };
        let program = compile_tree(root);
        let insts = decoded(&program);
        // Just the root capture scaffold, nothing from the quantifier body.
        assert_eq!(
            insts,
            vec![
                Inst::BeginCapture(inst::CapReg(0)),
                Inst::EndCapture(inst::CapReg(0)),
                Inst::Accept,
            ]
        );
    }

    #[test]
    fn capture_indexing_matches_opening_order() {
        let root = PatternTree::Concatenation(vec![
            PatternTree::Capture {
                name: Some("first".into()),
                ref_id: None,
                child: Box::new(char_atom('a')),
                transform: None,
            },
            PatternTree::Capture {
                name: None,
                ref_id: None,
                child: Box::new(char_atom('b')),
                transform: None,
            },
        ]);
        let program = compile_tree(root);
        assert_eq!(program.captures.len(), 3);
        assert_eq!(program.captures[1].name.as_deref(), Some("first"));
        assert_eq!(program.captures[2].name, None);
    }

    #[test]
    fn option_scope_does_not_leak_past_group() {
        let mut option_sequences = Vec::new();
        option_sequences.push(vec![OptionChange::CaseInsensitive(true)]);
        let root = PatternTree::Concatenation(vec![
            PatternTree::NonCapturingGroup {
                kind: GroupKind::ChangeMatchingOptions(OptionSequenceHandle(0)),
                child: Box::new(char_atom('a')),
            },
            char_atom('b'),
        ]);
        let graph = PatternGraph::new(root, option_sequences);
        let program =
            compile(&graph, MatchingOptions::default(), CompileOptions::default()).unwrap();
        let insts = decoded(&program);
        assert!(insts.contains(&Inst::MatchScalar {
            scalar: 'a',
            case_insensitive: true,
            boundary_check: true
        }));
        // The group's scope closes before 'b', so the change does not leak
        // to its sibling even though (being leading) it did promote to
        // initial_options (spec.md §4.4).
        assert!(insts.contains(&Inst::MatchScalar {
            scalar: 'b',
            case_insensitive: false,
            boundary_check: true
        }));
        assert!(program.initial_options.case_insensitive);
    }

    #[test]
    fn symbolic_reference_resolves_to_its_captures_index() {
        let root = PatternTree::Concatenation(vec![
            PatternTree::Capture {
                name: None,
                ref_id: Some(42),
                child: Box::new(char_atom('a')),
                transform: None,
            },
            PatternTree::Atom(Atom::SymbolicReference(42)),
        ]);
        let program = compile_tree(root);
        let insts = decoded(&program);
        assert!(insts.contains(&Inst::Backreference(inst::CapReg(1))));
    }

    #[test]
    fn missing_symbolic_reference_is_uncaptured_reference_error() {
        let root = PatternTree::Atom(Atom::SymbolicReference(99));
        let graph = PatternGraph::new(root, Vec::new());
        let err = compile(&graph, MatchingOptions::default(), CompileOptions::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::UncapturedReference(CaptureRef::Symbolic(99))));
    }

    #[test]
    fn unsupported_backward_lookbehind_fails_compilation() {
        let root = PatternTree::NonCapturingGroup {
            kind: GroupKind::Lookbehind,
            child: Box::new(char_atom('a')),
        };
        let graph = PatternGraph::new(root, Vec::new());
        let err = compile(&graph, MatchingOptions::default(), CompileOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::Unsupported(UnsupportedFeature::Lookbehind)
        ));
    }

    #[test]
    fn reset_start_of_match_assertion_is_unsupported() {
        let root = PatternTree::Atom(Atom::Assertion(AssertionKind::ResetStartOfMatch));
        let graph = PatternGraph::new(root, Vec::new());
        let err = compile(&graph, MatchingOptions::default(), CompileOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::Unsupported(UnsupportedFeature::ResetStartOfMatch)
        ));
    }

    #[test]
    fn ascii_custom_character_class_uses_bitset_instruction() {
        let ccc = CustomCharacterClass { ranges: vec![('a', 'z')], members: vec![], inverted: false };
        let root = PatternTree::CustomCharacterClass(ccc);
        let program = compile_tree(root);
        let insts = decoded(&program);
        assert!(insts.iter().any(|i| matches!(i, Inst::MatchBitset { .. })));
    }

    #[test]
    fn non_ascii_custom_character_class_falls_back_to_consumer() {
        let ccc =
            CustomCharacterClass { ranges: vec![('a', '\u{1F600}')], members: vec![], inverted: false };
        let root = PatternTree::CustomCharacterClass(ccc);
        let program = compile_tree(root);
        let insts = decoded(&program);
        assert!(insts.iter().any(|i| matches!(i, Inst::ConsumeBy(_))));
    }

    #[test]
    fn quoted_literal_elides_boundary_check_except_on_last_scalar() {
        let root = PatternTree::QuotedLiteral("cat".to_string());
        let program = compile_tree(root);
        let insts = decoded(&program);
        let scalars: Vec<&Inst> = insts.iter().filter(|i| matches!(i, Inst::MatchScalar { .. })).collect();
        assert_eq!(scalars.len(), 3);
        for (i, inst) in scalars.iter().enumerate() {
            match inst {
                Inst::MatchScalar { boundary_check, .. } => {
                    assert_eq!(*boundary_check, i == scalars.len() - 1);
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn case_insensitive_quoted_literal_does_not_use_the_ascii_fast_path() {
        let root = PatternTree::QuotedLiteral("Cat".to_string());
        let graph = PatternGraph::new(root, Vec::new());
        let mut opts = MatchingOptions::default();
        opts.case_insensitive = true;
        let program = compile(&graph, opts, CompileOptions::default()).unwrap();
        let insts = decoded(&program);
        // Every cased scalar in the literal must still honor case-insensitivity.
        assert!(insts.iter().any(|i| matches!(
            i,
            Inst::MatchScalar { scalar: 'C', case_insensitive: true, .. }
        )));
        assert!(!insts.iter().any(|i| matches!(
            i,
            Inst::MatchScalar { case_insensitive: false, .. }
        )));
    }

    #[test]
    fn matcher_value_becomes_captured_value_with_transform() {
        let root = PatternTree::Capture {
            name: None,
            ref_id: None,
            child: Box::new(PatternTree::Matcher(crate::tree::MatcherId(3))),
            transform: Some(TransformId(5)),
        };
        let program = compile_tree(root);
        let insts = decoded(&program);
        assert!(insts.iter().any(|i| matches!(i, Inst::MatchBy { .. })));
        assert!(insts.iter().any(|i| matches!(i, Inst::CaptureValue { .. })));
        assert!(insts.iter().any(|i| matches!(i, Inst::TransformCapture { .. })));
    }

    #[test]
    fn named_backreference_with_no_such_capture_is_uncaptured() {
        let root = PatternTree::Atom(Atom::Backreference(BackreferenceKind::Named("x".into())));
        let graph = PatternGraph::new(root, Vec::new());
        let err = compile(&graph, MatchingOptions::default(), CompileOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UncapturedReference(CaptureRef::Named(ref s)) if s == "x"
        ));
    }

    #[test]
    fn size_limit_exceeded_is_reported() {
        let mut children = Vec::new();
        for _ in 0..50 {
            children.push(char_atom('a'));
        }
        let graph = PatternGraph::new(PatternTree::Concatenation(children), Vec::new());
        let tiny = CompileOptions { disable_optimizations: false, size_limit: 3 };
        let err = compile(&graph, MatchingOptions::default(), tiny).unwrap_err();
        assert!(matches!(err, CompileError::SizeLimitExceeded { limit: 3, .. }));
    }
}
