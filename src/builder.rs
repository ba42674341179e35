// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The program builder: appends instructions, allocates registers, manages
//! forward labels via tokens and a fixup table, and assembles the final
//! program (spec.md §4.2).

use std::collections::HashMap;

use crate::error::{CaptureRef, CompileError, Result};
use crate::inst::{self, AddrSlot, AssertionPayload, Inst, Word};
use crate::options::MatchingOptions;

/// A forward label allocated by `Builder::make_address`. Opaque outside
/// this module: the only thing callers do with it is pass it to `label`
/// (to bind it) and `fixup`/`fixup2` (to request a patch once bound).
/// Invalid after `assemble` — the builder that created it has been
/// consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token(usize);

#[derive(Clone, Copy, Debug)]
enum TokenState {
    Pending,
    Resolved(u32),
}

/// One capture's metadata, in the order captures were opened (capture 0 is
/// always the implicit whole match).
#[derive(Clone, Debug)]
pub struct CaptureInfo {
    pub name: Option<String>,
}

/// Per-kind register counts, exposed to the VM so it can size its register
/// file (spec.md §6, "Register counts").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterCounts {
    pub ints: u32,
    pub bools: u32,
    pub positions: u32,
    pub values: u32,
    pub captures: u32,
}

/// A deduplicating vector: repeated inserts of an equal value return the
/// same dense index. Backs every intern table on the builder.
#[derive(Clone, Debug)]
struct InternTable<T> {
    values: Vec<T>,
    index: HashMap<T, u32>,
}

impl<T: Clone + Eq + std::hash::Hash> InternTable<T> {
    fn new() -> Self {
        InternTable { values: Vec::new(), index: HashMap::new() }
    }

    fn intern(&mut self, value: T) -> u32 {
        if let Some(&idx) = self.index.get(&value) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.index.insert(value.clone(), idx);
        self.values.push(value);
        idx
    }

    fn len(&self) -> u32 {
        self.values.len() as u32
    }
}

/// What a synthesized `consumeBy` closure does. The parser's own matcher
/// and transform functions are opaque handles (`MatcherId`/`TransformId`)
/// interned by value below; consumers are instead built by the code
/// generator itself (e.g. "advance past one non-newline grapheme"), so they
/// are described structurally here and deduped the same way.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConsumeDescriptor {
    ScalarNext,
    AnyNonNewlineGrapheme,
    AnyNonNewlineScalar,
    CustomClass { ranges: Vec<(u32, u32)>, inverted: bool, is_scalar: bool },
}

/// The immutable, assembled program artifact. Once produced by
/// `Builder::assemble`, this is shared freely and concurrently among
/// matching engines (spec.md §5).
pub struct Program {
    pub words: Vec<Word>,
    pub register_counts: RegisterCounts,
    pub captures: Vec<CaptureInfo>,
    pub referenced_capture_offsets: HashMap<u32, u32>,
    /// Initial values for integer registers used as trip counters by the
    /// general quantification loop (spec.md §4.4). §4.1's opcode set has no
    /// load-immediate instruction, so a counting register's starting value
    /// travels as program metadata instead of as an emitted instruction; the
    /// VM is expected to load it whenever that register's counting loop is
    /// (re-)entered. See DESIGN.md's note on counter initialization.
    pub int_register_initial_values: HashMap<u32, u32>,
    pub initial_options: MatchingOptions,
    pub element_table_len: u32,
    pub sequence_table_len: u32,
    pub string_table_len: u32,
    pub consume_fn_table: Vec<ConsumeDescriptor>,
    pub assertion_fn_table: Vec<AssertionPayload>,
    pub transform_fn_count: u32,
    pub matcher_fn_count: u32,
}

/// Summary of a program's register and intern-table sizes, the natural
/// complement to the downstream interface of spec.md §6 ("Register
/// counts"); useful for a VM sizing its register file and tables up front
/// (SPEC_FULL.md §C).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgramStats {
    pub registers: RegisterCounts,
    pub elements: u32,
    pub sequences: u32,
    pub strings: u32,
    pub consume_fns: u32,
    pub assertion_fns: u32,
    pub transform_fns: u32,
    pub matcher_fns: u32,
}

impl Program {
    pub fn stats(&self) -> ProgramStats {
        ProgramStats {
            registers: self.register_counts,
            elements: self.element_table_len,
            sequences: self.sequence_table_len,
            strings: self.string_table_len,
            consume_fns: self.consume_fn_table.len() as u32,
            assertion_fns: self.assertion_fn_table.len() as u32,
            transform_fns: self.transform_fn_count,
            matcher_fns: self.matcher_fn_count,
        }
    }

    /// Human-readable disassembly: one line per instruction, with its
    /// address and decoded form. Pure diagnostics — no behavior depends on
    /// this (SPEC_FULL.md §C).
    pub fn debug_dump(&self) -> String {
        let mut out = String::new();
        for (addr, word) in self.words.iter().enumerate() {
            let inst = inst::decode(*word);
            out.push_str(&format!("{addr:>4}: {inst:?}\n"));
        }
        out
    }
}

/// Appends instructions, allocates registers, manages forward labels, and
/// produces a `Program`. Purely sequential and single-threaded (spec.md
/// §5): a builder is owned exclusively by the code generator compiling one
/// regex, and is consumed by `assemble`.
pub struct Builder {
    insts: Vec<Inst>,
    /// `token_state[i]` tracks whether `Token(i)` has been bound to a
    /// concrete address yet.
    token_state: Vec<TokenState>,
    /// (instruction index, token, which address slot) to patch at assemble.
    fixups: Vec<(usize, Token, AddrSlot)>,

    register_counts: RegisterCounts,
    captures: Vec<CaptureInfo>,
    referenced_capture_offsets: HashMap<u32, u32>,
    pending_symbolic_refs: Vec<(u32, usize)>,
    int_register_initial_values: HashMap<u32, u32>,

    elements: InternTable<ElementKey>,
    sequences: InternTable<SequenceKey>,
    strings: InternTable<String>,
    consume_fns: InternTable<ConsumeDescriptor>,
    assertion_fns: InternTable<AssertionPayload>,
    /// Keyed by the parser's opaque `TransformId`/`MatcherId`, so repeated
    /// uses of the same parser-side function dedupe to one slot.
    transform_fns: InternTable<u32>,
    matcher_fns: InternTable<u32>,

    /// The program's initial options (spec.md §4.3): option changes emitted
    /// before the first matchable atom update this directly.
    initial_options: MatchingOptions,
    has_emitted_matchable_atom: bool,

    /// Token lazily bound to a trailing `fail` sink, materialized once on
    /// first use by `push_empty_save_point` (spec.md §4.2, §9).
    fail_sink: Option<Token>,
}

/// A deduplication key for interned elements (single characters compared
/// for case-sensitive matching).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ElementKey {
    Char(char),
    AsciiBitset(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SequenceKey {
    Ranges(Vec<(u32, u32)>),
}

impl Builder {
    pub fn new(initial_options: MatchingOptions) -> Builder {
        Builder {
            insts: Vec::new(),
            token_state: Vec::new(),
            fixups: Vec::new(),
            register_counts: RegisterCounts::default(),
            // Capture 0 is always the implicit whole match.
            captures: vec![CaptureInfo { name: None }],
            referenced_capture_offsets: HashMap::new(),
            pending_symbolic_refs: Vec::new(),
            int_register_initial_values: HashMap::new(),
            elements: InternTable::new(),
            sequences: InternTable::new(),
            strings: InternTable::new(),
            consume_fns: InternTable::new(),
            assertion_fns: InternTable::new(),
            transform_fns: InternTable::new(),
            matcher_fns: InternTable::new(),
            initial_options,
            has_emitted_matchable_atom: false,
            fail_sink: None,
        }
    }

    // -- registers ---------------------------------------------------

    pub fn alloc_int_reg(&mut self) -> inst::IntReg {
        let r = inst::IntReg(self.register_counts.ints);
        self.register_counts.ints += 1;
        r
    }

    pub fn alloc_bool_reg(&mut self) -> inst::BoolReg {
        let r = inst::BoolReg(self.register_counts.bools);
        self.register_counts.bools += 1;
        r
    }

    pub fn alloc_pos_reg(&mut self) -> inst::PosReg {
        let r = inst::PosReg(self.register_counts.positions);
        self.register_counts.positions += 1;
        r
    }

    /// Allocates an integer register pre-seeded with `initial_value`, for
    /// the general quantification loop's trip counters (spec.md §4.4). The
    /// value is carried as program metadata rather than emitted as an
    /// instruction; see `Program::int_register_initial_values`.
    pub fn alloc_int_reg_with_initial(&mut self, initial_value: u32) -> inst::IntReg {
        let r = self.alloc_int_reg();
        self.int_register_initial_values.insert(r.0, initial_value);
        r
    }

    pub fn alloc_value_reg(&mut self) -> inst::ValueReg {
        let r = inst::ValueReg(self.register_counts.values);
        self.register_counts.values += 1;
        r
    }

    /// Allocates a new capture register and records its metadata. The
    /// resulting index is also this capture's number (spec.md §3: numbering
    /// is by opening order).
    pub fn alloc_capture(&mut self, name: Option<String>, ref_id: Option<u32>) -> inst::CapReg {
        let idx = self.captures.len() as u32;
        self.captures.push(CaptureInfo { name });
        self.register_counts.captures = self.captures.len() as u32;
        if let Some(id) = ref_id {
            self.referenced_capture_offsets.insert(id, idx);
        }
        inst::CapReg(idx)
    }

    /// Capture 0, the implicit whole-match capture `Builder::new` already
    /// allocated — the root of every tree is wrapped in it.
    pub fn whole_match_capture(&self) -> inst::CapReg {
        inst::CapReg(0)
    }

    pub fn capture_index_for_name(&self, name: &str) -> Option<u32> {
        self.captures
            .iter()
            .position(|c| c.name.as_deref() == Some(name))
            .map(|i| i as u32)
    }

    // -- intern tables -------------------------------------------------

    pub fn intern_char_element(&mut self, c: char) -> inst::ElementIdx {
        inst::ElementIdx(self.elements.intern(ElementKey::Char(c)))
    }

    pub fn intern_ascii_bitset(&mut self, bits: [u8; 16]) -> inst::ElementIdx {
        inst::ElementIdx(self.elements.intern(ElementKey::AsciiBitset(bits.to_vec())))
    }

    pub fn intern_ranges(&mut self, ranges: Vec<(char, char)>) -> inst::SequenceIdx {
        let key = ranges.into_iter().map(|(a, b)| (a as u32, b as u32)).collect();
        inst::SequenceIdx(self.sequences.intern(SequenceKey::Ranges(key)))
    }

    pub fn intern_string(&mut self, s: String) -> inst::StringIdx {
        inst::StringIdx(self.strings.intern(s))
    }

    pub fn intern_consume_fn(&mut self, descriptor: ConsumeDescriptor) -> inst::ConsumeFnIdx {
        inst::ConsumeFnIdx(self.consume_fns.intern(descriptor))
    }

    pub fn intern_assertion(&mut self, payload: AssertionPayload) -> inst::AssertionFnIdx {
        inst::AssertionFnIdx(self.assertion_fns.intern(payload))
    }

    pub fn intern_transform_fn(&mut self, id: crate::tree::TransformId) -> inst::TransformFnIdx {
        inst::TransformFnIdx(self.transform_fns.intern(id.0))
    }

    pub fn intern_matcher_fn(&mut self, id: crate::tree::MatcherId) -> inst::MatcherFnIdx {
        inst::MatcherFnIdx(self.matcher_fns.intern(id.0))
    }

    // -- options ---------------------------------------------------------

    /// Applies an option change to the program's `initialOptions` iff no
    /// matchable atom has been emitted yet (spec.md §3, §4.3).
    pub fn note_option_change_if_leading(&mut self, apply: impl FnOnce(&mut MatchingOptions)) {
        if !self.has_emitted_matchable_atom {
            apply(&mut self.initial_options);
        }
    }

    fn mark_matchable_atom_emitted(&mut self) {
        self.has_emitted_matchable_atom = true;
    }

    // -- emission ----------------------------------------------------

    pub fn here(&self) -> u32 {
        self.insts.len() as u32
    }

    fn push(&mut self, inst: Inst) -> usize {
        let idx = self.insts.len();
        self.insts.push(inst);
        idx
    }

    /// Allocates a new, as-yet-unbound forward label.
    pub fn make_address(&mut self) -> Token {
        let idx = self.token_state.len();
        self.token_state.push(TokenState::Pending);
        Token(idx)
    }

    /// Binds `token` to the address of the next instruction to be emitted.
    pub fn label(&mut self, token: Token) {
        self.token_state[token.0] = TokenState::Resolved(self.here());
    }

    /// Records that the most recently emitted instruction's primary address
    /// payload must be patched with `token`'s resolved address at assemble.
    pub fn fixup(&mut self, token: Token) {
        let idx = self.insts.len() - 1;
        self.fixups.push((idx, token, AddrSlot::Primary));
    }

    /// Like `fixup`, but for two-address instructions (`splitSaving`):
    /// patches the primary slot with `to` and the secondary with `saving`.
    pub fn fixup2(&mut self, to: Token, saving: Token) {
        let idx = self.insts.len() - 1;
        self.fixups.push((idx, to, AddrSlot::Primary));
        self.fixups.push((idx, saving, AddrSlot::Secondary));
    }

    // -- per-opcode emit helpers --------------------------------------

    pub fn emit_branch(&mut self, addr: u32) {
        self.push(Inst::Branch(addr));
    }

    /// Emits a `branch` to a not-yet-resolved token and registers the
    /// fixup in one call — the common case for every forward jump.
    pub fn emit_branch_to(&mut self, token: Token) {
        self.push(Inst::Branch(0));
        self.fixup(token);
    }

    pub fn emit_cond_branch_zero_else_decrement(&mut self, token: Token, reg: inst::IntReg) {
        self.push(Inst::CondBranchZeroElseDecrement(0, reg));
        self.fixup(token);
    }

    pub fn emit_cond_branch_same_position(&mut self, token: Token, reg: inst::PosReg) {
        self.push(Inst::CondBranchSamePosition(0, reg));
        self.fixup(token);
    }

    pub fn emit_nop(&mut self) {
        self.push(Inst::Nop);
    }

    pub fn emit_accept(&mut self) {
        self.push(Inst::Accept);
    }

    pub fn emit_fail(&mut self) {
        self.push(Inst::Fail);
    }

    pub fn emit_save_to(&mut self, token: Token) {
        self.push(Inst::Save(0));
        self.fixup(token);
    }

    pub fn emit_save_address_to(&mut self, token: Token) {
        self.push(Inst::SaveAddress(0));
        self.fixup(token);
    }

    pub fn emit_clear(&mut self) {
        self.push(Inst::Clear);
    }

    pub fn emit_clear_through(&mut self, token: Token) {
        self.push(Inst::ClearThrough(0));
        self.fixup(token);
    }

    pub fn emit_split_saving(&mut self, to: Token, saving: Token) {
        self.push(Inst::SplitSaving { to: 0, saving: 0 });
        self.fixup2(to, saving);
    }

    pub fn emit_move_current_position(&mut self, reg: inst::PosReg) {
        self.push(Inst::MoveCurrentPosition(reg));
    }

    pub fn emit_advance(&mut self, n: u32) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::Advance(n));
    }

    pub fn emit_match(&mut self, element: inst::ElementIdx, case_insensitive: bool) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::Match { element, case_insensitive });
    }

    pub fn emit_match_scalar(&mut self, scalar: char, case_insensitive: bool, boundary_check: bool) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::MatchScalar { scalar, case_insensitive, boundary_check });
    }

    pub fn emit_match_bitset(&mut self, bitset: inst::ElementIdx, is_scalar: bool) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::MatchBitset { bitset, is_scalar });
    }

    pub fn emit_match_builtin(
        &mut self,
        class: crate::tree::BuiltinClass,
        strict_ascii: bool,
        is_scalar: bool,
    ) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::MatchBuiltin { class, strict_ascii, is_scalar });
    }

    pub fn emit_consume_by(&mut self, f: inst::ConsumeFnIdx) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::ConsumeBy(f));
    }

    pub fn emit_assert_by(&mut self, f: inst::AssertionFnIdx) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::AssertBy(f));
    }

    pub fn emit_match_by(&mut self, matcher: inst::MatcherFnIdx, value: inst::ValueReg) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::MatchBy { matcher, value });
    }

    pub fn emit_begin_capture(&mut self, reg: inst::CapReg) {
        self.push(Inst::BeginCapture(reg));
    }

    pub fn emit_end_capture(&mut self, reg: inst::CapReg) {
        self.push(Inst::EndCapture(reg));
    }

    pub fn emit_capture_value(&mut self, value: inst::ValueReg, capture: inst::CapReg) {
        self.push(Inst::CaptureValue { value, capture });
    }

    pub fn emit_transform_capture(&mut self, capture: inst::CapReg, transform: inst::TransformFnIdx) {
        self.push(Inst::TransformCapture { capture, transform });
    }

    /// Emits a `backreference` whose capture index is already known.
    pub fn emit_backreference(&mut self, capture: inst::CapReg) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::Backreference(capture));
    }

    /// Emits a `backreference` to a capture that hasn't necessarily been
    /// numbered yet, identified only by its pre-numbering symbolic id.
    /// Resolved against `referenced_capture_offsets` at `assemble`
    /// (spec.md §4.2).
    pub fn build_unresolved_reference(&mut self, id: u32) {
        self.mark_matchable_atom_emitted();
        let idx = self.push(Inst::Backreference(inst::CapReg(0)));
        self.pending_symbolic_refs.push((id, idx));
    }

    pub fn emit_quantify(&mut self, payload: inst::QuantifyPayload) {
        self.mark_matchable_atom_emitted();
        self.push(Inst::Quantify(payload));
    }

    /// Emits a `saveAddress` pointing at a lazily-materialized terminal
    /// `fail` instruction, giving a possessive quantifier's exit policy a
    /// ratchet point to `clear` on every iteration (spec.md §4.2, §9). The
    /// sink itself is appended once, by `assemble`, no matter how many
    /// times this is called.
    pub fn push_empty_save_point(&mut self) {
        let sink = match self.fail_sink {
            Some(token) => token,
            None => {
                let token = self.make_address();
                self.fail_sink = Some(token);
                token
            }
        };
        self.emit_save_address_to(sink);
    }

    // -- assembly ------------------------------------------------------

    /// Resolves every fixup and symbolic reference, appends the deferred
    /// `fail` sink if one was requested, and returns the immutable program.
    pub fn assemble(mut self) -> Result<Program> {
        if let Some(sink) = self.fail_sink {
            if matches!(self.token_state[sink.0], TokenState::Pending) {
                self.label(sink);
                self.emit_fail();
            }
        }

        for (id, inst_idx) in &self.pending_symbolic_refs {
            let capture_idx = *self.referenced_capture_offsets.get(id).ok_or_else(|| {
                CompileError::UncapturedReference(CaptureRef::Symbolic(*id))
            })?;
            self.insts[*inst_idx] = Inst::Backreference(inst::CapReg(capture_idx));
        }

        for (inst_idx, token, slot) in &self.fixups {
            let addr = match self.token_state[token.0] {
                TokenState::Resolved(addr) => addr,
                TokenState::Pending => {
                    return Err(CompileError::Unreachable(format!(
                        "address token {:?} was never bound before assemble",
                        token
                    )))
                }
            };
            inst::patch_addr(&mut self.insts[*inst_idx], *slot, addr);
        }

        let words = self.insts.iter().map(inst::encode).collect();

        Ok(Program {
            words,
            register_counts: self.register_counts,
            captures: self.captures,
            referenced_capture_offsets: self.referenced_capture_offsets,
            int_register_initial_values: self.int_register_initial_values,
            initial_options: self.initial_options,
            element_table_len: self.elements.len(),
            sequence_table_len: self.sequences.len(),
            string_table_len: self.strings.len(),
            consume_fn_table: self.consume_fns.values.clone(),
            assertion_fn_table: self.assertion_fns.values.clone(),
            transform_fn_count: self.transform_fns.len(),
            matcher_fn_count: self.matcher_fns.len(),
        })
    }
}
