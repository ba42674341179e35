// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The core compiler backend of a regular-expression engine: lowering an
//! already-parsed pattern tree into linear bytecode for a backtracking
//! matching VM.
//!
//! This crate owns everything between "the parser handed me a tree" and "the
//! VM got a program": instruction encoding, register allocation, address
//! fixups, capture numbering, matching-options scoping, and the lowering
//! passes themselves, including the fast-quantify specialization and the
//! ASCII/boundary-check optimizations. It does not parse surface syntax and
//! does not execute the resulting bytecode; both are external collaborators
//! that only need to agree with this crate's data model.
//!
//! ```
//! use regex_backend::{compile, CompileOptions, MatchingOptions};
//! use regex_backend::tree::{Atom, PatternGraph, PatternTree};
//!
//! let tree = PatternTree::Atom(Atom::Char('a'));
//! let graph = PatternGraph::new(tree, Vec::new());
//! let program = compile(&graph, MatchingOptions::default(), CompileOptions::default()).unwrap();
//! assert!(!program.words.is_empty());
//! ```

mod builder;
mod compile;
mod error;
mod inst;
mod options;
pub mod tree;

pub use builder::{
    Builder, CaptureInfo, ConsumeDescriptor, Program, ProgramStats, RegisterCounts, Token,
};
pub use compile::{compile, CompileOptions, DEFAULT_SIZE_LIMIT};
pub use error::{CaptureRef, CompileError, Result, UnsupportedFeature};
pub use inst::{
    decode, encode, AddrSlot, Addr, AssertionFnIdx, AssertionPayload, BoolReg, CapReg,
    ConsumeFnIdx, ElementIdx, Inst, IntReg, MatcherFnIdx, PosReg, QuantifyBody, QuantifyKind,
    QuantifyPayload, SequenceIdx, StringIdx, TransformFnIdx, ValueReg, Word,
};
pub use options::{
    MatchingOptions, MatchingOptionsStack, OptionChange, OptionSequence, OptionsScopeGuard,
    SemanticLevel,
};
