//! Shared, dependency-light primitives used across the VersaCompile workspace.
//!
//! This crate holds the small pieces that every other crate needs but none
//! of them own: byte-offset spans for diagnostics, and line/column
//! conversion for reporting errors the way a human reads a file.

pub mod position;
pub mod span;

pub use position::{LineMap, Location, Position, Range, SourceLocation};
pub use span::{ByteSpan, Span, SpanBuilder, Spanned};
