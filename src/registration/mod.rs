//! DICOM Spatial Registration parsing.
//!
//! Real-world registration objects are messy: matrices appear at the
//! standard nested location (RegistrationSequence → MatrixRegistrationSequence
//! → MatrixSequence) but also at legacy RT Frame-of-Reference locations, and
//! Frame of Reference / Series Instance UIDs turn up in places the standard
//! never asked for. The parser therefore deep-scans the whole object and
//! collects *every* candidate matrix and identifier it finds, leaving
//! direction disambiguation and validation to the resolver.
//!
//! The parser never throws for a bad file: a missing or unparsable path
//! yields `None`. Apparently-malformed (non-rigid) matrices are returned
//! unmodified and flagged through the notes list; silently "cleaning up" a
//! matrix would hide a data-quality problem from downstream consumers.

mod candidate;
mod parser;

pub use candidate::{matrix_dedup_key, select_matrix, ParsedRegistration, RegistrationCandidate};
pub use parser::{parse, parse_object};
