//! Error Types
//!
//! This module defines the error type shared by every Kiln crate.
//!
//! # Overview
//!
//! [`KilnError`] covers the recoverable failure modes of the engine core:
//! - Truncated or malformed binary streams
//! - Resource headers with a wrong magic or an unsupported version
//! - Blend-tree condition expressions that fail to compile
//!
//! Programming errors (an invalid entity handed to the world, a bone index
//! outside the pose) are not represented here; they are checked with
//! `debug_assert!` at the call site.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kiln_core::errors::{KilnError, Result};
//!
//! fn read_header(stream: &mut InputMemoryStream<'_>) -> Result<u32> {
//!     stream.read::<u32>()
//! }
//! ```

use thiserror::Error;

/// The main error type for the Kiln engine.
#[derive(Error, Debug)]
pub enum KilnError {
    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// A read went past the end of the input stream.
    #[error("Unexpected end of stream: needed {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEof {
        /// Bytes the read required
        needed: usize,
        /// Read cursor at the time of the failure
        offset: usize,
        /// Bytes left in the stream
        available: usize,
    },

    /// A null-terminated string was not terminated before the end of the stream.
    #[error("Unterminated string at offset {0}")]
    UnterminatedString(usize),

    /// A string in the stream was not valid UTF-8.
    #[error("Invalid UTF-8 string in stream: {0}")]
    InvalidString(#[from] std::str::Utf8Error),

    // ========================================================================
    // Resource Format Errors
    // ========================================================================
    /// The resource header does not start with the expected magic number.
    #[error("Invalid {what} magic: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        /// Resource kind being parsed
        what: &'static str,
        /// Magic the parser expects
        expected: u32,
        /// Magic found in the data
        found: u32,
    },

    /// The resource was written by an unknown format version.
    #[error("Unsupported {what} version: {version}")]
    UnsupportedVersion {
        /// Resource kind being parsed
        what: &'static str,
        /// Version found in the data
        version: u32,
    },

    /// A serialized blend tree contained an unknown node type tag.
    #[error("Unknown blend-tree node type: {0}")]
    UnknownNodeType(u32),

    /// A serialized value is outside the range the format allows.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    // ========================================================================
    // Condition Errors
    // ========================================================================
    /// A blend-tree condition expression failed to compile.
    #[error("Condition `{expression}` failed to compile: {message}")]
    ConditionCompile {
        /// The source text of the expression
        expression: String,
        /// Description of the parse failure
        message: String,
    },

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Alias for `Result<T, KilnError>`.
pub type Result<T> = std::result::Result<T, KilnError>;
