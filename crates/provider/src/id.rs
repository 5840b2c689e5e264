//! Identifier validation.
//!
//! Unit ids, chapter ids and download references are opaque strings chosen by
//! sources, but sources backed by a filesystem turn them into paths. These
//! helpers make sure such an identifier can never point outside its root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates an identifier that will be used as a relative path.
/// Ensures it doesn't escape the source root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidId`](crate::error::ErrorKind::InvalidId)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tanko_provider::validate_id;
/// // Valid identifiers
/// assert!(validate_id("one-piece/1044").is_ok());
/// assert!(validate_id("one-piece/../berserk").is_ok()); // (never leaves the root)
/// // Invalid identifiers
/// assert!(validate_id("../etc/passwd").is_err());
/// assert!(validate_id("a/../../b").is_err());
/// assert!(validate_id("a\0b").is_err());
/// // Identifiers get resolved
/// assert_eq!(validate_id("./berserk//001/").unwrap(), Path::new("berserk/001"));
/// ```
pub fn validate(id: impl AsRef<Path>) -> Result<PathBuf> {
    let id = id.as_ref();
    let invalid = || ErrorKind::InvalidId(id.display().to_string());
    let mut components = Vec::new();
    for component in id.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls — reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}

/// Like [`validate`], but the identifier must resolve to exactly one path
/// segment (a unit or chapter id, never a nested reference).
pub fn validate_segment(id: &str) -> Result<PathBuf> {
    let path = validate(id)?;
    if path.components().count() != 1 {
        exn::bail!(ErrorKind::InvalidId(id.to_string()));
    }
    Ok(path)
}
