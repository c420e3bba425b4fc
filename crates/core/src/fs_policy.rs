//! Filesystem and image-name policy enforcement.
//!
//! Provides utilities for validating Docker image names and the paths used
//! to build images, so that a build can never be pointed at a file outside
//! its build context (via `..`, absolute paths or symlinks).

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Validates a Docker image reference such as `python:3.12` or
/// `docker.io/library/python:3.12`.
///
/// Only `[A-Za-z0-9:/_.-]` is accepted and `..` is rejected anywhere in the
/// name.
pub fn validate_image_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_request("Docker image name cannot be empty"));
    }

    if name.contains("..") {
        return Err(Error::security_violation(format!(
            "Path traversal detected in image name: {}",
            name
        )));
    }

    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '/' | '_' | '.' | '-'));
    if !valid {
        return Err(Error::invalid_request(format!(
            "Invalid Docker image name '{}'. Only alphanumeric characters and ':/_.-' are allowed",
            name
        )));
    }

    Ok(())
}

/// Validates a build context directory and returns its canonical path.
pub fn validate_build_context(build_context: &str) -> Result<PathBuf> {
    if build_context.trim().is_empty() {
        return Err(Error::invalid_request("Build context cannot be empty"));
    }

    let resolved = Path::new(build_context).canonicalize().map_err(|_| {
        Error::invalid_request(format!(
            "Build context does not exist: {}",
            build_context
        ))
    })?;

    if !resolved.is_dir() {
        return Err(Error::invalid_request(format!(
            "Build context must be a directory: {}",
            build_context
        )));
    }

    Ok(resolved)
}

/// Validates a Dockerfile path relative to a build context.
///
/// Returns the canonical Dockerfile path. The path must:
/// 1. be non-empty and relative,
/// 2. contain no `..` component,
/// 3. resolve (after collapsing symlinks) to a file inside the canonical
///    build context. The containment check is component-wise, so
///    `/ctx-evil/Dockerfile` is not considered inside `/ctx`.
pub fn validate_dockerfile_path(dockerfile: &str, build_context: &str) -> Result<PathBuf> {
    if dockerfile.trim().is_empty() {
        return Err(Error::invalid_request("Dockerfile path cannot be empty"));
    }

    // Reject Windows-style absolute paths on any OS
    if dockerfile.len() >= 2
        && dockerfile.as_bytes()[1] == b':'
        && dockerfile.as_bytes()[0].is_ascii_alphabetic()
    {
        return Err(Error::security_violation(format!(
            "Dockerfile path must be relative: {}",
            dockerfile
        )));
    }

    for component in Path::new(dockerfile).components() {
        match component {
            Component::ParentDir => {
                return Err(Error::security_violation(format!(
                    "Path traversal detected in Dockerfile path: {}",
                    dockerfile
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::security_violation(format!(
                    "Dockerfile path must be relative: {}",
                    dockerfile
                )));
            }
            Component::Normal(_) | Component::CurDir => {}
        }
    }

    let context = validate_build_context(build_context)?;

    let resolved = context.join(dockerfile).canonicalize().map_err(|_| {
        Error::invalid_request(format!(
            "Dockerfile not found in build context: {}",
            dockerfile
        ))
    })?;

    if !resolved.starts_with(&context) {
        return Err(Error::security_violation(format!(
            "Dockerfile {} resolves outside of build context {}",
            dockerfile,
            context.display()
        )));
    }

    if !resolved.is_file() {
        return Err(Error::invalid_request(format!(
            "Dockerfile path is not a file: {}",
            dockerfile
        )));
    }

    Ok(resolved)
}
