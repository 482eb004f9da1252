// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader

use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while defining, resolving or loading modules
///
/// Errors are `Clone` because a single fetch failure is reported to every
/// listener that joined the same in-flight load.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoaderError {
    /// Malformed module identifier
    #[error("Invalid module id '{id}': {reason}")]
    InvalidModuleId {
        /// The identifier as written
        id: String,
        /// Reason for rejection
        reason: String,
    },

    /// Relative identifier resolved without an anchor module
    #[error("Cannot resolve relative module id '{0}' without a referencing module")]
    RelativeWithoutAnchor(String),

    /// Dependency list was not an array of strings
    #[error("Invalid dependency list: {0}")]
    InvalidDependencies(String),

    /// Exporter was neither a function nor an object
    #[error("Invalid exporter: {0}")]
    InvalidExporter(String),

    /// Module requested synchronously before it was defined
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Backend could not load a module
    #[error("Failed to fetch module '{id}': {reason}")]
    Fetch {
        /// Canonical module id
        id: String,
        /// Reason reported by the backend
        reason: String,
    },

    /// A factory returned an error
    #[error("Factory for module '{id}' failed: {reason}")]
    Factory {
        /// Canonical module id
        id: String,
        /// Error message
        reason: String,
    },

    /// Type error (wrong argument type, calling a non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Invalid configuration option
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An awaited load went idle with modules still pending
    #[error("Modules never finished loading: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

impl LoaderError {
    /// Create a new invalid module id error
    pub fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidModuleId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ReferenceError
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// Create a new TypeError
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a fetch error
    pub fn fetch(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error was raised synchronously by argument validation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidModuleId { .. }
                | Self::RelativeWithoutAnchor(_)
                | Self::InvalidDependencies(_)
                | Self::InvalidExporter(_)
        )
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LoaderError::invalid_id("a b", "contains whitespace");
        assert_eq!(err.to_string(), "Invalid module id 'a b': contains whitespace");

        let err = LoaderError::Unresolved(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Modules never finished loading: a, b");
    }

    #[test]
    fn test_is_validation() {
        assert!(LoaderError::RelativeWithoutAnchor("./x".into()).is_validation());
        assert!(!LoaderError::reference_error("x").is_validation());
        assert!(!LoaderError::fetch("x", "404").is_validation());
    }
}
