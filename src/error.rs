// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors surfaced by the governor.
//!
//! Store-level failures live in [`StorageError`](crate::storage::traits::StorageError);
//! this type wraps them and adds the policy outcomes callers have to handle.
//! A corrupt duplicate registry is deliberately absent: it is recovered
//! locally and never reaches a caller.

use thiserror::Error;

use crate::storage::traits::StorageError;

#[derive(Error, Debug)]
pub enum GovernorError {
    /// Escalation exhausted: one eviction and one retry did not make room.
    #[error("Cannot save '{key}' ({requested_bytes} bytes): storage full")]
    QuotaExceeded {
        key: String,
        requested_bytes: usize,
    },
    #[error("Destructive cleanup refused: explicit confirmation required")]
    DestructiveCleanupRefused,
    #[error("Sync source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GovernorError {
    /// Whether this error means the user-visible "storage full" condition.
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, GovernorError>;
