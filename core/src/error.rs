//! Typed error results. Nothing in `swaps-core` panics or unwinds across a
//! public boundary on a reachable input; see `spec.md` §7 / `SPEC_FULL.md` §1.2.

use std::time::Duration;

use thiserror::Error;

use crate::ids::{CanonicalId, CollectionId, NftId, TenantId, WalletId};

/// The entity an operation targeted, for `NotFound` / `InvalidOwnership`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Wallet(WalletId),
    Nft(NftId),
    Collection(CollectionId),
    Loop(CanonicalId),
    Tenant(TenantId),
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Wallet(w) => write!(f, "wallet {w}"),
            EntityRef::Nft(n) => write!(f, "nft {n}"),
            EntityRef::Collection(c) => write!(f, "collection {c}"),
            EntityRef::Loop(c) => write!(f, "loop {c}"),
            EntityRef::Tenant(t) => write!(f, "tenant {t}"),
        }
    }
}

/// One error kind per `spec.md` §7.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("{nft} is already owned by another wallet in this tenant")]
    InvalidOwnership { nft: NftId, current_owner: WalletId },

    #[error("{0} not found")]
    NotFound(EntityRef),

    #[error("conflicting concurrent mutation on {0}, retry")]
    Conflict(EntityRef),

    #[error("discovery run exceeded its deadline")]
    Timeout,

    #[error("mutation queue for {tenant} is full, retry after {retry_after:?}")]
    Backpressure {
        tenant: TenantId,
        retry_after: Duration,
    },

    #[error("internal invariant violation: {reason}")]
    Internal { reason: String },
}

impl CoreError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether this error should be logged at `error` severity (per
    /// `spec.md` §7: only `Internal` faults are exceptional).
    pub fn is_exceptional(&self) -> bool {
        matches!(self, CoreError::Internal { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
