// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for settlement operations.
//!
//! Every failure is a [`SettlementError`] variant. Callers branch on
//! [`SettlementError::kind`] (the coarse taxonomy a transport layer maps to
//! status codes) or [`SettlementError::code`] (a stable per-variant code).

use crate::booking::BookingStatus;
use crate::ledger::EntryStatus;
use crate::withdrawal::WithdrawalStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    InvalidStateTransition,
    InsufficientFunds,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::InvalidStateTransition => "invalid_state_transition",
            Self::InsufficientFunds => "insufficient_funds",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// Amount is negative, or zero where a positive amount is required
    #[error("invalid amount {0} (must be positive)")]
    NegativeAmount(Decimal),

    /// Service listing is not active
    #[error("service is not available for booking")]
    ServiceUnavailable,

    /// Booking amount is larger than the listing price
    #[error("booking amount {amount} exceeds the service price {price}")]
    AmountExceedsPrice { amount: Decimal, price: Decimal },

    /// Advance booking below the minimum share of the price
    #[error("advance payment must be at least {minimum} for this service")]
    AdvanceBelowMinimum { minimum: Decimal },

    /// Payout method is missing required fields
    #[error("payment details incomplete: {}", .0.join(", "))]
    MethodDetailsIncomplete(Vec<&'static str>),

    /// Rejection or failure reason is missing
    #[error("a reason is required")]
    ReasonRequired,

    /// Fee policy values are out of range
    #[error("invalid fee policy: {0}")]
    InvalidPolicy(String),

    #[error("service not found")]
    ServiceNotFound,

    #[error("booking not found")]
    BookingNotFound,

    #[error("ledger entry not found")]
    EntryNotFound,

    #[error("withdrawal request not found")]
    RequestNotFound,

    #[error("wallet not found")]
    WalletNotFound,

    #[error("freelancer not found")]
    FreelancerNotFound,

    /// Actor does not own the booking or request
    #[error("actor does not own this resource")]
    NotOwner,

    /// Actor is not a platform administrator
    #[error("administrator privileges required")]
    NotAdmin,

    /// Client already holds an accepted or hired booking for the service
    #[error("an active booking already exists for this service")]
    DuplicateActiveBooking,

    /// Payment confirmation against an entry that is no longer pending
    #[error("ledger entry is not pending (status: {status})")]
    LedgerEntryNotPending { status: EntryStatus },

    /// Ledger entry has already left pending
    #[error("ledger entry is already {status}")]
    TerminalEntry { status: EntryStatus },

    /// Only completed booking payments can be settled into wallets
    #[error("ledger entry is not completed (status: {status})")]
    EntryNotCompleted { status: EntryStatus },

    /// Booking payment was already settled into the wallets
    #[error("ledger entry has already been settled")]
    AlreadySettled,

    /// Freelancer already has a pending withdrawal request
    #[error("a pending withdrawal request already exists")]
    PendingRequestExists,

    /// Booking transition not in the lifecycle table
    #[error("cannot transition booking from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    /// Ledger entries can only move from pending to a terminal status
    #[error("cannot transition ledger entry from {from} to {to}")]
    InvalidEntryTransition { from: EntryStatus, to: EntryStatus },

    /// Withdrawal request is not pending
    #[error("withdrawal request is not pending (status: {status})")]
    NotPending { status: WithdrawalStatus },

    /// Only failed withdrawal requests can be retried
    #[error("withdrawal request has not failed (status: {status})")]
    NotFailed { status: WithdrawalStatus },

    /// Wallet balance is below the amount to debit
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Decimal, required: Decimal },

    /// Unexpected storage failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Returns the coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NegativeAmount(_)
            | Self::ServiceUnavailable
            | Self::AmountExceedsPrice { .. }
            | Self::AdvanceBelowMinimum { .. }
            | Self::MethodDetailsIncomplete(_)
            | Self::ReasonRequired
            | Self::InvalidPolicy(_) => ErrorKind::Validation,
            Self::ServiceNotFound
            | Self::BookingNotFound
            | Self::EntryNotFound
            | Self::RequestNotFound
            | Self::WalletNotFound
            | Self::FreelancerNotFound => ErrorKind::NotFound,
            Self::NotOwner | Self::NotAdmin => ErrorKind::Forbidden,
            Self::DuplicateActiveBooking
            | Self::LedgerEntryNotPending { .. }
            | Self::TerminalEntry { .. }
            | Self::AlreadySettled
            | Self::PendingRequestExists => ErrorKind::Conflict,
            Self::InvalidTransition { .. }
            | Self::InvalidEntryTransition { .. }
            | Self::EntryNotCompleted { .. }
            | Self::NotPending { .. }
            | Self::NotFailed { .. } => ErrorKind::InvalidStateTransition,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientFunds,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns a stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NegativeAmount(_) => "NEGATIVE_AMOUNT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::AmountExceedsPrice { .. } => "AMOUNT_EXCEEDS_PRICE",
            Self::AdvanceBelowMinimum { .. } => "ADVANCE_BELOW_MINIMUM",
            Self::MethodDetailsIncomplete(_) => "METHOD_DETAILS_INCOMPLETE",
            Self::ReasonRequired => "REASON_REQUIRED",
            Self::InvalidPolicy(_) => "INVALID_POLICY",
            Self::ServiceNotFound => "SERVICE_NOT_FOUND",
            Self::BookingNotFound => "BOOKING_NOT_FOUND",
            Self::EntryNotFound => "ENTRY_NOT_FOUND",
            Self::RequestNotFound => "REQUEST_NOT_FOUND",
            Self::WalletNotFound => "WALLET_NOT_FOUND",
            Self::FreelancerNotFound => "FREELANCER_NOT_FOUND",
            Self::NotOwner => "NOT_OWNER",
            Self::NotAdmin => "NOT_ADMIN",
            Self::DuplicateActiveBooking => "DUPLICATE_ACTIVE_BOOKING",
            Self::LedgerEntryNotPending { .. } => "LEDGER_ENTRY_NOT_PENDING",
            Self::TerminalEntry { .. } => "TERMINAL_ENTRY",
            Self::EntryNotCompleted { .. } => "ENTRY_NOT_COMPLETED",
            Self::AlreadySettled => "ALREADY_SETTLED",
            Self::PendingRequestExists => "PENDING_REQUEST_EXISTS",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidEntryTransition { .. } => "INVALID_ENTRY_TRANSITION",
            Self::NotPending { .. } => "NOT_PENDING",
            Self::NotFailed { .. } => "NOT_FAILED",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}
