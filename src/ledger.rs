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

//! Transaction ledger.
//!
//! An append-only record of money movement. Entries are immutable once
//! created except for a single status transition:
//!
//! ```text
//! Pending ──► Completed | Failed | Refunded | Cancelled
//! ```
//!
//! Credits awaiting payment confirmation start [`EntryStatus::Pending`];
//! immediate debits (withdrawal payouts) start [`EntryStatus::Completed`].

use crate::SettlementError;
use crate::base::{
    AdminId, BookingId, EntryId, FreelancerId, RequestId, UserId, generate_reference, round_money,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Prefix of generated ledger references.
pub const REFERENCE_PREFIX: &str = "TNXKD";

const REFERENCE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl EntryStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    ServicePayment,
    Withdrawal,
    Refund,
    PlatformFee,
}

/// Parties an entry refers to. Only the freelancer is mandatory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Parties {
    pub freelancer: FreelancerId,
    pub user: Option<UserId>,
    pub admin: Option<AdminId>,
    pub booking: Option<BookingId>,
    pub withdrawal_request: Option<RequestId>,
}

impl Parties {
    pub fn freelancer(freelancer: FreelancerId) -> Self {
        Self {
            freelancer,
            user: None,
            admin: None,
            booking: None,
            withdrawal_request: None,
        }
    }
}

/// Result of splitting a gross amount into the freelancer's net share and
/// the platform fee. `net + fee == gross` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub gross: Decimal,
    pub fee: Decimal,
    pub net: Decimal,
}

impl FeeSplit {
    /// Rounds `gross` to cents, then takes `round(gross * rate)` as the fee.
    pub fn new(gross: Decimal, rate: Decimal) -> Self {
        let gross = round_money(gross);
        let fee = round_money(gross * rate);
        Self {
            gross,
            fee,
            net: gross - fee,
        }
    }
}

/// Input to [`Ledger::create_entry`].
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub gross: Decimal,
    pub fee_rate: Decimal,
    pub parties: Parties,
    pub direction: Direction,
    pub kind: EntryType,
    pub payment_reference: Option<String>,
}

/// A single money movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub reference: String,
    /// Net of the platform fee.
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub direction: Direction,
    pub status: EntryStatus,
    pub kind: EntryType,
    pub parties: Parties,
    pub payment_reference: Option<String>,
    /// Position in the ledger; strictly increasing in creation order.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Returns `amount + platform_fee`.
    pub fn gross(&self) -> Decimal {
        self.amount + self.platform_fee
    }

    /// Signed effect of this entry on the freelancer's wallet once completed.
    ///
    /// Credits pay the freelancer the net amount; debits take the gross.
    pub fn wallet_effect(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.gross(),
        }
    }
}

/// Thread-safe ledger store with reference uniqueness.
///
/// Entries are keyed by id; a second map indexes them by human reference and
/// acts as the uniqueness constraint on references.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: DashMap<EntryId, LedgerEntry>,
    references: DashMap<String, EntryId>,
    sequence: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new entry.
    ///
    /// The fee is `round(gross * fee_rate, 2)` and the stored amount is the
    /// remainder. Credits start pending, debits start completed.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NegativeAmount`] - `gross` is negative.
    /// - [`SettlementError::Internal`] - no unique reference could be generated.
    pub fn create_entry(&self, new: NewEntry) -> Result<LedgerEntry, SettlementError> {
        if new.gross < Decimal::ZERO {
            return Err(SettlementError::NegativeAmount(new.gross));
        }
        let split = FeeSplit::new(new.gross, new.fee_rate);
        let status = match new.direction {
            Direction::Credit => EntryStatus::Pending,
            Direction::Debit => EntryStatus::Completed,
        };

        for _ in 0..REFERENCE_ATTEMPTS {
            let reference = generate_reference(REFERENCE_PREFIX);

            // Entry API gives an atomic check-and-insert on the reference.
            let Entry::Vacant(slot) = self.references.entry(reference.clone()) else {
                continue;
            };
            let now = Utc::now();
            let entry = LedgerEntry {
                id: EntryId::new(),
                reference,
                amount: split.net,
                platform_fee: split.fee,
                direction: new.direction,
                status,
                kind: new.kind,
                parties: new.parties,
                payment_reference: new.payment_reference.clone(),
                sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
                created_at: now,
                updated_at: now,
            };
            slot.insert(entry.id);
            self.entries.insert(entry.id, entry.clone());
            debug!(
                reference = %entry.reference,
                sequence = entry.sequence,
                direction = ?entry.direction,
                status = %entry.status,
                "ledger entry created"
            );
            return Ok(entry);
        }

        Err(SettlementError::Internal(
            "could not generate a unique ledger reference".to_string(),
        ))
    }

    pub fn get(&self, id: &EntryId) -> Option<LedgerEntry> {
        self.entries.get(id).map(|entry| entry.clone())
    }

    pub fn get_by_reference(&self, reference: &str) -> Option<LedgerEntry> {
        let id = *self.references.get(reference)?;
        self.get(&id)
    }

    /// Moves a pending entry to a terminal status, exactly once.
    ///
    /// The check and the write happen under the entry's shard lock, so two
    /// racing callers cannot both observe `Pending`.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::EntryNotFound`] - Unknown reference.
    /// - [`SettlementError::InvalidEntryTransition`] - `status` is `Pending`.
    /// - [`SettlementError::TerminalEntry`] - Entry already left pending.
    pub fn update_status_by_reference(
        &self,
        reference: &str,
        status: EntryStatus,
    ) -> Result<LedgerEntry, SettlementError> {
        let id = *self
            .references
            .get(reference)
            .ok_or(SettlementError::EntryNotFound)?;
        let mut entry = self
            .entries
            .get_mut(&id)
            .ok_or(SettlementError::EntryNotFound)?;

        if entry.status.is_terminal() {
            return Err(SettlementError::TerminalEntry {
                status: entry.status,
            });
        }
        if !status.is_terminal() {
            return Err(SettlementError::InvalidEntryTransition {
                from: entry.status,
                to: status,
            });
        }

        entry.status = status;
        entry.updated_at = Utc::now();
        debug!(reference, status = %status, "ledger entry closed");
        Ok(entry.clone())
    }

    /// Returns every entry naming `freelancer`, in creation order.
    pub fn entries_for(&self, freelancer: &FreelancerId) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.parties.freelancer == *freelancer)
            .map(|entry| entry.clone())
            .collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    /// Recomputes a freelancer's balance from completed entries alone.
    pub fn replay_balance(&self, freelancer: &FreelancerId) -> Decimal {
        self.entries_for(freelancer)
            .iter()
            .filter(|entry| entry.status == EntryStatus::Completed)
            .map(LedgerEntry::wallet_effect)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
