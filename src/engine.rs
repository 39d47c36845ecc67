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

//! Settlement engine.
//!
//! The [`Engine`] owns the ledger, the wallets, the bookings and the
//! withdrawal requests, and is the only thing that mutates them. Booking
//! operations live in `settlement`, withdrawal operations in `payout`.
//!
//! # Locking
//!
//! Operations that touch several records take locks in one global order:
//!
//! 1. the freelancer wallet, then the platform wallet;
//! 2. the booking or withdrawal record (its map shard);
//! 3. the pending-withdrawal index;
//! 4. the ledger.
//!
//! Every fallible check runs before the first write, so an operation either
//! applies all of its writes or none of them.

use crate::base::{AdminId, BookingId, FreelancerId, RequestId};
use crate::booking::Booking;
use crate::config::FeePolicy;
use crate::directory::{Directory, NoShortlist, ServiceCatalog, Shortlist};
use crate::ledger::{Ledger, LedgerEntry};
use crate::wallet::{FreelancerWallet, PlatformWallet, Wallets};
use crate::withdrawal::{WithdrawalRequest, WithdrawalSummary};
use crate::SettlementError;
use dashmap::DashMap;
use std::sync::Arc;

/// Booking and payout settlement engine.
///
/// # Invariants
///
/// - Wallet balances change only together with a ledger entry.
/// - A ledger entry leaves `Pending` at most once, so a booking payment is
///   credited at most once.
/// - A freelancer has at most one pending withdrawal request.
pub struct Engine {
    pub(crate) policy: FeePolicy,
    pub(crate) ledger: Ledger,
    pub(crate) wallets: Wallets,
    pub(crate) bookings: DashMap<BookingId, Booking>,
    pub(crate) withdrawals: DashMap<RequestId, WithdrawalRequest>,
    /// Uniqueness constraint on (freelancer, status = pending).
    pub(crate) pending_withdrawals: DashMap<FreelancerId, RequestId>,
    pub(crate) withdrawal_references: DashMap<String, RequestId>,
    pub(crate) catalog: Arc<dyn ServiceCatalog>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) shortlist: Arc<dyn Shortlist>,
}

impl Engine {
    /// Creates an engine with the default fee policy.
    pub fn new(catalog: Arc<dyn ServiceCatalog>, directory: Arc<dyn Directory>) -> Self {
        Engine {
            policy: FeePolicy::default(),
            ledger: Ledger::new(),
            wallets: Wallets::new(),
            bookings: DashMap::new(),
            withdrawals: DashMap::new(),
            pending_withdrawals: DashMap::new(),
            withdrawal_references: DashMap::new(),
            catalog,
            directory,
            shortlist: Arc::new(NoShortlist),
        }
    }

    /// Replaces the fee policy.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidPolicy`] for out-of-range rates.
    pub fn with_policy(mut self, policy: FeePolicy) -> Result<Self, SettlementError> {
        policy.validate()?;
        self.policy = policy;
        Ok(self)
    }

    pub fn with_shortlist(mut self, shortlist: Arc<dyn Shortlist>) -> Self {
        self.shortlist = shortlist;
        self
    }

    pub fn policy(&self) -> &FeePolicy {
        &self.policy
    }

    /// Opens the freelancer's wallet on registration. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::FreelancerNotFound`] if the directory does
    /// not know the freelancer.
    pub fn open_wallet(
        &self,
        freelancer: FreelancerId,
    ) -> Result<Arc<FreelancerWallet>, SettlementError> {
        if !self.directory.is_freelancer(&freelancer) {
            return Err(SettlementError::FreelancerNotFound);
        }
        Ok(self.wallets.get_or_create(freelancer))
    }

    pub fn wallet(&self, freelancer: &FreelancerId) -> Option<Arc<FreelancerWallet>> {
        self.wallets.get(freelancer)
    }

    pub fn platform_wallet(&self) -> Arc<PlatformWallet> {
        self.wallets.platform()
    }

    /// Returns an iterator over all freelancer wallets.
    pub fn wallets(&self) -> impl Iterator<Item = Arc<FreelancerWallet>> + '_ {
        self.wallets.iter()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn entry(&self, reference: &str) -> Option<LedgerEntry> {
        self.ledger.get_by_reference(reference)
    }

    pub fn booking(&self, id: &BookingId) -> Option<Booking> {
        self.bookings.get(id).map(|booking| booking.clone())
    }

    pub fn withdrawal(&self, id: &RequestId) -> Option<WithdrawalRequest> {
        self.withdrawals.get(id).map(|request| request.clone())
    }

    pub fn withdrawal_by_reference(&self, reference: &str) -> Option<WithdrawalRequest> {
        let id = *self.withdrawal_references.get(reference)?;
        self.withdrawal(&id)
    }

    /// Per-status counts and totals of the freelancer's withdrawal requests.
    pub fn withdrawal_summary(&self, freelancer: &FreelancerId) -> WithdrawalSummary {
        let mut summary = WithdrawalSummary::default();
        for request in self.withdrawals.iter() {
            if request.freelancer == *freelancer {
                summary.record(&request);
            }
        }
        summary
    }

    /// Per-status counts and totals across every freelancer's requests.
    pub fn withdrawal_stats(&self) -> WithdrawalSummary {
        let mut summary = WithdrawalSummary::default();
        for request in self.withdrawals.iter() {
            summary.record(&request);
        }
        summary
    }

    pub(crate) fn ensure_admin(&self, admin: &AdminId) -> Result<(), SettlementError> {
        if self.directory.is_admin(admin) {
            Ok(())
        } else {
            Err(SettlementError::NotAdmin)
        }
    }
}
