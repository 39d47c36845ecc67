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

//! Wallet accounts.
//!
//! Two kinds of wallet exist: one [`FreelancerWallet`] per freelancer and a
//! single [`PlatformWallet`]. Balances change only through `credit`/`debit`,
//! and every change appends the id of the ledger entry that caused it.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use gig_settlement::{EntryId, FreelancerId, WalletId, Wallets};
//!
//! let wallets = Wallets::new();
//! let freelancer = FreelancerId::new();
//! wallets.get_or_create(freelancer);
//!
//! wallets
//!     .credit(WalletId::Freelancer(freelancer), dec!(50.00), EntryId::new())
//!     .unwrap();
//! assert_eq!(wallets.get(&freelancer).unwrap().balance(), dec!(50.00));
//! ```

use crate::SettlementError;
use crate::base::{EntryId, FreelancerId, MONEY_PRECISION};
use crate::ledger::{Direction, EntryStatus, LedgerEntry};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Addresses one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletId {
    Freelancer(FreelancerId),
    Platform,
}

#[derive(Debug)]
pub(crate) struct FreelancerWalletData {
    freelancer: FreelancerId,
    balance: Decimal,
    entries: Vec<EntryId>,
}

impl FreelancerWalletData {
    fn new(freelancer: FreelancerId) -> Self {
        Self {
            freelancer,
            balance: Decimal::ZERO,
            entries: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: wallet balance went negative: {}",
            self.balance
        );
    }

    pub(crate) fn balance(&self) -> Decimal {
        self.balance
    }

    /// Increases the balance.
    pub(crate) fn credit(&mut self, amount: Decimal, entry: EntryId) -> Result<(), SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::NegativeAmount(amount));
        }
        self.balance += amount;
        self.entries.push(entry);
        self.assert_invariants();
        Ok(())
    }

    /// Decreases the balance.
    pub(crate) fn debit(&mut self, amount: Decimal, entry: EntryId) -> Result<(), SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::NegativeAmount(amount));
        }
        if self.balance < amount {
            return Err(SettlementError::InsufficientBalance {
                available: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        self.entries.push(entry);
        self.assert_invariants();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct PlatformWalletData {
    current_balance: Decimal,
    total_earnings: Decimal,
    total_withdrawals: Decimal,
    entries: Vec<EntryId>,
    /// Booking payments already applied, zero-amount ones included.
    settled: HashSet<EntryId>,
}

impl PlatformWalletData {
    /// Books a gross booking payment as platform earnings.
    pub(crate) fn credit_earnings(
        &mut self,
        amount: Decimal,
        entry: EntryId,
    ) -> Result<(), SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::NegativeAmount(amount));
        }
        self.current_balance += amount;
        self.total_earnings += amount;
        self.entries.push(entry);
        Ok(())
    }

    /// Books the fee retained from a payout and tracks the payout volume.
    pub(crate) fn credit_withdrawal_fee(
        &mut self,
        fee: Decimal,
        withdrawn: Decimal,
        entry: EntryId,
    ) -> Result<(), SettlementError> {
        if fee < Decimal::ZERO {
            return Err(SettlementError::NegativeAmount(fee));
        }
        if withdrawn <= Decimal::ZERO {
            return Err(SettlementError::NegativeAmount(withdrawn));
        }
        self.current_balance += fee;
        self.total_withdrawals += withdrawn;
        self.entries.push(entry);
        Ok(())
    }
}

/// Checks that `entry` is a booking payment `freelancer` can be paid from.
/// Looks only at the entry's shape, not its status.
pub(crate) fn check_settlement(
    entry: &LedgerEntry,
    freelancer: FreelancerId,
) -> Result<(), SettlementError> {
    if entry.direction != Direction::Credit {
        return Err(SettlementError::Internal(format!(
            "entry {} is not a credit",
            entry.reference
        )));
    }
    if entry.parties.freelancer != freelancer {
        return Err(SettlementError::Internal(format!(
            "entry {} belongs to another wallet",
            entry.reference
        )));
    }
    if entry.amount < Decimal::ZERO || entry.platform_fee < Decimal::ZERO {
        return Err(SettlementError::NegativeAmount(entry.amount));
    }
    Ok(())
}

/// Applies a completed booking payment to both wallets.
///
/// Every check runs before the first write, so either both wallets change or
/// neither does. An entry is applied at most once. Zero-amount entries move
/// no money.
pub(crate) fn apply_settlement(
    freelancer: &mut FreelancerWalletData,
    platform: &mut PlatformWalletData,
    entry: &LedgerEntry,
) -> Result<(), SettlementError> {
    if entry.status != EntryStatus::Completed {
        return Err(SettlementError::EntryNotCompleted {
            status: entry.status,
        });
    }
    check_settlement(entry, freelancer.freelancer)?;
    if platform.settled.contains(&entry.id) {
        return Err(SettlementError::AlreadySettled);
    }

    if entry.amount > Decimal::ZERO {
        freelancer.credit(entry.amount, entry.id)?;
    }
    if entry.gross() > Decimal::ZERO {
        platform.credit_earnings(entry.gross(), entry.id)?;
    }
    platform.settled.insert(entry.id);
    Ok(())
}

/// A freelancer's wallet.
#[derive(Debug)]
pub struct FreelancerWallet {
    inner: Mutex<FreelancerWalletData>,
}

impl FreelancerWallet {
    fn new(freelancer: FreelancerId) -> Self {
        Self {
            inner: Mutex::new(FreelancerWalletData::new(freelancer)),
        }
    }

    pub fn freelancer(&self) -> FreelancerId {
        self.inner.lock().freelancer
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    /// Ids of the ledger entries that changed this balance, oldest first.
    pub fn entries(&self) -> Vec<EntryId> {
        self.inner.lock().entries.clone()
    }
}

impl Serialize for FreelancerWallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("FreelancerWallet", 3)?;
        state.serialize_field("freelancer", &data.freelancer)?;
        state.serialize_field("balance", &data.balance.round_dp(MONEY_PRECISION))?;
        state.serialize_field("entries", &data.entries.len())?;
        state.end()
    }
}

/// The platform-wide wallet.
#[derive(Debug, Default)]
pub struct PlatformWallet {
    inner: Mutex<PlatformWalletData>,
}

impl PlatformWallet {
    pub fn current_balance(&self) -> Decimal {
        self.inner.lock().current_balance
    }

    pub fn total_earnings(&self) -> Decimal {
        self.inner.lock().total_earnings
    }

    pub fn total_withdrawals(&self) -> Decimal {
        self.inner.lock().total_withdrawals
    }

    pub fn entries(&self) -> Vec<EntryId> {
        self.inner.lock().entries.clone()
    }
}

impl Serialize for PlatformWallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("PlatformWallet", 4)?;
        state.serialize_field(
            "current_balance",
            &data.current_balance.round_dp(MONEY_PRECISION),
        )?;
        state.serialize_field(
            "total_earnings",
            &data.total_earnings.round_dp(MONEY_PRECISION),
        )?;
        state.serialize_field(
            "total_withdrawals",
            &data.total_withdrawals.round_dp(MONEY_PRECISION),
        )?;
        state.serialize_field("entries", &data.entries.len())?;
        state.end()
    }
}

/// Registry of every wallet.
///
/// Each wallet has its own lock, so different wallets are mutated fully in
/// parallel. Operations touching two wallets always lock the freelancer
/// wallet before the platform wallet.
#[derive(Debug, Default)]
pub struct Wallets {
    freelancers: DashMap<FreelancerId, Arc<FreelancerWallet>>,
    platform: OnceLock<Arc<PlatformWallet>>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the freelancer's wallet, creating a zero-balance one on first
    /// call. The map's entry API makes concurrent first calls agree on a
    /// single wallet.
    pub fn get_or_create(&self, freelancer: FreelancerId) -> Arc<FreelancerWallet> {
        self.freelancers
            .entry(freelancer)
            .or_insert_with(|| {
                debug!(freelancer = %freelancer, "wallet opened");
                Arc::new(FreelancerWallet::new(freelancer))
            })
            .clone()
    }

    pub fn get(&self, freelancer: &FreelancerId) -> Option<Arc<FreelancerWallet>> {
        self.freelancers.get(freelancer).map(|wallet| wallet.clone())
    }

    /// Returns the platform wallet, creating it on first use.
    pub fn platform(&self) -> Arc<PlatformWallet> {
        self.platform
            .get_or_init(|| Arc::new(PlatformWallet::default()))
            .clone()
    }

    /// Returns every freelancer wallet.
    pub fn iter(&self) -> impl Iterator<Item = Arc<FreelancerWallet>> + '_ {
        self.freelancers.iter().map(|wallet| wallet.value().clone())
    }

    pub fn len(&self) -> usize {
        self.freelancers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freelancers.is_empty()
    }

    /// Credits a wallet and records the entry. Returns the new balance.
    ///
    /// Crediting the platform wallet books the amount as earnings.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NegativeAmount`] - `amount <= 0`.
    /// - [`SettlementError::WalletNotFound`] - No wallet for the freelancer.
    pub fn credit(
        &self,
        wallet: WalletId,
        amount: Decimal,
        entry: EntryId,
    ) -> Result<Decimal, SettlementError> {
        match wallet {
            WalletId::Freelancer(freelancer) => {
                let wallet = self.get(&freelancer).ok_or(SettlementError::WalletNotFound)?;
                let mut data = wallet.inner.lock();
                data.credit(amount, entry)?;
                Ok(data.balance)
            }
            WalletId::Platform => {
                let platform = self.platform();
                let mut data = platform.inner.lock();
                data.credit_earnings(amount, entry)?;
                Ok(data.current_balance)
            }
        }
    }

    /// Debits a freelancer wallet and records the entry. Returns the new
    /// balance.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NegativeAmount`] - `amount <= 0`.
    /// - [`SettlementError::InsufficientBalance`] - `balance < amount`.
    /// - [`SettlementError::WalletNotFound`] - No wallet for the freelancer,
    ///   or the platform wallet was addressed.
    pub fn debit(
        &self,
        wallet: WalletId,
        amount: Decimal,
        entry: EntryId,
    ) -> Result<Decimal, SettlementError> {
        let WalletId::Freelancer(freelancer) = wallet else {
            return Err(SettlementError::WalletNotFound);
        };
        let wallet = self.get(&freelancer).ok_or(SettlementError::WalletNotFound)?;
        let mut data = wallet.inner.lock();
        data.debit(amount, entry)?;
        Ok(data.balance)
    }

    /// Applies a completed booking payment: the freelancer gets the net
    /// amount, the platform books the gross. Both or neither.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::EntryNotCompleted`] - Entry is still pending or
    ///   was cancelled.
    /// - [`SettlementError::AlreadySettled`] - Entry was applied before.
    pub fn settle_booking(&self, entry: &LedgerEntry) -> Result<(), SettlementError> {
        self.with_pair(&self.get_or_create(entry.parties.freelancer), |freelancer, platform| {
            apply_settlement(freelancer, platform, entry)
        })
    }

    /// Runs `f` with the freelancer wallet and the platform wallet locked, in
    /// that order. `f` must finish every fallible check before its first
    /// write.
    pub(crate) fn with_pair<R>(
        &self,
        wallet: &FreelancerWallet,
        f: impl FnOnce(&mut FreelancerWalletData, &mut PlatformWalletData) -> Result<R, SettlementError>,
    ) -> Result<R, SettlementError> {
        let platform = self.platform();
        let mut freelancer = wallet.inner.lock();
        let mut platform = platform.inner.lock();
        f(&mut freelancer, &mut platform)
    }
}
