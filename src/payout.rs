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

//! Withdrawal operations: request, approval and the admin payout queue.

use crate::SettlementError;
use crate::base::{AdminId, FreelancerId, RequestId, generate_reference, round_money};
use crate::engine::Engine;
use crate::ledger::{Direction, EntryType, FeeSplit, LedgerEntry, NewEntry, Parties};
use crate::withdrawal::{
    MethodKind, PaymentDetails, PaymentMethod, REFERENCE_PREFIX, WithdrawalRequest,
    WithdrawalStatus,
};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

const REFERENCE_ATTEMPTS: usize = 8;

/// Returned by [`Engine::approve_withdrawal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalReceipt {
    pub request: WithdrawalRequest,
    pub entry: LedgerEntry,
}

fn required_reason(reason: Option<String>) -> Result<String, SettlementError> {
    reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty())
        .ok_or(SettlementError::ReasonRequired)
}

impl Engine {
    /// Files a payout request for part of the freelancer's balance.
    ///
    /// The balance is only checked here; it is reserved nowhere and checked
    /// again on approval.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::MethodDetailsIncomplete`] - Method fields missing.
    /// - [`SettlementError::NegativeAmount`] - `amount <= 0`.
    /// - [`SettlementError::WalletNotFound`] - Freelancer has no wallet.
    /// - [`SettlementError::InsufficientBalance`] - `balance < amount`.
    /// - [`SettlementError::PendingRequestExists`] - Another request is pending.
    pub fn request_withdrawal(
        &self,
        freelancer: FreelancerId,
        amount: Decimal,
        method: MethodKind,
        details: &PaymentDetails,
    ) -> Result<WithdrawalRequest, SettlementError> {
        let payment_method = PaymentMethod::from_details(method, details)?;
        let amount = round_money(amount);
        if amount <= Decimal::ZERO {
            return Err(SettlementError::NegativeAmount(amount));
        }

        let wallet = self
            .wallets
            .get(&freelancer)
            .ok_or(SettlementError::WalletNotFound)?;
        let available = wallet.balance();
        if available < amount {
            return Err(SettlementError::InsufficientBalance {
                available,
                required: amount,
            });
        }

        let fee_rate = self.policy.withdrawal_fee_rate;
        let mut request = WithdrawalRequest::new(
            freelancer,
            String::new(),
            FeeSplit::new(amount, fee_rate),
            fee_rate,
            payment_method,
        );

        // Claim the pending slot first; it is released before touching the
        // request map so the two are never locked together in this order.
        match self.pending_withdrawals.entry(freelancer) {
            Entry::Occupied(_) => return Err(SettlementError::PendingRequestExists),
            Entry::Vacant(slot) => {
                slot.insert(request.id);
            }
        }

        let id = request.id;
        match self.reserve_reference(id) {
            Ok(reference) => request.reference = reference,
            Err(error) => {
                self.pending_withdrawals
                    .remove_if(&freelancer, |_, pending| *pending == id);
                return Err(error);
            }
        }
        self.withdrawals.insert(request.id, request.clone());

        info!(
            request = %request.id,
            reference = %request.reference,
            freelancer = %freelancer,
            amount = %request.requested_amount,
            fee = %request.platform_fee,
            "withdrawal requested"
        );
        Ok(request)
    }

    /// Pays out a pending request.
    ///
    /// Books a completed debit entry, debits the freelancer by the requested
    /// amount and credits the fee to the platform, all under both wallet
    /// locks. The request lands directly on `Processed`.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NotAdmin`] - Actor is not an administrator.
    /// - [`SettlementError::RequestNotFound`] - Unknown request.
    /// - [`SettlementError::WalletNotFound`] - Freelancer has no wallet.
    /// - [`SettlementError::NotPending`] - Request already closed.
    /// - [`SettlementError::InsufficientBalance`] - Balance dropped below the
    ///   requested amount since the request was filed.
    pub fn approve_withdrawal(
        &self,
        id: RequestId,
        admin: AdminId,
        notes: Option<String>,
        payment_reference_id: Option<String>,
    ) -> Result<ApprovalReceipt, SettlementError> {
        self.ensure_admin(&admin)?;
        let freelancer = self
            .withdrawals
            .get(&id)
            .map(|request| request.freelancer)
            .ok_or(SettlementError::RequestNotFound)?;
        let wallet = self
            .wallets
            .get(&freelancer)
            .ok_or(SettlementError::WalletNotFound)?;

        let receipt = self.wallets.with_pair(&wallet, |freelancer_wallet, platform_wallet| {
            let mut request = self
                .withdrawals
                .get_mut(&id)
                .ok_or(SettlementError::RequestNotFound)?;
            request.ensure_pending()?;

            let requested = request.requested_amount;
            if freelancer_wallet.balance() < requested {
                return Err(SettlementError::InsufficientBalance {
                    available: freelancer_wallet.balance(),
                    required: requested,
                });
            }

            let entry = self.ledger.create_entry(NewEntry {
                gross: requested,
                fee_rate: request.fee_rate,
                parties: Parties {
                    admin: Some(admin),
                    withdrawal_request: Some(id),
                    ..Parties::freelancer(freelancer)
                },
                direction: Direction::Debit,
                kind: EntryType::Withdrawal,
                payment_reference: payment_reference_id.clone(),
            })?;
            freelancer_wallet.debit(requested, entry.id)?;
            platform_wallet.credit_withdrawal_fee(entry.platform_fee, requested, entry.id)?;

            request.close(WithdrawalStatus::Processed, Some(admin), notes);
            request.transaction_id = Some(entry.id);
            request.payment_reference_id = payment_reference_id;
            self.pending_withdrawals
                .remove_if(&freelancer, |_, pending| *pending == id);

            Ok(ApprovalReceipt {
                request: request.clone(),
                entry,
            })
        })?;

        info!(
            request = %id,
            freelancer = %freelancer,
            admin = %admin,
            ledger_reference = %receipt.entry.reference,
            amount = %receipt.request.requested_amount,
            fee = %receipt.entry.platform_fee,
            "withdrawal processed"
        );
        Ok(receipt)
    }

    /// Rejects a pending request. No money moves.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NotAdmin`] - Actor is not an administrator.
    /// - [`SettlementError::ReasonRequired`] - Reason missing or blank.
    /// - [`SettlementError::RequestNotFound`] - Unknown request.
    /// - [`SettlementError::NotPending`] - Request already closed.
    pub fn reject_withdrawal(
        &self,
        id: RequestId,
        admin: AdminId,
        reason: Option<String>,
        notes: Option<String>,
    ) -> Result<WithdrawalRequest, SettlementError> {
        self.ensure_admin(&admin)?;
        let reason = required_reason(reason)?;
        let request = self.close_pending(
            id,
            WithdrawalStatus::Rejected,
            Some(admin),
            notes,
            |request| request.rejection_reason = Some(reason),
        )?;

        info!(request = %id, admin = %admin, "withdrawal rejected");
        Ok(request)
    }

    /// Cancels the freelancer's own pending request.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::RequestNotFound`] - Unknown request.
    /// - [`SettlementError::NotOwner`] - Request belongs to someone else.
    /// - [`SettlementError::NotPending`] - Request already closed.
    pub fn cancel_withdrawal(
        &self,
        id: RequestId,
        freelancer: FreelancerId,
    ) -> Result<WithdrawalRequest, SettlementError> {
        let owner = self
            .withdrawals
            .get(&id)
            .map(|request| request.freelancer)
            .ok_or(SettlementError::RequestNotFound)?;
        if owner != freelancer {
            return Err(SettlementError::NotOwner);
        }
        let request = self.close_pending(id, WithdrawalStatus::Cancelled, None, None, |_| {})?;

        info!(request = %id, freelancer = %freelancer, "withdrawal cancelled");
        Ok(request)
    }

    /// Records that an off-platform payout attempt failed. No money moves.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::reject_withdrawal`].
    pub fn mark_withdrawal_failed(
        &self,
        id: RequestId,
        admin: AdminId,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest, SettlementError> {
        self.ensure_admin(&admin)?;
        let reason = required_reason(reason)?;
        let request = self.close_pending(
            id,
            WithdrawalStatus::Failed,
            Some(admin),
            Some(reason),
            |_| {},
        )?;

        info!(request = %id, admin = %admin, "withdrawal failed");
        Ok(request)
    }

    /// Puts a failed request back into the queue.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NotAdmin`] - Actor is not an administrator.
    /// - [`SettlementError::RequestNotFound`] - Unknown request.
    /// - [`SettlementError::NotFailed`] - Request is not `Failed`.
    /// - [`SettlementError::PendingRequestExists`] - The freelancer filed a new
    ///   request in the meantime.
    pub fn retry_withdrawal(
        &self,
        id: RequestId,
        admin: AdminId,
    ) -> Result<WithdrawalRequest, SettlementError> {
        self.ensure_admin(&admin)?;
        let mut request = self
            .withdrawals
            .get_mut(&id)
            .ok_or(SettlementError::RequestNotFound)?;
        if request.status != WithdrawalStatus::Failed {
            return Err(SettlementError::NotFailed {
                status: request.status,
            });
        }

        match self.pending_withdrawals.entry(request.freelancer) {
            Entry::Occupied(_) => return Err(SettlementError::PendingRequestExists),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        request.status = WithdrawalStatus::Pending;
        request.processed_by = None;
        request.processed_at = None;
        request.admin_notes = Some("Retry requested by admin".to_string());
        request.updated_at = Utc::now();

        info!(request = %id, admin = %admin, "withdrawal retried");
        Ok(request.clone())
    }

    /// Closes a pending request and frees the freelancer's pending slot.
    fn close_pending(
        &self,
        id: RequestId,
        status: WithdrawalStatus,
        admin: Option<AdminId>,
        notes: Option<String>,
        annotate: impl FnOnce(&mut WithdrawalRequest),
    ) -> Result<WithdrawalRequest, SettlementError> {
        let mut request = self
            .withdrawals
            .get_mut(&id)
            .ok_or(SettlementError::RequestNotFound)?;
        request.ensure_pending()?;

        request.close(status, admin, notes);
        annotate(&mut *request);
        self.pending_withdrawals
            .remove_if(&request.freelancer, |_, pending| *pending == id);
        Ok(request.clone())
    }

    fn reserve_reference(&self, id: RequestId) -> Result<String, SettlementError> {
        for _ in 0..REFERENCE_ATTEMPTS {
            let reference = generate_reference(REFERENCE_PREFIX);
            if let Entry::Vacant(slot) = self.withdrawal_references.entry(reference.clone()) {
                slot.insert(id);
                return Ok(reference);
            }
        }
        Err(SettlementError::Internal(
            "could not generate a unique withdrawal reference".to_string(),
        ))
    }
}
