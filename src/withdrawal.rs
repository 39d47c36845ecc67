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

//! Withdrawal requests.
//!
//! ```text
//! Pending ──approve──► Processed
//!    │ ──reject───► Rejected
//!    │ ──cancel───► Cancelled (freelancer)
//!    └──fail─────► Failed ──retry──► Pending
//! ```

use crate::SettlementError;
use crate::base::{AdminId, EntryId, FreelancerId, RequestId};
use crate::ledger::FeeSplit;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of generated withdrawal references.
pub const REFERENCE_PREFIX: &str = "KDWR";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    /// Approval is atomic and lands on `Processed`; this value is never
    /// stored by the engine.
    Approved,
    Rejected,
    Processed,
    Failed,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    BankTransfer,
    Upi,
    Paypal,
    Other,
}

/// Raw payout details as submitted. Which fields are required depends on
/// the [`MethodKind`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentDetails {
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub ifsc_code: Option<String>,
    pub account_holder_name: Option<String>,
    pub upi_id: Option<String>,
    pub paypal_email: Option<String>,
    pub other_details: Option<String>,
}

/// Validated payout destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer {
        bank_name: String,
        account_number: String,
        ifsc_code: String,
        account_holder_name: String,
    },
    Upi {
        upi_id: String,
    },
    Paypal {
        email: String,
    },
    Other {
        details: String,
    },
}

fn present(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl PaymentMethod {
    /// Builds a payout method, listing every missing field on failure.
    ///
    /// Blank strings count as missing.
    pub fn from_details(
        kind: MethodKind,
        details: &PaymentDetails,
    ) -> Result<Self, SettlementError> {
        let mut missing = Vec::new();
        let mut require = |field: &Option<String>, name: &'static str| {
            let value = present(field);
            if value.is_none() {
                missing.push(name);
            }
            value.unwrap_or_default()
        };

        let method = match kind {
            MethodKind::BankTransfer => Self::BankTransfer {
                bank_name: require(&details.bank_name, "bank name"),
                account_number: require(&details.account_number, "account number"),
                ifsc_code: require(&details.ifsc_code, "IFSC code"),
                account_holder_name: require(&details.account_holder_name, "account holder name"),
            },
            MethodKind::Upi => Self::Upi {
                upi_id: require(&details.upi_id, "UPI ID"),
            },
            MethodKind::Paypal => Self::Paypal {
                email: require(&details.paypal_email, "PayPal email"),
            },
            MethodKind::Other => Self::Other {
                details: require(&details.other_details, "payment details"),
            },
        };

        if missing.is_empty() {
            Ok(method)
        } else {
            Err(SettlementError::MethodDetailsIncomplete(missing))
        }
    }

    pub fn kind(&self) -> MethodKind {
        match self {
            Self::BankTransfer { .. } => MethodKind::BankTransfer,
            Self::Upi { .. } => MethodKind::Upi,
            Self::Paypal { .. } => MethodKind::Paypal,
            Self::Other { .. } => MethodKind::Other,
        }
    }
}

/// A freelancer's payout request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub id: RequestId,
    pub reference: String,
    pub freelancer: FreelancerId,
    pub requested_amount: Decimal,
    pub platform_fee: Decimal,
    /// Rate the fee was priced with, reused when the payout is booked.
    pub fee_rate: Decimal,
    pub status: WithdrawalStatus,
    pub payment_method: PaymentMethod,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub processed_by: Option<AdminId>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Ledger entry booked on approval.
    pub transaction_id: Option<EntryId>,
    pub payment_reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    pub(crate) fn new(
        freelancer: FreelancerId,
        reference: String,
        split: FeeSplit,
        fee_rate: Decimal,
        payment_method: PaymentMethod,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            reference,
            freelancer,
            requested_amount: split.gross,
            platform_fee: split.fee,
            fee_rate,
            status: WithdrawalStatus::Pending,
            payment_method,
            admin_notes: None,
            rejection_reason: None,
            processed_by: None,
            processed_at: None,
            transaction_id: None,
            payment_reference_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Net amount the freelancer receives.
    pub fn payout_amount(&self) -> Decimal {
        self.requested_amount - self.platform_fee
    }

    pub(crate) fn ensure_pending(&self) -> Result<(), SettlementError> {
        if self.status != WithdrawalStatus::Pending {
            return Err(SettlementError::NotPending {
                status: self.status,
            });
        }
        Ok(())
    }

    /// Moves to a terminal status decided by an admin.
    pub(crate) fn close(
        &mut self,
        status: WithdrawalStatus,
        admin: Option<AdminId>,
        notes: Option<String>,
    ) {
        let now = Utc::now();
        self.status = status;
        if admin.is_some() {
            self.processed_by = admin;
            self.processed_at = Some(now);
        }
        if notes.is_some() {
            self.admin_notes = notes;
        }
        self.updated_at = now;
    }
}

/// Count and requested total for one status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusTotals {
    pub count: usize,
    pub amount: Decimal,
}

/// Aggregate view of a freelancer's withdrawal history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalSummary {
    pub by_status: BTreeMap<WithdrawalStatus, StatusTotals>,
    pub total_requested: Decimal,
    pub total_processed: Decimal,
    pub total_pending: Decimal,
}

impl WithdrawalSummary {
    pub(crate) fn record(&mut self, request: &WithdrawalRequest) {
        let totals = self.by_status.entry(request.status).or_default();
        totals.count += 1;
        totals.amount += request.requested_amount;

        self.total_requested += request.requested_amount;
        match request.status {
            WithdrawalStatus::Processed => self.total_processed += request.requested_amount,
            WithdrawalStatus::Pending => self.total_pending += request.requested_amount,
            _ => {}
        }
    }
}
