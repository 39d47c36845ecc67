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

//! Bookings and their lifecycle.
//!
//! ```text
//!   Pending ──accept──► Accepted ──hire──► Hired ──complete──► Completed
//!      │                   │                 │
//!      ├──reject───────────┴──reject─────────┴──reject──► Rejected
//!      │                   │
//!      └──withdraw─────────┴──withdraw (client)─────────► Withdrawn
//! ```
//!
//! Completed, Rejected and Withdrawn are terminal.

use crate::SettlementError;
use crate::base::{BookingId, FreelancerId, ServiceId, UserId, round_money};
use crate::directory::ServiceListing;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
    Hired,
    Completed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        Self::Pending,
        Self::Accepted,
        Self::Rejected,
        Self::Withdrawn,
        Self::Hired,
        Self::Completed,
    ];

    /// Whether the lifecycle table allows `self -> next`.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted | Rejected | Withdrawn)
                | (Accepted, Hired | Rejected | Withdrawn)
                | (Hired, Completed | Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Withdrawn)
    }

    /// Accepted and hired bookings block a second booking of the same
    /// service by the same client.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Accepted | Self::Hired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
            Self::Hired => "hired",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentType {
    Full,
    Advance,
    PayAfterService,
}

/// When the client wants the service delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub date: NaiveDate,
    /// Free-form slot, e.g. `"10:00-12:00"`.
    pub time: String,
}

/// Input to `Engine::create_booking`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub service: ServiceId,
    pub client: UserId,
    pub payment_type: PaymentType,
    pub booking_amount: Decimal,
    pub schedule: Schedule,
    pub notes: Option<String>,
}

/// Amounts derived from a listing price and a requested booking amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingTerms {
    pub price: Decimal,
    pub booking_amount: Decimal,
    pub pending_amount: Decimal,
}

impl BookingTerms {
    /// Validates the booking amount against the listing price.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NegativeAmount`] - `booking_amount < 0`.
    /// - [`SettlementError::AmountExceedsPrice`] - `booking_amount > price`.
    /// - [`SettlementError::AdvanceBelowMinimum`] - Advance below
    ///   `advance_minimum_ratio * price`.
    pub fn new(
        price: Decimal,
        payment_type: PaymentType,
        booking_amount: Decimal,
        advance_minimum_ratio: Decimal,
    ) -> Result<Self, SettlementError> {
        let price = round_money(price);
        let booking_amount = round_money(booking_amount);

        if booking_amount < Decimal::ZERO {
            return Err(SettlementError::NegativeAmount(booking_amount));
        }
        if booking_amount > price {
            return Err(SettlementError::AmountExceedsPrice {
                amount: booking_amount,
                price,
            });
        }
        if payment_type == PaymentType::Advance {
            let minimum = round_money(price * advance_minimum_ratio);
            if booking_amount < minimum {
                return Err(SettlementError::AdvanceBelowMinimum { minimum });
            }
        }

        Ok(Self {
            price,
            booking_amount,
            pending_amount: price - booking_amount,
        })
    }
}

/// One recorded lifecycle step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// A client's booking of a freelancer's service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: BookingId,
    pub service: ServiceId,
    /// Owner of the service at booking time.
    pub freelancer: FreelancerId,
    pub client: UserId,
    pub status: BookingStatus,
    pub payment_type: PaymentType,
    pub price: Decimal,
    pub booking_amount: Decimal,
    pub pending_amount: Decimal,
    pub ledger_reference: String,
    pub schedule: Schedule,
    pub additional_notes: Option<String>,
    pub freelancer_notes: Option<String>,
    pub completion_notes: Option<String>,
    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub hired_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub(crate) fn new(
        id: BookingId,
        request: NewBooking,
        listing: &ServiceListing,
        terms: BookingTerms,
        ledger_reference: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            service: request.service,
            freelancer: listing.owner,
            client: request.client,
            status: BookingStatus::Pending,
            payment_type: request.payment_type,
            price: terms.price,
            booking_amount: terms.booking_amount,
            pending_amount: terms.pending_amount,
            ledger_reference,
            schedule: request.schedule,
            additional_notes: request.notes,
            freelancer_notes: None,
            completion_notes: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            accepted_at: None,
            hired_at: None,
            rejected_at: None,
            completed_at: None,
            withdrawn_at: None,
        }
    }

    /// Whether the booking ever reached `Accepted`.
    pub fn was_accepted(&self) -> bool {
        self.accepted_at.is_some()
    }

    /// Applies a transition from the lifecycle table, stamping its timestamp
    /// and appending to the history.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::InvalidTransition`] for any pair outside
    /// the table.
    pub(crate) fn transition(
        &mut self,
        next: BookingStatus,
        notes: Option<String>,
    ) -> Result<(), SettlementError> {
        if !self.status.can_transition_to(next) {
            return Err(SettlementError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            BookingStatus::Accepted => self.accepted_at = Some(now),
            BookingStatus::Hired => self.hired_at = Some(now),
            BookingStatus::Rejected => self.rejected_at = Some(now),
            BookingStatus::Completed => self.completed_at = Some(now),
            BookingStatus::Withdrawn => self.withdrawn_at = Some(now),
            BookingStatus::Pending => {}
        }
        self.history.push(StatusChange {
            from: self.status,
            to: next,
            at: now,
            notes,
        });
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Timestamp recorded for reaching `status`, if any.
    pub fn stamped_at(&self, status: BookingStatus) -> Option<DateTime<Utc>> {
        match status {
            BookingStatus::Pending => Some(self.created_at),
            BookingStatus::Accepted => self.accepted_at,
            BookingStatus::Hired => self.hired_at,
            BookingStatus::Rejected => self.rejected_at,
            BookingStatus::Completed => self.completed_at,
            BookingStatus::Withdrawn => self.withdrawn_at,
        }
    }
}
