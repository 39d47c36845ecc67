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

//! Booking operations: creation, lifecycle and payment settlement.

use crate::SettlementError;
use crate::base::{BookingId, FreelancerId, UserId};
use crate::booking::{Booking, BookingStatus, BookingTerms, NewBooking};
use crate::directory::ListingStatus;
use crate::engine::Engine;
use crate::ledger::{Direction, EntryStatus, EntryType, LedgerEntry, NewEntry, Parties};
use crate::wallet::{apply_settlement, check_settlement};
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Returned by [`Engine::create_booking`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub booking_id: BookingId,
    pub ledger_reference: String,
}

/// A settled entry seen through a payment confirmation is a conflict on the
/// booking, not a ledger misuse.
fn not_pending(error: SettlementError) -> SettlementError {
    match error {
        SettlementError::TerminalEntry { status } => SettlementError::LedgerEntryNotPending { status },
        other => other,
    }
}

impl Engine {
    /// Books a service and records a pending ledger credit for the booking
    /// amount.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::ServiceNotFound`] - Unknown service.
    /// - [`SettlementError::ServiceUnavailable`] - Listing is not active.
    /// - [`SettlementError::DuplicateActiveBooking`] - Client already holds an
    ///   accepted or hired booking for this service.
    /// - [`SettlementError::AmountExceedsPrice`],
    ///   [`SettlementError::AdvanceBelowMinimum`],
    ///   [`SettlementError::NegativeAmount`] - Amount does not fit the price.
    pub fn create_booking(&self, request: NewBooking) -> Result<BookingReceipt, SettlementError> {
        let listing = self
            .catalog
            .listing(&request.service)
            .ok_or(SettlementError::ServiceNotFound)?;
        if listing.status != ListingStatus::Active {
            return Err(SettlementError::ServiceUnavailable);
        }

        let duplicate = self.bookings.iter().any(|booking| {
            booking.service == request.service
                && booking.client == request.client
                && booking.status.is_active()
        });
        if duplicate {
            return Err(SettlementError::DuplicateActiveBooking);
        }

        let terms = BookingTerms::new(
            listing.price,
            request.payment_type,
            request.booking_amount,
            self.policy.advance_minimum_ratio,
        )?;

        // Holding the vacant slot keeps the booking invisible until its
        // ledger entry exists.
        let id = BookingId::new();
        let Entry::Vacant(slot) = self.bookings.entry(id) else {
            return Err(SettlementError::Internal("booking id collision".to_string()));
        };
        let entry = self.ledger.create_entry(NewEntry {
            gross: terms.booking_amount,
            fee_rate: self.policy.booking_fee_rate,
            parties: Parties {
                user: Some(request.client),
                booking: Some(id),
                ..Parties::freelancer(listing.owner)
            },
            direction: Direction::Credit,
            kind: EntryType::ServicePayment,
            payment_reference: None,
        })?;
        slot.insert(Booking::new(
            id,
            request,
            &listing,
            terms,
            entry.reference.clone(),
        ));

        info!(
            booking = %id,
            service = %listing.id,
            ledger_reference = %entry.reference,
            amount = %terms.booking_amount,
            pending = %terms.pending_amount,
            "booking created"
        );

        Ok(BookingReceipt {
            booking_id: id,
            ledger_reference: entry.reference,
        })
    }

    /// Moves a booking along its lifecycle on behalf of the service owner.
    ///
    /// Rejecting a booking that had been accepted also drops it from the
    /// shortlist projection, best-effort.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::BookingNotFound`] - Unknown booking.
    /// - [`SettlementError::NotOwner`] - Actor does not own the service.
    /// - [`SettlementError::InvalidTransition`] - Pair not in the lifecycle
    ///   table, or `Withdrawn` (a client action).
    pub fn update_booking_status(
        &self,
        id: BookingId,
        status: BookingStatus,
        freelancer: FreelancerId,
        notes: Option<String>,
    ) -> Result<Booking, SettlementError> {
        let (booking, unshortlist) = {
            let mut booking = self
                .bookings
                .get_mut(&id)
                .ok_or(SettlementError::BookingNotFound)?;
            if booking.freelancer != freelancer {
                return Err(SettlementError::NotOwner);
            }
            if status == BookingStatus::Withdrawn {
                return Err(SettlementError::InvalidTransition {
                    from: booking.status,
                    to: status,
                });
            }

            let was_accepted = booking.was_accepted();
            booking.transition(status, notes.clone())?;
            if status == BookingStatus::Completed {
                booking.completion_notes = notes;
            } else if notes.is_some() {
                booking.freelancer_notes = notes;
            }
            (
                booking.clone(),
                status == BookingStatus::Rejected && was_accepted,
            )
        };

        if unshortlist {
            if let Err(error) = self.shortlist.remove(&booking) {
                warn!(booking = %id, %error, "failed to update shortlist");
            }
        }

        info!(booking = %id, status = %status, "booking status updated");
        Ok(booking)
    }

    /// Marks a hired booking as completed.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::update_booking_status`]; any status other than
    /// `Hired` fails with [`SettlementError::InvalidTransition`].
    pub fn complete_booking(
        &self,
        id: BookingId,
        freelancer: FreelancerId,
        notes: Option<String>,
    ) -> Result<Booking, SettlementError> {
        self.update_booking_status(id, BookingStatus::Completed, freelancer, notes)
    }

    /// Withdraws a pending or accepted booking on behalf of its client.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::BookingNotFound`] - Unknown booking.
    /// - [`SettlementError::NotOwner`] - Actor is not the booking's client.
    /// - [`SettlementError::InvalidTransition`] - Booking is past `Accepted`.
    pub fn withdraw_booking(&self, id: BookingId, client: UserId) -> Result<Booking, SettlementError> {
        let mut booking = self
            .bookings
            .get_mut(&id)
            .ok_or(SettlementError::BookingNotFound)?;
        if booking.client != client {
            return Err(SettlementError::NotOwner);
        }
        booking.transition(BookingStatus::Withdrawn, None)?;

        info!(booking = %id, "booking withdrawn");
        Ok(booking.clone())
    }

    /// Records the client's payment outcome for the booking's ledger entry.
    ///
    /// A `Completed` outcome settles the entry into the freelancer and
    /// platform wallets under both wallet locks. The entry can leave
    /// `Pending` only once, so a payment is never credited twice.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::BookingNotFound`] - Unknown booking.
    /// - [`SettlementError::NotOwner`] - Actor is not the booking's client.
    /// - [`SettlementError::EntryNotFound`] - Reference unknown or not tied
    ///   to this booking.
    /// - [`SettlementError::LedgerEntryNotPending`] - Entry already settled.
    /// - [`SettlementError::InvalidEntryTransition`] - `status` is `Pending`.
    /// - [`SettlementError::Internal`] - Entry is not a credit to the
    ///   booking's freelancer; it stays pending.
    pub fn confirm_payment(
        &self,
        id: BookingId,
        client: UserId,
        status: EntryStatus,
        reference: &str,
    ) -> Result<LedgerEntry, SettlementError> {
        let freelancer = {
            let booking = self
                .bookings
                .get(&id)
                .ok_or(SettlementError::BookingNotFound)?;
            if booking.client != client {
                return Err(SettlementError::NotOwner);
            }
            booking.freelancer
        };

        let entry = self
            .ledger
            .get_by_reference(reference)
            .filter(|entry| entry.parties.booking == Some(id))
            .ok_or(SettlementError::EntryNotFound)?;
        if entry.status.is_terminal() {
            return Err(SettlementError::LedgerEntryNotPending {
                status: entry.status,
            });
        }

        if status != EntryStatus::Completed {
            let entry = self
                .ledger
                .update_status_by_reference(reference, status)
                .map_err(not_pending)?;
            info!(booking = %id, ledger_reference = %reference, status = %status, "payment closed without settlement");
            return Ok(entry);
        }

        check_settlement(&entry, freelancer)?;
        let wallet = self.wallets.get_or_create(freelancer);
        let settled = self.wallets.with_pair(&wallet, |freelancer_wallet, platform_wallet| {
            let settled = self
                .ledger
                .update_status_by_reference(reference, EntryStatus::Completed)
                .map_err(not_pending)?;
            apply_settlement(freelancer_wallet, platform_wallet, &settled)?;
            Ok(settled)
        })?;

        info!(
            booking = %id,
            ledger_reference = %reference,
            freelancer = %freelancer,
            net = %settled.amount,
            fee = %settled.platform_fee,
            "payment settled"
        );
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ServiceId;
    use crate::booking::{PaymentType, Schedule};
    use crate::directory::{InMemoryCatalog, InMemoryDirectory, ServiceListing};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        engine: Engine,
        catalog: Arc<InMemoryCatalog>,
        service: ServiceId,
        freelancer: FreelancerId,
        client: UserId,
    }

    fn fixture(price: Decimal) -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let freelancer = FreelancerId::new();
        directory.add_freelancer(freelancer);
        let service = ServiceId::new();
        catalog.insert(ServiceListing {
            id: service,
            owner: freelancer,
            price,
            status: ListingStatus::Active,
        });
        Fixture {
            engine: Engine::new(catalog.clone(), directory),
            catalog,
            service,
            freelancer,
            client: UserId::new(),
        }
    }

    fn request(f: &Fixture, payment_type: PaymentType, amount: Decimal) -> NewBooking {
        NewBooking {
            service: f.service,
            client: f.client,
            payment_type,
            booking_amount: amount,
            schedule: Schedule {
                date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                time: "09:00-11:00".to_string(),
            },
            notes: Some("ring the bell".to_string()),
        }
    }

    #[test]
    fn create_records_pending_entry() {
        let f = fixture(dec!(1000));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Advance, dec!(300)))
            .unwrap();

        let booking = f.engine.booking(&receipt.booking_id).unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.pending_amount, dec!(700));
        assert_eq!(booking.ledger_reference, receipt.ledger_reference);

        let entry = f.engine.entry(&receipt.ledger_reference).unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.amount, dec!(270));
        assert_eq!(entry.platform_fee, dec!(30));
        assert_eq!(entry.parties.booking, Some(receipt.booking_id));
    }

    #[test]
    fn inactive_listing_cannot_be_booked() {
        let f = fixture(dec!(100));
        f.catalog.set_status(&f.service, ListingStatus::Inactive);
        let result = f.engine.create_booking(request(&f, PaymentType::Full, dec!(100)));
        assert_eq!(result, Err(SettlementError::ServiceUnavailable));
        assert!(f.engine.ledger().is_empty());
    }

    #[test]
    fn active_booking_blocks_another() {
        let f = fixture(dec!(100));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(100)))
            .unwrap();
        f.engine
            .update_booking_status(receipt.booking_id, BookingStatus::Accepted, f.freelancer, None)
            .unwrap();

        let result = f.engine.create_booking(request(&f, PaymentType::Full, dec!(100)));
        assert_eq!(result, Err(SettlementError::DuplicateActiveBooking));
    }

    #[test]
    fn only_owner_updates_status() {
        let f = fixture(dec!(100));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(100)))
            .unwrap();
        let result = f.engine.update_booking_status(
            receipt.booking_id,
            BookingStatus::Accepted,
            FreelancerId::new(),
            None,
        );
        assert_eq!(result, Err(SettlementError::NotOwner));
    }

    #[test]
    fn freelancer_cannot_withdraw_for_client() {
        let f = fixture(dec!(100));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(100)))
            .unwrap();
        let result = f.engine.update_booking_status(
            receipt.booking_id,
            BookingStatus::Withdrawn,
            f.freelancer,
            None,
        );
        assert_eq!(
            result,
            Err(SettlementError::InvalidTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::Withdrawn
            })
        );
    }

    #[test]
    fn misattributed_entry_stays_pending() {
        let f = fixture(dec!(1000));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(1000)))
            .unwrap();

        let stray = f
            .engine
            .ledger
            .create_entry(NewEntry {
                gross: dec!(1000),
                fee_rate: dec!(0.10),
                parties: Parties {
                    booking: Some(receipt.booking_id),
                    ..Parties::freelancer(FreelancerId::new())
                },
                direction: Direction::Credit,
                kind: EntryType::ServicePayment,
                payment_reference: None,
            })
            .unwrap();

        let result = f.engine.confirm_payment(
            receipt.booking_id,
            f.client,
            EntryStatus::Completed,
            &stray.reference,
        );
        assert!(matches!(result, Err(SettlementError::Internal(_))));
        assert_eq!(
            f.engine.entry(&stray.reference).unwrap().status,
            EntryStatus::Pending
        );
        assert_eq!(f.engine.platform_wallet().total_earnings(), Decimal::ZERO);
    }

    #[test]
    fn confirm_twice_is_a_conflict() {
        let f = fixture(dec!(1000));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(1000)))
            .unwrap();
        f.engine
            .confirm_payment(
                receipt.booking_id,
                f.client,
                EntryStatus::Completed,
                &receipt.ledger_reference,
            )
            .unwrap();

        let again = f.engine.confirm_payment(
            receipt.booking_id,
            f.client,
            EntryStatus::Completed,
            &receipt.ledger_reference,
        );
        assert_eq!(
            again,
            Err(SettlementError::LedgerEntryNotPending {
                status: EntryStatus::Completed
            })
        );
        assert_eq!(f.engine.wallet(&f.freelancer).unwrap().balance(), dec!(900));
        assert_eq!(f.engine.platform_wallet().current_balance(), dec!(1000));
    }

    #[test]
    fn failed_payment_moves_no_money() {
        let f = fixture(dec!(200));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(200)))
            .unwrap();
        let entry = f
            .engine
            .confirm_payment(
                receipt.booking_id,
                f.client,
                EntryStatus::Failed,
                &receipt.ledger_reference,
            )
            .unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert!(f.engine.wallet(&f.freelancer).is_none());
        assert_eq!(f.engine.platform_wallet().current_balance(), Decimal::ZERO);
    }

    #[test]
    fn reference_of_another_booking_is_not_found() {
        let f = fixture(dec!(200));
        let first = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(200)))
            .unwrap();
        let second = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(200)))
            .unwrap();
        let result = f.engine.confirm_payment(
            first.booking_id,
            f.client,
            EntryStatus::Completed,
            &second.ledger_reference,
        );
        assert_eq!(result, Err(SettlementError::EntryNotFound));
    }

    #[test]
    fn stranger_cannot_confirm_payment() {
        let f = fixture(dec!(200));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(200)))
            .unwrap();
        let result = f.engine.confirm_payment(
            receipt.booking_id,
            UserId::new(),
            EntryStatus::Completed,
            &receipt.ledger_reference,
        );
        assert_eq!(result, Err(SettlementError::NotOwner));
    }

    #[test]
    fn zero_amount_booking_settles_without_money() {
        let f = fixture(dec!(500));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::PayAfterService, Decimal::ZERO))
            .unwrap();
        let entry = f
            .engine
            .confirm_payment(
                receipt.booking_id,
                f.client,
                EntryStatus::Completed,
                &receipt.ledger_reference,
            )
            .unwrap();
        assert_eq!(entry.status, EntryStatus::Completed);
        assert_eq!(f.engine.wallet(&f.freelancer).unwrap().balance(), Decimal::ZERO);
        assert!(f.engine.platform_wallet().entries().is_empty());
    }

    #[test]
    fn complete_requires_hired() {
        let f = fixture(dec!(100));
        let receipt = f
            .engine
            .create_booking(request(&f, PaymentType::Full, dec!(100)))
            .unwrap();
        let result = f
            .engine
            .complete_booking(receipt.booking_id, f.freelancer, None);
        assert_eq!(
            result,
            Err(SettlementError::InvalidTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::Completed
            })
        );

        for status in [BookingStatus::Accepted, BookingStatus::Hired] {
            f.engine
                .update_booking_status(receipt.booking_id, status, f.freelancer, None)
                .unwrap();
        }
        let booking = f
            .engine
            .complete_booking(receipt.booking_id, f.freelancer, Some("delivered".into()))
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Completed);
        assert!(booking.completed_at.is_some());
        assert_eq!(booking.completion_notes.as_deref(), Some("delivered"));
    }
}
