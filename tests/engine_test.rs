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

//! Engine public API integration tests.

use chrono::NaiveDate;
use gig_settlement::{
    AdminId, BookingId, BookingStatus, Direction, Engine, EntryStatus, EntryType, ErrorKind,
    FeePolicy, FreelancerId, InMemoryCatalog, InMemoryDirectory, ListingStatus, MethodKind,
    NewBooking, PaymentDetails, PaymentType, Schedule, ServiceId, ServiceListing, SettlementError,
    Shortlist, UserId, WithdrawalStatus,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

struct Market {
    engine: Engine,
    catalog: Arc<InMemoryCatalog>,
    freelancer: FreelancerId,
    admin: AdminId,
    service: ServiceId,
    client: UserId,
}

fn market_with(price: Decimal, policy: FeePolicy) -> Market {
    let catalog = Arc::new(InMemoryCatalog::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let freelancer = FreelancerId::new();
    let admin = AdminId::new();
    directory.add_freelancer(freelancer);
    directory.add_admin(admin);

    let service = ServiceId::new();
    catalog.insert(ServiceListing {
        id: service,
        owner: freelancer,
        price,
        status: ListingStatus::Active,
    });

    let engine = Engine::new(catalog.clone(), directory)
        .with_policy(policy)
        .unwrap();
    engine.open_wallet(freelancer).unwrap();

    Market {
        engine,
        catalog,
        freelancer,
        admin,
        service,
        client: UserId::new(),
    }
}

fn market(price: Decimal) -> Market {
    market_with(price, FeePolicy::default())
}

fn make_booking(m: &Market, payment_type: PaymentType, amount: Decimal) -> NewBooking {
    NewBooking {
        service: m.service,
        client: m.client,
        payment_type,
        booking_amount: amount,
        schedule: Schedule {
            date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            time: "10:00-12:00".to_string(),
        },
        notes: None,
    }
}

/// Books and confirms payment, returning the booking id.
fn settle(m: &Market, payment_type: PaymentType, amount: Decimal) -> BookingId {
    let receipt = m
        .engine
        .create_booking(make_booking(m, payment_type, amount))
        .unwrap();
    m.engine
        .confirm_payment(
            receipt.booking_id,
            m.client,
            EntryStatus::Completed,
            &receipt.ledger_reference,
        )
        .unwrap();
    receipt.booking_id
}

fn upi() -> PaymentDetails {
    PaymentDetails {
        upi_id: Some("freelancer@okbank".to_string()),
        ..PaymentDetails::default()
    }
}

// === End-to-end ===

#[test]
fn advance_booking_to_payout() {
    let m = market(dec!(1000));

    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Advance, dec!(300)))
        .unwrap();
    let booking = m.engine.booking(&receipt.booking_id).unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.booking_amount, dec!(300));
    assert_eq!(booking.pending_amount, dec!(700));

    let entry = m.engine.entry(&receipt.ledger_reference).unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);
    assert_eq!(entry.platform_fee, dec!(30));
    assert_eq!(entry.amount, dec!(270));

    m.engine
        .confirm_payment(
            receipt.booking_id,
            m.client,
            EntryStatus::Completed,
            &receipt.ledger_reference,
        )
        .unwrap();
    let wallet = m.engine.wallet(&m.freelancer).unwrap();
    let platform = m.engine.platform_wallet();
    assert_eq!(wallet.balance(), dec!(270));
    assert_eq!(platform.current_balance(), dec!(300));
    assert_eq!(platform.total_earnings(), dec!(300));

    let request = m
        .engine
        .request_withdrawal(m.freelancer, dec!(270), MethodKind::Upi, &upi())
        .unwrap();
    assert_eq!(request.platform_fee, dec!(13.50));

    let receipt = m
        .engine
        .approve_withdrawal(request.id, m.admin, None, Some("UTR-991".to_string()))
        .unwrap();
    assert_eq!(receipt.request.status, WithdrawalStatus::Processed);
    assert_eq!(receipt.entry.kind, EntryType::Withdrawal);
    assert_eq!(receipt.entry.direction, Direction::Debit);
    assert_eq!(receipt.entry.status, EntryStatus::Completed);

    assert_eq!(wallet.balance(), dec!(0));
    assert_eq!(platform.current_balance(), dec!(313.50));
    assert_eq!(platform.total_withdrawals(), dec!(270));
    assert_eq!(platform.total_earnings(), dec!(300));
    assert_eq!(m.engine.ledger().replay_balance(&m.freelancer), wallet.balance());
}

#[test]
fn wallet_entries_reference_ledger() {
    let m = market(dec!(500));
    settle(&m, PaymentType::Full, dec!(500));

    let wallet = m.engine.wallet(&m.freelancer).unwrap();
    let entries = m.engine.ledger().entries_for(&m.freelancer);
    assert_eq!(wallet.entries(), vec![entries[0].id]);
    assert_eq!(m.engine.platform_wallet().entries(), vec![entries[0].id]);
}

// === Booking lifecycle ===

#[test]
fn full_lifecycle_stamps_each_step() {
    let m = market(dec!(200));
    let id = settle(&m, PaymentType::Full, dec!(200));

    for status in [BookingStatus::Accepted, BookingStatus::Hired] {
        m.engine
            .update_booking_status(id, status, m.freelancer, Some(format!("{status}")))
            .unwrap();
    }
    let booking = m
        .engine
        .complete_booking(id, m.freelancer, Some("delivered".to_string()))
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Completed);
    assert!(booking.accepted_at.is_some());
    assert!(booking.hired_at.is_some());
    assert!(booking.completed_at.is_some());
    assert_eq!(booking.freelancer_notes.as_deref(), Some("hired"));
    assert_eq!(booking.history.len(), 3);
}

#[test]
fn client_withdraws_accepted_booking() {
    let m = market(dec!(200));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(200)))
        .unwrap();
    m.engine
        .update_booking_status(receipt.booking_id, BookingStatus::Accepted, m.freelancer, None)
        .unwrap();

    assert_eq!(
        m.engine.withdraw_booking(receipt.booking_id, UserId::new()),
        Err(SettlementError::NotOwner)
    );
    let booking = m
        .engine
        .withdraw_booking(receipt.booking_id, m.client)
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Withdrawn);
    assert!(booking.withdrawn_at.is_some());

    assert!(matches!(
        m.engine.withdraw_booking(receipt.booking_id, m.client),
        Err(SettlementError::InvalidTransition { .. })
    ));
}

#[test]
fn hired_booking_cannot_be_withdrawn() {
    let m = market(dec!(200));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(200)))
        .unwrap();
    for status in [BookingStatus::Accepted, BookingStatus::Hired] {
        m.engine
            .update_booking_status(receipt.booking_id, status, m.freelancer, None)
            .unwrap();
    }
    assert_eq!(
        m.engine.withdraw_booking(receipt.booking_id, m.client),
        Err(SettlementError::InvalidTransition {
            from: BookingStatus::Hired,
            to: BookingStatus::Withdrawn
        })
    );
}

#[test]
fn terminal_booking_rejects_every_move() {
    let m = market(dec!(200));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(200)))
        .unwrap();
    m.engine
        .update_booking_status(receipt.booking_id, BookingStatus::Rejected, m.freelancer, None)
        .unwrap();

    for status in BookingStatus::ALL {
        let result =
            m.engine
                .update_booking_status(receipt.booking_id, status, m.freelancer, None);
        assert_eq!(
            result.map_err(|e| e.kind()),
            Err(ErrorKind::InvalidStateTransition)
        );
    }
}

#[test]
fn withdrawn_booking_frees_the_service() {
    let m = market(dec!(200));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(200)))
        .unwrap();
    m.engine
        .update_booking_status(receipt.booking_id, BookingStatus::Accepted, m.freelancer, None)
        .unwrap();
    assert_eq!(
        m.engine
            .create_booking(make_booking(&m, PaymentType::Full, dec!(200)))
            .map(|_| ()),
        Err(SettlementError::DuplicateActiveBooking)
    );

    m.engine
        .withdraw_booking(receipt.booking_id, m.client)
        .unwrap();
    m.engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(200)))
        .unwrap();
}

// === Booking validation ===

#[test]
fn booking_amount_rules() {
    let m = market(dec!(1000));
    let cases = [
        (
            PaymentType::Advance,
            dec!(299.99),
            SettlementError::AdvanceBelowMinimum { minimum: dec!(300) },
        ),
        (
            PaymentType::PayAfterService,
            dec!(1000.01),
            SettlementError::AmountExceedsPrice {
                amount: dec!(1000.01),
                price: dec!(1000),
            },
        ),
        (
            PaymentType::PayAfterService,
            dec!(-1),
            SettlementError::NegativeAmount(dec!(-1)),
        ),
    ];

    for (payment_type, amount, expected) in cases {
        let result = m
            .engine
            .create_booking(make_booking(&m, payment_type, amount));
        assert_eq!(result.map(|_| ()), Err(expected));
    }
    assert!(m.engine.ledger().is_empty());
}

#[test]
fn full_payment_may_cover_part_of_price() {
    let m = market(dec!(1000));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(500)))
        .unwrap();

    let booking = m.engine.booking(&receipt.booking_id).unwrap();
    assert_eq!(booking.booking_amount, dec!(500));
    assert_eq!(booking.pending_amount, dec!(500));
    let entry = m.engine.entry(&receipt.ledger_reference).unwrap();
    assert_eq!(entry.gross(), dec!(500));
}

#[test]
fn unknown_and_suspended_services() {
    let m = market(dec!(100));
    let mut request = make_booking(&m, PaymentType::Full, dec!(100));
    request.service = ServiceId::new();
    assert_eq!(
        m.engine.create_booking(request).map(|_| ()),
        Err(SettlementError::ServiceNotFound)
    );

    m.catalog.set_status(&m.service, ListingStatus::Suspended);
    assert_eq!(
        m.engine
            .create_booking(make_booking(&m, PaymentType::Full, dec!(100)))
            .map(|_| ()),
        Err(SettlementError::ServiceUnavailable)
    );
}

#[test]
fn pay_after_service_records_zero_entry() {
    let m = market(dec!(800));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::PayAfterService, dec!(0)))
        .unwrap();

    let booking = m.engine.booking(&receipt.booking_id).unwrap();
    assert_eq!(booking.pending_amount, dec!(800));
    let entry = m.engine.entry(&receipt.ledger_reference).unwrap();
    assert_eq!(entry.gross(), Decimal::ZERO);
    assert_eq!(entry.status, EntryStatus::Pending);
}

#[test]
fn pay_after_service_with_part_payment() {
    let m = market(dec!(800));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::PayAfterService, dec!(200)))
        .unwrap();

    let booking = m.engine.booking(&receipt.booking_id).unwrap();
    assert_eq!(booking.booking_amount, dec!(200));
    assert_eq!(booking.pending_amount, dec!(600));
    let entry = m.engine.entry(&receipt.ledger_reference).unwrap();
    assert_eq!(entry.gross(), dec!(200));
    assert_eq!(entry.platform_fee, dec!(20));
}

#[test]
fn custom_policy_changes_fees() {
    let policy = FeePolicy {
        booking_fee_rate: dec!(0.20),
        withdrawal_fee_rate: dec!(0.02),
        advance_minimum_ratio: dec!(0.50),
    };
    let m = market_with(dec!(1000), policy);

    assert!(matches!(
        m.engine
            .create_booking(make_booking(&m, PaymentType::Advance, dec!(300))),
        Err(SettlementError::AdvanceBelowMinimum { .. })
    ));
    settle(&m, PaymentType::Advance, dec!(500));
    assert_eq!(m.engine.wallet(&m.freelancer).unwrap().balance(), dec!(400));

    let request = m
        .engine
        .request_withdrawal(m.freelancer, dec!(400), MethodKind::Upi, &upi())
        .unwrap();
    assert_eq!(request.platform_fee, dec!(8.00));
}

// === Payment confirmation ===

#[test]
fn second_confirmation_is_a_conflict() {
    let m = market(dec!(1000));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(1000)))
        .unwrap();
    let confirm = || {
        m.engine.confirm_payment(
            receipt.booking_id,
            m.client,
            EntryStatus::Completed,
            &receipt.ledger_reference,
        )
    };

    confirm().unwrap();
    let error = confirm().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Conflict);
    assert_eq!(m.engine.wallet(&m.freelancer).unwrap().balance(), dec!(900));
    assert_eq!(m.engine.platform_wallet().total_earnings(), dec!(1000));
}

#[test]
fn cancelled_payment_cannot_be_completed_later() {
    let m = market(dec!(100));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(100)))
        .unwrap();
    m.engine
        .confirm_payment(
            receipt.booking_id,
            m.client,
            EntryStatus::Cancelled,
            &receipt.ledger_reference,
        )
        .unwrap();

    assert_eq!(
        m.engine.confirm_payment(
            receipt.booking_id,
            m.client,
            EntryStatus::Completed,
            &receipt.ledger_reference,
        ),
        Err(SettlementError::LedgerEntryNotPending {
            status: EntryStatus::Cancelled
        })
    );
    assert_eq!(m.engine.wallet(&m.freelancer).unwrap().balance(), dec!(0));
}

#[test]
fn pending_is_not_a_confirmation_outcome() {
    let m = market(dec!(100));
    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(100)))
        .unwrap();
    let result = m.engine.confirm_payment(
        receipt.booking_id,
        m.client,
        EntryStatus::Pending,
        &receipt.ledger_reference,
    );
    assert_eq!(
        result.map_err(|e| e.kind()),
        Err(ErrorKind::InvalidStateTransition)
    );
}

#[test]
fn unknown_booking_and_reference() {
    let m = market(dec!(100));
    assert_eq!(
        m.engine.confirm_payment(
            BookingId::new(),
            m.client,
            EntryStatus::Completed,
            "TNXKD-0-AAAAAA"
        ),
        Err(SettlementError::BookingNotFound)
    );

    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(100)))
        .unwrap();
    assert_eq!(
        m.engine.confirm_payment(
            receipt.booking_id,
            m.client,
            EntryStatus::Completed,
            "TNXKD-0-AAAAAA"
        ),
        Err(SettlementError::EntryNotFound)
    );
}

// === Withdrawals ===

#[test]
fn one_pending_request_at_a_time() {
    let m = market(dec!(1000));
    settle(&m, PaymentType::Full, dec!(1000));

    let first = m
        .engine
        .request_withdrawal(m.freelancer, dec!(100), MethodKind::Upi, &upi())
        .unwrap();
    let second = m
        .engine
        .request_withdrawal(m.freelancer, dec!(100), MethodKind::Upi, &upi());
    assert_eq!(
        second.map_err(|e| e.kind()),
        Err(ErrorKind::Conflict)
    );

    m.engine
        .approve_withdrawal(first.id, m.admin, None, None)
        .unwrap();
    let third = m
        .engine
        .request_withdrawal(m.freelancer, dec!(100), MethodKind::Upi, &upi())
        .unwrap();
    m.engine
        .reject_withdrawal(third.id, m.admin, Some("duplicate".into()), None)
        .unwrap();
    let fourth = m
        .engine
        .request_withdrawal(m.freelancer, dec!(100), MethodKind::Upi, &upi())
        .unwrap();
    m.engine.cancel_withdrawal(fourth.id, m.freelancer).unwrap();
    m.engine
        .request_withdrawal(m.freelancer, dec!(100), MethodKind::Upi, &upi())
        .unwrap();
}

#[test]
fn overdrawn_request_changes_nothing() {
    let m = market(dec!(100));
    settle(&m, PaymentType::Full, dec!(100));
    let ledger_size = m.engine.ledger().len();

    let result = m
        .engine
        .request_withdrawal(m.freelancer, dec!(90.01), MethodKind::Upi, &upi());
    assert_eq!(
        result.map_err(|e| e.kind()),
        Err(ErrorKind::InsufficientFunds)
    );
    assert_eq!(m.engine.wallet(&m.freelancer).unwrap().balance(), dec!(90));
    assert_eq!(m.engine.ledger().len(), ledger_size);
    assert_eq!(m.engine.withdrawal_summary(&m.freelancer).total_requested, dec!(0));
}

#[test]
fn closed_requests_reject_admin_actions() {
    let m = market(dec!(100));
    settle(&m, PaymentType::Full, dec!(100));
    let request = m
        .engine
        .request_withdrawal(m.freelancer, dec!(50), MethodKind::Upi, &upi())
        .unwrap();
    m.engine
        .approve_withdrawal(request.id, m.admin, None, None)
        .unwrap();

    let approve = m.engine.approve_withdrawal(request.id, m.admin, None, None);
    let reject = m
        .engine
        .reject_withdrawal(request.id, m.admin, Some("late".into()), None);
    for result in [approve.map(|_| ()), reject.map(|_| ())] {
        assert_eq!(
            result,
            Err(SettlementError::NotPending {
                status: WithdrawalStatus::Processed
            })
        );
    }
    assert_eq!(m.engine.wallet(&m.freelancer).unwrap().balance(), dec!(40));
}

#[test]
fn withdrawal_reference_lookup() {
    let m = market(dec!(100));
    settle(&m, PaymentType::Full, dec!(100));
    let request = m
        .engine
        .request_withdrawal(m.freelancer, dec!(50), MethodKind::Upi, &upi())
        .unwrap();

    let found = m.engine.withdrawal_by_reference(&request.reference).unwrap();
    assert_eq!(found.id, request.id);
    assert!(m.engine.withdrawal_by_reference("KDWR-0-ZZZZZZ").is_none());
}

// === Shortlist ===

#[derive(Default)]
struct RecordingShortlist {
    removed: Mutex<Vec<BookingId>>,
    fail: bool,
}

impl Shortlist for RecordingShortlist {
    fn remove(
        &self,
        booking: &gig_settlement::Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            return Err("shortlist unavailable".into());
        }
        self.removed.lock().push(booking.id);
        Ok(())
    }
}

fn market_with_shortlist(shortlist: Arc<RecordingShortlist>) -> Market {
    let m = market(dec!(100));
    let Market {
        engine,
        catalog,
        freelancer,
        admin,
        service,
        client,
    } = m;
    Market {
        engine: engine.with_shortlist(shortlist),
        catalog,
        freelancer,
        admin,
        service,
        client,
    }
}

#[test]
fn rejecting_accepted_booking_updates_shortlist() {
    let shortlist = Arc::new(RecordingShortlist::default());
    let m = market_with_shortlist(shortlist.clone());

    let accepted = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(100)))
        .unwrap();
    m.engine
        .update_booking_status(accepted.booking_id, BookingStatus::Accepted, m.freelancer, None)
        .unwrap();
    m.engine
        .update_booking_status(accepted.booking_id, BookingStatus::Rejected, m.freelancer, None)
        .unwrap();

    let mut other = make_booking(&m, PaymentType::Full, dec!(100));
    other.client = UserId::new();
    let never_accepted = m.engine.create_booking(other).unwrap();
    m.engine
        .update_booking_status(
            never_accepted.booking_id,
            BookingStatus::Rejected,
            m.freelancer,
            None,
        )
        .unwrap();

    assert_eq!(*shortlist.removed.lock(), vec![accepted.booking_id]);
}

#[test]
fn shortlist_failure_does_not_fail_rejection() {
    let shortlist = Arc::new(RecordingShortlist {
        fail: true,
        ..RecordingShortlist::default()
    });
    let m = market_with_shortlist(shortlist);

    let receipt = m
        .engine
        .create_booking(make_booking(&m, PaymentType::Full, dec!(100)))
        .unwrap();
    m.engine
        .update_booking_status(receipt.booking_id, BookingStatus::Accepted, m.freelancer, None)
        .unwrap();
    let booking = m
        .engine
        .update_booking_status(receipt.booking_id, BookingStatus::Rejected, m.freelancer, None)
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Rejected);
}
