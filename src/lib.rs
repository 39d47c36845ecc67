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

//! # Gig Settlement
//!
//! Settlement core for a services marketplace: clients book freelancers'
//! services, payments are recorded in a ledger and settled into wallets, and
//! freelancers withdraw their earnings through an admin-approved payout queue.
//!
//! ## Core Components
//!
//! - [`Engine`]: Owns all state and exposes every operation
//! - [`Ledger`]: Append-only record of money movement
//! - [`Wallets`]: Freelancer wallets and the platform wallet
//! - [`Booking`]: A booking and its lifecycle ([`BookingStatus`])
//! - [`WithdrawalRequest`]: A payout request ([`WithdrawalStatus`])
//! - [`SettlementError`]: Error type, classified by [`ErrorKind`]
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//! use gig_settlement::{
//!     BookingStatus, Engine, EntryStatus, FreelancerId, InMemoryCatalog, InMemoryDirectory,
//!     ListingStatus, NewBooking, PaymentType, Schedule, ServiceId, ServiceListing, UserId,
//! };
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let directory = Arc::new(InMemoryDirectory::new());
//! let freelancer = FreelancerId::new();
//! directory.add_freelancer(freelancer);
//! let service = ServiceId::new();
//! catalog.insert(ServiceListing {
//!     id: service,
//!     owner: freelancer,
//!     price: dec!(1000),
//!     status: ListingStatus::Active,
//! });
//!
//! let engine = Engine::new(catalog, directory);
//! let client = UserId::new();
//!
//! // Book with a 30% advance
//! let receipt = engine
//!     .create_booking(NewBooking {
//!         service,
//!         client,
//!         payment_type: PaymentType::Advance,
//!         booking_amount: dec!(300),
//!         schedule: Schedule {
//!             date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
//!             time: "10:00-12:00".to_string(),
//!         },
//!         notes: None,
//!     })
//!     .unwrap();
//! engine
//!     .update_booking_status(receipt.booking_id, BookingStatus::Accepted, freelancer, None)
//!     .unwrap();
//!
//! // Client confirms the payment; the freelancer receives the net amount
//! engine
//!     .confirm_payment(receipt.booking_id, client, EntryStatus::Completed, &receipt.ledger_reference)
//!     .unwrap();
//! assert_eq!(engine.wallet(&freelancer).unwrap().balance(), dec!(270));
//! assert_eq!(engine.platform_wallet().total_earnings(), dec!(300));
//! ```
//!
//! ## Thread Safety
//!
//! Each wallet carries its own lock and records live in sharded concurrent
//! maps, so operations on different freelancers run in parallel while
//! operations on the same wallet are serialized.

mod base;
pub mod booking;
pub mod config;
pub mod directory;
mod engine;
pub mod error;
pub mod ledger;
mod payout;
mod settlement;
pub mod wallet;
pub mod withdrawal;

pub use base::{
    AdminId, BookingId, EntryId, FreelancerId, MONEY_PRECISION, RequestId, ServiceId, UserId,
    round_money,
};
pub use booking::{
    Booking, BookingStatus, BookingTerms, NewBooking, PaymentType, Schedule, StatusChange,
};
pub use config::FeePolicy;
pub use directory::{
    Directory, InMemoryCatalog, InMemoryDirectory, ListingStatus, NoShortlist, ServiceCatalog,
    ServiceListing, Shortlist,
};
pub use engine::Engine;
pub use error::{ErrorKind, SettlementError};
pub use ledger::{
    Direction, EntryStatus, EntryType, FeeSplit, Ledger, LedgerEntry, NewEntry, Parties,
};
pub use payout::ApprovalReceipt;
pub use settlement::BookingReceipt;
pub use wallet::{FreelancerWallet, PlatformWallet, WalletId, Wallets};
pub use withdrawal::{
    MethodKind, PaymentDetails, PaymentMethod, StatusTotals, WithdrawalRequest, WithdrawalStatus,
    WithdrawalSummary,
};
