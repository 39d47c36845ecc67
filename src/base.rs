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

//! Core identifier types and money helpers.

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of decimal places every stored amount is rounded to.
pub const MONEY_PRECISION: u32 = 2;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// A client (the buying side of a booking).
    UserId
);
id_type!(
    /// A freelancer. Owns service listings and exactly one wallet.
    FreelancerId
);
id_type!(
    /// A platform administrator.
    AdminId
);
id_type!(
    /// A freelancer's service listing in the external catalog.
    ServiceId
);
id_type!(
    /// A booking (service application).
    BookingId
);
id_type!(
    /// A ledger entry.
    EntryId
);
id_type!(
    /// A withdrawal request.
    RequestId
);

/// Rounds an amount to [`MONEY_PRECISION`] places, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

/// Builds a human-readable reference such as `TNXKD-1718000000000-4QZ7XA`.
pub(crate) fn generate_reference(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().timestamp_millis(),
        suffix.to_uppercase()
    )
}
