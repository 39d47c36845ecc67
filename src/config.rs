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

//! Platform fee policy.

use crate::SettlementError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Rates applied by the engine. All values are fractions, e.g. `0.10` = 10%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeePolicy {
    /// Platform share of every booking payment.
    pub booking_fee_rate: Decimal,
    /// Platform share of every withdrawal payout.
    pub withdrawal_fee_rate: Decimal,
    /// Minimum share of the price an advance booking must pay up front.
    pub advance_minimum_ratio: Decimal,
}

impl FeePolicy {
    pub const DEFAULT_BOOKING_FEE_RATE: Decimal = dec!(0.10);
    pub const DEFAULT_WITHDRAWAL_FEE_RATE: Decimal = dec!(0.05);
    pub const DEFAULT_ADVANCE_MINIMUM_RATIO: Decimal = dec!(0.30);

    /// Checks that every rate lies in `[0, 1)` (the advance ratio may be 1).
    pub fn validate(&self) -> Result<(), SettlementError> {
        let rates = [
            ("booking_fee_rate", self.booking_fee_rate),
            ("withdrawal_fee_rate", self.withdrawal_fee_rate),
        ];
        for (name, rate) in rates {
            if rate < Decimal::ZERO || rate >= Decimal::ONE {
                return Err(SettlementError::InvalidPolicy(format!(
                    "{name} must be in [0, 1), got {rate}"
                )));
            }
        }
        if self.advance_minimum_ratio < Decimal::ZERO || self.advance_minimum_ratio > Decimal::ONE
        {
            return Err(SettlementError::InvalidPolicy(format!(
                "advance_minimum_ratio must be in [0, 1], got {}",
                self.advance_minimum_ratio
            )));
        }
        Ok(())
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            booking_fee_rate: Self::DEFAULT_BOOKING_FEE_RATE,
            withdrawal_fee_rate: Self::DEFAULT_WITHDRAWAL_FEE_RATE,
            advance_minimum_ratio: Self::DEFAULT_ADVANCE_MINIMUM_RATIO,
        }
    }
}
