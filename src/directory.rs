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

//! Collaborators the engine reads from but does not own.
//!
//! The service catalog, the user directory and the shortlist projection live
//! outside the settlement core. The engine only asks them for ids, prices,
//! statuses and roles. In-memory implementations are provided for the CLI,
//! the demo server and tests.

use crate::base::{AdminId, FreelancerId, ServiceId};
use crate::booking::Booking;
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Inactive,
    Suspended,
}

/// The parts of a service listing the engine cares about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceListing {
    pub id: ServiceId,
    pub owner: FreelancerId,
    pub price: Decimal,
    pub status: ListingStatus,
}

pub trait ServiceCatalog: Send + Sync {
    fn listing(&self, id: &ServiceId) -> Option<ServiceListing>;
}

pub trait Directory: Send + Sync {
    fn is_freelancer(&self, id: &FreelancerId) -> bool;
    fn is_admin(&self, id: &AdminId) -> bool;
}

/// Projection of shortlisted candidates, kept elsewhere.
///
/// Updates are best-effort: the engine logs failures and carries on.
pub trait Shortlist: Send + Sync {
    fn remove(&self, booking: &Booking) -> Result<(), Box<dyn Error + Send + Sync>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    listings: DashMap<ServiceId, ServiceListing>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, listing: ServiceListing) {
        self.listings.insert(listing.id, listing);
    }

    /// Returns `false` if the listing does not exist.
    pub fn set_status(&self, id: &ServiceId, status: ListingStatus) -> bool {
        match self.listings.get_mut(id) {
            Some(mut listing) => {
                listing.status = status;
                true
            }
            None => false,
        }
    }
}

impl ServiceCatalog for InMemoryCatalog {
    fn listing(&self, id: &ServiceId) -> Option<ServiceListing> {
        self.listings.get(id).map(|listing| listing.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    freelancers: DashSet<FreelancerId>,
    admins: DashSet<AdminId>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_freelancer(&self, id: FreelancerId) {
        self.freelancers.insert(id);
    }

    pub fn add_admin(&self, id: AdminId) {
        self.admins.insert(id);
    }
}

impl Directory for InMemoryDirectory {
    fn is_freelancer(&self, id: &FreelancerId) -> bool {
        self.freelancers.contains(id)
    }

    fn is_admin(&self, id: &AdminId) -> bool {
        self.admins.contains(id)
    }
}

/// Shortlist that tracks nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShortlist;

impl Shortlist for NoShortlist {
    fn remove(&self, _booking: &Booking) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn catalog_status_updates() {
        let catalog = InMemoryCatalog::new();
        let listing = ServiceListing {
            id: ServiceId::new(),
            owner: FreelancerId::new(),
            price: dec!(250),
            status: ListingStatus::Active,
        };
        catalog.insert(listing.clone());

        assert!(catalog.set_status(&listing.id, ListingStatus::Suspended));
        assert_eq!(
            catalog.listing(&listing.id).unwrap().status,
            ListingStatus::Suspended
        );
        assert!(!catalog.set_status(&ServiceId::new(), ListingStatus::Active));
    }

    #[test]
    fn directory_roles() {
        let directory = InMemoryDirectory::new();
        let freelancer = FreelancerId::new();
        let admin = AdminId::new();
        directory.add_freelancer(freelancer);
        directory.add_admin(admin);

        assert!(directory.is_freelancer(&freelancer));
        assert!(directory.is_admin(&admin));
        assert!(!directory.is_freelancer(&FreelancerId::new()));
        assert!(!directory.is_admin(&AdminId::new()));
    }
}
