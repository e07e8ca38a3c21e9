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

//! Event tickets issued for captured pledges.
//!
//! A ticket exists only once its pledge has been captured. Issuance happens
//! during resolution (or a later retry) and is idempotent: a pledge that
//! already carries a ticket keeps it.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

use crate::base::{GigId, PledgeId};
use crate::error::FundingError;

/// Redemption state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Active,
    CheckedIn,
    Cancelled,
}

/// Admission ticket for a funded event.
#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    /// Human-readable redemption code, unique per ticket.
    pub code: String,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
}

impl Ticket {
    /// Issues a fresh ticket with a `GIG<gig>-P<pledge>-<suffix>` code.
    ///
    /// The embedded ids make codes unique across pledges; the random suffix
    /// keeps them unguessable.
    pub(crate) fn issue(gig_id: GigId, pledge_id: PledgeId, now: DateTime<Utc>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect();
        Self {
            code: format!("GIG{gig_id}-P{pledge_id}-{suffix}"),
            status: TicketStatus::Active,
            issued_at: now,
        }
    }

    /// Marks the ticket as used at the door. A ticket checks in exactly once.
    pub fn check_in(&mut self) -> Result<(), FundingError> {
        match self.status {
            TicketStatus::Active => {
                self.status = TicketStatus::CheckedIn;
                Ok(())
            }
            TicketStatus::CheckedIn => Err(FundingError::TicketAlreadyCheckedIn),
            TicketStatus::Cancelled => Err(FundingError::TicketCancelled),
        }
    }

    /// Voids the ticket, e.g. when a captured pledge is made whole outside
    /// the platform. Cancelled tickets can no longer check in.
    pub fn cancel(&mut self) {
        self.status = TicketStatus::Cancelled;
    }
}
