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

//! Pledges and their payment lifecycle.
//!
//! A pledge is a supporter's promise of money, held as an authorization on
//! their payment method. No money moves until the campaign resolves: pledges
//! on a funded campaign are captured, pledges on a failed campaign are
//! released. The status machine only moves forward:
//!
//! ```text
//! pending ──▶ held ──▶ captured
//!    │          │
//!    │          └────▶ refunded
//!    ├──────▶ captured          (settlement webhook arrived before the
//!    │                           hold confirmation; the money is real)
//!    └──────▶ failed
//! ```
//!
//! Webhook deliveries are retried and reordered by the gateway, so every
//! transition is applied through [`Pledge::advance`], which treats a repeat
//! of the current status as a no-op and refuses to move backwards.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::base::{MinorUnits, PledgeId, SupporterId};
use crate::ticket::Ticket;

/// Payment state of a pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PledgeStatus {
    /// Created; the authorization hold has not been confirmed yet.
    Pending,
    /// The hold is confirmed. The supporter's money is reserved, not moved.
    Held,
    /// The hold was captured. Terminal.
    Captured,
    /// The hold was released without charging. Terminal.
    Refunded,
    /// The authorization never materialized or was voided before being
    /// confirmed. Terminal.
    Failed,
}

impl PledgeStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Captured | Self::Refunded | Self::Failed)
    }

    /// Whether a pledge in this status contributes to the campaign's pledged
    /// total. Captured pledges keep counting so that totals remain stable
    /// through resolution.
    pub fn counts_toward_total(&self) -> bool {
        matches!(self, Self::Held | Self::Captured)
    }

    fn can_advance_to(self, next: PledgeStatus) -> bool {
        use PledgeStatus::*;
        matches!(
            (self, next),
            (Pending, Held) | (Pending, Captured) | (Pending, Failed) | (Held, Captured) | (Held, Refunded)
        )
    }
}

/// Outcome of a requested status transition.
///
/// `Same` and `Rejected` are expected under at-least-once webhook delivery;
/// callers log them instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAdvance {
    /// The transition was applied.
    Advanced,
    /// The pledge was already in the requested status.
    Same,
    /// The transition would move the pledge backwards or out of a terminal
    /// status.
    Rejected,
}

/// A supporter's pledge on a campaign.
#[derive(Debug, Clone, Serialize)]
pub struct Pledge {
    pub id: PledgeId,
    pub supporter_id: SupporterId,
    /// Pledged amount in minor units of the campaign currency.
    pub amount: MinorUnits,
    pub status: PledgeStatus,
    /// Gateway reference for the authorization hold. Absent until the hold
    /// is created, or when the pledge came in through a hosted checkout and
    /// the reference arrives by webhook.
    pub external_ref: Option<String>,
    /// Hide the supporter's identity on public campaign pages.
    pub anonymous: bool,
    /// Optional message of support shown on the campaign page.
    pub message: Option<String>,
    /// Platform fee withheld at capture, in minor units. Set only on
    /// captured pledges.
    pub fee_collected: Option<MinorUnits>,
    /// Ticket issued at resolution. Set only on captured pledges of
    /// successful campaigns.
    pub ticket: Option<Ticket>,
    pub created_at: DateTime<Utc>,
    pub held_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Pledge {
    pub(crate) fn new(
        id: PledgeId,
        supporter_id: SupporterId,
        amount: MinorUnits,
        anonymous: bool,
        message: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            supporter_id,
            amount,
            status: PledgeStatus::Pending,
            external_ref: None,
            anonymous,
            message,
            fee_collected: None,
            ticket: None,
            created_at,
            held_at: None,
            captured_at: None,
            refunded_at: None,
            failed_at: None,
        }
    }

    /// Applies a status transition, stamping the matching timestamp.
    ///
    /// Repeats of the current status report [`StatusAdvance::Same`];
    /// backward or out-of-terminal moves report [`StatusAdvance::Rejected`].
    /// Neither mutates the pledge.
    pub(crate) fn advance(&mut self, next: PledgeStatus, now: DateTime<Utc>) -> StatusAdvance {
        if self.status == next {
            return StatusAdvance::Same;
        }
        if !self.status.can_advance_to(next) {
            return StatusAdvance::Rejected;
        }
        self.status = next;
        match next {
            PledgeStatus::Held => self.held_at = Some(now),
            PledgeStatus::Captured => self.captured_at = Some(now),
            PledgeStatus::Refunded => self.refunded_at = Some(now),
            PledgeStatus::Failed => self.failed_at = Some(now),
            PledgeStatus::Pending => unreachable!("no transition targets pending"),
        }
        self.assert_invariants();
        StatusAdvance::Advanced
    }

    /// Debug-build sanity checks on the pledge record.
    pub(crate) fn assert_invariants(&self) {
        debug_assert!(self.amount > 0, "pledge amount must be positive");
        debug_assert!(
            self.fee_collected.is_none() || self.status == PledgeStatus::Captured,
            "fee only exists on captured pledges"
        );
        debug_assert!(
            self.ticket.is_none() || self.status == PledgeStatus::Captured,
            "ticket only exists on captured pledges"
        );
        debug_assert!(
            (self.status == PledgeStatus::Captured) == self.captured_at.is_some(),
            "captured_at must match status"
        );
        debug_assert!(
            (self.status == PledgeStatus::Refunded) == self.refunded_at.is_some(),
            "refunded_at must match status"
        );
        debug_assert!(
            (self.status == PledgeStatus::Failed) == self.failed_at.is_some(),
            "failed_at must match status"
        );
    }
}
