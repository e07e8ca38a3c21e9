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

//! The funding resolution engine.
//!
//! Resolution is the single decisive pass that turns an open campaign into a
//! terminal outcome. It runs in two phases:
//!
//! 1. Under the campaign lock: recompute the pledged total from the ledger,
//!    decide the outcome, and write the terminal status. Writing the status
//!    here is the compare-and-swap that makes concurrent resolution attempts
//!    safe: whoever flips the campaign out of `accepting_pledges` owns the
//!    settlement; everyone else reports "already processed".
//! 2. Outside the lock: capture or release each held pledge through the
//!    gateway, re-acquiring the lock per pledge to apply the transition and
//!    recompute the cached total in the same critical section.
//!
//! A gateway failure on one pledge is logged and skipped. The pledge stays
//! `held` on a terminal campaign until [`retry_stuck`] picks it up; it never
//! changes the decided outcome, which was fixed by the snapshot of phase 1.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{info, warn};

use crate::base::{GigId, MinorUnits, PledgeId, SupporterId};
use crate::error::FundingError;
use crate::gateway::{GatewayError, PaymentGateway};
use crate::gig::{FundedGig, GigData, GigStatus};
use crate::notify::{NoticeKind, Notification, Notifier, Recipient};
use crate::pledge::{PledgeStatus, StatusAdvance};
use crate::ticket::Ticket;

/// Financial outcome of a resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Funded,
    PartiallyFunded,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Funded => "funded",
            Self::PartiallyFunded => "partially_funded",
            Self::Failed => "failed",
        }
    }

    fn gig_status(self) -> GigStatus {
        match self {
            Self::Funded => GigStatus::Funded,
            Self::PartiallyFunded => GigStatus::PartiallyFunded,
            Self::Failed => GigStatus::Failed,
        }
    }

    fn is_successful(self) -> bool {
        matches!(self, Self::Funded | Self::PartiallyFunded)
    }

    fn notice(self, gig_id: GigId) -> NoticeKind {
        match self {
            Self::Funded => NoticeKind::GigFunded { gig_id },
            Self::PartiallyFunded => NoticeKind::GigPartiallyFunded { gig_id },
            Self::Failed => NoticeKind::GigFailed { gig_id },
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of a resolution attempt, for operators and the API.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub gig_id: GigId,
    /// `None` when the campaign had already left `accepting_pledges`.
    pub outcome: Option<Outcome>,
    pub already_processed: bool,
    /// Recomputed pledged total the decision was based on.
    pub snapshot_total: MinorUnits,
    pub captured: usize,
    pub capture_failures: usize,
    pub refunded: usize,
    pub refund_failures: usize,
    pub tickets_issued: usize,
    /// True when every gateway call in the pass succeeded.
    pub success: bool,
    pub message: String,
}

impl ResolutionReport {
    fn already_processed(gig_id: GigId, pledged: MinorUnits) -> Self {
        Self {
            gig_id,
            outcome: None,
            already_processed: true,
            snapshot_total: pledged,
            captured: 0,
            capture_failures: 0,
            refunded: 0,
            refund_failures: 0,
            tickets_issued: 0,
            success: true,
            message: "already processed".to_owned(),
        }
    }
}

/// Result of a stuck-pledge retry pass.
#[derive(Debug, Clone, Serialize)]
pub struct RetryReport {
    pub gig_id: GigId,
    /// Held pledges found on the terminal campaign.
    pub retried: usize,
    pub captured: usize,
    pub refunded: usize,
    pub failures: usize,
    pub tickets_issued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PledgeAction {
    Capture,
    Refund,
}

/// One gateway call decided under the lock, executed outside it.
#[derive(Debug)]
pub(crate) struct PlannedCall {
    pledge_id: PledgeId,
    supporter_id: SupporterId,
    amount: MinorUnits,
    external_ref: Option<String>,
    action: PledgeAction,
}

#[derive(Debug, Default)]
pub(crate) struct PlanStats {
    pub(crate) captured: usize,
    pub(crate) capture_failures: usize,
    pub(crate) refunded: usize,
    pub(crate) refund_failures: usize,
    pub(crate) tickets_issued: usize,
    pub(crate) notices: Vec<Notification>,
}

/// Platform fee withheld from a captured pledge, truncated to whole minor
/// units. Fees never count toward the funding target.
pub(crate) fn platform_fee(rate: Decimal, amount: MinorUnits) -> MinorUnits {
    debug_assert!(rate >= Decimal::ZERO && rate < Decimal::ONE, "fee rate out of range");
    (rate * Decimal::from(amount)).trunc().to_i64().unwrap_or(0)
}

/// Issues a ticket for a captured pledge unless it already has one. Returns
/// whether a ticket was created. Never creates tickets for non-captured
/// pledges.
pub(crate) fn ensure_ticket(data: &mut GigData, pledge_id: PledgeId, now: DateTime<Utc>) -> bool {
    let gig_id = data.id;
    if let Some(pledge) = data.pledges.get_mut(&pledge_id) {
        if pledge.status == PledgeStatus::Captured && pledge.ticket.is_none() {
            pledge.ticket = Some(Ticket::issue(gig_id, pledge_id, now));
            return true;
        }
    }
    false
}

/// Collects the gateway calls for every held pledge.
pub(crate) fn plan_held_pledges(data: &GigData, action: PledgeAction) -> Vec<PlannedCall> {
    data.pledges
        .values()
        .filter(|p| p.status == PledgeStatus::Held)
        .map(|p| PlannedCall {
            pledge_id: p.id,
            supporter_id: p.supporter_id,
            amount: p.amount,
            external_ref: p.external_ref.clone(),
            action,
        })
        .collect()
}

/// Runs the planned gateway calls and applies the resulting transitions.
///
/// Each call happens with no lock held; the transition and the total
/// recomputation then share one critical section. Failures leave the pledge
/// `held` and are only counted.
pub(crate) fn execute_plan(
    gig: &FundedGig,
    plan: Vec<PlannedCall>,
    fee_rate: Decimal,
    issue_tickets: bool,
    now: DateTime<Utc>,
    gateway: &dyn PaymentGateway,
) -> PlanStats {
    let mut stats = PlanStats::default();
    for call in plan {
        let result = match (&call.external_ref, call.action) {
            // A held pledge without a reference cannot be settled yet; the
            // checkout_completed event will supply one before the retry.
            (None, _) => Err(GatewayError::UnknownReference),
            (Some(r), PledgeAction::Capture) => gateway.capture(r),
            (Some(r), PledgeAction::Refund) => gateway.cancel_hold(r),
        };

        if let Err(error) = result {
            warn!(
                pledge = %call.pledge_id,
                action = ?call.action,
                %error,
                "gateway call failed; pledge left held for retry"
            );
            match call.action {
                PledgeAction::Capture => stats.capture_failures += 1,
                PledgeAction::Refund => stats.refund_failures += 1,
            }
            continue;
        }

        let mut data = gig.lock();
        match call.action {
            PledgeAction::Capture => {
                let fee = match data.pledges.get_mut(&call.pledge_id) {
                    Some(pledge) => {
                        if pledge.advance(PledgeStatus::Captured, now) == StatusAdvance::Rejected {
                            warn!(pledge = %call.pledge_id, status = ?pledge.status,
                                "captured at gateway but ledger refused the transition");
                        }
                        if pledge.fee_collected.is_none() {
                            pledge.fee_collected = Some(platform_fee(fee_rate, pledge.amount));
                        }
                        pledge.fee_collected.unwrap_or(0)
                    }
                    None => 0,
                };
                if issue_tickets && ensure_ticket(&mut data, call.pledge_id, now) {
                    stats.tickets_issued += 1;
                }
                stats.captured += 1;
                stats.notices.push(Notification {
                    recipient: Recipient::Supporter(call.supporter_id),
                    kind: NoticeKind::PledgeCaptured {
                        gig_id: data.id,
                        amount: call.amount,
                        fee,
                    },
                });
            }
            PledgeAction::Refund => {
                if let Some(pledge) = data.pledges.get_mut(&call.pledge_id) {
                    pledge.advance(PledgeStatus::Refunded, now);
                }
                data.retire_supporter_entry(call.pledge_id);
                stats.refunded += 1;
                stats.notices.push(Notification {
                    recipient: Recipient::Supporter(call.supporter_id),
                    kind: NoticeKind::PledgeRefunded {
                        gig_id: data.id,
                        amount: call.amount,
                    },
                });
            }
        }
        data.recompute_pledged();
    }
    stats
}

/// Resolves one campaign. Idempotent: a campaign no longer in
/// `accepting_pledges` is left untouched.
pub(crate) fn run(
    gig: &FundedGig,
    accept_partial: bool,
    fee_rate: Decimal,
    now: DateTime<Utc>,
    gateway: &dyn PaymentGateway,
    notifier: &dyn Notifier,
) -> ResolutionReport {
    // Phase 1: decide and commit the terminal status under the lock.
    let (gig_id, outcome, snapshot, target, plan, audience) = {
        let mut data = gig.lock();
        if data.status != GigStatus::AcceptingPledges {
            info!(gig = %data.id, status = ?data.status, "resolution skipped");
            return ResolutionReport::already_processed(data.id, data.pledged);
        }

        data.recompute_pledged();
        let snapshot = data.pledged;
        let outcome = if data.fully_funded() {
            Outcome::Funded
        } else if accept_partial && data.allow_partial && data.meets_partial_threshold() {
            Outcome::PartiallyFunded
        } else {
            Outcome::Failed
        };

        data.status = outcome.gig_status();
        data.resolved_at = Some(now);
        data.assert_invariants();

        let action = if outcome.is_successful() {
            PledgeAction::Capture
        } else {
            PledgeAction::Refund
        };
        let plan = plan_held_pledges(&data, action);

        let mut audience: Vec<Recipient> = vec![Recipient::VenueOwner(data.venue_id)];
        audience.extend(data.performers.iter().copied().map(Recipient::Performer));
        audience.extend(data.by_supporter.keys().copied().map(Recipient::Supporter));

        info!(
            gig = %data.id,
            outcome = %outcome,
            pledged = snapshot,
            target = data.target,
            held = plan.len(),
            "campaign resolved"
        );
        (data.id, outcome, snapshot, data.target, plan, audience)
    };

    // Phase 2: settle pledge by pledge, lock-free between gateway calls.
    let planned = plan.len();
    let mut stats = execute_plan(gig, plan, fee_rate, outcome.is_successful(), now, gateway);

    // Pledges captured out of band before resolution still earn a ticket on
    // a successful campaign.
    if outcome.is_successful() {
        let mut data = gig.lock();
        let unticketed: Vec<PledgeId> = data
            .pledges
            .values()
            .filter(|p| p.status == PledgeStatus::Captured && p.ticket.is_none())
            .map(|p| p.id)
            .collect();
        for pledge_id in unticketed {
            if ensure_ticket(&mut data, pledge_id, now) {
                stats.tickets_issued += 1;
            }
        }
    }

    for notice in stats.notices.drain(..) {
        notifier.notify(notice);
    }
    for recipient in audience {
        notifier.notify(Notification {
            recipient,
            kind: outcome.notice(gig_id),
        });
    }

    let stuck = stats.capture_failures + stats.refund_failures;
    let message = match outcome {
        Outcome::Funded => format!(
            "funded: pledged {snapshot} against target {target}; captured {} of {planned} held pledges ({stuck} stuck)",
            stats.captured
        ),
        Outcome::PartiallyFunded => format!(
            "partially funded: pledged {snapshot} against target {target}; captured {} of {planned} held pledges ({stuck} stuck)",
            stats.captured
        ),
        Outcome::Failed => format!(
            "failed: pledged {snapshot} against target {target}; released {} of {planned} held pledges ({stuck} stuck)",
            stats.refunded
        ),
    };

    ResolutionReport {
        gig_id,
        outcome: Some(outcome),
        already_processed: false,
        snapshot_total: snapshot,
        captured: stats.captured,
        capture_failures: stats.capture_failures,
        refunded: stats.refunded,
        refund_failures: stats.refund_failures,
        tickets_issued: stats.tickets_issued,
        success: stuck == 0,
        message,
    }
}

/// Re-drives `held` pledges left behind by gateway failures on an already
/// terminal campaign. The terminal status dictates the action: funded and
/// partially funded campaigns capture, failed and cancelled ones release.
pub(crate) fn retry_stuck(
    gig: &FundedGig,
    fee_rate: Decimal,
    now: DateTime<Utc>,
    gateway: &dyn PaymentGateway,
    notifier: &dyn Notifier,
) -> Result<RetryReport, FundingError> {
    let (gig_id, successful, plan) = {
        let data = gig.lock();
        let successful = match data.status {
            GigStatus::Funded | GigStatus::PartiallyFunded => true,
            GigStatus::Failed | GigStatus::Cancelled => false,
            _ => return Err(FundingError::NotResolved),
        };
        let action = if successful {
            PledgeAction::Capture
        } else {
            PledgeAction::Refund
        };
        (data.id, successful, plan_held_pledges(&data, action))
    };

    info!(gig = %gig_id, stuck = plan.len(), "retrying stuck pledges");
    let retried = plan.len();
    let mut stats = execute_plan(gig, plan, fee_rate, successful, now, gateway);
    for notice in stats.notices.drain(..) {
        notifier.notify(notice);
    }

    Ok(RetryReport {
        gig_id,
        retried,
        captured: stats.captured,
        refunded: stats.refunded,
        failures: stats.capture_failures + stats.refund_failures,
        tickets_issued: stats.tickets_issued,
    })
}
