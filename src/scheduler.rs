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

//! Daily sweep entry point.
//!
//! An external scheduler calls [`run_daily_sweep`] once a day. The sweep
//! resolves every campaign whose deadline has passed and is still accepting
//! pledges, best effort: one campaign's trouble never aborts the batch.
//! Sweep resolutions never accept partial funding; that directive is an
//! operator decision made through the manual resolution entry point.
//!
//! The sweep also sends deadline reminders for campaigns one and three days
//! out (configurable) to supporters with a live pledge and to followers who
//! have not pledged yet.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::base::{GigId, SupporterId};
use crate::engine::Engine;
use crate::gateway::PaymentGateway;
use crate::gig::GigStatus;
use crate::notify::{NoticeKind, Notification, Notifier, Recipient};
use crate::pledge::PledgeStatus;
use crate::resolution::Outcome;

/// What one sweep pass did.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub date: NaiveDate,
    /// Campaigns resolved in this pass and their outcomes.
    pub resolved: Vec<(GigId, Outcome)>,
    /// Campaigns whose pass left stuck pledges behind.
    pub failures: Vec<GigId>,
    pub reminders_sent: usize,
}

/// Resolves due campaigns and sends pre-deadline reminders.
pub fn run_daily_sweep(
    engine: &Engine,
    now: DateTime<Utc>,
    gateway: &dyn PaymentGateway,
    notifier: &dyn Notifier,
) -> SweepReport {
    let today = now.date_naive();

    let mut resolved = Vec::new();
    let mut failures = Vec::new();
    for gig_id in engine.due_for_resolution(today) {
        match engine.resolve(gig_id, false, now, gateway, notifier) {
            Ok(report) => {
                if let Some(outcome) = report.outcome {
                    resolved.push((gig_id, outcome));
                }
                if !report.success {
                    warn!(gig = %gig_id, message = %report.message, "sweep left stuck pledges");
                    failures.push(gig_id);
                }
            }
            Err(error) => {
                warn!(gig = %gig_id, %error, "sweep resolution failed");
                failures.push(gig_id);
            }
        }
    }

    let mut reminders_sent = 0;
    for gig in engine.gigs() {
        let (gig_id, days_left, audience) = {
            let data = gig.lock();
            if data.status != GigStatus::AcceptingPledges {
                continue;
            }
            let days_left = data.days_until_deadline(today);
            if !engine.config().reminder_days.contains(&days_left) {
                continue;
            }
            let mut audience: Vec<SupporterId> = data
                .pledges
                .values()
                .filter(|p| matches!(p.status, PledgeStatus::Pending | PledgeStatus::Held))
                .map(|p| p.supporter_id)
                .collect();
            audience.extend(
                data.followers
                    .iter()
                    .copied()
                    .filter(|supporter| !data.by_supporter.contains_key(supporter)),
            );
            (data.id, days_left, audience)
        };
        for supporter in audience {
            notifier.notify(Notification {
                recipient: Recipient::Supporter(supporter),
                kind: NoticeKind::DeadlineApproaching { gig_id, days_left },
            });
            reminders_sent += 1;
        }
    }

    info!(
        date = %today,
        resolved = resolved.len(),
        failures = failures.len(),
        reminders_sent,
        "daily sweep complete"
    );
    SweepReport {
        date: today,
        resolved,
        failures,
        reminders_sent,
    }
}
