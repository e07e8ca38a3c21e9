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

//! Outcome and reminder notifications.
//!
//! The engine only decides *who* hears *what*; delivery is behind the
//! [`Notifier`] trait. Notices are emitted after the financial work of an
//! operation has completed, outside every campaign lock.

use std::fmt;

use crate::base::{GigId, MinorUnits, PerformerId, SupporterId, VenueId};

/// Who a notice is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Supporter(SupporterId),
    Performer(PerformerId),
    VenueOwner(VenueId),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supporter(id) => write!(f, "supporter {id}"),
            Self::Performer(id) => write!(f, "performer {id}"),
            Self::VenueOwner(id) => write!(f, "venue {id}"),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    GigFunded { gig_id: GigId },
    GigPartiallyFunded { gig_id: GigId },
    GigFailed { gig_id: GigId },
    GigCancelled { gig_id: GigId },
    PledgeCaptured {
        gig_id: GigId,
        amount: MinorUnits,
        fee: MinorUnits,
    },
    PledgeRefunded { gig_id: GigId, amount: MinorUnits },
    DeadlineApproaching { gig_id: GigId, days_left: i64 },
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GigFunded { gig_id } => {
                write!(f, "campaign {gig_id} reached its target and is funded")
            }
            Self::GigPartiallyFunded { gig_id } => {
                write!(f, "campaign {gig_id} was accepted at partial funding")
            }
            Self::GigFailed { gig_id } => write!(
                f,
                "campaign {gig_id} did not reach its target; no pledges were charged"
            ),
            Self::GigCancelled { gig_id } => write!(
                f,
                "campaign {gig_id} was cancelled by the venue; no pledges were charged"
            ),
            Self::PledgeCaptured { gig_id, amount, fee } => write!(
                f,
                "your pledge of {amount} on campaign {gig_id} was collected (platform fee {fee})"
            ),
            Self::PledgeRefunded { gig_id, amount } => write!(
                f,
                "your hold of {amount} on campaign {gig_id} was released; you were not charged"
            ),
            Self::DeadlineApproaching { gig_id, days_left } => {
                write!(f, "campaign {gig_id} closes in {days_left} day(s)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: Recipient,
    pub kind: NoticeKind,
}

/// Delivery backend for notifications. Implementations must tolerate being
/// called from multiple threads.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards every notice. For benchmarks and scenarios that do not care.
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}

/// Emits each notice on the log. The demo server's backend.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            recipient = %notification.recipient,
            notice = %notification.kind,
            "notification"
        );
    }
}

/// Forwards notices to a crossbeam channel so tests can drain and inspect
/// them.
#[derive(Debug)]
pub struct ChannelNotifier {
    sender: crossbeam::channel::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, crossbeam::channel::Receiver<Notification>) {
        let (sender, receiver) = crossbeam::channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // Receiver dropped means nobody is listening; that is fine.
        let _ = self.sender.send(notification);
    }
}
