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

//! # Gigfund
//!
//! This library provides a crowdfunding engine for live shows: a venue opens
//! a campaign for a bookable event, fans pledge money that is held as
//! authorized-but-not-captured payments, and at the deadline the campaign
//! resolves atomically to funded, partially funded, or failed — capturing or
//! releasing every hold and issuing tickets only for money actually
//! collected.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central coordinator owning campaigns, pledges, and webhook
//!   reconciliation
//! - [`FundedGig`]: One campaign with its pledge ledger behind a single lock
//! - [`Outcome`], [`ResolutionReport`], [`RetryReport`]: Structured results
//!   of resolution and stuck-pledge retry passes
//! - [`gateway::PaymentGateway`]: The hold/capture/release seam to the
//!   payment processor
//! - [`webhook`]: Signed event envelopes and the deduplicating delivery log
//! - [`FundingError`]: Error types for validation and gateway failures
//!
//! ## Example
//!
//! ```
//! use gigfund_rs::{Engine, GigConfig, GigId, PerformerId, VenueId};
//! use chrono::{NaiveDate, Utc};
//!
//! let engine = Engine::default();
//! let now = Utc::now();
//!
//! // A venue with a capable payout account opens a campaign.
//! engine.register_payout_account(VenueId(1), "acct-1".into(), true, true, now);
//! engine
//!     .create_gig(
//!         GigId(1),
//!         GigConfig {
//!             venue_id: VenueId(1),
//!             target: 50_000,
//!             currency: "USD".into(),
//!             event_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
//!             deadline_days_before_event: 7,
//!             allow_partial: true,
//!             min_percent: 60,
//!             max_performer_slots: 3,
//!         },
//!         now,
//!     )
//!     .unwrap();
//!
//! engine.open_for_applications(GigId(1)).unwrap();
//! engine.commit_performer(GigId(1), PerformerId(7)).unwrap();
//! engine.begin_accepting_pledges(GigId(1)).unwrap();
//!
//! let summary = engine.gig_summary(GigId(1), now.date_naive()).unwrap();
//! assert_eq!(summary.supporter_count, 0);
//! assert_eq!(summary.amount_remaining, 50_000);
//! ```
//!
//! ## Thread Safety
//!
//! Campaigns are independent: operations on different campaigns run in
//! parallel. Within a campaign, one mutex guards the ledger; resolution
//! flips the campaign to its terminal status under that lock before any
//! gateway call, so concurrent resolution attempts agree on a single
//! winner.

mod base;
mod engine;
pub mod error;
pub mod gateway;
mod gig;
pub mod http;
pub mod notify;
mod pledge;
mod resolution;
pub mod scheduler;
mod ticket;
pub mod webhook;

pub use base::{GigId, MinorUnits, PerformerId, PledgeId, SupporterId, VenueId};
pub use engine::{
    CancelReport, Engine, EngineConfig, EventDisposition, PayoutAccount, PledgeRequest,
};
pub use error::FundingError;
pub use gig::{FundedGig, GigConfig, GigStatus, GigSummary};
pub use pledge::{Pledge, PledgeStatus};
pub use resolution::{Outcome, ResolutionReport, RetryReport};
pub use scheduler::{SweepReport, run_daily_sweep};
pub use ticket::{Ticket, TicketStatus};
pub use webhook::{EventEnvelope, EventLog, GatewayEvent};
