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

//! Property-based tests for the funding engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! pledges, webhook deliveries and resolutions.

use chrono::{Days, Utc};
use gigfund_rs::gateway::InMemoryGateway;
use gigfund_rs::notify::NoopNotifier;
use gigfund_rs::webhook::EventEnvelope;
use gigfund_rs::{
    Engine, GatewayEvent, GigConfig, GigId, Outcome, PerformerId, PledgeId, PledgeRequest,
    PledgeStatus, SupporterId, VenueId,
};
use proptest::prelude::*;

// =============================================================================
// Strategies and Helpers
// =============================================================================

/// A positive pledge amount in minor units.
fn arb_amount() -> impl Strategy<Value = i64> {
    1i64..=100_000
}

/// A per-pledge webhook delivery script. Every script starts from a fresh
/// pending pledge, so the final status it produces is deterministic.
#[derive(Debug, Clone, Copy)]
enum Script {
    None,
    Hold,
    HoldThenSettle,
    HoldThenCancel,
    SettleFirst,
    CancelFirst,
}

impl Script {
    fn events(self) -> &'static [&'static str] {
        match self {
            Self::None => &[],
            Self::Hold => &["hold"],
            Self::HoldThenSettle => &["hold", "settle"],
            Self::HoldThenCancel => &["hold", "cancel"],
            Self::SettleFirst => &["settle"],
            Self::CancelFirst => &["cancel"],
        }
    }

    fn final_status(self) -> PledgeStatus {
        match self {
            Self::None => PledgeStatus::Pending,
            Self::Hold => PledgeStatus::Held,
            Self::HoldThenSettle | Self::SettleFirst => PledgeStatus::Captured,
            Self::HoldThenCancel => PledgeStatus::Refunded,
            Self::CancelFirst => PledgeStatus::Failed,
        }
    }
}

fn arb_script() -> impl Strategy<Value = Script> {
    prop::sample::select(&[
        Script::None,
        Script::Hold,
        Script::HoldThenSettle,
        Script::HoldThenCancel,
        Script::SettleFirst,
        Script::CancelFirst,
    ])
}

/// An engine with one campaign in `accepting_pledges`.
fn engine_with_gig(target: i64, allow_partial: bool, min_percent: u8) -> Engine {
    let engine = Engine::default();
    engine.register_payout_account(VenueId(1), "acct-1".to_owned(), true, true, Utc::now());
    engine
        .create_gig(
            GigId(1),
            GigConfig {
                venue_id: VenueId(1),
                target,
                currency: "USD".to_owned(),
                event_date: Utc::now().date_naive() + Days::new(30),
                deadline_days_before_event: 7,
                allow_partial,
                min_percent,
                max_performer_slots: 16,
            },
            Utc::now(),
        )
        .unwrap();
    engine.open_for_applications(GigId(1)).unwrap();
    engine.commit_performer(GigId(1), PerformerId(1)).unwrap();
    engine.begin_accepting_pledges(GigId(1)).unwrap();
    engine
}

fn add_pledge(engine: &Engine, gateway: &InMemoryGateway, pledge_id: u32, amount: i64) {
    engine
        .create_pledge(
            GigId(1),
            PledgeRequest {
                pledge_id: PledgeId(pledge_id),
                supporter_id: SupporterId(pledge_id),
                amount,
                anonymous: false,
                message: None,
            },
            Utc::now(),
            gateway,
        )
        .unwrap();
}

/// Delivers one scripted event under a unique event id.
fn deliver(engine: &Engine, event_tag: &str, pledge_id: u32, amount: i64, serial: &mut u32) {
    *serial += 1;
    let event = match event_tag {
        "hold" => GatewayEvent::HoldPlaced {
            pledge_id: PledgeId(pledge_id),
            external_ref: None,
        },
        "settle" => GatewayEvent::PaymentSettled {
            pledge_id: PledgeId(pledge_id),
            amount_captured: amount,
        },
        _ => GatewayEvent::HoldCanceled {
            pledge_id: PledgeId(pledge_id),
        },
    };
    engine.apply_event(
        EventEnvelope {
            event_id: format!("evt-{serial}"),
            event,
        },
        Utc::now(),
    );
}

// =============================================================================
// Ledger Total Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The cached pledged total always equals the ledger sum of held and
    /// captured pledges, whatever deliveries arrived.
    #[test]
    fn cached_total_equals_ledger_sum(
        pledges in prop::collection::vec((arb_amount(), arb_script()), 1..12),
    ) {
        let engine = engine_with_gig(100_000_000, false, 0);
        let gateway = InMemoryGateway::new();
        let mut serial = 0u32;

        for (i, (amount, script)) in pledges.iter().enumerate() {
            let pledge_id = i as u32 + 1;
            add_pledge(&engine, &gateway, pledge_id, *amount);
            for tag in script.events() {
                deliver(&engine, tag, pledge_id, *amount, &mut serial);
            }
        }

        let mut expected = 0i64;
        for (i, (amount, script)) in pledges.iter().enumerate() {
            let pledge = engine.get_pledge(PledgeId(i as u32 + 1)).unwrap();
            prop_assert_eq!(pledge.status, script.final_status());
            if pledge.status.counts_toward_total() {
                expected += amount;
            }
        }

        let summary = engine.gig_summary(GigId(1), Utc::now().date_naive()).unwrap();
        prop_assert_eq!(summary.pledged, expected);
        prop_assert_eq!(engine.open_pledged_total(), expected);
    }

    /// Redelivering an entire event history under fresh delivery ids changes
    /// nothing: statuses are monotone and the total stays put.
    #[test]
    fn replayed_history_is_a_noop(
        pledges in prop::collection::vec((arb_amount(), arb_script()), 1..8),
    ) {
        let engine = engine_with_gig(100_000_000, false, 0);
        let gateway = InMemoryGateway::new();
        let mut serial = 0u32;

        for (i, (amount, script)) in pledges.iter().enumerate() {
            let pledge_id = i as u32 + 1;
            add_pledge(&engine, &gateway, pledge_id, *amount);
            for tag in script.events() {
                deliver(&engine, tag, pledge_id, *amount, &mut serial);
            }
        }

        let today = Utc::now().date_naive();
        let total_before = engine.gig_summary(GigId(1), today).unwrap().pledged;
        let statuses_before: Vec<PledgeStatus> = (1..=pledges.len() as u32)
            .map(|id| engine.get_pledge(PledgeId(id)).unwrap().status)
            .collect();

        // The gateway re-sends everything, twice.
        for _ in 0..2 {
            for (i, (amount, script)) in pledges.iter().enumerate() {
                for tag in script.events() {
                    deliver(&engine, tag, i as u32 + 1, *amount, &mut serial);
                }
            }
        }

        let statuses_after: Vec<PledgeStatus> = (1..=pledges.len() as u32)
            .map(|id| engine.get_pledge(PledgeId(id)).unwrap().status)
            .collect();
        prop_assert_eq!(statuses_before, statuses_after);
        prop_assert_eq!(engine.gig_summary(GigId(1), today).unwrap().pledged, total_before);
    }
}

// =============================================================================
// Resolution Outcome Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The resolution outcome is a pure function of the pledged snapshot,
    /// the target and the partial-funding policy, and every held pledge
    /// lands in the terminal state the outcome dictates.
    #[test]
    fn outcome_follows_snapshot_and_policy(
        amounts in prop::collection::vec(arb_amount(), 1..10),
        target in 1i64..=500_000,
        allow_partial in any::<bool>(),
        min_percent in 0u8..=100,
        accept_partial in any::<bool>(),
    ) {
        let engine = engine_with_gig(target, allow_partial, min_percent);
        let gateway = InMemoryGateway::new();
        let mut serial = 0u32;

        for (i, amount) in amounts.iter().enumerate() {
            let pledge_id = i as u32 + 1;
            add_pledge(&engine, &gateway, pledge_id, *amount);
            deliver(&engine, "hold", pledge_id, *amount, &mut serial);
        }
        let snapshot: i64 = amounts.iter().sum();

        let report = engine
            .resolve(GigId(1), accept_partial, Utc::now(), &gateway, &NoopNotifier)
            .unwrap();

        let expected = if snapshot >= target {
            Outcome::Funded
        } else if accept_partial
            && allow_partial
            && (snapshot as i128) * 100 >= (target as i128) * (min_percent as i128)
        {
            Outcome::PartiallyFunded
        } else {
            Outcome::Failed
        };

        prop_assert!(!report.already_processed);
        prop_assert_eq!(report.outcome, Some(expected));
        prop_assert_eq!(report.snapshot_total, snapshot);
        prop_assert!(report.success);

        let successful = matches!(expected, Outcome::Funded | Outcome::PartiallyFunded);
        for i in 0..amounts.len() {
            let pledge = engine.get_pledge(PledgeId(i as u32 + 1)).unwrap();
            if successful {
                prop_assert_eq!(pledge.status, PledgeStatus::Captured);
                prop_assert!(pledge.ticket.is_some());
            } else {
                prop_assert_eq!(pledge.status, PledgeStatus::Refunded);
                prop_assert!(pledge.ticket.is_none());
            }
        }
        if successful {
            prop_assert_eq!(report.captured, amounts.len());
            prop_assert_eq!(report.tickets_issued, amounts.len());
            prop_assert_eq!(gateway.captured_total(), snapshot);
        } else {
            prop_assert_eq!(report.refunded, amounts.len());
            prop_assert_eq!(gateway.captured_total(), 0);
        }
    }

    /// Resolving twice never moves money twice.
    #[test]
    fn resolution_is_idempotent(
        amounts in prop::collection::vec(arb_amount(), 1..6),
        accept_partial in any::<bool>(),
    ) {
        let engine = engine_with_gig(1_000, true, 50);
        let gateway = InMemoryGateway::new();
        let mut serial = 0u32;

        for (i, amount) in amounts.iter().enumerate() {
            let pledge_id = i as u32 + 1;
            add_pledge(&engine, &gateway, pledge_id, *amount);
            deliver(&engine, "hold", pledge_id, *amount, &mut serial);
        }

        let first = engine
            .resolve(GigId(1), accept_partial, Utc::now(), &gateway, &NoopNotifier)
            .unwrap();
        let captured_after_first = gateway.captured_total();

        let second = engine
            .resolve(GigId(1), accept_partial, Utc::now(), &gateway, &NoopNotifier)
            .unwrap();
        let third = engine
            .resolve(GigId(1), !accept_partial, Utc::now(), &gateway, &NoopNotifier)
            .unwrap();

        prop_assert!(!first.already_processed);
        prop_assert!(second.already_processed);
        prop_assert!(third.already_processed);
        prop_assert_eq!(second.outcome, None);
        prop_assert_eq!(gateway.captured_total(), captured_after_first);
    }
}

// =============================================================================
// Platform Fee Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The default 5% fee is truncated to whole minor units and never
    /// exceeds the captured amount.
    #[test]
    fn fee_is_truncated_and_bounded(
        amount in arb_amount(),
    ) {
        let engine = engine_with_gig(amount, false, 0);
        let gateway = InMemoryGateway::new();
        let mut serial = 0u32;

        add_pledge(&engine, &gateway, 1, amount);
        deliver(&engine, "hold", 1, amount, &mut serial);
        let report = engine
            .resolve(GigId(1), false, Utc::now(), &gateway, &NoopNotifier)
            .unwrap();
        prop_assert_eq!(report.outcome, Some(Outcome::Funded));

        let fee = engine.get_pledge(PledgeId(1)).unwrap().fee_collected.unwrap();
        prop_assert_eq!(fee, amount / 20);
        prop_assert!(fee >= 0);
        prop_assert!(fee <= amount);
    }
}
