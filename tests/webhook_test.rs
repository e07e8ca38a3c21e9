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

//! Webhook reconciliation integration tests.
//!
//! The gateway's event feed is at-least-once and unordered. These tests
//! verify that signature checks gate every delivery and that pledge state
//! converges no matter how deliveries are replayed or reordered.

use chrono::{Days, Utc};
use gigfund_rs::gateway::InMemoryGateway;
use gigfund_rs::webhook::{self, EventEnvelope};
use gigfund_rs::{
    Engine, EventDisposition, FundingError, GatewayEvent, GigConfig, GigId, PerformerId, PledgeId,
    PledgeRequest, PledgeStatus, SupporterId, VenueId,
};

// === Helper Functions ===

const SECRET: &str = "whsec-test";

/// Engine with one campaign accepting pledges and one pending pledge (id 1,
/// supporter 3, 2,500 minor units).
fn setup() -> (Engine, InMemoryGateway) {
    let engine = Engine::default();
    let gateway = InMemoryGateway::new();
    engine.register_payout_account(VenueId(1), "acct-1".to_owned(), true, true, Utc::now());
    engine
        .create_gig(
            GigId(1),
            GigConfig {
                venue_id: VenueId(1),
                target: 10_000,
                currency: "USD".to_owned(),
                event_date: Utc::now().date_naive() + Days::new(30),
                deadline_days_before_event: 7,
                allow_partial: false,
                min_percent: 0,
                max_performer_slots: 4,
            },
            Utc::now(),
        )
        .unwrap();
    engine.open_for_applications(GigId(1)).unwrap();
    engine.commit_performer(GigId(1), PerformerId(9)).unwrap();
    engine.begin_accepting_pledges(GigId(1)).unwrap();
    engine
        .create_pledge(
            GigId(1),
            PledgeRequest {
                pledge_id: PledgeId(1),
                supporter_id: SupporterId(3),
                amount: 2_500,
                anonymous: false,
                message: None,
            },
            Utc::now(),
            &gateway,
        )
        .unwrap();
    (engine, gateway)
}

fn deliver(engine: &Engine, event_id: &str, event: GatewayEvent) -> EventDisposition {
    engine.apply_event(
        EventEnvelope {
            event_id: event_id.to_owned(),
            event,
        },
        Utc::now(),
    )
}

fn hold_placed(pledge: u32) -> GatewayEvent {
    GatewayEvent::HoldPlaced {
        pledge_id: PledgeId(pledge),
        external_ref: None,
    }
}

fn settled(pledge: u32, amount: i64) -> GatewayEvent {
    GatewayEvent::PaymentSettled {
        pledge_id: PledgeId(pledge),
        amount_captured: amount,
    }
}

fn pledged_total(engine: &Engine) -> i64 {
    engine
        .gig_summary(GigId(1), Utc::now().date_naive())
        .unwrap()
        .pledged
}

// === Signature Verification ===

#[test]
fn signed_payload_parses_and_applies() {
    let (engine, _gateway) = setup();
    let payload = br#"{"event_id":"evt-1","kind":"hold_placed","pledge_id":1}"#;
    let signature = webhook::sign(SECRET, payload);

    let envelope = webhook::verify_and_parse(SECRET, payload, &signature).unwrap();
    let disposition = engine.apply_event(envelope, Utc::now());

    assert_eq!(disposition, EventDisposition::Applied);
    assert_eq!(engine.get_pledge(PledgeId(1)).unwrap().status, PledgeStatus::Held);
}

#[test]
fn bad_signature_is_rejected_without_state_change() {
    let (engine, _gateway) = setup();
    let payload = br#"{"event_id":"evt-1","kind":"hold_placed","pledge_id":1}"#;
    let forged = webhook::sign("wrong-secret", payload);

    assert_eq!(
        webhook::verify_and_parse(SECRET, payload, &forged).unwrap_err(),
        FundingError::InvalidSignature
    );
    assert_eq!(engine.get_pledge(PledgeId(1)).unwrap().status, PledgeStatus::Pending);
    assert_eq!(pledged_total(&engine), 0);
}

#[test]
fn malformed_payload_is_rejected_after_signature_passes() {
    let payload = br#"{"event_id":"evt-1","kind":"#;
    let signature = webhook::sign(SECRET, payload);
    assert!(matches!(
        webhook::verify_and_parse(SECRET, payload, &signature).unwrap_err(),
        FundingError::MalformedEvent(_)
    ));
}

// === Duplicate Delivery ===

#[test]
fn replayed_event_ids_are_dropped() {
    let (engine, _gateway) = setup();

    assert_eq!(deliver(&engine, "evt-1", hold_placed(1)), EventDisposition::Applied);
    assert_eq!(deliver(&engine, "evt-1", hold_placed(1)), EventDisposition::Duplicate);
    // The replayed delivery did not double count the pledge.
    assert_eq!(pledged_total(&engine), 2_500);
}

#[test]
fn same_transition_under_a_new_event_id_is_a_noop() {
    let (engine, _gateway) = setup();
    deliver(&engine, "evt-1", hold_placed(1));

    // The gateway retried with a fresh delivery id.
    assert_eq!(
        deliver(&engine, "evt-2", hold_placed(1)),
        EventDisposition::AlreadyApplied
    );
    assert_eq!(pledged_total(&engine), 2_500);
}

// === Out-of-Order Delivery ===

#[test]
fn settlement_before_hold_confirmation_converges_to_captured() {
    let (engine, _gateway) = setup();

    // The settlement outruns the hold confirmation.
    assert_eq!(
        deliver(&engine, "evt-settle", settled(1, 2_500)),
        EventDisposition::Applied
    );
    assert_eq!(
        deliver(&engine, "evt-hold", hold_placed(1)),
        EventDisposition::AlreadyApplied
    );

    // The pledge must not be dragged back to held.
    let pledge = engine.get_pledge(PledgeId(1)).unwrap();
    assert_eq!(pledge.status, PledgeStatus::Captured);
    assert!(pledge.fee_collected.is_some());
    assert_eq!(pledged_total(&engine), 2_500);
}

#[test]
fn cancel_after_capture_does_not_move_backward() {
    let (engine, _gateway) = setup();
    deliver(&engine, "evt-1", hold_placed(1));
    deliver(&engine, "evt-2", settled(1, 2_500));

    assert_eq!(
        deliver(&engine, "evt-3", GatewayEvent::HoldCanceled { pledge_id: PledgeId(1) }),
        EventDisposition::AlreadyApplied
    );
    assert_eq!(engine.get_pledge(PledgeId(1)).unwrap().status, PledgeStatus::Captured);
}

// === Hold Cancellation ===

#[test]
fn hold_canceled_fails_a_pending_pledge() {
    let (engine, _gateway) = setup();
    assert_eq!(
        deliver(&engine, "evt-1", GatewayEvent::HoldCanceled { pledge_id: PledgeId(1) }),
        EventDisposition::Applied
    );
    assert_eq!(engine.get_pledge(PledgeId(1)).unwrap().status, PledgeStatus::Failed);

    // A failed pledge frees the supporter to pledge again.
    let gateway = InMemoryGateway::new();
    engine
        .create_pledge(
            GigId(1),
            PledgeRequest {
                pledge_id: PledgeId(2),
                supporter_id: SupporterId(3),
                amount: 1_000,
                anonymous: false,
                message: None,
            },
            Utc::now(),
            &gateway,
        )
        .unwrap();
}

#[test]
fn hold_canceled_refunds_a_held_pledge() {
    let (engine, _gateway) = setup();
    deliver(&engine, "evt-1", hold_placed(1));
    assert_eq!(pledged_total(&engine), 2_500);

    assert_eq!(
        deliver(&engine, "evt-2", GatewayEvent::HoldCanceled { pledge_id: PledgeId(1) }),
        EventDisposition::Applied
    );
    assert_eq!(engine.get_pledge(PledgeId(1)).unwrap().status, PledgeStatus::Refunded);
    assert_eq!(pledged_total(&engine), 0);
}

// === Checkout Completion ===

#[test]
fn checkout_completed_attaches_the_reference_once() {
    let (engine, _gateway) = setup();
    // The pledge already carries the reference from authorize_hold.
    let original = engine.get_pledge(PledgeId(1)).unwrap().external_ref.unwrap();

    assert_eq!(
        deliver(
            &engine,
            "evt-1",
            GatewayEvent::CheckoutCompleted {
                pledge_id: PledgeId(1),
                external_ref: "co-override".to_owned(),
            }
        ),
        EventDisposition::AlreadyApplied
    );
    assert_eq!(
        engine.get_pledge(PledgeId(1)).unwrap().external_ref.unwrap(),
        original
    );
}

// === Payout Account Updates ===

#[test]
fn payout_account_capabilities_refresh_by_webhook() {
    let (engine, _gateway) = setup();
    assert!(engine.payout_account(VenueId(1)).unwrap().is_capable());

    assert_eq!(
        deliver(
            &engine,
            "evt-1",
            GatewayEvent::PayoutAccountUpdated {
                venue_id: VenueId(1),
                charges_enabled: false,
                payouts_enabled: true,
            }
        ),
        EventDisposition::Applied
    );
    assert!(!engine.payout_account(VenueId(1)).unwrap().is_capable());
}

#[test]
fn capability_update_for_unknown_venue_is_ignored() {
    let (engine, _gateway) = setup();
    assert_eq!(
        deliver(
            &engine,
            "evt-1",
            GatewayEvent::PayoutAccountUpdated {
                venue_id: VenueId(42),
                charges_enabled: true,
                payouts_enabled: true,
            }
        ),
        EventDisposition::Ignored
    );
}

// === Ignored Events ===

#[test]
fn unknown_kinds_are_acknowledged_and_ignored() {
    let (engine, _gateway) = setup();
    let payload = br#"{"event_id":"evt-1","kind":"invoice_finalized","total":12}"#;
    let signature = webhook::sign(SECRET, payload);
    let envelope = webhook::verify_and_parse(SECRET, payload, &signature).unwrap();

    assert_eq!(engine.apply_event(envelope, Utc::now()), EventDisposition::Ignored);
    assert_eq!(engine.get_pledge(PledgeId(1)).unwrap().status, PledgeStatus::Pending);
}

#[test]
fn events_for_unknown_pledges_are_ignored() {
    let (engine, _gateway) = setup();
    assert_eq!(deliver(&engine, "evt-1", hold_placed(404)), EventDisposition::Ignored);
    assert_eq!(
        deliver(&engine, "evt-2", settled(404, 1_000)),
        EventDisposition::Ignored
    );
    assert_eq!(pledged_total(&engine), 0);
}

#[test]
fn zero_amount_settlements_are_ignored() {
    let (engine, _gateway) = setup();
    deliver(&engine, "evt-1", hold_placed(1));
    assert_eq!(deliver(&engine, "evt-2", settled(1, 0)), EventDisposition::Ignored);
    assert_eq!(engine.get_pledge(PledgeId(1)).unwrap().status, PledgeStatus::Held);
}
