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

//! REST API server for the funding engine.
//!
//! Run with: `cargo run --bin server`
//!
//! Serves the full campaign lifecycle over JSON plus the signed gateway
//! webhook endpoint. Payments go through the in-memory gateway, so this
//! binary is a demo and integration-test target, not a production deploy.
//!
//! ## Example Usage
//!
//! ```bash
//! # Register a payout account
//! curl -X POST http://localhost:3000/venues/1/payout-account \
//!   -H "Content-Type: application/json" \
//!   -d '{"account_ref": "acct-1", "charges_enabled": true, "payouts_enabled": true}'
//!
//! # Create a campaign
//! curl -X POST http://localhost:3000/gigs \
//!   -H "Content-Type: application/json" \
//!   -d '{"gig_id": 1, "venue_id": 1, "target": 50000, "currency": "USD",
//!        "event_date": "2026-12-01", "deadline_days_before_event": 7,
//!        "max_performer_slots": 3}'
//!
//! # Resolve it at the deadline
//! curl -X POST http://localhost:3000/gigs/1/resolve \
//!   -H "Content-Type: application/json" -d '{"accept_partial": false}'
//! ```

use std::process;
use std::sync::Arc;

use clap::Parser;
use gigfund_rs::gateway::InMemoryGateway;
use gigfund_rs::http::{AppState, router};
use gigfund_rs::notify::LogNotifier;
use gigfund_rs::{Engine, EngineConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Funding Engine API server.
#[derive(Parser, Debug)]
#[command(name = "gigfund-server")]
#[command(about = "Serves the crowdfunding engine over HTTP", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Shared secret for verifying gateway webhook signatures
    #[arg(long, env = "GATEWAY_WEBHOOK_SECRET", default_value = "dev-secret")]
    webhook_secret: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let state = AppState {
        engine: Arc::new(Engine::new(EngineConfig::default())),
        gateway: Arc::new(InMemoryGateway::new()),
        notifier: Arc::new(LogNotifier),
        webhook_secret: args.webhook_secret,
    };

    let app = router(state);

    let listener = match TcpListener::bind(&args.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error binding to {}: {}", args.addr, e);
            process::exit(1);
        }
    };
    info!(addr = %args.addr, "funding engine API server running");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}
