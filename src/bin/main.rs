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

use chrono::{DateTime, Days, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use gigfund_rs::gateway::InMemoryGateway;
use gigfund_rs::notify::NoopNotifier;
use gigfund_rs::{
    Engine, EventEnvelope, GatewayEvent, GigConfig, GigId, PerformerId, PledgeId, PledgeRequest,
    SupporterId, VenueId, run_daily_sweep,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Funding Engine - Process campaign scenario CSV files
///
/// Reads a scenario script from a CSV file, replays it against an in-memory
/// engine and payment gateway, and outputs the final campaign states to
/// stdout.
#[derive(Parser, Debug)]
#[command(name = "gigfund-rs")]
#[command(about = "A crowdfunding engine that replays campaign scenario CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with scenario operations
    ///
    /// Expected format: op,gig,party,pledge,amount,flag
    /// Example: cargo run -- scenario.csv > campaigns.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    // Replay the scenario
    let engine = match run_scenario(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing scenario: {}", e);
            process::exit(1);
        }
    };

    // Write results to stdout
    if let Err(e) = write_summaries(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the scenario format.
///
/// Fields: `op, gig, party, pledge, amount, flag`
///
/// `party` is the venue, performer or supporter id, depending on the op.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    gig: Option<u32>,
    party: Option<u32>,
    pledge: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    flag: Option<String>,
}

/// One scenario operation, decoded from a CSV row.
#[derive(Debug)]
enum ScenarioOp {
    /// Register a fully capable payout account for a venue.
    PayoutAccount { venue: VenueId },
    /// Create a campaign. `min_percent` present means partial funding is
    /// allowed at that threshold.
    Create {
        gig: GigId,
        venue: VenueId,
        target: i64,
        min_percent: Option<u8>,
    },
    Open { gig: GigId },
    Performer { gig: GigId, performer: PerformerId },
    Start { gig: GigId },
    Pledge {
        gig: GigId,
        supporter: SupporterId,
        pledge: PledgeId,
        amount: i64,
    },
    /// Deliver the gateway's hold confirmation for a pledge.
    Confirm { pledge: PledgeId },
    CancelPledge { supporter: SupporterId, pledge: PledgeId },
    Resolve { gig: GigId, accept_partial: bool },
    Retry { gig: GigId },
    Cancel { gig: GigId },
    Sweep,
}

impl CsvRecord {
    /// Converts a CSV record to a scenario operation.
    ///
    /// Returns `None` for unknown ops or missing required fields.
    fn into_op(self) -> Option<ScenarioOp> {
        match self.op.to_lowercase().as_str() {
            "payout_account" => Some(ScenarioOp::PayoutAccount {
                venue: VenueId(self.party?),
            }),
            "create" => Some(ScenarioOp::Create {
                gig: GigId(self.gig?),
                venue: VenueId(self.party?),
                target: self.amount?,
                min_percent: self.flag.as_deref().and_then(|f| f.parse().ok()),
            }),
            "open" => Some(ScenarioOp::Open { gig: GigId(self.gig?) }),
            "performer" => Some(ScenarioOp::Performer {
                gig: GigId(self.gig?),
                performer: PerformerId(self.party?),
            }),
            "start" => Some(ScenarioOp::Start { gig: GigId(self.gig?) }),
            "pledge" => Some(ScenarioOp::Pledge {
                gig: GigId(self.gig?),
                supporter: SupporterId(self.party?),
                pledge: PledgeId(self.pledge?),
                amount: self.amount?,
            }),
            "confirm" => Some(ScenarioOp::Confirm {
                pledge: PledgeId(self.pledge?),
            }),
            "cancel_pledge" => Some(ScenarioOp::CancelPledge {
                supporter: SupporterId(self.party?),
                pledge: PledgeId(self.pledge?),
            }),
            "resolve" => Some(ScenarioOp::Resolve {
                gig: GigId(self.gig?),
                accept_partial: self.flag.as_deref() == Some("partial"),
            }),
            "retry" => Some(ScenarioOp::Retry { gig: GigId(self.gig?) }),
            "cancel" => Some(ScenarioOp::Cancel { gig: GigId(self.gig?) }),
            "sweep" => Some(ScenarioOp::Sweep),
            _ => None,
        }
    }
}

fn apply_op(
    engine: &Engine,
    gateway: &InMemoryGateway,
    notifier: &NoopNotifier,
    op: ScenarioOp,
    now: DateTime<Utc>,
) -> Result<(), gigfund_rs::FundingError> {
    match op {
        ScenarioOp::PayoutAccount { venue } => {
            engine.register_payout_account(venue, format!("acct-{venue}"), true, true, now);
        }
        ScenarioOp::Create {
            gig,
            venue,
            target,
            min_percent,
        } => {
            let today = now.date_naive();
            engine.create_gig(
                gig,
                GigConfig {
                    venue_id: venue,
                    target,
                    currency: "USD".to_owned(),
                    // Scenario campaigns sit a month out with a week of lead.
                    event_date: today + Days::new(30),
                    deadline_days_before_event: 7,
                    allow_partial: min_percent.is_some(),
                    min_percent: min_percent.unwrap_or(0),
                    max_performer_slots: 8,
                },
                now,
            )?;
        }
        ScenarioOp::Open { gig } => engine.open_for_applications(gig)?,
        ScenarioOp::Performer { gig, performer } => engine.commit_performer(gig, performer)?,
        ScenarioOp::Start { gig } => engine.begin_accepting_pledges(gig)?,
        ScenarioOp::Pledge {
            gig,
            supporter,
            pledge,
            amount,
        } => {
            engine.create_pledge(
                gig,
                PledgeRequest {
                    pledge_id: pledge,
                    supporter_id: supporter,
                    amount,
                    anonymous: false,
                    message: None,
                },
                now,
                gateway,
            )?;
        }
        ScenarioOp::Confirm { pledge } => {
            engine.apply_event(
                EventEnvelope {
                    event_id: format!("csv-hold-{pledge}"),
                    event: GatewayEvent::HoldPlaced {
                        pledge_id: pledge,
                        external_ref: None,
                    },
                },
                now,
            );
        }
        ScenarioOp::CancelPledge { supporter, pledge } => {
            engine.cancel_pledge(pledge, supporter, now, gateway)?;
        }
        ScenarioOp::Resolve { gig, accept_partial } => {
            engine.resolve(gig, accept_partial, now, gateway, notifier)?;
        }
        ScenarioOp::Retry { gig } => {
            engine.retry_stuck_pledges(gig, now, gateway, notifier)?;
        }
        ScenarioOp::Cancel { gig } => {
            engine.cancel_gig(gig, now, gateway, notifier)?;
        }
        ScenarioOp::Sweep => {
            run_daily_sweep(engine, now, gateway, notifier);
        }
    }
    Ok(())
}

/// Replays a scenario from a CSV reader.
///
/// Uses streaming parsing so arbitrarily long scenarios never load fully
/// into memory. Malformed rows and failed operations are silently skipped;
/// the interesting state is whatever the surviving operations produce.
///
/// # CSV Format
///
/// Expected columns: `op, gig, party, pledge, amount, flag`
/// - `op`: Operation (payout_account, create, open, performer, start,
///   pledge, confirm, cancel_pledge, resolve, retry, cancel, sweep)
/// - `gig`: Campaign ID (u32)
/// - `party`: Venue, performer or supporter ID, per op
/// - `pledge`: Pledge ID (u32)
/// - `amount`: Minor currency units (target or pledge amount)
/// - `flag`: `create` takes a partial-funding percent; `resolve` takes
///   `partial` for the accept-partial directive
///
/// # Example
///
/// ```csv
/// op,gig,party,pledge,amount,flag
/// payout_account,,1,,,
/// create,1,1,,10000,
/// open,1,,,,
/// performer,1,9,,,
/// start,1,,,,
/// pledge,1,3,1,10000,
/// confirm,,,1,,
/// resolve,1,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
/// Individual operation errors are logged in debug mode but don't stop
/// processing.
pub fn run_scenario<R: Read>(reader: R) -> Result<Engine, csv::Error> {
    let engine = Engine::default();
    let gateway = InMemoryGateway::new();
    let notifier = NoopNotifier;
    let now = Utc::now();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " pledge "
        .flexible(true) // Allow missing trailing fields
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(op) = record.into_op() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid scenario record");
                    continue;
                };

                // Apply operation, ignoring errors (silent failure)
                if let Err(e) = apply_op(&engine, &gateway, &notifier, op, now) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping op: {}", e);
                }
            }
            Err(e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(engine)
}

/// Write campaign summaries to a CSV writer.
///
/// Outputs every campaign's derived view, ordered by id.
///
/// # CSV Format
///
/// Columns: `gig_id, venue_id, status, target, pledged, currency,
/// percent_funded, amount_remaining, supporter_count, performer_count,
/// event_date, deadline, days_until_deadline`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_summaries<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for summary in engine.summaries(Utc::now().date_naive()) {
        wtr.serialize(&summary)?;
    }

    wtr.flush()?;
    Ok(())
}
