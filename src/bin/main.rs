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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use gig_settlement::{
    AdminId, BookingId, BookingStatus, Engine, EntryStatus, FeePolicy, FreelancerId,
    InMemoryCatalog, InMemoryDirectory, ListingStatus, MONEY_PRECISION, MethodKind, NewBooking,
    PaymentDetails, PaymentType, RequestId, Schedule, ServiceId, ServiceListing, SettlementError,
    UserId, round_money,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Settlement script runner
///
/// Replays a CSV script of marketplace commands against a fresh engine and
/// writes the resulting wallet balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "gig-settlement")]
#[command(about = "Replays marketplace settlement scripts", long_about = None)]
struct Args {
    /// Path to the CSV script
    ///
    /// Expected format: op,key,actor,target,amount,detail
    /// Example: cargo run -- script.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Platform fee taken from booking payments
    #[arg(long, env = "GIG_BOOKING_FEE_RATE", default_value = "0.10")]
    booking_fee_rate: Decimal,

    /// Platform fee taken from withdrawals
    #[arg(long, env = "GIG_WITHDRAWAL_FEE_RATE", default_value = "0.05")]
    withdrawal_fee_rate: Decimal,

    /// Smallest advance payment, as a share of the service price
    #[arg(long, env = "GIG_ADVANCE_MINIMUM_RATIO", default_value = "0.30")]
    advance_minimum_ratio: Decimal,
}

impl Args {
    fn policy(&self) -> FeePolicy {
        FeePolicy {
            booking_fee_rate: self.booking_fee_rate,
            withdrawal_fee_rate: self.withdrawal_fee_rate,
            advance_minimum_ratio: self.advance_minimum_ratio,
        }
    }
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let script = match run_script(BufReader::new(file), args.policy()) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("Error running script: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_wallets(&script, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

#[derive(Debug, Error)]
enum ScriptError {
    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

/// Why a row was skipped.
#[derive(Debug, Error)]
enum RowError {
    #[error("unknown operation '{0}'")]
    UnknownOp(String),

    #[error("missing {0}")]
    Missing(&'static str),

    #[error("unknown {kind} '{key}'")]
    UnknownKey { kind: &'static str, key: String },

    #[error("invalid {field} '{value}'")]
    Invalid { field: &'static str, value: String },

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

/// Raw CSV record matching the script format.
///
/// Fields: `op, key, actor, target, amount, detail`
#[derive(Debug, Deserialize)]
struct ScriptRecord {
    op: String,
    key: String,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    detail: Option<String>,
}

impl ScriptRecord {
    fn actor(&self) -> Result<&str, RowError> {
        non_empty(&self.actor).ok_or(RowError::Missing("actor"))
    }

    fn target(&self) -> Result<&str, RowError> {
        non_empty(&self.target).ok_or(RowError::Missing("target"))
    }

    fn amount(&self) -> Result<Decimal, RowError> {
        self.amount.ok_or(RowError::Missing("amount"))
    }

    fn detail(&self) -> Option<String> {
        non_empty(&self.detail).map(str::to_string)
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}

/// Engine plus the symbolic names a script uses for generated ids.
struct Script {
    engine: Engine,
    catalog: Arc<InMemoryCatalog>,
    directory: Arc<InMemoryDirectory>,
    freelancers: BTreeMap<String, FreelancerId>,
    admins: HashMap<String, AdminId>,
    clients: HashMap<String, UserId>,
    services: HashMap<String, ServiceId>,
    bookings: HashMap<String, BookingId>,
    requests: HashMap<String, RequestId>,
}

fn lookup<T: Copy>(map: &HashMap<String, T>, kind: &'static str, key: &str) -> Result<T, RowError> {
    map.get(key).copied().ok_or_else(|| RowError::UnknownKey {
        kind,
        key: key.to_string(),
    })
}

impl Script {
    fn new(policy: FeePolicy) -> Result<Self, SettlementError> {
        let catalog = Arc::new(InMemoryCatalog::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = Engine::new(catalog.clone(), directory.clone()).with_policy(policy)?;
        Ok(Self {
            engine,
            catalog,
            directory,
            freelancers: BTreeMap::new(),
            admins: HashMap::new(),
            clients: HashMap::new(),
            services: HashMap::new(),
            bookings: HashMap::new(),
            requests: HashMap::new(),
        })
    }

    fn freelancer(&self, key: &str) -> Result<FreelancerId, RowError> {
        self.freelancers
            .get(key)
            .copied()
            .ok_or_else(|| RowError::UnknownKey {
                kind: "freelancer",
                key: key.to_string(),
            })
    }

    /// Clients need no registration; the first mention creates one.
    fn client(&mut self, key: &str) -> UserId {
        *self.clients.entry(key.to_string()).or_insert_with(UserId::new)
    }

    fn apply(&mut self, record: &ScriptRecord) -> Result<(), RowError> {
        let op = record.op.to_lowercase();
        match op.as_str() {
            "freelancer" => {
                let id = FreelancerId::new();
                self.directory.add_freelancer(id);
                self.engine.open_wallet(id)?;
                self.freelancers.insert(record.key.clone(), id);
            }
            "admin" => {
                let id = AdminId::new();
                self.directory.add_admin(id);
                self.admins.insert(record.key.clone(), id);
            }
            "service" => {
                let owner = self.freelancer(record.actor()?)?;
                let status = match record.detail().as_deref() {
                    None | Some("active") => ListingStatus::Active,
                    Some("inactive") => ListingStatus::Inactive,
                    Some("suspended") => ListingStatus::Suspended,
                    Some(other) => {
                        return Err(RowError::Invalid {
                            field: "listing status",
                            value: other.to_string(),
                        });
                    }
                };
                let id = ServiceId::new();
                self.catalog.insert(ServiceListing {
                    id,
                    owner,
                    price: round_money(record.amount()?),
                    status,
                });
                self.services.insert(record.key.clone(), id);
            }
            "book" => {
                let client = self.client(record.actor()?);
                let service = lookup(&self.services, "service", record.target()?)?;
                let receipt = self.engine.create_booking(NewBooking {
                    service,
                    client,
                    payment_type: payment_type(record.detail().as_deref())?,
                    booking_amount: record.amount.unwrap_or_default(),
                    schedule: Schedule {
                        date: chrono::Utc::now().date_naive(),
                        time: String::new(),
                    },
                    notes: None,
                })?;
                self.bookings.insert(record.key.clone(), receipt.booking_id);
            }
            "accept" | "reject" | "hire" | "complete" => {
                let booking = lookup(&self.bookings, "booking", &record.key)?;
                let freelancer = self.freelancer(record.actor()?)?;
                let status = match op.as_str() {
                    "accept" => BookingStatus::Accepted,
                    "reject" => BookingStatus::Rejected,
                    "hire" => BookingStatus::Hired,
                    _ => BookingStatus::Completed,
                };
                self.engine
                    .update_booking_status(booking, status, freelancer, record.detail())?;
            }
            "withdraw" => {
                let booking = lookup(&self.bookings, "booking", &record.key)?;
                let client = self.client(record.actor()?);
                self.engine.withdraw_booking(booking, client)?;
            }
            "pay" => {
                let id = lookup(&self.bookings, "booking", &record.key)?;
                let client = self.client(record.actor()?);
                let status = entry_status(record.detail().as_deref())?;
                let reference = self
                    .engine
                    .booking(&id)
                    .map(|booking| booking.ledger_reference)
                    .ok_or(SettlementError::BookingNotFound)?;
                self.engine.confirm_payment(id, client, status, &reference)?;
            }
            "request" => {
                let freelancer = self.freelancer(record.actor()?)?;
                let (method, details) = payment_details(record.detail().as_deref())?;
                let request =
                    self.engine
                        .request_withdrawal(freelancer, record.amount()?, method, &details)?;
                self.requests.insert(record.key.clone(), request.id);
            }
            "approve" => {
                let request = lookup(&self.requests, "request", &record.key)?;
                let admin = lookup(&self.admins, "admin", record.actor()?)?;
                self.engine
                    .approve_withdrawal(request, admin, None, record.detail())?;
            }
            "deny" => {
                let request = lookup(&self.requests, "request", &record.key)?;
                let admin = lookup(&self.admins, "admin", record.actor()?)?;
                self.engine
                    .reject_withdrawal(request, admin, record.detail(), None)?;
            }
            "fail" => {
                let request = lookup(&self.requests, "request", &record.key)?;
                let admin = lookup(&self.admins, "admin", record.actor()?)?;
                self.engine
                    .mark_withdrawal_failed(request, admin, record.detail())?;
            }
            "retry" => {
                let request = lookup(&self.requests, "request", &record.key)?;
                let admin = lookup(&self.admins, "admin", record.actor()?)?;
                self.engine.retry_withdrawal(request, admin)?;
            }
            "cancel" => {
                let request = lookup(&self.requests, "request", &record.key)?;
                let freelancer = self.freelancer(record.actor()?)?;
                self.engine.cancel_withdrawal(request, freelancer)?;
            }
            _ => return Err(RowError::UnknownOp(record.op.clone())),
        }
        Ok(())
    }
}

fn payment_type(detail: Option<&str>) -> Result<PaymentType, RowError> {
    match detail {
        None | Some("full") => Ok(PaymentType::Full),
        Some("advance") => Ok(PaymentType::Advance),
        Some("pay-after-service") => Ok(PaymentType::PayAfterService),
        Some(other) => Err(RowError::Invalid {
            field: "payment type",
            value: other.to_string(),
        }),
    }
}

fn entry_status(detail: Option<&str>) -> Result<EntryStatus, RowError> {
    match detail {
        None | Some("completed") => Ok(EntryStatus::Completed),
        Some("failed") => Ok(EntryStatus::Failed),
        Some("refunded") => Ok(EntryStatus::Refunded),
        Some("cancelled") => Ok(EntryStatus::Cancelled),
        Some(other) => Err(RowError::Invalid {
            field: "payment status",
            value: other.to_string(),
        }),
    }
}

/// Parses `method:value`, where bank transfers carry
/// `bank|account|ifsc|holder`.
fn payment_details(detail: Option<&str>) -> Result<(MethodKind, PaymentDetails), RowError> {
    let detail = detail.ok_or(RowError::Missing("payment method"))?;
    let (method, value) = detail.split_once(':').unwrap_or((detail, ""));
    let value = Some(value.to_string());
    let mut details = PaymentDetails::default();
    let method = match method {
        "bank_transfer" => {
            let mut parts = value.as_deref().unwrap_or_default().split('|');
            let mut next = || parts.next().map(str::to_string);
            details.bank_name = next();
            details.account_number = next();
            details.ifsc_code = next();
            details.account_holder_name = next();
            MethodKind::BankTransfer
        }
        "upi" => {
            details.upi_id = value;
            MethodKind::Upi
        }
        "paypal" => {
            details.paypal_email = value;
            MethodKind::Paypal
        }
        "other" => {
            details.other_details = value;
            MethodKind::Other
        }
        other => {
            return Err(RowError::Invalid {
                field: "payment method",
                value: other.to_string(),
            });
        }
    };
    Ok((method, details))
}

/// Runs a settlement script from a CSV reader.
///
/// Rows are applied in order. Malformed rows and rejected operations are
/// logged and skipped; later rows still run.
///
/// # CSV Format
///
/// Expected columns: `op, key, actor, target, amount, detail`
/// - `op`: `freelancer`, `admin`, `service`, `book`, `accept`, `reject`,
///   `hire`, `complete`, `withdraw`, `pay`, `request`, `approve`, `deny`,
///   `fail`, `retry` or `cancel`
/// - `key`: Name of the record the row creates or acts on
/// - `actor`: Name of the acting freelancer, client or admin
/// - `target`: Service a `book` row books
/// - `amount`: Price, booking amount or withdrawal amount
/// - `detail`: Payment type, payment status, payout method or notes
///
/// # Example
///
/// ```csv
/// op,key,actor,target,amount,detail
/// freelancer,alice,,,,
/// service,design,alice,,1000,
/// book,b1,carol,design,300,advance
/// accept,b1,alice,,,
/// pay,b1,carol,,,completed
/// ```
///
/// # Errors
///
/// Returns an error if the reader fails or the fee policy is out of range.
fn run_script<R: Read>(reader: R, policy: FeePolicy) -> Result<Script, ScriptError> {
    let mut script = Script::new(policy)?;

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (row, result) in rdr.deserialize::<ScriptRecord>().enumerate() {
        let line = row + 2;
        match result {
            Ok(record) => {
                if let Err(e) = script.apply(&record) {
                    debug!(line, op = %record.op, key = %record.key, error = %e, "skipping row");
                }
            }
            Err(e) => {
                if e.is_io_error() {
                    return Err(e.into());
                }
                debug!(line, error = %e, "skipping malformed row");
            }
        }
    }

    Ok(script)
}

/// Rounds and pads to cents, so `0` prints as `0.00`.
fn cents(amount: Decimal) -> Decimal {
    let mut amount = round_money(amount);
    amount.rescale(MONEY_PRECISION);
    amount
}

#[derive(Debug, Serialize)]
struct WalletRow {
    wallet: String,
    balance: Decimal,
    entries: usize,
}

/// Writes freelancer wallets, sorted by name, followed by the platform
/// wallet.
///
/// # CSV Format
///
/// Columns: `wallet, balance, entries`
///
/// ```csv
/// wallet,balance,entries
/// alice,0.00,2
/// platform,313.50,2
/// ```
fn write_wallets<W: Write>(script: &Script, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for (name, id) in &script.freelancers {
        let Some(wallet) = script.engine.wallet(id) else {
            continue;
        };
        wtr.serialize(WalletRow {
            wallet: name.clone(),
            balance: cents(wallet.balance()),
            entries: wallet.entries().len(),
        })?;
    }

    let platform = script.engine.platform_wallet();
    wtr.serialize(WalletRow {
        wallet: "platform".to_string(),
        balance: cents(platform.current_balance()),
        entries: platform.entries().len(),
    })?;

    wtr.flush()?;
    Ok(())
}
