//! REST API server example for the settlement engine.
//!
//! Run with: `cargo run --example server`
//!
//! The catalog and user directory are in memory, so the server also exposes
//! routes to register freelancers, admins and services.
//!
//! ## Endpoints
//!
//! - `POST /freelancers` - Register a freelancer and open their wallet
//! - `POST /admins` - Register an administrator
//! - `POST /services` - List a service
//! - `POST /bookings` - Book a service
//! - `GET /bookings/{id}` - Get a booking
//! - `POST /bookings/{id}/status` - Accept, reject or hire (freelancer)
//! - `POST /bookings/{id}/payment` - Confirm payment (client)
//! - `POST /bookings/{id}/complete` - Complete a hired booking (freelancer)
//! - `POST /bookings/{id}/withdraw` - Withdraw a booking (client)
//! - `POST /withdrawals` - Request a payout (freelancer)
//! - `GET /withdrawals/stats` - Withdrawal totals across all freelancers
//! - `GET /withdrawals/{id}` - Get a withdrawal request
//! - `POST /withdrawals/{id}/approve` - Approve and process (admin)
//! - `POST /withdrawals/{id}/reject` - Reject (admin)
//! - `POST /withdrawals/{id}/fail` - Mark a payout failed (admin)
//! - `POST /withdrawals/{id}/retry` - Retry a failed payout (admin)
//! - `POST /withdrawals/{id}/cancel` - Cancel (freelancer)
//! - `GET /wallets` - List freelancer wallets
//! - `GET /wallets/{freelancer}` - Get a freelancer wallet
//! - `GET /wallets/{freelancer}/withdrawals` - Withdrawal summary
//! - `GET /platform-wallet` - Get the platform wallet
//! - `GET /ledger/{reference}` - Get a ledger entry
//!
//! ## Example Usage
//!
//! ```bash
//! # Register a freelancer and list a service
//! curl -X POST http://localhost:3000/freelancers
//! curl -X POST http://localhost:3000/services \
//!   -H "Content-Type: application/json" \
//!   -d '{"owner": "<freelancer id>", "price": "1000.00"}'
//!
//! # Book it with a 30% advance
//! curl -X POST http://localhost:3000/bookings \
//!   -H "Content-Type: application/json" \
//!   -d '{"service": "<service id>", "client": "<any uuid>", "payment_type": "advance",
//!        "booking_amount": "300.00", "schedule": {"date": "2025-07-01", "time": "10:00"},
//!        "notes": null}'
//!
//! # Confirm the payment
//! curl -X POST http://localhost:3000/bookings/<booking id>/payment \
//!   -H "Content-Type: application/json" \
//!   -d '{"client": "<client id>", "status": "completed", "reference": "<ledger reference>"}'
//!
//! # Get the wallet
//! curl http://localhost:3000/wallets/<freelancer id>
//! ```
//!
//! Fee rates are read from `GIG_BOOKING_FEE_RATE`, `GIG_WITHDRAWAL_FEE_RATE`
//! and `GIG_ADVANCE_MINIMUM_RATIO`; log level from `RUST_LOG`.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gig_settlement::{
    AdminId, ApprovalReceipt, Booking, BookingId, BookingReceipt, BookingStatus, Engine, EntryId,
    EntryStatus, ErrorKind, FeePolicy, FreelancerId, FreelancerWallet, InMemoryCatalog,
    InMemoryDirectory, LedgerEntry, ListingStatus, MethodKind, NewBooking, PaymentDetails,
    RequestId, ServiceId, ServiceListing, SettlementError, UserId, WithdrawalRequest,
    WithdrawalSummary,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct ServiceRequest {
    pub owner: FreelancerId,
    pub price: Decimal,
    #[serde(default = "active")]
    pub status: ListingStatus,
}

fn active() -> ListingStatus {
    ListingStatus::Active
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub freelancer: FreelancerId,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub client: UserId,
    pub status: EntryStatus,
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub freelancer: FreelancerId,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClientAction {
    pub client: UserId,
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub freelancer: FreelancerId,
    pub amount: Decimal,
    pub method: MethodKind,
    #[serde(default)]
    pub details: PaymentDetails,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub admin: AdminId,
    pub notes: Option<String>,
    pub payment_reference_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub admin: AdminId,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdminAction {
    pub admin: AdminId,
}

#[derive(Debug, Deserialize)]
pub struct FreelancerAction {
    pub freelancer: FreelancerId,
}

#[derive(Debug, Serialize)]
pub struct Created<T> {
    pub id: T,
}

/// Response body for wallet information.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub freelancer: FreelancerId,
    pub balance: Decimal,
    pub entries: Vec<EntryId>,
}

impl From<&FreelancerWallet> for WalletResponse {
    fn from(wallet: &FreelancerWallet) -> Self {
        WalletResponse {
            freelancer: wallet.freelancer(),
            balance: wallet.balance(),
            entries: wallet.entries(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlatformWalletResponse {
    pub current_balance: Decimal,
    pub total_earnings: Decimal,
    pub total_withdrawals: Decimal,
    pub entries: Vec<EntryId>,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub kind: ErrorKind,
}

// === Application State ===

/// Shared application state: the engine and its in-memory collaborators.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub catalog: Arc<InMemoryCatalog>,
    pub directory: Arc<InMemoryDirectory>,
}

impl AppState {
    pub fn new(policy: FeePolicy) -> Result<Self, SettlementError> {
        let catalog = Arc::new(InMemoryCatalog::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = Engine::new(catalog.clone(), directory.clone()).with_policy(policy)?;
        Ok(AppState {
            engine: Arc::new(engine),
            catalog,
            directory,
        })
    }
}

// === Error Handling ===

/// Wrapper for converting `SettlementError` into HTTP responses.
pub struct AppError(SettlementError);

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        AppError(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Conflict | ErrorKind::InvalidStateTransition => StatusCode::CONFLICT,
        ErrorKind::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        (
            status_for(kind),
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code().to_string(),
                kind,
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /freelancers - Register a freelancer.
async fn create_freelancer(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Created<FreelancerId>>), AppError> {
    let id = FreelancerId::new();
    state.directory.add_freelancer(id);
    state.engine.open_wallet(id)?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

/// POST /admins - Register an administrator.
async fn create_admin(State(state): State<AppState>) -> (StatusCode, Json<Created<AdminId>>) {
    let id = AdminId::new();
    state.directory.add_admin(id);
    (StatusCode::CREATED, Json(Created { id }))
}

/// POST /services - List a service.
async fn create_service(
    State(state): State<AppState>,
    Json(request): Json<ServiceRequest>,
) -> (StatusCode, Json<ServiceListing>) {
    let listing = ServiceListing {
        id: ServiceId::new(),
        owner: request.owner,
        price: request.price,
        status: request.status,
    };
    state.catalog.insert(listing.clone());
    (StatusCode::CREATED, Json(listing))
}

/// POST /bookings - Book a service.
async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<NewBooking>,
) -> Result<(StatusCode, Json<BookingReceipt>), AppError> {
    let receipt = state.engine.create_booking(request)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /bookings/{id} - Get a booking.
async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .engine
        .booking(&id)
        .ok_or(SettlementError::BookingNotFound)?;
    Ok(Json(booking))
}

/// POST /bookings/{id}/status - Move a booking along its lifecycle.
async fn update_booking_status(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.engine.update_booking_status(
        id,
        request.status,
        request.freelancer,
        request.notes,
    )?;
    Ok(Json(booking))
}

/// POST /bookings/{id}/payment - Confirm the booking payment.
async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<LedgerEntry>, AppError> {
    let entry =
        state
            .engine
            .confirm_payment(id, request.client, request.status, &request.reference)?;
    Ok(Json(entry))
}

/// POST /bookings/{id}/complete - Complete a hired booking.
async fn complete_booking(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .engine
        .complete_booking(id, request.freelancer, request.notes)?;
    Ok(Json(booking))
}

/// POST /bookings/{id}/withdraw - Withdraw a booking.
async fn withdraw_booking(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(request): Json<ClientAction>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.engine.withdraw_booking(id, request.client)?;
    Ok(Json(booking))
}

/// POST /withdrawals - Request a payout.
async fn request_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<PayoutRequest>,
) -> Result<(StatusCode, Json<WithdrawalRequest>), AppError> {
    let withdrawal = state.engine.request_withdrawal(
        request.freelancer,
        request.amount,
        request.method,
        &request.details,
    )?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

/// GET /withdrawals/{id} - Get a withdrawal request.
async fn get_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    let withdrawal = state
        .engine
        .withdrawal(&id)
        .ok_or(SettlementError::RequestNotFound)?;
    Ok(Json(withdrawal))
}

/// POST /withdrawals/{id}/approve - Approve and process a payout.
async fn approve_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<ApprovalReceipt>, AppError> {
    let receipt = state.engine.approve_withdrawal(
        id,
        request.admin,
        request.notes,
        request.payment_reference_id,
    )?;
    Ok(Json(receipt))
}

/// POST /withdrawals/{id}/reject - Reject a payout.
async fn reject_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    let withdrawal =
        state
            .engine
            .reject_withdrawal(id, request.admin, request.reason, request.notes)?;
    Ok(Json(withdrawal))
}

/// POST /withdrawals/{id}/fail - Mark a payout failed.
async fn fail_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    let withdrawal = state
        .engine
        .mark_withdrawal_failed(id, request.admin, request.reason)?;
    Ok(Json(withdrawal))
}

/// POST /withdrawals/{id}/retry - Requeue a failed payout.
async fn retry_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(request): Json<AdminAction>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    let withdrawal = state.engine.retry_withdrawal(id, request.admin)?;
    Ok(Json(withdrawal))
}

/// POST /withdrawals/{id}/cancel - Cancel a pending payout.
async fn cancel_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(request): Json<FreelancerAction>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    let withdrawal = state.engine.cancel_withdrawal(id, request.freelancer)?;
    Ok(Json(withdrawal))
}

/// GET /wallets - List freelancer wallets.
async fn list_wallets(State(state): State<AppState>) -> Json<Vec<WalletResponse>> {
    let wallets = state
        .engine
        .wallets()
        .map(|wallet| WalletResponse::from(wallet.as_ref()))
        .collect();
    Json(wallets)
}

/// GET /wallets/{freelancer} - Get a freelancer wallet.
async fn get_wallet(
    State(state): State<AppState>,
    Path(freelancer): Path<FreelancerId>,
) -> Result<Json<WalletResponse>, AppError> {
    let wallet = state
        .engine
        .wallet(&freelancer)
        .ok_or(SettlementError::WalletNotFound)?;
    Ok(Json(WalletResponse::from(wallet.as_ref())))
}

/// GET /wallets/{freelancer}/withdrawals - Withdrawal summary.
async fn withdrawal_summary(
    State(state): State<AppState>,
    Path(freelancer): Path<FreelancerId>,
) -> Json<WithdrawalSummary> {
    Json(state.engine.withdrawal_summary(&freelancer))
}

/// GET /withdrawals/stats - Withdrawal totals across all freelancers.
async fn withdrawal_stats(State(state): State<AppState>) -> Json<WithdrawalSummary> {
    Json(state.engine.withdrawal_stats())
}

/// GET /platform-wallet - Get the platform wallet.
async fn get_platform_wallet(State(state): State<AppState>) -> Json<PlatformWalletResponse> {
    let platform = state.engine.platform_wallet();
    Json(PlatformWalletResponse {
        current_balance: platform.current_balance(),
        total_earnings: platform.total_earnings(),
        total_withdrawals: platform.total_withdrawals(),
        entries: platform.entries(),
    })
}

/// GET /ledger/{reference} - Get a ledger entry.
async fn get_entry(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<LedgerEntry>, AppError> {
    let entry = state
        .engine
        .entry(&reference)
        .ok_or(SettlementError::EntryNotFound)?;
    Ok(Json(entry))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/freelancers", post(create_freelancer))
        .route("/admins", post(create_admin))
        .route("/services", post(create_service))
        .route("/bookings", post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/status", post(update_booking_status))
        .route("/bookings/{id}/payment", post(confirm_payment))
        .route("/bookings/{id}/complete", post(complete_booking))
        .route("/bookings/{id}/withdraw", post(withdraw_booking))
        .route("/withdrawals", post(request_withdrawal))
        .route("/withdrawals/stats", get(withdrawal_stats))
        .route("/withdrawals/{id}", get(get_withdrawal))
        .route("/withdrawals/{id}/approve", post(approve_withdrawal))
        .route("/withdrawals/{id}/reject", post(reject_withdrawal))
        .route("/withdrawals/{id}/fail", post(fail_withdrawal))
        .route("/withdrawals/{id}/retry", post(retry_withdrawal))
        .route("/withdrawals/{id}/cancel", post(cancel_withdrawal))
        .route("/wallets", get(list_wallets))
        .route("/wallets/{freelancer}", get(get_wallet))
        .route("/wallets/{freelancer}/withdrawals", get(withdrawal_summary))
        .route("/platform-wallet", get(get_platform_wallet))
        .route("/ledger/{reference}", get(get_entry))
        .with_state(state)
}

// === Configuration ===

fn rate_from_env(name: &str, default: Decimal) -> Result<Decimal, Box<dyn Error>> {
    match std::env::var(name) {
        Ok(value) => Decimal::from_str(value.trim())
            .map_err(|e| format!("invalid {name} '{value}': {e}").into()),
        Err(_) => Ok(default),
    }
}

fn policy_from_env() -> Result<FeePolicy, Box<dyn Error>> {
    Ok(FeePolicy {
        booking_fee_rate: rate_from_env(
            "GIG_BOOKING_FEE_RATE",
            FeePolicy::DEFAULT_BOOKING_FEE_RATE,
        )?,
        withdrawal_fee_rate: rate_from_env(
            "GIG_WITHDRAWAL_FEE_RATE",
            FeePolicy::DEFAULT_WITHDRAWAL_FEE_RATE,
        )?,
        advance_minimum_ratio: rate_from_env(
            "GIG_ADVANCE_MINIMUM_RATIO",
            FeePolicy::DEFAULT_ADVANCE_MINIMUM_RATIO,
        )?,
    })
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let state = AppState::new(policy_from_env()?)?;
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    info!("settlement API server running on http://127.0.0.1:3000");

    axum::serve(listener, app).await?;
    Ok(())
}
