use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::FromRef,
    http::{Method, Request},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};

use crate::{
    clock::{DynClock, SystemClock},
    database::PostgresConnection,
    identities::services::UserService,
    ledger::services::{
        AccountService, CategoryService, DataService, StatisticsService, TagService,
        TransactionService,
    },
    notifications::{ConsoleMailer, DynEmailClient, NotificationQueue, SendgridMailer},
    repos::{
        AccountRepo, CategoryRepo, DynAccountRepo, DynCategoryRepo, DynTagRepo,
        DynTransactionRepo, DynUserRepo, MemoryStore, TagRepo, TransactionRepo, UserRepo,
    },
};

pub struct DatabaseOptions {
    pub url: String,
    pub pool_size: u32,
    pub timeout_seconds: u8,
}

pub struct Options {
    pub bind_address: SocketAddr,
    /// Without a database, everything is kept in memory and lost on exit.
    pub database: Option<DatabaseOptions>,

    pub email_from_address: String,
    pub email_from_name: String,
    pub sendgrid_key: Option<String>,
    pub notification_queue_size: usize,
}

#[derive(Clone)]
pub struct AppState {
    account_service: AccountService,
    category_service: CategoryService,
    data_service: DataService,
    statistics_service: StatisticsService,
    tag_service: TagService,
    transaction_service: TransactionService,
    user_service: UserService,
}

/// Handles to one storage backend for every repository.
struct Repos {
    accounts: DynAccountRepo,
    categories: DynCategoryRepo,
    tags: DynTagRepo,
    transactions: DynTransactionRepo,
    users: DynUserRepo,
}

impl Repos {
    fn backed_by<S>(store: S) -> Self
    where
        S: AccountRepo + CategoryRepo + TagRepo + TransactionRepo + UserRepo + Send + Sync + 'static,
    {
        let store = Arc::new(store);

        Self {
            accounts: store.clone(),
            categories: store.clone(),
            tags: store.clone(),
            transactions: store.clone(),
            users: store,
        }
    }
}

async fn connect(database: Option<DatabaseOptions>) -> anyhow::Result<Repos> {
    let database = match database {
        Some(database) => database,
        None => {
            warn!("No database configured, data is kept in memory only.");

            return Ok(Repos::backed_by(MemoryStore::new()));
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(database.pool_size)
        .acquire_timeout(Duration::from_secs(database.timeout_seconds.into()))
        .connect(&database.url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Applied database migrations.");

    Ok(Repos::backed_by(PostgresConnection::new(pool)))
}

fn email_client(opts: &Options) -> DynEmailClient {
    match &opts.sendgrid_key {
        Some(api_key) => Arc::new(SendgridMailer::new(
            api_key.clone(),
            opts.email_from_address.clone(),
            opts.email_from_name.clone(),
        )),
        None => {
            info!("No SendGrid key configured, notifications are logged instead.");

            Arc::new(ConsoleMailer {
                from: opts.email_from_address.clone(),
            })
        }
    }
}

impl AppState {
    fn new(repos: Repos, clock: DynClock, notifications: NotificationQueue) -> Self {
        Self {
            account_service: AccountService::new(repos.accounts.clone(), clock.clone()),
            category_service: CategoryService::new(repos.categories.clone(), clock.clone()),
            data_service: DataService::new(
                clock.clone(),
                repos.transactions.clone(),
                repos.users.clone(),
            ),
            statistics_service: StatisticsService::new(
                repos.accounts.clone(),
                repos.transactions.clone(),
            ),
            tag_service: TagService::new(clock.clone(), repos.tags.clone()),
            transaction_service: TransactionService::new(
                repos.accounts.clone(),
                repos.categories,
                clock.clone(),
                repos.tags,
                repos.transactions,
                repos.users.clone(),
            ),
            user_service: UserService::new(repos.accounts, clock, notifications, repos.users),
        }
    }
}

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Serialize)]
struct HealthRep {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthRep> {
    Json(HealthRep {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Every log line written while serving a request carries its id.
fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    info_span!(
        "request",
        %request_id,
        method = %request.method(),
        uri = %request.uri(),
    )
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Layers wrap what was added before them, so a request id is assigned
    // before the span opens and copied onto the response on the way out.
    Router::new()
        .route("/healthz", get(health))
        .nest("/users", crate::identities::http::routes())
        .merge(crate::ledger::http::routes())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(opts: Options) -> anyhow::Result<()> {
    let client = email_client(&opts);
    let repos = connect(opts.database).await?;

    let (notifications, _worker) = NotificationQueue::start(client, opts.notification_queue_size);
    let clock: DynClock = Arc::new(SystemClock);

    let app = app(AppState::new(repos, clock, notifications));

    info!(address = %opts.bind_address, "Listening.");

    axum::Server::bind(&opts.bind_address)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}

impl FromRef<AppState> for AccountService {
    fn from_ref(state: &AppState) -> Self {
        state.account_service.clone()
    }
}

impl FromRef<AppState> for CategoryService {
    fn from_ref(state: &AppState) -> Self {
        state.category_service.clone()
    }
}

impl FromRef<AppState> for DataService {
    fn from_ref(state: &AppState) -> Self {
        state.data_service.clone()
    }
}

impl FromRef<AppState> for StatisticsService {
    fn from_ref(state: &AppState) -> Self {
        state.statistics_service.clone()
    }
}

impl FromRef<AppState> for TagService {
    fn from_ref(state: &AppState) -> Self {
        state.tag_service.clone()
    }
}

impl FromRef<AppState> for TransactionService {
    fn from_ref(state: &AppState) -> Self {
        state.transaction_service.clone()
    }
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> Self {
        state.user_service.clone()
    }
}
