use std::convert::TryFrom;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    authentication::Identity,
    client_ip::ClientIp,
    http_err::ApiResponse,
    ledger::{
        domain::{
            accounts::{AccountChanges, NewAccountData},
            categories::NewCategoryData,
            statistics::{TimeWindow, YearMonth},
            transactions::{TransactionData, TransactionFields},
        },
        errors::LedgerError,
        services::{
            AccountService, CategoryService, DataService, StatisticsService, TagService,
            TransactionFilter, TransactionService, WindowOptions,
        },
    },
};

use super::reps::{self, ResourceCollection};

const DEFAULT_PAGE_SIZE: u32 = 20;

pub async fn list_accounts(
    identity: Identity,
    State(accounts): State<AccountService>,
) -> ApiResponse<Json<ResourceCollection<reps::Account>>> {
    let trees = accounts.list_accounts(identity.user_id).await?;

    Ok(Json(ResourceCollection {
        items: trees.iter().map(reps::Account::from).collect(),
    }))
}

pub async fn get_account(
    identity: Identity,
    State(accounts): State<AccountService>,
    Path(account_id): Path<Uuid>,
) -> ApiResponse<Json<reps::Account>> {
    let tree = accounts.get_account(identity.user_id, account_id).await?;

    Ok(Json((&tree).into()))
}

pub async fn create_account(
    identity: Identity,
    State(accounts): State<AccountService>,
    Json(request): Json<reps::NewAccountRequest>,
) -> ApiResponse<(StatusCode, Json<reps::Account>)> {
    let data = NewAccountData::try_from(request)?;
    let tree = accounts
        .create_account(identity.user_id, identity.client_utc_offset, data)
        .await?;

    Ok((StatusCode::CREATED, Json((&tree).into())))
}

pub async fn modify_account(
    identity: Identity,
    State(accounts): State<AccountService>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<reps::AccountChangesRequest>,
) -> ApiResponse<Json<reps::Account>> {
    let changes = AccountChanges::try_from(request)?;
    let tree = accounts
        .modify_account(identity.user_id, account_id, changes)
        .await?;

    Ok(Json((&tree).into()))
}

pub async fn hide_account(
    identity: Identity,
    State(accounts): State<AccountService>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<reps::HiddenRequest>,
) -> ApiResponse<StatusCode> {
    accounts
        .hide_account(identity.user_id, account_id, request.hidden)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn move_accounts(
    identity: Identity,
    State(accounts): State<AccountService>,
    Json(request): Json<reps::MoveAccountsRequest>,
) -> ApiResponse<StatusCode> {
    let orders = request
        .accounts
        .iter()
        .map(|order| (order.id, order.display_order))
        .collect::<Vec<_>>();

    accounts.move_accounts(identity.user_id, &orders).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_account(
    identity: Identity,
    State(accounts): State<AccountService>,
    Path(account_id): Path<Uuid>,
) -> ApiResponse<StatusCode> {
    accounts.delete_account(identity.user_id, account_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_categories(
    identity: Identity,
    State(categories): State<CategoryService>,
    Query(params): Query<reps::ListCategoriesParams>,
) -> ApiResponse<Json<ResourceCollection<reps::Category>>> {
    let category_type = params.category_type.map(reps::category_type).transpose()?;
    let trees = categories
        .list_categories(identity.user_id, category_type)
        .await?;

    Ok(Json(ResourceCollection {
        items: trees.iter().map(reps::Category::from).collect(),
    }))
}

pub async fn create_category(
    identity: Identity,
    State(categories): State<CategoryService>,
    Json(request): Json<reps::NewCategoryRequest>,
) -> ApiResponse<(StatusCode, Json<reps::Category>)> {
    let data = NewCategoryData::try_from(request)?;
    let category = categories.create_category(identity.user_id, data).await?;

    Ok((StatusCode::CREATED, Json((&category).into())))
}

pub async fn hide_category(
    identity: Identity,
    State(categories): State<CategoryService>,
    Path(category_id): Path<Uuid>,
    Json(request): Json<reps::HiddenRequest>,
) -> ApiResponse<StatusCode> {
    categories
        .hide_category(identity.user_id, category_id, request.hidden)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_category(
    identity: Identity,
    State(categories): State<CategoryService>,
    Path(category_id): Path<Uuid>,
) -> ApiResponse<StatusCode> {
    categories
        .delete_category(identity.user_id, category_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_tags(
    identity: Identity,
    State(tags): State<TagService>,
) -> ApiResponse<Json<ResourceCollection<reps::Tag>>> {
    let tags = tags.list_tags(identity.user_id).await?;

    Ok(Json(ResourceCollection {
        items: tags.iter().map(reps::Tag::from).collect(),
    }))
}

pub async fn create_tag(
    identity: Identity,
    State(tags): State<TagService>,
    Json(request): Json<reps::TagRequest>,
) -> ApiResponse<(StatusCode, Json<reps::Tag>)> {
    let tag = tags.create_tag(identity.user_id, &request.name).await?;

    Ok((StatusCode::CREATED, Json((&tag).into())))
}

pub async fn rename_tag(
    identity: Identity,
    State(tags): State<TagService>,
    Path(tag_id): Path<Uuid>,
    Json(request): Json<reps::TagRequest>,
) -> ApiResponse<Json<reps::Tag>> {
    let tag = tags
        .rename_tag(identity.user_id, tag_id, &request.name)
        .await?;

    Ok(Json((&tag).into()))
}

pub async fn delete_tag(
    identity: Identity,
    State(tags): State<TagService>,
    Path(tag_id): Path<Uuid>,
) -> ApiResponse<StatusCode> {
    tags.delete_tag(identity.user_id, tag_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_transactions(
    identity: Identity,
    State(transactions): State<TransactionService>,
    Query(params): Query<reps::TransactionFilterParams>,
) -> ApiResponse<Json<reps::TransactionPageRep>> {
    let filter = TransactionFilter::try_from(&params)?;
    let page = transactions
        .list_transactions(
            identity.user_id,
            identity.client_utc_offset,
            &filter,
            params.before,
            params.count.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;

    Ok(Json((&page).into()))
}

pub async fn list_transactions_in_month(
    identity: Identity,
    State(transactions): State<TransactionService>,
    Path((year, month)): Path<(i32, u32)>,
    Query(params): Query<reps::TransactionFilterParams>,
) -> ApiResponse<Json<ResourceCollection<reps::Transaction>>> {
    let month = YearMonth::new(year, month).map_err(LedgerError::invalid)?;
    let filter = TransactionFilter::try_from(&params)?;

    let details = transactions
        .list_transactions_in_month(identity.user_id, identity.client_utc_offset, &filter, month)
        .await?;

    Ok(Json(ResourceCollection {
        items: details.iter().map(reps::Transaction::from).collect(),
    }))
}

pub async fn count_transactions(
    identity: Identity,
    State(transactions): State<TransactionService>,
    Query(params): Query<reps::TransactionFilterParams>,
) -> ApiResponse<Json<reps::TransactionCount>> {
    let filter = TransactionFilter::try_from(&params)?;
    let count = transactions
        .count_transactions(identity.user_id, &filter)
        .await?;

    Ok(Json(reps::TransactionCount { count }))
}

pub async fn get_transaction(
    identity: Identity,
    State(transactions): State<TransactionService>,
    Path(transaction_id): Path<Uuid>,
) -> ApiResponse<Json<reps::Transaction>> {
    let detail = transactions
        .get_transaction(identity.user_id, identity.client_utc_offset, transaction_id)
        .await?;

    Ok(Json((&detail).into()))
}

pub async fn create_transaction(
    identity: Identity,
    ClientIp(client_ip): ClientIp,
    State(transactions): State<TransactionService>,
    Json(request): Json<reps::NewTransactionRequest>,
) -> ApiResponse<(StatusCode, Json<reps::Transaction>)> {
    let data = TransactionData::try_from(request)?;
    let detail = transactions
        .create_transaction(
            identity.user_id,
            identity.client_utc_offset,
            data,
            Some(client_ip.to_string()),
        )
        .await?;

    Ok((StatusCode::CREATED, Json((&detail).into())))
}

pub async fn modify_transaction(
    identity: Identity,
    State(transactions): State<TransactionService>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<reps::TransactionFieldsRequest>,
) -> ApiResponse<Json<reps::Transaction>> {
    let detail = transactions
        .modify_transaction(
            identity.user_id,
            identity.client_utc_offset,
            transaction_id,
            TransactionFields::from(request),
        )
        .await?;

    Ok(Json((&detail).into()))
}

pub async fn delete_transaction(
    identity: Identity,
    State(transactions): State<TransactionService>,
    Path(transaction_id): Path<Uuid>,
) -> ApiResponse<StatusCode> {
    transactions
        .delete_transaction(identity.user_id, identity.client_utc_offset, transaction_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

fn window_options(identity: &Identity, use_transaction_timezone: bool) -> WindowOptions {
    WindowOptions {
        client_utc_offset: identity.client_utc_offset,
        use_transaction_timezone,
    }
}

pub async fn total_income_and_expense(
    identity: Identity,
    State(statistics): State<StatisticsService>,
    Query(params): Query<reps::StatisticsParams>,
) -> ApiResponse<Json<reps::IncomeAndExpense>> {
    let window = TimeWindow::new(params.start_time, params.end_time).map_err(LedgerError::invalid)?;
    let (income, expense) = statistics
        .total_income_and_expense(
            identity.user_id,
            window,
            window_options(&identity, params.use_transaction_timezone),
        )
        .await?;

    Ok(Json(reps::IncomeAndExpense { income, expense }))
}

pub async fn transaction_statistics(
    identity: Identity,
    State(statistics): State<StatisticsService>,
    Query(params): Query<reps::StatisticsParams>,
) -> ApiResponse<Json<ResourceCollection<reps::AccountCategoryAmount>>> {
    let window = TimeWindow::new(params.start_time, params.end_time).map_err(LedgerError::invalid)?;
    let totals = statistics
        .accounts_and_categories_totals(
            identity.user_id,
            window,
            window_options(&identity, params.use_transaction_timezone),
        )
        .await?;

    Ok(Json(ResourceCollection {
        items: totals.iter().map(reps::AccountCategoryAmount::from).collect(),
    }))
}

pub async fn transaction_trends(
    identity: Identity,
    State(statistics): State<StatisticsService>,
    Query(params): Query<reps::TrendsParams>,
) -> ApiResponse<Json<ResourceCollection<reps::MonthlyAmounts>>> {
    let start = reps::year_month(&params.start_year_month)?;
    let end = reps::year_month(&params.end_year_month)?;

    debug!(user_id = %identity.user_id, %start, %end, "Generating monthly trends.");

    let trends = statistics
        .monthly_income_and_expense(
            identity.user_id,
            start,
            end,
            window_options(&identity, params.use_transaction_timezone),
        )
        .await?;

    Ok(Json(ResourceCollection {
        items: reps::monthly_amounts(&trends),
    }))
}

pub async fn transaction_amounts(
    identity: Identity,
    State(statistics): State<StatisticsService>,
    Query(params): Query<reps::AmountsParams>,
) -> ApiResponse<Json<reps::LabelledAmounts>> {
    let results = statistics
        .transaction_amounts(
            identity.user_id,
            &params.query,
            window_options(&identity, params.use_transaction_timezone),
        )
        .await?;

    Ok(Json(reps::LabelledAmounts(
        results
            .iter()
            .map(|(label, result)| (label.clone(), result.into()))
            .collect(),
    )))
}

pub async fn clear_data(
    identity: Identity,
    State(data): State<DataService>,
    Json(request): Json<reps::ClearDataRequest>,
) -> ApiResponse<StatusCode> {
    data.clear_user_data(identity.user_id, &request.password)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
