//! Asset Status Deriver
//!
//! Display status is a pure function of current ledger/reservation/invoice
//! facts. The stored column is only a cache refreshed after each state change;
//! a stale value is simply re-derived on the next refresh, so it cannot drift
//! permanently.

use sea_orm::{
    ActiveModelTrait, ConnectionTrait, EntityTrait, FromQueryResult, Set, Statement,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::asset::{self, AssetStatus, ConditionOverride, Entity as AssetEntity};
use crate::errors::ServiceError;
use crate::services::availability::reserved_quantity;

/// Derives the display status from recomputable facts.
///
/// Priority: Sold (on-hand consumed via paid invoices) over Reserved (every
/// unit reserved) over Processing (partially reserved) over InStock, with the
/// manual Damaged/Returned override applying only when no stock fact claims
/// the asset.
pub fn derive_status(
    on_hand: i32,
    reserved: i64,
    sold: i64,
    condition_override: Option<ConditionOverride>,
) -> AssetStatus {
    let available = on_hand as i64 - reserved;
    if reserved > 0 {
        if available <= 0 {
            AssetStatus::Reserved
        } else {
            AssetStatus::Processing
        }
    } else if on_hand > 0 {
        AssetStatus::InStock
    } else if sold > 0 {
        AssetStatus::Sold
    } else if let Some(condition) = condition_override {
        condition.status()
    } else {
        // Zero-state asset: no stock, no sales, no override. Such rows exist
        // only between creation and first intake, and they list as in-stock
        // until a receipt or an override says otherwise.
        AssetStatus::InStock
    }
}

#[derive(Debug, FromQueryResult)]
struct SoldRow {
    sold: i64,
}

/// Net quantity sold through paid invoices (non-voided lines, minus returns).
pub async fn sold_quantity<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
) -> Result<i64, ServiceError> {
    let backend = conn.get_database_backend();
    let placeholder = match backend {
        sea_orm::DbBackend::Postgres => "$1",
        _ => "?",
    };
    let sql = format!(
        "SELECT CAST(COALESCE(SUM(ii.quantity - ii.quantity_returned_total), 0) AS BIGINT) AS sold \
         FROM invoice_items ii \
         INNER JOIN invoices inv ON inv.id = ii.invoice_id \
         WHERE ii.asset_id = {} AND ii.voided_at IS NULL AND inv.status = 'paid'",
        placeholder,
    );
    let row = SoldRow::find_by_statement(Statement::from_sql_and_values(
        backend,
        &sql,
        [asset_id.into()],
    ))
    .one(conn)
    .await
    .map_err(ServiceError::db_error)?;

    Ok(row.map(|r| r.sold).unwrap_or(0))
}

/// Recomputes and persists the derived status for one asset. Returns the
/// freshly derived value.
#[instrument(skip(conn))]
pub async fn refresh_asset_status<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
) -> Result<AssetStatus, ServiceError> {
    let asset = AssetEntity::find_by_id(asset_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Asset {} not found", asset_id)))?;

    let reserved = reserved_quantity(conn, asset_id, None).await?;
    let sold = sold_quantity(conn, asset_id).await?;
    let condition_override = asset
        .condition_override
        .as_deref()
        .and_then(ConditionOverride::from_str);

    let derived = derive_status(asset.on_hand, reserved, sold, condition_override);
    if derived.as_str() != asset.status {
        let old_status = asset.status.clone();
        let mut active: asset::ActiveModel = asset.into();
        active.status = Set(derived.as_str().to_string());
        active.update(conn).await.map_err(ServiceError::db_error)?;
        info!(
            asset_id = %asset_id,
            old_status = %old_status,
            new_status = %derived.as_str(),
            "Asset status re-derived"
        );
    }

    Ok(derived)
}

/// Sets or clears the manual Damaged/Returned override, then re-derives.
#[instrument(skip(conn))]
pub async fn set_condition<C: ConnectionTrait>(
    conn: &C,
    asset_id: Uuid,
    condition: Option<ConditionOverride>,
) -> Result<AssetStatus, ServiceError> {
    let asset = AssetEntity::find_by_id(asset_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Asset {} not found", asset_id)))?;

    let mut active: asset::ActiveModel = asset.into();
    active.condition_override = Set(condition.map(|c| c.as_str().to_string()));
    active.update(conn).await.map_err(ServiceError::db_error)?;

    refresh_asset_status(conn, asset_id).await
}
