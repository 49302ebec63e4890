use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display status derived from current ledger/reservation/invoice facts.
///
/// The stored `assets.status` column is only a display cache of this value;
/// it is recomputed by the deriver after every state change and never trusted
/// as independently-maintained state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetStatus {
    InStock,
    Processing,
    Reserved,
    Sold,
    Damaged,
    Returned,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::InStock => "in_stock",
            AssetStatus::Processing => "processing",
            AssetStatus::Reserved => "reserved",
            AssetStatus::Sold => "sold",
            AssetStatus::Damaged => "damaged",
            AssetStatus::Returned => "returned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_stock" => Some(AssetStatus::InStock),
            "processing" => Some(AssetStatus::Processing),
            "reserved" => Some(AssetStatus::Reserved),
            "sold" => Some(AssetStatus::Sold),
            "damaged" => Some(AssetStatus::Damaged),
            "returned" => Some(AssetStatus::Returned),
            _ => None,
        }
    }
}

/// Manual override set by damage inspection or a finalized return; sits
/// outside the reservation invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOverride {
    Damaged,
    Returned,
}

impl ConditionOverride {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOverride::Damaged => "damaged",
            ConditionOverride::Returned => "returned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "damaged" => Some(ConditionOverride::Damaged),
            "returned" => Some(ConditionOverride::Returned),
            _ => None,
        }
    }

    pub fn status(&self) -> AssetStatus {
        match self {
            ConditionOverride::Damaged => AssetStatus::Damaged,
            ConditionOverride::Returned => AssetStatus::Returned,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    /// Physical units currently owned, independent of any reservation.
    /// Mutated only by the paid transition and by return restock.
    pub on_hand: i32,
    pub status: String,
    pub condition_override: Option<String>,
    pub unit_price: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::invoice_item::Entity")]
    InvoiceItem,
}

impl Related<super::invoice_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InvoiceItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }

        active_model.updated_at = Set(Some(now));

        Ok(active_model)
    }
}
