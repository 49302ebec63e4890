use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnStatus {
    Draft,
    Finalized,
    Cancelled,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::Draft => "draft",
            ReturnStatus::Finalized => "finalized",
            ReturnStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ReturnStatus::Draft),
            "finalized" => Some(ReturnStatus::Finalized),
            "cancelled" => Some(ReturnStatus::Cancelled),
            _ => None,
        }
    }
}

/// Refund pays money back through the ledger; exchange issues store credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnType {
    Refund,
    Exchange,
}

impl ReturnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnType::Refund => "refund",
            ReturnType::Exchange => "exchange",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "refund" => Some(ReturnType::Refund),
            "exchange" => Some(ReturnType::Exchange),
            _ => None,
        }
    }
}

/// Condition the goods came back in; decides whether on-hand is restocked at
/// finalization or withheld pending repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestockCondition {
    AsIs,
    NeedsTesting,
    NeedsRepair,
}

impl RestockCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestockCondition::AsIs => "as_is",
            RestockCondition::NeedsTesting => "needs_testing",
            RestockCondition::NeedsRepair => "needs_repair",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "as_is" => Some(RestockCondition::AsIs),
            "needs_testing" => Some(RestockCondition::NeedsTesting),
            "needs_repair" => Some(RestockCondition::NeedsRepair),
            _ => None,
        }
    }

    pub fn restocks_immediately(&self) -> bool {
        matches!(self, RestockCondition::AsIs | RestockCondition::NeedsTesting)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoice_returns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub status: String,
    pub return_type: String,
    pub restock_condition: String,
    pub refund_amount: Decimal,
    pub currency: String,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invoice::Entity",
        from = "Column::InvoiceId",
        to = "super::invoice::Column::Id"
    )]
    Invoice,
    #[sea_orm(has_many = "super::return_item::Entity")]
    ReturnItem,
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl Related<super::return_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnItem.def()
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
