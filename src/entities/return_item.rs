use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One returned line inside an InvoiceReturn. `quantity_returned` is bounded
/// by the source item's remaining returnable quantity at finalization time.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "return_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub return_id: Uuid,
    pub invoice_item_id: Uuid,
    pub asset_id: Uuid,
    pub quantity_returned: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invoice_return::Entity",
        from = "Column::ReturnId",
        to = "super::invoice_return::Column::Id"
    )]
    InvoiceReturn,
    #[sea_orm(
        belongs_to = "super::invoice_item::Entity",
        from = "Column::InvoiceItemId",
        to = "super::invoice_item::Column::Id"
    )]
    InvoiceItem,
}

impl Related<super::invoice_return::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InvoiceReturn.def()
    }
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
