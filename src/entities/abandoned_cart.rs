use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Denormalized snapshot of a cart taken when abandonment is declared.
///
/// A snapshot is marked `Recovered` at most once, when a matching order
/// later completes. Exact `recovery_token` matching is the primary path;
/// the user/recency heuristic is best-effort.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "abandoned_carts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub cart_id: Uuid,
    #[sea_orm(nullable)]
    pub user_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub cart_token: Option<String>,
    #[sea_orm(unique)]
    pub recovery_token: String,
    #[sea_orm(column_type = "Json")]
    pub items_snapshot: Json,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    pub currency: String,
    pub status: AbandonedCartStatus,
    #[sea_orm(nullable)]
    pub recovered_order_id: Option<Uuid>,
    pub abandoned_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub recovered_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum AbandonedCartStatus {
    #[sea_orm(string_value = "abandoned")]
    Abandoned,
    #[sea_orm(string_value = "recovered")]
    Recovered,
}
