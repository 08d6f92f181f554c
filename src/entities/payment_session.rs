use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable record of one external gateway payment attempt, persisted before
/// the client is redirected. `amount` is the recorded total the webhook is
/// reconciled against; client-supplied amounts are never trusted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub transaction_reference: String,
    #[sea_orm(column_type = "Json")]
    pub form_payload: Json,
    pub redirect_url: String,
    #[sea_orm(nullable)]
    pub user_id: Option<Uuid>,
    pub cart_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentSessionStatus,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::payment_response::Entity")]
    PaymentResponses,
}

impl Related<super::payment_response::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentResponses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PaymentSessionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "resolved")]
    Resolved,
    #[sea_orm(string_value = "expired")]
    Expired,
}
