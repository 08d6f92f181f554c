use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal webhook outcome for one transaction reference.
///
/// The unique index on `transaction_reference` is the idempotency guard:
/// webhook processing inserts this row first, and a conflict means the
/// reference was already resolved, so the delivery is a safe no-op.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_responses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub transaction_reference: String,
    pub payment_session_id: Uuid,
    #[sea_orm(nullable)]
    pub order_id: Option<Uuid>,
    pub outcome: PaymentOutcome,
    #[sea_orm(nullable)]
    pub auth_code: Option<String>,
    #[sea_orm(nullable)]
    pub card_masked: Option<String>,
    #[sea_orm(nullable)]
    pub error: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub raw_payload: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment_session::Entity",
        from = "Column::PaymentSessionId",
        to = "super::payment_session::Column::Id"
    )]
    PaymentSession,
}

impl Related<super::payment_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PaymentOutcome {
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failure")]
    Failure,
}
