use sea_orm::error::DbErr;
use sea_orm::TransactionError;
use serde::Serialize;
use uuid::Uuid;

/// Marker raised by the storage-level stock trigger. The application guard and
/// the trigger must surface the same user-facing condition, so the classifier
/// below folds both into [`ServiceError::InsufficientStock`].
pub const INSUFFICIENT_STOCK_SQLSTATE_TOKEN: &str = "INSUFFICIENT_STOCK";

/// Errors produced by the engine's services.
#[derive(thiserror::Error, Debug, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock for asset {asset_id}: requested {requested}, available {available}")]
    InsufficientStock {
        asset_id: Uuid,
        requested: i32,
        available: i64,
    },

    #[error("Contention on asset row, retry the operation: {0}")]
    Contention(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Overpayment rejected: paying {attempted} would exceed invoice total {total}")]
    OverpaymentRejected {
        attempted: rust_decimal::Decimal,
        total: rust_decimal::Decimal,
    },

    #[error("Over-return rejected: requested {requested}, returnable remainder {returnable}")]
    OverReturnRejected { requested: i32, returnable: i32 },

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Stable machine-readable code for the external API layer. These strings
    /// are a contract; changing one is a breaking change for callers.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::DatabaseError(_) => "DATABASE_ERROR",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::ValidationError(_) => "VALIDATION_ERROR",
            ServiceError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            ServiceError::Contention(_) => "CONTENTION",
            ServiceError::InvalidTransition(_) => "INVALID_TRANSITION",
            ServiceError::OverpaymentRejected { .. } => "OVERPAYMENT_REJECTED",
            ServiceError::OverReturnRejected { .. } => "OVER_RETURN_REJECTED",
            ServiceError::EventError(_) => "EVENT_ERROR",
            ServiceError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may safely retry the whole operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Contention(_))
    }

    /// Convenience used at `.map_err` call sites, mirroring `DatabaseError`
    /// construction but routing through the classifier first.
    pub fn db_error(err: DbErr) -> Self {
        map_db_err(err)
    }
}

/// Classifies low-level database errors into the service taxonomy.
///
/// The stock-guard trigger aborts with a message carrying
/// [`INSUFFICIENT_STOCK_SQLSTATE_TOKEN`]; lock-wait timeouts and deadlock
/// detection are transient and become [`ServiceError::Contention`]. Everything
/// else stays a `DatabaseError`.
pub fn map_db_err(err: DbErr) -> ServiceError {
    let message = err.to_string();
    if message.contains(INSUFFICIENT_STOCK_SQLSTATE_TOKEN) {
        // The trigger cannot tell us the exact numbers; the guard normally
        // rejects first with precise ones. Zeroed fields mark the trigger path.
        return ServiceError::InsufficientStock {
            asset_id: Uuid::nil(),
            requested: 0,
            available: 0,
        };
    }
    let lowered = message.to_lowercase();
    if lowered.contains("deadlock")
        || lowered.contains("lock timeout")
        || lowered.contains("lock wait")
        || lowered.contains("database is locked")
        || lowered.contains("could not obtain lock")
    {
        return ServiceError::Contention(message);
    }
    ServiceError::DatabaseError(err)
}

impl From<TransactionError<ServiceError>> for ServiceError {
    fn from(err: TransactionError<ServiceError>) -> Self {
        match err {
            TransactionError::Connection(db_err) => map_db_err(db_err),
            TransactionError::Transaction(service_err) => service_err,
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_abort_maps_to_insufficient_stock() {
        let err = DbErr::Exec(sea_orm::RuntimeErr::Internal(
            "error returned from database: INSUFFICIENT_STOCK asset oversold".into(),
        ));
        let mapped = map_db_err(err);
        assert_eq!(mapped.code(), "INSUFFICIENT_STOCK");
    }

    #[test]
    fn lock_errors_map_to_contention() {
        let err = DbErr::Query(sea_orm::RuntimeErr::Internal(
            "database is locked".into(),
        ));
        let mapped = map_db_err(err);
        assert!(mapped.is_retryable());
        assert_eq!(mapped.code(), "CONTENTION");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ServiceError::InvalidTransition("x".into()).code(),
            "INVALID_TRANSITION"
        );
        assert_eq!(
            ServiceError::OverReturnRejected {
                requested: 3,
                returnable: 1
            }
            .code(),
            "OVER_RETURN_REJECTED"
        );
    }
}
