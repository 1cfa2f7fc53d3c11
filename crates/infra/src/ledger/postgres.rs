//! Postgres-backed transaction ledger.
//!
//! Records live in the `stgcmt_result` table. Request and confirmation payloads are stored
//! as JSONB attribute sets.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any other | `Storage` |
//! | PoolClosed / RowNotFound / other | N/A | `Storage` |
//! | undecodable column | N/A | `Domain` / `Storage` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{Span, instrument};
use uuid::Uuid;

use stgcmt_archive::{
    Attributes, NewTransaction, PendingTransaction, PendingTransactionParts, StorageCommitmentReport,
    TransactionStatus,
};
use stgcmt_core::{RecordId, TransactionUid};

use super::r#trait::{LedgerError, TransactionLedger};
use crate::pg::{self, PgSession, with_session};

const SELECT_COLUMNS: &str = r#"
    SELECT pk, transaction_uid, study_iuid, series_iuid, sop_iuid, exporter_id, device_name,
           request, result, status, num_instances, num_failures, created_time, updated_time
    FROM stgcmt_result
"#;

/// Transaction ledger on Postgres.
///
/// Shares a [`PgSession`] with the other stores, so writes made while a unit of work is
/// open on the calling thread commit with it.
#[derive(Debug, Clone)]
pub struct PostgresTransactionLedger {
    session: Arc<PgSession>,
}

impl PostgresTransactionLedger {
    pub fn new(session: Arc<PgSession>) -> Self {
        Self { session }
    }

    #[instrument(
        skip(self, new),
        fields(transaction_uid = %new.request.transaction_uid, study_uid = %new.study_uid),
        err
    )]
    pub(crate) async fn insert(&self, new: NewTransaction) -> Result<PendingTransaction, LedgerError> {
        let record = PendingTransaction::open(RecordId::new(), new, Utc::now())?;

        with_session!(self.session, conn => sqlx::query(
            r#"
            INSERT INTO stgcmt_result (
                pk, transaction_uid, study_iuid, series_iuid, sop_iuid, exporter_id,
                device_name, request, result, status, num_instances, num_failures,
                created_time, updated_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(*record.id_typed().as_uuid())
        .bind(record.transaction_uid().as_str())
        .bind(record.study_uid().as_str())
        .bind(record.series_uid().map(|s| s.as_str()))
        .bind(record.sop_instance_uid().map(|s| s.as_str()))
        .bind(record.exporter_id().as_str())
        .bind(record.device_name().as_str())
        .bind(record.request().to_json())
        .bind(record.status().as_str())
        .bind(i64::from(record.number_of_instances()))
        .bind(i64::from(record.number_of_failures()))
        .bind(record.created_at())
        .bind(record.updated_at())
        .execute(conn))
        .map_err(|e| map_sqlx_error("record", e))?;

        Ok(record)
    }

    #[instrument(skip(self, transaction_uid), fields(transaction_uid = %transaction_uid), err)]
    pub(crate) async fn find(
        &self,
        transaction_uid: &TransactionUid,
    ) -> Result<Option<PendingTransaction>, LedgerError> {
        let sql = format!("{SELECT_COLUMNS} WHERE transaction_uid = $1 ORDER BY created_time LIMIT 2");
        let rows = with_session!(self.session, conn => sqlx::query(&sql)
            .bind(transaction_uid.as_str())
            .fetch_all(conn))
        .map_err(|e| map_sqlx_error("find_by_transaction_uid", e))?;

        if rows.len() > 1 {
            return Err(LedgerError::DuplicateTransaction(transaction_uid.clone()));
        }
        rows.first().map(decode_row).transpose()
    }

    #[instrument(
        skip(self, record, report),
        fields(
            record_id = %record.id_typed(),
            transaction_uid = %record.transaction_uid(),
            status = tracing::field::Empty
        ),
        err
    )]
    pub(crate) async fn update_confirmation(
        &self,
        record: &mut PendingTransaction,
        report: &StorageCommitmentReport,
    ) -> Result<(), LedgerError> {
        let mut updated = record.clone();
        updated.resolve(report, Utc::now())?;
        let confirmation = updated.confirmation().map(Attributes::to_json);

        let result = with_session!(self.session, conn => sqlx::query(
            r#"
            UPDATE stgcmt_result
            SET result = $2, status = $3, num_failures = $4, updated_time = $5
            WHERE pk = $1
            "#,
        )
        .bind(*updated.id_typed().as_uuid())
        .bind(confirmation)
        .bind(updated.status().as_str())
        .bind(i64::from(updated.number_of_failures()))
        .bind(updated.updated_at())
        .execute(conn))
        .map_err(|e| map_sqlx_error("attach_confirmation", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(updated.id_typed()));
        }

        Span::current().record("status", updated.status().as_str());
        *record = updated;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub(crate) async fn list(
        &self,
        status: Option<TransactionStatus>,
        limit: usize,
    ) -> Result<Vec<PendingTransaction>, LedgerError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "{SELECT_COLUMNS} WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_time, pk LIMIT $2"
        );
        let rows = with_session!(self.session, conn => sqlx::query(&sql)
            .bind(status.map(TransactionStatus::as_str))
            .bind(limit)
            .fetch_all(conn))
        .map_err(|e| map_sqlx_error("list_by_status", e))?;

        rows.iter().map(decode_row).collect()
    }
}

impl TransactionLedger for PostgresTransactionLedger {
    fn record(&self, new: NewTransaction) -> Result<PendingTransaction, LedgerError> {
        pg::block_on("record", self.insert(new)).map_err(LedgerError::Storage)?
    }

    fn find_by_transaction_uid(
        &self,
        transaction_uid: &TransactionUid,
    ) -> Result<Option<PendingTransaction>, LedgerError> {
        pg::block_on("find_by_transaction_uid", self.find(transaction_uid)).map_err(LedgerError::Storage)?
    }

    fn attach_confirmation(
        &self,
        record: &mut PendingTransaction,
        report: &StorageCommitmentReport,
    ) -> Result<(), LedgerError> {
        pg::block_on("attach_confirmation", self.update_confirmation(record, report))
            .map_err(LedgerError::Storage)?
    }

    fn list_by_status(
        &self,
        status: Option<TransactionStatus>,
        limit: usize,
    ) -> Result<Vec<PendingTransaction>, LedgerError> {
        pg::block_on("list_by_status", self.list(status, limit)).map_err(LedgerError::Storage)?
    }
}

// SQLx row types

#[derive(Debug)]
struct TransactionRow {
    pk: Uuid,
    transaction_uid: String,
    study_iuid: String,
    series_iuid: Option<String>,
    sop_iuid: Option<String>,
    exporter_id: String,
    device_name: String,
    request: serde_json::Value,
    result: Option<serde_json::Value>,
    status: String,
    num_instances: i64,
    num_failures: i64,
    created_time: DateTime<Utc>,
    updated_time: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TransactionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            pk: row.try_get("pk")?,
            transaction_uid: row.try_get("transaction_uid")?,
            study_iuid: row.try_get("study_iuid")?,
            series_iuid: row.try_get("series_iuid")?,
            sop_iuid: row.try_get("sop_iuid")?,
            exporter_id: row.try_get("exporter_id")?,
            device_name: row.try_get("device_name")?,
            request: row.try_get("request")?,
            result: row.try_get("result")?,
            status: row.try_get("status")?,
            num_instances: row.try_get("num_instances")?,
            num_failures: row.try_get("num_failures")?,
            created_time: row.try_get("created_time")?,
            updated_time: row.try_get("updated_time")?,
        })
    }
}

impl TryFrom<TransactionRow> for PendingTransaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let count = |value: i64, column: &str| {
            u32::try_from(value)
                .map_err(|_| LedgerError::Storage(format!("{column} out of range: {value}")))
        };

        Ok(PendingTransaction::from_parts(PendingTransactionParts {
            id: RecordId::from_uuid(row.pk),
            transaction_uid: row.transaction_uid.parse()?,
            study_uid: row.study_iuid.parse()?,
            series_uid: row.series_iuid.map(|s| s.parse()).transpose()?,
            sop_instance_uid: row.sop_iuid.map(|s| s.parse()).transpose()?,
            exporter_id: row.exporter_id.parse()?,
            device_name: row.device_name.parse()?,
            request: Attributes::from_json(row.request)?,
            confirmation: row.result.map(Attributes::from_json).transpose()?,
            status: row.status.parse()?,
            number_of_instances: count(row.num_instances, "num_instances")?,
            number_of_failures: count(row.num_failures, "num_failures")?,
            created_at: row.created_time,
            updated_at: row.updated_time,
        }))
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<PendingTransaction, LedgerError> {
    use sqlx::FromRow;

    let row = TransactionRow::from_row(row)
        .map_err(|e| LedgerError::Storage(format!("failed to decode transaction row: {e}")))?;
    PendingTransaction::try_from(row)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    let msg = pg::describe(operation, &err);
    if pg::is_unique_violation(&err) {
        LedgerError::Conflict(msg)
    } else {
        LedgerError::Storage(msg)
    }
}
