//! Postgres-backed archive store.
//!
//! Instances are returned in primary key order, i.e. the order in which they were stored.
//! Retrieve AE titles of an instance live in `instance_ext_retrieve_aet`, one row per title.

use std::sync::Arc;

use sqlx::Row;
use tracing::instrument;

use stgcmt_archive::{Instance, InstanceKey, Series, Study};
use stgcmt_core::{AeTitle, DomainError, StudyInstanceUid};

use super::r#trait::{ArchiveStore, ArchiveStoreError};
use crate::pg::{self, PgSession, with_session};

/// Archive store on Postgres.
#[derive(Debug, Clone)]
pub struct PostgresArchiveStore {
    session: Arc<PgSession>,
}

impl PostgresArchiveStore {
    pub fn new(session: Arc<PgSession>) -> Self {
        Self { session }
    }

    /// Take the study row lock for the rest of the calling thread's transaction.
    #[instrument(skip(self, study_uid), fields(study_uid = %study_uid), err)]
    pub(crate) async fn lock(&self, study_uid: &StudyInstanceUid) -> Result<(), ArchiveStoreError> {
        if !self.session.has_transaction() {
            tracing::debug!("no open transaction; study lock would be released immediately");
        }
        with_session!(self.session, conn => sqlx::query(
            "SELECT pk FROM study WHERE study_iuid = $1 FOR UPDATE",
        )
        .bind(study_uid.as_str())
        .fetch_optional(conn))
        .map_err(|e| map_sqlx_error("lock_study", e))?;
        Ok(())
    }

    #[instrument(skip(self, study_uid), fields(study_uid = %study_uid), err)]
    pub(crate) async fn fetch_study(&self, study_uid: &StudyInstanceUid) -> Result<Option<Study>, ArchiveStoreError> {
        let row = with_session!(self.session, conn => sqlx::query(
            "SELECT ext_retrieve_aet FROM study WHERE study_iuid = $1",
        )
        .bind(study_uid.as_str())
        .fetch_optional(conn))
        .map_err(|e| map_sqlx_error("study", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let ext: Option<String> = row.try_get("ext_retrieve_aet").map_err(decode_error)?;

        let mut study = Study::new(study_uid.clone());
        if let Some(ae) = ext {
            study.set_external_retrieve_aet(ae.parse().map_err(domain_error)?);
        }
        Ok(Some(study))
    }

    #[instrument(skip(self, study_uid), fields(study_uid = %study_uid, instance_count = tracing::field::Empty), err)]
    pub(crate) async fn fetch_instances(
        &self,
        study_uid: &StudyInstanceUid,
    ) -> Result<Vec<Instance>, ArchiveStoreError> {
        let rows = with_session!(self.session, conn => sqlx::query(
            r#"
            SELECT se.series_iuid,
                   i.sop_iuid,
                   COALESCE(
                       array_agg(a.retrieve_aet ORDER BY a.retrieve_aet)
                           FILTER (WHERE a.retrieve_aet IS NOT NULL),
                       '{}'
                   ) AS retrieve_aets
            FROM instance i
            JOIN series se ON se.pk = i.series_fk
            JOIN study st ON st.pk = se.study_fk
            LEFT JOIN instance_ext_retrieve_aet a ON a.instance_fk = i.pk
            WHERE st.study_iuid = $1
            GROUP BY i.pk, se.series_iuid, i.sop_iuid
            ORDER BY i.pk
            "#,
        )
        .bind(study_uid.as_str())
        .fetch_all(conn))
        .map_err(|e| map_sqlx_error("instances_by_study", e))?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let series_iuid: String = row.try_get("series_iuid").map_err(decode_error)?;
            let sop_iuid: String = row.try_get("sop_iuid").map_err(decode_error)?;
            let titles: Vec<String> = row.try_get("retrieve_aets").map_err(decode_error)?;

            let titles = titles
                .into_iter()
                .map(|t| t.parse::<AeTitle>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(domain_error)?;
            instances.push(
                Instance::new(
                    series_iuid.parse().map_err(domain_error)?,
                    sop_iuid.parse().map_err(domain_error)?,
                )
                .with_external_retrieve_aets(titles),
            );
        }

        tracing::Span::current().record("instance_count", instances.len());
        Ok(instances)
    }

    #[instrument(skip(self, key, titles), fields(instance = %key, titles = titles.len()), err)]
    pub(crate) async fn insert_retrieve_aets(
        &self,
        key: &InstanceKey,
        titles: &[AeTitle],
    ) -> Result<(), ArchiveStoreError> {
        let pk: Option<i64> = with_session!(self.session, conn => sqlx::query_scalar::<_, i64>(
            r#"
            SELECT i.pk
            FROM instance i
            JOIN series se ON se.pk = i.series_fk
            WHERE se.series_iuid = $1 AND i.sop_iuid = $2
            "#,
        )
        .bind(key.series_uid.as_str())
        .bind(key.sop_instance_uid.as_str())
        .fetch_optional(conn))
        .map_err(|e| map_sqlx_error("add_external_retrieve_aets", e))?;

        let pk = pk.ok_or_else(|| ArchiveStoreError::InstanceNotFound(key.clone()))?;
        let titles: Vec<String> = titles.iter().map(|t| t.as_str().to_string()).collect();

        with_session!(self.session, conn => sqlx::query(
            r#"
            INSERT INTO instance_ext_retrieve_aet (instance_fk, retrieve_aet)
            SELECT $1, t.aet FROM unnest($2::TEXT[]) AS t(aet)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(pk)
        .bind(&titles)
        .execute(conn))
        .map_err(|e| map_sqlx_error("add_external_retrieve_aets", e))?;
        Ok(())
    }

    #[instrument(skip(self, study_uid, ae), fields(study_uid = %study_uid, ae = %ae), err)]
    pub(crate) async fn update_study_retrieve_aet(
        &self,
        study_uid: &StudyInstanceUid,
        ae: &AeTitle,
    ) -> Result<(), ArchiveStoreError> {
        let result = with_session!(self.session, conn => sqlx::query(
            "UPDATE study SET ext_retrieve_aet = $2 WHERE study_iuid = $1",
        )
        .bind(study_uid.as_str())
        .bind(ae.as_str())
        .execute(conn))
        .map_err(|e| map_sqlx_error("set_study_external_retrieve_aet", e))?;

        if result.rows_affected() == 0 {
            return Err(ArchiveStoreError::StudyNotFound(study_uid.clone()));
        }
        Ok(())
    }

    /// Store a study row. Used to seed the hierarchy; ingest proper lives elsewhere.
    ///
    /// Seeding always runs on the pool and commits on its own, never inside a unit of work.
    pub async fn insert_study(&self, study: &Study) -> Result<(), ArchiveStoreError> {
        sqlx::query(
            "INSERT INTO study (study_iuid, ext_retrieve_aet) VALUES ($1, $2)",
        )
        .bind(study.uid().as_str())
        .bind(study.external_retrieve_aet().map(|ae| ae.as_str()))
        .execute(self.session.pool())
        .await
        .map_err(|e| map_sqlx_error("insert_study", e))?;
        Ok(())
    }

    pub async fn insert_series(&self, series: &Series) -> Result<(), ArchiveStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO series (study_fk, series_iuid)
            SELECT pk, $2 FROM study WHERE study_iuid = $1
            "#,
        )
        .bind(series.study_uid().as_str())
        .bind(series.uid().as_str())
        .execute(self.session.pool())
        .await
        .map_err(|e| map_sqlx_error("insert_series", e))?;

        if result.rows_affected() == 0 {
            return Err(ArchiveStoreError::StudyNotFound(series.study_uid().clone()));
        }
        Ok(())
    }

    pub async fn insert_instance(&self, instance: &Instance) -> Result<(), ArchiveStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO instance (series_fk, sop_iuid)
            SELECT pk, $2 FROM series WHERE series_iuid = $1
            "#,
        )
        .bind(instance.series_uid().as_str())
        .bind(instance.sop_instance_uid().as_str())
        .execute(self.session.pool())
        .await
        .map_err(|e| map_sqlx_error("insert_instance", e))?;

        if result.rows_affected() == 0 {
            return Err(ArchiveStoreError::SeriesNotFound(instance.series_uid().clone()));
        }

        let titles: Vec<String> = instance
            .external_retrieve_aets()
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        if titles.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO instance_ext_retrieve_aet (instance_fk, retrieve_aet)
            SELECT i.pk, t.aet
            FROM instance i
            JOIN series se ON se.pk = i.series_fk
            CROSS JOIN unnest($3::TEXT[]) AS t(aet)
            WHERE se.series_iuid = $1 AND i.sop_iuid = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(instance.series_uid().as_str())
        .bind(instance.sop_instance_uid().as_str())
        .bind(&titles)
        .execute(self.session.pool())
        .await
        .map_err(|e| map_sqlx_error("insert_instance", e))?;
        Ok(())
    }
}

impl ArchiveStore for PostgresArchiveStore {
    fn lock_study(&self, study_uid: &StudyInstanceUid) -> Result<(), ArchiveStoreError> {
        pg::block_on("lock_study", self.lock(study_uid)).map_err(ArchiveStoreError::Storage)?
    }

    fn study(&self, study_uid: &StudyInstanceUid) -> Result<Option<Study>, ArchiveStoreError> {
        pg::block_on("study", self.fetch_study(study_uid)).map_err(ArchiveStoreError::Storage)?
    }

    fn instances_by_study(
        &self,
        study_uid: &StudyInstanceUid,
    ) -> Result<Vec<Instance>, ArchiveStoreError> {
        pg::block_on("instances_by_study", self.fetch_instances(study_uid))
            .map_err(ArchiveStoreError::Storage)?
    }

    fn add_external_retrieve_aets(
        &self,
        key: &InstanceKey,
        titles: &[AeTitle],
    ) -> Result<(), ArchiveStoreError> {
        pg::block_on("add_external_retrieve_aets", self.insert_retrieve_aets(key, titles))
            .map_err(ArchiveStoreError::Storage)?
    }

    fn set_study_external_retrieve_aet(
        &self,
        study_uid: &StudyInstanceUid,
        ae: &AeTitle,
    ) -> Result<(), ArchiveStoreError> {
        pg::block_on(
            "set_study_external_retrieve_aet",
            self.update_study_retrieve_aet(study_uid, ae),
        )
        .map_err(ArchiveStoreError::Storage)?
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ArchiveStoreError {
    let msg = pg::describe(operation, &err);
    if pg::is_unique_violation(&err) {
        ArchiveStoreError::Conflict(msg)
    } else {
        ArchiveStoreError::Storage(msg)
    }
}

fn decode_error(err: sqlx::Error) -> ArchiveStoreError {
    ArchiveStoreError::Storage(format!("failed to decode archive row: {err}"))
}

fn domain_error(err: DomainError) -> ArchiveStoreError {
    ArchiveStoreError::Storage(format!("invalid stored value: {err}"))
}
