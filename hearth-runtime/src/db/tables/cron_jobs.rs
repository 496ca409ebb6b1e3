//! Cron job database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};

use super::super::{CronJobStore, Database};
use crate::models::CronJob;

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<CronJob> {
    let created_at_str: String = row.get(6)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(CronJob {
        job_id: row.get(0)?,
        module: row.get(1)?,
        tenant_id: row.get(2)?,
        owner_ref: row.get(3)?,
        resource_id: row.get(4)?,
        schedule: row.get(5)?,
        created_at,
    })
}

const JOB_COLUMNS: &str = "job_id, module, tenant_id, owner_ref, resource_id, schedule, created_at";

impl Database {
    fn get_cron_job_row(&self, job_id: &str) -> SqliteResult<Option<CronJob>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM cron_jobs WHERE job_id = ?1"),
            [job_id],
            row_to_job,
        )
        .optional()
    }

    fn insert_cron_job_row(&self, job: &CronJob) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO cron_jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            rusqlite::params![
                job.job_id,
                job.module,
                job.tenant_id,
                job.owner_ref,
                job.resource_id,
                job.schedule,
                job.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_cron_job_row(&self, job_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM cron_jobs WHERE job_id = ?1", [job_id])?;
        Ok(())
    }

    fn list_cron_job_rows(&self, tenant_id: Option<&str>) -> SqliteResult<Vec<CronJob>> {
        let conn = self.conn.lock().unwrap();

        let mut jobs = Vec::new();
        match tenant_id {
            Some(tenant_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM cron_jobs WHERE tenant_id = ?1"
                ))?;
                let rows = stmt.query_map([tenant_id], row_to_job)?;
                for job in rows {
                    jobs.push(job?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM cron_jobs"))?;
                let rows = stmt.query_map([], row_to_job)?;
                for job in rows {
                    jobs.push(job?);
                }
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl CronJobStore for Database {
    async fn get(&self, job_id: &str) -> Result<Option<CronJob>, String> {
        self.get_cron_job_row(job_id).map_err(|e| e.to_string())
    }

    async fn insert(&self, job: &CronJob) -> Result<(), String> {
        self.insert_cron_job_row(job).map_err(|e| e.to_string())
    }

    async fn delete(&self, job_id: &str) -> Result<(), String> {
        self.delete_cron_job_row(job_id).map_err(|e| e.to_string())
    }

    async fn list_all(&self) -> Result<Vec<CronJob>, String> {
        self.list_cron_job_rows(None).map_err(|e| e.to_string())
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<CronJob>, String> {
        self.list_cron_job_rows(Some(tenant_id))
            .map_err(|e| e.to_string())
    }
}
