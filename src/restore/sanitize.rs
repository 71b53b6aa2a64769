// erpload/src/restore/sanitize.rs
//! Converts a restored production database into one that is safe to run
//! outside production.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, Statement};
use crate::errors::{AppError, Result};
use crate::utils::progress::Reporter;

pub const TABLES_QUERY: &str =
    "SELECT tablename::text FROM pg_tables WHERE schemaname = 'public'";

const DEFAULT_BACKUP_PATH_WINDOWS: &str = r"C:\ERP\Backups";
const DEFAULT_BACKUP_PATH_UNIX: &str = "/var/backups/erp";

/// Scheduled-job models that push data off the host.
const OUTBOUND_JOB_MODELS: &[&str] = &[
    "backup.config",
    "msf.instance.cloud",
    "sync.client.entity",
    "sync.client.sync_server_connection",
];

/// Optional rewrites applied after the mandatory ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Extensions {
    #[serde(default)]
    pub show_all_groups: bool,
    pub branding_logo: Option<PathBuf>,
    #[serde(default)]
    pub provision_users: Vec<String>,
    pub password_seed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SanitizeOptions {
    /// Keep live settings; sanitizing becomes a warning only.
    pub live: bool,
    pub no_password_reset: bool,
    pub admin_user: String,
    pub admin_password: String,
    pub sync_server_db: String,
    pub sync_host: String,
    pub sync_port: u16,
    pub backup_path: Option<String>,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizeStep {
    pub name: String,
    pub table: &'static str,
    /// A required step fails the run when its table is absent; the others
    /// are skipped so older schema versions still restore.
    pub required: bool,
    pub statement: Statement,
}

impl SanitizeStep {
    fn new(name: impl Into<String>, table: &'static str, statement: Statement) -> Self {
        Self {
            name: name.into(),
            table,
            required: false,
            statement,
        }
    }

    fn required(name: impl Into<String>, table: &'static str, statement: Statement) -> Self {
        Self {
            required: true,
            ..Self::new(name, table, statement)
        }
    }
}

/// First 12 hex digits of `sha256(seed:login)`.
pub fn generated_password(seed: &str, login: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", seed, login).as_bytes());
    hex::encode(digest)[..12].to_string()
}

pub struct Sanitizer {
    options: SanitizeOptions,
}

impl Sanitizer {
    pub fn new(options: SanitizeOptions) -> Self {
        Self { options }
    }

    fn backup_path(&self) -> String {
        self.options.backup_path.clone().unwrap_or_else(|| {
            if cfg!(windows) {
                DEFAULT_BACKUP_PATH_WINDOWS.to_string()
            } else {
                DEFAULT_BACKUP_PATH_UNIX.to_string()
            }
        })
    }

    /// Ordered rewrite steps: the mandatory ones, then the enabled extensions.
    pub fn plan(&self) -> Result<Vec<SanitizeStep>> {
        let opts = &self.options;
        let mut steps = Vec::new();

        if !opts.no_password_reset {
            steps.push(SanitizeStep::required(
                "admin account",
                "res_users",
                Statement::new("UPDATE res_users SET login = $1, password = $2 WHERE id = 1")
                    .bind(opts.admin_user.as_str())
                    .bind(opts.admin_password.as_str()),
            ));
            steps.push(SanitizeStep::required(
                "user passwords",
                "res_users",
                Statement::new("UPDATE res_users SET password = $1 WHERE id <> 1")
                    .bind(opts.admin_password.as_str()),
            ));
        }
        steps.push(SanitizeStep::new(
            "sync server connection",
            "sync_client_sync_server_connection",
            Statement::new(
                "UPDATE sync_client_sync_server_connection SET host = $1, database = $2, port = $3",
            )
            .bind(opts.sync_host.as_str())
            .bind(opts.sync_server_db.as_str())
            .bind(i64::from(opts.sync_port)),
        ));
        steps.push(SanitizeStep::required(
            "scheduled jobs",
            "ir_cron",
            Statement::new("UPDATE ir_cron SET active = false WHERE model = ANY($1)").bind(
                OUTBOUND_JOB_MODELS
                    .iter()
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>(),
            ),
        ));
        steps.push(SanitizeStep::new(
            "automated imports",
            "automated_import",
            Statement::new(
                "UPDATE automated_import SET ftp_login = NULL, ftp_password = NULL, active = false",
            ),
        ));
        steps.push(SanitizeStep::new(
            "automated exports",
            "automated_export",
            Statement::new(
                "UPDATE automated_export SET ftp_login = NULL, ftp_password = NULL, active = false",
            ),
        ));
        steps.push(SanitizeStep::new(
            "backup path",
            "backup_config",
            Statement::new("UPDATE backup_config SET name = $1").bind(self.backup_path()),
        ));

        let ext = &opts.extensions;
        if ext.show_all_groups {
            steps.push(SanitizeStep::new(
                "show all groups",
                "res_groups",
                Statement::new("UPDATE res_groups SET visible = true WHERE visible IS NOT TRUE"),
            ));
        }
        if let Some(logo) = &ext.branding_logo {
            let bytes = std::fs::read(logo).map_err(|e| AppError::Sanitization {
                step: "branding logo".into(),
                message: format!("cannot read {}: {}", logo.display(), e),
            })?;
            steps.push(SanitizeStep::new(
                "branding logo",
                "res_company",
                Statement::new("UPDATE res_company SET logo = $1").bind(BASE64.encode(bytes)),
            ));
        }
        let seed = ext.password_seed.as_deref().unwrap_or(&opts.admin_password);
        for login in &ext.provision_users {
            steps.push(SanitizeStep::new(
                format!("provision user {}", login),
                "res_users",
                Statement::new(
                    "INSERT INTO res_users (login, name, password, active, company_id) \
                     SELECT $1, $1, $2, true, (SELECT min(id) FROM res_company) \
                     WHERE NOT EXISTS (SELECT 1 FROM res_users WHERE login = $1)",
                )
                .bind(login.as_str())
                .bind(generated_password(seed, login)),
            ));
        }
        Ok(steps)
    }

    /// Applies the plan to `database`, stopping at the first failing step.
    pub async fn run(
        &self,
        engine: &dyn Engine,
        database: &str,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.options.live {
            tracing::warn!("{} keeps its live settings", database);
            reporter.say(format!(
                "Warning: {} restored with LIVE settings. Do not run it next to production.",
                database
            ));
            return Ok(());
        }

        let steps = self.plan()?;
        let tables: BTreeSet<String> = engine
            .fetch_text(database, &Statement::new(TABLES_QUERY))
            .await
            .map_err(|e| AppError::Sanitization {
                step: "list tables".into(),
                message: e.to_string(),
            })?
            .into_iter()
            .flatten()
            .collect();

        reporter.say(format!("Sanitizing {}", database));
        for step in steps {
            if cancel.is_cancelled() {
                return Err(AppError::Interrupted);
            }
            if !tables.contains(step.table) {
                if step.required {
                    return Err(AppError::Sanitization {
                        step: step.name,
                        message: format!("table {} is missing", step.table),
                    });
                }
                reporter.say(format!("Skipping {}: no table {}", step.name, step.table));
                continue;
            }
            let affected = engine
                .execute(database, &step.statement)
                .await
                .map_err(|e| AppError::Sanitization {
                    step: step.name.clone(),
                    message: e.to_string(),
                })?;
            tracing::debug!("{}: {} row(s)", step.name, affected);
        }

        if !self.options.extensions.provision_users.is_empty() {
            let seed = self
                .options
                .extensions
                .password_seed
                .as_deref()
                .unwrap_or(&self.options.admin_password);
            for login in &self.options.extensions.provision_users {
                reporter.say(format!(
                    "User {} has password {}",
                    login,
                    generated_password(seed, login)
                ));
            }
        }
        Ok(())
    }
}
