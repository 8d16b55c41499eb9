//! Schema snapshots via `pg_dump`.
//!
//! After every successful migrate/rollback batch the runner writes a
//! schema-only dump plus the migration-history rows to a fixed file, by
//! shelling out to `pg_dump`. A nonzero exit is reported loudly but does not
//! unwind — the migrations themselves already committed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use crate::HISTORY_TABLE;

/// Connection parameters and target path for the schema dump.
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Role to dump as.
    pub username: String,
    /// Password, passed via `PGPASSWORD`.
    pub password: Option<String>,
    /// Where the schema file is written.
    pub schema_path: PathBuf,
}

impl DumpConfig {
    /// Dump config targeting `db/schema.sql`.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: None,
            schema_path: PathBuf::from("db/schema.sql"),
        }
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the schema file path.
    pub fn schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = path.into();
        self
    }
}

/// Write the schema-only dump, then append the history table's data rows.
pub fn dump_schema(config: &DumpConfig) {
    // Schema dump straight into the schema file.
    let status = pg_dump(config)
        .args([
            "-c",
            "--no-tablespaces",
            "--no-security-labels",
            "--no-owner",
            "--schema-only",
            "-f",
        ])
        .arg(&config.schema_path)
        .output();
    match status {
        Ok(output) => {
            forward_stderr(&output.stderr);
            if !output.status.success() {
                tracing::error!(
                    target: "stratum::migrate",
                    "pg_dump (schema) exited with {}",
                    output.status
                );
                return;
            }
        }
        Err(e) => {
            tracing::error!(target: "stratum::migrate", "failed to run pg_dump: {e}");
            return;
        }
    }

    // History rows appended so a restored schema knows what is applied.
    let data = pg_dump(config).args(["-t", HISTORY_TABLE, "-a"]).output();
    match data {
        Ok(output) => {
            forward_stderr(&output.stderr);
            if !output.status.success() {
                tracing::error!(
                    target: "stratum::migrate",
                    "pg_dump ({HISTORY_TABLE}) exited with {}",
                    output.status
                );
                return;
            }
            let appended = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&config.schema_path)
                .and_then(|mut file| file.write_all(&output.stdout));
            if let Err(e) = appended {
                tracing::error!(
                    target: "stratum::migrate",
                    "failed to append history rows to {}: {e}",
                    config.schema_path.display()
                );
            }
        }
        Err(e) => {
            tracing::error!(target: "stratum::migrate", "failed to run pg_dump: {e}");
        }
    }
}

fn pg_dump(config: &DumpConfig) -> Command {
    let mut cmd = Command::new("pg_dump");
    if let Some(password) = &config.password {
        cmd.env("PGPASSWORD", password);
    }
    cmd.args(["-d", &config.database])
        .args(["-h", &config.host])
        .args(["-p", &config.port.to_string()])
        .args(["-U", &config.username]);
    cmd
}

fn forward_stderr(stderr: &[u8]) {
    let text = String::from_utf8_lossy(stderr);
    for line in text.lines() {
        tracing::warn!(target: "stratum::migrate", "pg_dump: {line}");
    }
}
