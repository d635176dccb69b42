use serde::Serialize;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_db::{connect_with_settings, migrations, DbPool};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: [&str; 3] =
    ["database_connectivity", "schema_migrations", "workflow_catalog"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: format!(
                    "configuration loaded (advance_policy={:?})",
                    config.workflow.advance_policy
                ),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(skipped(&DATABASE_CHECKS, "configuration did not load"));
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = match (failed, warned) {
        (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
        (false, true) => (CheckStatus::Warn, "doctor: ready with warnings"),
        (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn skipped(names: &[&'static str], reason: &str) -> Vec<DoctorCheck> {
    names
        .iter()
        .map(|&name| DoctorCheck {
            name,
            status: CheckStatus::Skipped,
            details: format!("skipped because {reason}"),
        })
        .collect()
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
            checks.extend(skipped(&DATABASE_CHECKS[1..], "the runtime did not start"));
            return checks;
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                let mut checks = vec![DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                }];
                checks.extend(skipped(&DATABASE_CHECKS[1..], "the database is unreachable"));
                return checks;
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];
        let schema = check_schema(&pool).await;
        let schema_ready = schema.status == CheckStatus::Pass;
        checks.push(schema);
        if schema_ready {
            checks.push(check_catalog(&pool).await);
        } else {
            checks.extend(skipped(&DATABASE_CHECKS[2..], "the schema is not migrated"));
        }

        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let expected = migrations::MIGRATOR.iter().count() as i64;
    let applied: Result<i64, sqlx::Error> =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await;

    match applied {
        Ok(applied) if applied >= expected => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Pass,
            details: format!("{applied} migration(s) applied"),
        },
        Ok(applied) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("{applied} of {expected} migration(s) applied; run `signoff migrate`"),
        },
        Err(_) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: "schema has not been migrated; run `signoff migrate`".to_string(),
        },
    }
}

async fn check_catalog(pool: &DbPool) -> DoctorCheck {
    let configured: Result<i64, sqlx::Error> = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT approvable_type_id) FROM approver_layers WHERE status = 'active'",
    )
    .fetch_one(pool)
    .await;

    match configured {
        Ok(0) => DoctorCheck {
            name: "workflow_catalog",
            status: CheckStatus::Warn,
            details: "no approvable type has active layers; submissions need no approval"
                .to_string(),
        },
        Ok(count) => DoctorCheck {
            name: "workflow_catalog",
            status: CheckStatus::Pass,
            details: format!("{count} approvable type(s) with active layers"),
        },
        Err(error) => DoctorCheck {
            name: "workflow_catalog",
            status: CheckStatus::Fail,
            details: format!("could not read approver layers: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
