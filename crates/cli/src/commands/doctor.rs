//! Doctor command - validate configuration and show status

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use threadline_adapters::state::SqliteInteractionRepo;

use crate::args::DoctorArgs;
use crate::config::AppConfig;

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    ledger: CheckResult,
    backend: CheckResult,
    policy: CheckResult,
    upload: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        ledger: CheckResult::error("Not checked"),
        backend: CheckResult::error("Not checked"),
        policy: CheckResult::error("Not checked"),
        upload: CheckResult::error("Not checked"),
        overall: "error".to_string(),
    };

    // Check config
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {:#}", e));
            None
        }
    };

    if let Some(ref config) = config {
        report.ledger = check_ledger(&config.general.state_db_path).await;
        report.backend = check_backend(config);
        report.policy = check_policy(config);
        report.upload = check_upload(config);
    }

    // Determine overall status
    let checks = [
        &report.config,
        &report.ledger,
        &report.backend,
        &report.policy,
        &report.upload,
    ];

    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    // Output report
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

async fn check_ledger(path: &Path) -> CheckResult {
    let repo = match SqliteInteractionRepo::new(path).await {
        Ok(repo) => repo,
        Err(e) => {
            return CheckResult::error(format!(
                "Failed to open ledger database {}: {}",
                path.display(),
                e
            ));
        }
    };

    match repo.ping().await {
        Ok(()) => CheckResult::ok(format!("Ledger database: {}", path.display())),
        Err(e) => CheckResult::error(format!("Ledger database not usable: {}", e)),
    }
}

fn check_backend(config: &AppConfig) -> CheckResult {
    let backend = &config.backend;

    if !is_http_url(&backend.base_url) {
        return CheckResult::error(format!(
            "backend.base_url is not an http(s) URL: {:?}",
            backend.base_url
        ));
    }

    if backend.poll_interval_secs == 0 {
        return CheckResult::warn("backend.poll_interval_secs is 0, using 1 second");
    }

    let details = serde_json::json!({
        "base_url": backend.base_url,
        "poll_interval_secs": backend.poll_interval_secs,
        "timeout_secs": backend.timeout_secs,
    });

    if backend.token_env.is_empty() {
        return CheckResult::warn(format!("Backend: {} (no token env configured)", backend.base_url))
            .with_details(details);
    }

    // Report whether the token is set without revealing it
    let result = if config.load_token().is_some() {
        CheckResult::ok(format!(
            "Backend: {}, token: {} (set)",
            backend.base_url, backend.token_env
        ))
    } else {
        CheckResult::warn(format!(
            "Backend: {}, token: {} (not set)",
            backend.base_url, backend.token_env
        ))
    };
    result.with_details(details)
}

fn check_policy(config: &AppConfig) -> CheckResult {
    let policy = match config.reply_policy() {
        Ok(policy) => policy,
        Err(e) => return CheckResult::error(e.to_string()),
    };

    if policy.max_body_chars == 0 {
        return CheckResult::error("policy.max_body_chars must be positive");
    }
    if policy.allowed_kinds.is_empty() {
        return CheckResult::warn("No media kinds allowed, attachments are disabled");
    }

    CheckResult::ok(format!(
        "Body up to {} chars, {} mentions, media up to {} bytes",
        policy.max_body_chars, policy.max_mentions, policy.max_asset_bytes
    ))
}

fn check_upload(config: &AppConfig) -> CheckResult {
    let url = config.upload_base_url();
    if !is_http_url(url) {
        return CheckResult::error(format!("Upload URL is not an http(s) URL: {:?}", url));
    }
    if config.upload.chunk_size == 0 {
        return CheckResult::error("upload.chunk_size must be positive");
    }

    CheckResult::ok(format!(
        "Uploads to {} in {} byte chunks",
        url, config.upload.chunk_size
    ))
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    rest.is_some_and(|host| !host.is_empty())
}

fn print_report(report: &DoctorReport) {
    println!("threadline Doctor Report");
    println!("========================");
    println!();

    print_check("Config", &report.config);
    print_check("Ledger", &report.ledger);
    print_check("Backend", &report.backend);
    print_check("Policy", &report.policy);
    print_check("Upload", &report.upload);

    println!();
    let symbol = match report.overall.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} Overall: {}", symbol, report.overall.to_uppercase());

    if report.overall == "ok" {
        println!();
        println!("Ready! Try: threadline watch --post <id> --once");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    let symbol = match result.status.as_str() {
        "ok" => "✓",
        "warn" => "⚠",
        _ => "✗",
    };
    println!("{} {}: {}", symbol, name, result.message);
}
