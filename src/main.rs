use rayon::prelude::*;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use swe_validate::config::{self, SiteConfig};
use swe_validate::logging::{self, LogLevel, Stage};
use swe_validate::pipeline;
use swe_validate::report::{self, SiteReport};

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let level = env::var("SWE_LOG_LEVEL")
        .ok()
        .and_then(|raw| LogLevel::parse(&raw))
        .unwrap_or(LogLevel::Info);
    let log_file = env::var("SWE_LOG_FILE").ok();
    logging::init_logger(level, log_file.as_deref(), false);

    let config_path = env_path("SWE_SITES_CONFIG", "./sites.toml");
    let data_dir = env_path("SWE_DATA_DIR", ".");
    let output_dir = env_path("SWE_OUTPUT_DIR", "./output");

    let sites = match config::load_sites(&config_path) {
        Ok(sites) => sites,
        Err(e) => {
            logging::error(Stage::System, None, &e.to_string());
            return ExitCode::FAILURE;
        }
    };

    // Positional arguments pick sites; none means all of them.
    let requested: Vec<String> = env::args().skip(1).collect();
    let mut selected: Vec<&SiteConfig> = Vec::new();
    if requested.is_empty() {
        selected.extend(sites.iter());
    } else {
        for id in &requested {
            match config::find_site(&sites, id) {
                Some(site) => selected.push(site),
                None => {
                    logging::error(
                        Stage::System,
                        None,
                        &format!("unknown site '{}' (not in {})", id, config_path.display()),
                    );
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    logging::info(
        Stage::System,
        None,
        &format!("validating {} site(s) from {}", selected.len(), data_dir.display()),
    );

    // Sites are independent; results come back in configuration order.
    let outcomes: Vec<_> = selected
        .par_iter()
        .map(|site| pipeline::run_site(site, &data_dir))
        .collect();

    let mut successful = 0;
    for outcome in outcomes.iter().flatten() {
        report::print_summary(&SiteReport::from(outcome));
        match report::write_site_outputs(outcome, &output_dir) {
            Ok(paths) => {
                successful += 1;
                for path in paths {
                    logging::debug(Stage::Report, Some(&outcome.site_id), &format!("wrote {}", path.display()));
                }
            }
            Err(e) => logging::log_site_failure(&outcome.site_id, Stage::Report, &e),
        }
    }

    let total = selected.len();
    report::print_run_summary(total, successful);
    logging::log_run_summary(total, successful, total - successful);

    if successful == total {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
