//! Startup banner and run summary display.

use std::path::Path;

use crate::consts::{AUTHOR, HOMEPAGE, REPO, format_number};
use crate::stages::StageReport;

/// Run configuration for display in the startup banner.
pub struct BannerInfo<'a> {
    pub stage: &'a str,
    pub accounts: usize,
    pub limits: (usize, usize),
    pub default_proxy: &'a str,
    pub database: &'a Path,
}

/// Print the startup banner with run info.
pub fn print_banner(info: &BannerInfo) {
    println!(
        r#"
   ╔═══════════════════════════════════════╗
   ║              F L O C K                ║
   ║      many accounts, one heartbeat     ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   home      {}
   repo      {}
   stage     {}
   accounts  {}
   limits    {} total, {} per proxy
   proxy     {}
   database  {}
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        HOMEPAGE,
        REPO,
        info.stage,
        format_number(info.accounts as u64),
        info.limits.0,
        info.limits.1,
        info.default_proxy,
        info.database.display(),
    );
}

/// Print the stage outcome and the points total across all accounts.
pub fn print_run_summary(report: Option<&StageReport>, total_points: u64) {
    if let Some(report) = report {
        let run = &report.run;
        println!(
            "{}: {} eligible, {} done, {} absorbed, {} cancelled",
            report.stage,
            report.eligible,
            run.completed,
            run.absorbed,
            run.cancelled + run.interrupted,
        );
    }
    println!("total points: {}", format_number(total_points));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunReport;
    use std::path::PathBuf;

    #[test]
    fn print_banner_does_not_panic() {
        let info = BannerInfo {
            stage: "auth",
            accounts: 1200,
            limits: (5, 2),
            default_proxy: "direct",
            database: &PathBuf::from("/tmp/flock.db"),
        };
        print_banner(&info);
    }

    #[test]
    fn print_summary_with_report() {
        let report = StageReport {
            stage: "auth".to_string(),
            eligible: 3,
            run: RunReport {
                scheduled: 3,
                completed: 2,
                absorbed: 1,
                ..RunReport::default()
            },
        };
        print_run_summary(Some(&report), 1_234_567);
    }

    #[test]
    fn print_summary_without_report() {
        print_run_summary(None, 0);
    }
}
