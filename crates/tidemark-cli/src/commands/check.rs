use std::path::Path;

use anyhow::Result;

/// Execute `--check`: validate every active job definition.
pub fn execute(config_path: &Path) -> Result<()> {
    let service = super::build_service(config_path)?;
    let report = service.check()?;

    for job in &report.valid_jobs {
        println!("{:30} OK", job);
    }
    for (job, error) in &report.invalid_jobs {
        println!("{:30} FAILED\n    {}", job, error.replace('\n', "\n    "));
    }

    if report.is_ok() {
        println!("\nAll {} job definition(s) valid.", report.valid_jobs.len());
        Ok(())
    } else {
        anyhow::bail!("{} job definition(s) invalid", report.invalid_jobs.len())
    }
}
