// Scheduled runs through the user's crontab
// Entries we own carry a trailing tag so they can be replaced or removed later

use crate::config::Config;
use crate::error::{Result, SnapshotError};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

pub const CRON_TAG: &str = "# spotify-snapshot";

/// `every N hours`, falling back to whole days past 23 hours.
pub fn cron_schedule(interval_hours: u32) -> String {
    match interval_hours.max(1) {
        hours @ 1..=23 => format!("0 */{} * * *", hours),
        hours => format!("0 0 */{} * *", hours / 24),
    }
}

pub fn cron_entry(exe: &Path, interval_hours: u32, push: bool) -> String {
    let exe = exe.display().to_string();
    let exe = if exe.contains(char::is_whitespace) {
        format!("'{}'", exe.replace('\'', r"'\''"))
    } else {
        exe
    };
    let push_args = if push { " --push --yes" } else { "" };
    format!("{} {} --prod-run{} {}", cron_schedule(interval_hours), exe, push_args, CRON_TAG)
}

fn is_tagged(line: &str) -> bool {
    line.trim_end().ends_with(CRON_TAG)
}

/// `crontab` with every tagged line removed.
pub fn without_entries(crontab: &str) -> String {
    let mut out: String = crontab
        .lines()
        .filter(|line| !is_tagged(line))
        .map(|line| format!("{}\n", line))
        .collect();
    if out.trim().is_empty() {
        out.clear();
    }
    out
}

/// `crontab` with tagged lines replaced by `entry`.
pub fn with_entry(crontab: &str, entry: &str) -> String {
    let mut out = without_entries(crontab);
    out.push_str(entry);
    out.push('\n');
    out
}

pub fn install(config: &Config) -> Result<()> {
    let exe = std::env::current_exe()?;
    let entry = cron_entry(&exe, config.backup_interval_hours, config.remote_url().is_some());

    let current = read_crontab()?;
    write_crontab(&with_entry(&current, &entry))?;

    info!("Installed cron job: {}", entry);
    println!("✓ spotify-snapshot will run every {} hours", config.backup_interval_hours);
    Ok(())
}

/// Returns whether an entry was removed.
pub fn uninstall() -> Result<bool> {
    let current = read_crontab()?;
    if !current.lines().any(is_tagged) {
        info!("No spotify-snapshot cron entry found");
        return Ok(false);
    }

    write_crontab(&without_entries(&current))?;
    info!("Removed spotify-snapshot cron entry");
    Ok(true)
}

fn read_crontab() -> Result<String> {
    let output = Command::new("crontab")
        .arg("-l")
        .output()
        .map_err(|e| SnapshotError::Schedule(format!("could not run crontab: {}", e)))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("no crontab") {
        debug!("User has no crontab yet");
        return Ok(String::new());
    }
    Err(SnapshotError::Schedule(stderr.trim().to_string()))
}

fn write_crontab(content: &str) -> Result<()> {
    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SnapshotError::Schedule(format!("could not run crontab: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(content.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(SnapshotError::Schedule(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}
