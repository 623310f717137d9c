//! Environment readiness check.

use crate::cli::RunArgs;
use crate::config::Credentials;
use crate::renderer::chromium::find_chromium;
use anyhow::Result;
use std::path::Path;
use std::process::Command;

/// Check Chromium availability, output directory, credentials and memory.
pub async fn run(args: &RunArgs) -> Result<()> {
    println!("customs-probe doctor");
    println!("====================");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    let chromium_path = find_chromium(args.chromium_path.as_deref());
    match &chromium_path {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Install google-chrome or set CUSTOMS_PROBE_CHROMIUM_PATH."
        ),
    }

    let writable = check_writable(&args.output_dir);
    match &writable {
        Ok(()) => println!("[OK] Output directory {} is writable", args.output_dir.display()),
        Err(e) => println!(
            "[!!] Output directory {} is not writable: {e}",
            args.output_dir.display()
        ),
    }

    let credentials_path = args.credentials_path();
    let credentials = Credentials::resolve(
        args.username.clone(),
        args.password.clone(),
        &credentials_path,
    );
    match &credentials {
        Ok(c) => println!("[OK] Credentials available for user '{}'", c.username),
        Err(e) => println!("[!!] {e}"),
    }

    match url::Url::parse(&args.login_url) {
        Ok(url) => println!("[OK] Login URL: {url}"),
        Err(e) => println!("[!!] Login URL '{}' is invalid: {e}", args.login_url),
    }

    match get_available_memory_mb() {
        Some(mb) if mb >= 512 => println!("[OK] Available memory: {mb}MB (>= 512MB required)"),
        Some(mb) => println!("[!!] Available memory: {mb}MB (< 512MB, Chromium may fail)"),
        None => println!("[??] Could not determine available memory"),
    }

    println!();
    if chromium_path.is_some() && writable.is_ok() && credentials.is_ok() {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".customs-probe-write-test");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)
}

/// Get available memory in MB (platform-specific).
fn get_available_memory_mb() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        let output = Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        let bytes: u64 = s.trim().parse().ok()?;
        Some(bytes / 1_048_576)
    }
    #[cfg(target_os = "linux")]
    {
        let output = Command::new("free").args(["-m"]).output().ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        s.lines()
            .find(|line| line.starts_with("Mem:"))
            .and_then(|line| line.split_whitespace().nth(6))
            .and_then(|v| v.parse().ok())
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}
