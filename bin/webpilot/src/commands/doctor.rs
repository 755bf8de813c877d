use std::process::Command;
use webpilot_core::{Config, Paths};

/// Run full environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 webpilot doctor — Environment Diagnostics");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    if paths.config_file().exists() {
        print_ok("Config file exists", &paths.config_file().display().to_string());
        ok_count += 1;
    } else {
        print_warn(
            "Config file not found",
            "Defaults will be used; write one to customize",
        );
        warn_count += 1;
    }

    let config = Config::load_or_default(&paths)?;
    if config.browser.enabled {
        print_ok("Browser automation enabled", "");
        ok_count += 1;
    } else {
        print_warn("Browser automation disabled", "Set browser.enabled or WEBPILOT_BROWSER_ENABLED=true");
        warn_count += 1;
    }
    println!("  RPC call timeout: {}s", config.browser.call_timeout_secs);
    println!();

    // --- 2. Automation server prerequisites ---
    println!("🖥️  Automation Server");
    check_command(
        &config.browser.server.runtime,
        &["--version"],
        "Runtime",
        "Required to run the automation server",
        &mut ok_count,
        &mut err_count,
    );
    match which::which(&config.browser.server.launcher) {
        Ok(path) => {
            print_ok("Launcher found", &path.display().to_string());
            ok_count += 1;
        }
        Err(_) => {
            print_err(
                &format!("Launcher '{}' not found", config.browser.server.launcher),
                "Required to start the automation server package",
            );
            err_count += 1;
        }
    }
    println!("  Package: {}", config.browser.server.package);
    println!();

    // --- 3. Storage ---
    println!("📁 Storage");
    let db = paths.memory_db();
    if db.exists() {
        let size = std::fs::metadata(&db).map(|m| m.len()).unwrap_or(0);
        print_ok("Selector memory", &format!("{} ({} KB)", db.display(), size / 1024));
        ok_count += 1;
    } else {
        print_warn("Selector memory not created yet", "Will be created on first action");
        warn_count += 1;
    }
    let screenshots = paths.screenshots_dir();
    if screenshots.exists() {
        print_ok("Screenshots directory", &screenshots.display().to_string());
        ok_count += 1;
    } else {
        print_warn("Screenshots directory not created yet", "Will be created on first screenshot");
        warn_count += 1;
    }
    println!();

    // --- 4. Vision collaborator ---
    println!("👁️  Vision Recovery");
    if config.vision_api_key().is_some() {
        print_ok("Vision API key configured", &config.vision.model);
        ok_count += 1;
    } else {
        print_warn(
            "No vision API key",
            "Selector recovery disabled; set vision.apiKey or OPENAI_API_KEY",
        );
        warn_count += 1;
    }
    println!();

    // --- Summary ---
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "  ✅ {} passed  ⚠️  {} warnings  ❌ {} errors",
        ok_count, warn_count, err_count
    );

    if err_count > 0 {
        println!();
        println!("  {} error(s) must be fixed before normal use.", err_count);
    } else if warn_count > 0 {
        println!();
        println!("  Core features OK. Some optional features not ready.");
    } else {
        println!();
        println!("  🎉 All good!");
    }
    println!();

    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} — {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {} — {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {} — {}", label, hint);
    }
}

fn check_command(
    cmd: &str,
    args: &[&str],
    label: &str,
    purpose: &str,
    ok: &mut u32,
    err: &mut u32,
) {
    match Command::new(cmd).args(args).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            let ver_line = version.lines().next().unwrap_or("").trim().to_string();
            let short: String = ver_line.chars().take(40).collect();
            print_ok(label, &short);
            *ok += 1;
        }
        _ => {
            print_err(&format!("{} '{}' not found", label, cmd), purpose);
            *err += 1;
        }
    }
}
