//! Scripts command implementation.
//!
//! Lists configured scripts.

use crate::config::Config;

/// Prints configured scripts, optionally with their settings.
pub fn command_scripts(config: &Config, verbose: bool) -> anyhow::Result<()> {
    if config.scripts.is_empty() {
        println!("No scripts configured");
        return Ok(());
    }

    println!("Configured scripts ({}):", config.scripts.len());
    for script in &config.scripts {
        println!("  {}", script.name);
        if !verbose {
            continue;
        }

        if let Some((program, args)) = script.run_args() {
            println!("    command:  {} {}", program, args.join(" "));
        }
        let max_timeout = script
            .max_timeout()
            .map(|t| format!("{:.3}s", t.as_secs_f64()))
            .unwrap_or_else(|| "none".into());
        println!(
            "    timeout:  {} (enforced: {})",
            max_timeout, script.timeout.enforced
        );
        println!("    ignore output on fail: {}", script.ignore_output_on_fail);
        for (key, value) in &script.env {
            println!("    env:      {key}={value}");
        }
    }
    Ok(())
}
