//! `taskpilot config`: Configuration management commands.

use taskpilot_config::AppConfig;

pub fn defaults() {
    println!("{}", AppConfig::default_toml());
}

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

pub fn validate() -> anyhow::Result<()> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if config.agent.max_duration_ms == 0 {
                warnings.push("agent.max_duration_ms = 0: tasks have no wall-clock limit");
            }
            if config.agent.step_delay_ms == 0 {
                warnings.push("agent.step_delay_ms = 0: steps are not rate limited");
            }
            if config.retry.max_retries == 0 {
                warnings.push("retry.max_retries = 0: transient model errors fail the task");
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Max steps:     {}", config.agent.max_steps);
            println!("   Max duration:  {} ms", config.agent.max_duration_ms);
            println!("   Model timeout: {} s", config.agent.model_timeout_secs);
            println!("   Tool timeout:  {} s", config.agent.tool_timeout_secs);
            println!("   Persona:       {}", config.persona.name);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}
