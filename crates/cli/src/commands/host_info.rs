//! Docker engine summary

use super::CliContext;
use crate::output::{format_bytes, print_json, OutputFormat};
use anyhow::Result;
use colored::Colorize;

/// `pw host-info HOST`
pub async fn show_host_info(ctx: &CliContext, host: &str) -> Result<()> {
    let entry = ctx.host(host)?;
    let adapter = ctx.connect_host(&entry).await?;
    let info = adapter.host_info().await?;

    match ctx.format {
        OutputFormat::Json => print_json(&info)?,
        OutputFormat::Table => {
            let unknown = || "unknown".to_string();
            println!("{}", "Docker Host".bold());
            println!("{}", "=".repeat(50));
            println!("Host:            {}", entry.name.cyan());
            println!("Connected via:   {}", adapter.strategy());
            println!("Engine name:     {}", info.name.clone().unwrap_or_else(unknown));
            println!(
                "Server version:  {}",
                info.server_version.clone().unwrap_or_else(unknown)
            );
            println!("API version:     {}", info.api_version.clone().unwrap_or_else(unknown));
            println!(
                "OS / Arch:       {} / {}",
                info.operating_system.clone().unwrap_or_else(unknown),
                info.architecture.clone().unwrap_or_else(unknown)
            );
            println!("CPUs:            {}", info.cpus);
            println!("Memory:          {}", format_bytes(info.memory_total));
            println!();
            println!("{}", "Containers".bold());
            println!("{}", "-".repeat(50));
            println!("Total:           {}", info.containers);
            println!("Running:         {}", info.containers_running.to_string().green());
            println!("Paused:          {}", info.containers_paused.to_string().yellow());
            println!("Stopped:         {}", info.containers_stopped.to_string().red());
            println!("Images:          {}", info.images);
        }
    }
    Ok(())
}
