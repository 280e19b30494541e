use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "stagebridge", about = "StageBridge management CLI")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Device API URL
    #[arg(short, long, default_value = "http://localhost:3001", global = true, env = "STAGEBRIDGE_URL")]
    url: String,

    /// Fleet manager URL
    #[arg(long, default_value = "http://localhost:3002", global = true, env = "STAGEBRIDGE_FLEET_URL")]
    fleet: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show device status
    Status,
    /// List StageBridge devices discovered by this device
    Devices,
    /// List MIDI ports available on the device
    Ports,
    /// Show the device configuration
    Config,
    /// Save the device configuration file locally
    Backup {
        file: PathBuf,
    },
    /// Replace the device configuration with a TOML or JSON file
    Restore {
        file: PathBuf,
    },
    /// List OSC mappings
    Mappings,
    /// Upload mappings from a JSON file (array, merged by OSC address)
    Upload {
        file: PathBuf,
    },
    /// Restart the device service
    Restart,
    /// Point every device in the fleet at an RTP-MIDI target and restart them
    Sync {
        /// RTP-MIDI receiver IP
        rtp_ip: String,
        /// RTP-MIDI receiver port
        rtp_port: u16,
        /// Also set each device's OSC listen port
        #[arg(long)]
        osc_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = args.url.trim_end_matches('/');

    match args.command {
        Commands::Status => {
            let resp: Value = client
                .get(format!("{}/api/status", base))
                .send().await?
                .json().await?;
            println!("StageBridge Status");
            println!("══════════════════════════════");
            println!("  Device:       {}", resp["device_name"].as_str().unwrap_or("?"));
            println!("  Version:      {}", resp["version"].as_str().unwrap_or("?"));
            println!("  Uptime:       {}s", resp["uptime_seconds"]);
            println!("  OSC port:     {}", resp["osc_port"]);
            println!("  MIDI out:     {}", resp["midi_output"].as_str().unwrap_or("(none)"));
            println!("  MIDI in:      {}", resp["midi_input"].as_str().unwrap_or("(none)"));
            println!("  Relay mode:   {}", resp["relay_mode"].as_str().unwrap_or("?"));
            println!("  Peers:        {}", resp["discovered_devices"]);
            println!("  Mappings:     {}", resp["mappings"]);
        }
        Commands::Devices => {
            let resp: Value = client
                .get(format!("{}/api/devices", base))
                .send().await?
                .json().await?;
            println!("Devices");
            println!("══════════════════════════════");
            print_devices(&resp["devices"]);
        }
        Commands::Ports => {
            let resp: Value = client
                .get(format!("{}/api/midi-ports", base))
                .send().await?
                .json().await?;
            for (title, key) in [("Inputs", "inputs"), ("Outputs", "outputs")] {
                println!("{}", title);
                println!("══════════════════════════════");
                match resp[key].as_array() {
                    Some(ports) if !ports.is_empty() => {
                        for p in ports {
                            println!("  {:<12} {}", p["id"].as_str().unwrap_or("?"), p["name"].as_str().unwrap_or(""));
                        }
                    }
                    _ => println!("  None found"),
                }
            }
        }
        Commands::Backup { file } => {
            let contents = client
                .get(format!("{}/api/config/download", base))
                .send().await?
                .error_for_status()?
                .text().await?;
            std::fs::write(&file, contents)?;
            println!("  Saved configuration to {}", file.display());
        }
        Commands::Restore { file } => {
            let contents = std::fs::read_to_string(&file)?;
            let resp: Value = client
                .post(format!("{}/api/config/upload", base))
                .body(contents)
                .send().await?
                .json().await?;
            if resp["success"].as_bool().unwrap_or(false) {
                println!("  {}", resp["message"].as_str().unwrap_or("Configuration uploaded"));
            } else {
                println!("  Restore failed: {}", resp.get("error").unwrap_or(&Value::Null));
            }
        }
        Commands::Config => {
            let resp: Value = client
                .get(format!("{}/api/config", base))
                .send().await?
                .json().await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Commands::Mappings => {
            let resp: Value = client
                .get(format!("{}/api/mappings", base))
                .send().await?
                .json().await?;
            println!("Mappings");
            println!("══════════════════════════════");
            if let Some(mappings) = resp["mappings"].as_array() {
                if mappings.is_empty() {
                    println!("  No mappings configured");
                }
                for m in mappings {
                    let kind = m["mapping_type"].as_str().unwrap_or("midi");
                    let steps = match kind {
                        "osc" => m["osc_sequence"].as_array().map_or(0, |s| s.len()),
                        _ => m["midi_sequence"].as_array().map_or(0, |s| s.len()),
                    };
                    println!("  {} [{}] {} step(s) — {}",
                        m["osc_address"].as_str().unwrap_or("?"), kind, steps,
                        m["description"].as_str().unwrap_or(""));
                }
            }
        }
        Commands::Upload { file } => {
            let contents = std::fs::read_to_string(&file)?;
            let mappings: Value = serde_json::from_str(&contents)?;
            if !mappings.is_array() {
                anyhow::bail!("{} must contain a JSON array of mappings", file.display());
            }
            let resp: Value = client
                .post(format!("{}/api/mappings/upload-json", base))
                .json(&mappings)
                .send().await?
                .json().await?;
            if resp["success"].as_bool().unwrap_or(false) {
                println!("  Added {}, updated {}, skipped {}",
                    resp["added"], resp["updated"], resp["skipped"]);
            } else {
                println!("  Upload failed: {}", resp.get("error").unwrap_or(&Value::Null));
            }
        }
        Commands::Restart => {
            println!("Requesting restart...");
            let resp: Value = client
                .post(format!("{}/api/system/restart", base))
                .send().await?
                .json().await?;
            println!("  {}", resp["message"].as_str().unwrap_or("Restart requested"));
        }
        Commands::Sync { rtp_ip, rtp_port, osc_port } => {
            let fleet = args.fleet.trim_end_matches('/');
            let mut body = json!({ "rtp_ip": rtp_ip, "rtp_port": rtp_port });
            if let Some(port) = osc_port {
                body["osc_port"] = json!(port);
            }
            println!("Syncing fleet to RTP-MIDI {}:{}...", rtp_ip, rtp_port);
            let resp: Value = client
                .post(format!("{}/api/sync", fleet))
                .json(&body)
                .send().await?
                .json().await?;
            match resp.as_array() {
                Some(results) if results.is_empty() => println!("  No devices discovered"),
                Some(results) => {
                    for r in results {
                        match r["reason"].as_str() {
                            Some(reason) => println!("  {} — {} ({})", r["name"], r["status"], reason),
                            None => println!("  {} — {}", r["name"], r["status"]),
                        }
                    }
                }
                None => println!("  Sync failed: {}", resp.get("error").unwrap_or(&Value::Null)),
            }
        }
    }

    Ok(())
}

fn print_devices(devices: &Value) {
    match devices.as_array() {
        Some(list) if !list.is_empty() => {
            for d in list {
                println!("  {} {}:{} ({})", d["name"], d["ip"], d["port"], d["host"]);
            }
        }
        _ => println!("  No devices discovered"),
    }
}
