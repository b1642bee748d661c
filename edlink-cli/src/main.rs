//! edlink CLI - Command-line tool for uploading ROMs to EverDrive-64 carts.
//!
//! ## Features
//!
//! - Upload `.z64`/`.v64` ROM images over the cart's USB port
//! - Automatic byte-order correction and power-of-two padding
//! - Probe the cart and boot the uploaded image
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use edlink::{
    BOOT_SETTLE_DELAY, ByteOrder, NativePort, RomImage, SerialConfig, Uploader, device, pad_length,
};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// edlink - upload ROM images to EverDrive-64 flash carts.
///
/// Environment variables:
///   EDLINK_PORT              - Default serial port
///   EDLINK_BAUD              - Default baud rate (default: 9600)
///   EDLINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "edlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "EDLINK_PORT")]
    port: Option<String>,

    /// Baud rate. The cart's FTDI link is USB-native, so this is nominal.
    #[arg(short, long, global = true, default_value = "9600", env = "EDLINK_BAUD")]
    baud: u32,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "EDLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a ROM image and boot it.
    Upload {
        /// Path to the ROM image (.z64 or .v64).
        rom: PathBuf,

        /// Leave the cart in the menu instead of booting the ROM.
        #[arg(long)]
        no_boot: bool,
    },

    /// Send a test command and print the cart's response.
    Probe,

    /// Send the boot command only (boots whatever is loaded).
    Boot,

    /// Show information about a ROM file.
    Info {
        /// Path to the ROM image.
        rom: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "edlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Ctrl-C feeds the library's interrupt checker so the unbounded
    // post-transfer wait can be cancelled cleanly.
    install_interrupt_handler();

    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upload { rom, no_boot } => {
            cmd_upload(&cli, &mut config, rom, *no_boot)?;
        }
        Commands::Probe => {
            cmd_probe(&cli, &mut config)?;
        }
        Commands::Boot => {
            cmd_boot(&cli, &mut config)?;
        }
        Commands::Info { rom, json } => {
            cmd_info(rom, *json)?;
        }
        Commands::ListPorts { json } => {
            cmd_list_ports(*json);
        }
        Commands::Completions { shell } => {
            cmd_completions(*shell);
        }
    }

    Ok(())
}

/// Wire Ctrl-C into the library's global interrupt checker.
fn install_interrupt_handler() {
    use std::sync::Arc;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).is_ok() {
        edlink::set_interrupt_checker(move || interrupted.load(Ordering::SeqCst));
    } else {
        debug!("Could not install Ctrl-C handler");
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Open the selected port and wrap it in an uploader.
fn open_uploader(cli: &Cli, config: &mut Config) -> Result<Uploader<NativePort>> {
    let port_name = get_port(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).green(),
            cli.baud
        );
    }

    let port = NativePort::open(&SerialConfig::new(&port_name, cli.baud))
        .with_context(|| format!("Failed to open serial port {port_name}"))?;
    Uploader::open(port).context("Failed to start the receive loop")
}

/// Upload command implementation.
fn cmd_upload(cli: &Cli, config: &mut Config, rom_path: &PathBuf, no_boot: bool) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading ROM {}",
            style("📦").cyan(),
            rom_path.display()
        );
    }

    let rom = RomImage::from_file(rom_path)
        .with_context(|| format!("Failed to read ROM file {}", rom_path.display()))?;

    let order = rom.byte_order();
    if !cli.quiet {
        let order_str = match order {
            ByteOrder::Native => "native (z64)",
            ByteOrder::Swapped => "byte-swapped (v64)",
        };
        eprintln!(
            "    {} {} bytes, {}",
            style("•").dim(),
            rom.len(),
            order_str
        );
    }

    // Normalize and pad before anything touches the wire; a malformed
    // image must never start a transfer.
    let prepared = rom
        .prepare()
        .context("ROM image cannot be prepared for transfer")?;
    if !cli.quiet {
        eprintln!(
            "    {} declared transfer length: {} bytes",
            style("•").dim(),
            prepared.declared_len()
        );
    }

    let mut uploader = open_uploader(cli, config)?;

    if !cli.quiet {
        eprintln!("{} Probing cart...", style("⏳").yellow());
    }
    let response = uploader
        .probe()
        .context("Cart did not respond to the test command")?;
    if !cli.quiet {
        eprintln!("{} Cart responded: {}", style("✓").green(), response.trim());
    }

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(u64::from(prepared.declared_len()));
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    uploader.upload(&prepared, |done, _total| {
        pb.set_position(done as u64);
    })?;
    pb.finish_with_message("sent");

    if !cli.quiet {
        eprintln!("{} Waiting for the cart to settle...", style("⏳").yellow());
    }
    let liveness = uploader.wait_alive()?;
    if !cli.quiet {
        eprintln!(
            "{} Cart alive after {:.2}s ({} unanswered probes)",
            style("✓").green(),
            liveness.elapsed.as_secs_f64(),
            liveness.retries
        );
    }

    if no_boot {
        if !cli.quiet {
            eprintln!("{} Skipping boot (--no-boot)", style("ℹ").blue());
        }
    } else {
        std::thread::sleep(BOOT_SETTLE_DELAY);
        uploader.boot()?;
        if !cli.quiet {
            eprintln!("{} Boot command sent", style("🚀").cyan());
        }
    }

    if !cli.quiet {
        eprintln!(
            "\n{} Upload complete: {} payload bytes",
            style("🎉").green().bold(),
            uploader.payload_bytes()
        );
    }

    Ok(())
}

/// Probe command implementation.
fn cmd_probe(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut uploader = open_uploader(cli, config)?;

    let response = uploader
        .probe()
        .context("Cart did not respond to the test command")?;

    // The response text is the command's output
    println!("{}", response.trim());
    Ok(())
}

/// Boot command implementation.
fn cmd_boot(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut uploader = open_uploader(cli, config)?;
    uploader.boot()?;
    if !cli.quiet {
        eprintln!("{} Boot command sent", style("🚀").cyan());
    }
    Ok(())
}

/// Info command implementation.
fn cmd_info(rom_path: &PathBuf, json: bool) -> Result<()> {
    let rom = RomImage::from_file(rom_path)
        .with_context(|| format!("Failed to read ROM file {}", rom_path.display()))?;

    if rom.is_empty() {
        bail!("ROM file {} is empty", rom_path.display());
    }

    let order = rom.byte_order();
    #[allow(clippy::cast_possible_truncation)] // ROM images are < 4 GiB
    let declared = pad_length(rom.len() as u32);
    // Internal name only reads correctly in native order; ignore images
    // that cannot be normalized (odd length) and just omit it.
    let internal_name = rom
        .clone()
        .normalize()
        .ok()
        .and_then(|r| r.internal_name());

    if json {
        let info = serde_json::json!({
            "path": rom_path.display().to_string(),
            "size": rom.len(),
            "byte_order": match order {
                ByteOrder::Native => "native",
                ByteOrder::Swapped => "swapped",
            },
            "declared_size": declared,
            "internal_name": internal_name,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&info).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("ROM Information").bold().underlined());
    eprintln!("  File:          {}", rom_path.display());
    eprintln!("  Size:          {} bytes", rom.len());
    eprintln!(
        "  Byte order:    {}",
        match order {
            ByteOrder::Native => style("native (z64)").green(),
            ByteOrder::Swapped => style("byte-swapped (v64)").yellow(),
        }
    );
    eprintln!("  Declared size: {declared} bytes");
    if let Some(name) = internal_name {
        eprintln!("  Internal name: {}", style(name).cyan());
    }

    Ok(())
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) {
    let detected = device::detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "device": p.device.name(),
                    "known": p.device.is_known(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    } else {
        for port in &detected {
            let device_type = if port.device.is_known() {
                format!(" [{}]", style(port.device.name()).yellow())
            } else {
                String::new()
            };

            let product = port.product.as_deref().unwrap_or("");
            let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" ({vid:04X}:{pid:04X})")
            } else {
                String::new()
            };

            eprintln!(
                "  {} {}{}{}{}",
                style("•").green(),
                style(&port.name).cyan(),
                device_type,
                vid_pid,
                if !product.is_empty() {
                    format!(" - {}", style(product).dim())
                } else {
                    String::new()
                }
            );
        }

        // Show auto-detection result
        if let Ok(auto_port) = device::auto_detect_port() {
            eprintln!(
                "\n{} Would auto-select {}",
                style("→").green().bold(),
                style(&auto_port.name).cyan().bold()
            );
        }
    }
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_upload() {
        let cli = Cli::try_parse_from([
            "edlink",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "115200",
            "upload",
            "game.z64",
        ]);
        assert!(cli.is_ok());
        let cli = cli.unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, 115200);
        assert!(matches!(cli.command, Commands::Upload { .. }));
    }

    #[test]
    fn test_cli_parse_upload_no_boot() {
        let cli = Cli::try_parse_from(["edlink", "upload", "game.z64", "--no-boot"]).unwrap();
        if let Commands::Upload { rom, no_boot } = cli.command {
            assert_eq!(rom.to_str().unwrap(), "game.z64");
            assert!(no_boot);
        } else {
            panic!("Expected Upload command");
        }
    }

    #[test]
    fn test_cli_parse_probe() {
        let cli = Cli::try_parse_from(["edlink", "probe"]).unwrap();
        assert!(matches!(cli.command, Commands::Probe));
    }

    #[test]
    fn test_cli_parse_boot() {
        let cli = Cli::try_parse_from(["edlink", "boot"]).unwrap();
        assert!(matches!(cli.command, Commands::Boot));
    }

    #[test]
    fn test_cli_parse_info() {
        let cli = Cli::try_parse_from(["edlink", "info", "game.z64"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: false, .. }));
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["edlink", "info", "--json", "game.z64"]).unwrap();
        if let Commands::Info { json, .. } = cli.command {
            assert!(json);
        } else {
            panic!("Expected Info command");
        }
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["edlink", "list-ports"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: false }));
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["edlink", "list-ports", "--json"]).unwrap();
        if let Commands::ListPorts { json } = cli.command {
            assert!(json);
        } else {
            panic!("Expected ListPorts command");
        }
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["edlink", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { .. }));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["edlink", "list-ports"]).unwrap();
        assert_eq!(cli.baud, 9600);
        assert!(!cli.quiet);
        assert!(!cli.non_interactive);
        assert!(!cli.confirm_port);
        assert!(!cli.list_all_ports);
        assert!(cli.port.is_none());
        assert!(cli.config_path.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "edlink",
            "--port",
            "COM5",
            "--baud",
            "115200",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--confirm-port",
            "--list-all-ports",
            "--config",
            "/tmp/config.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM5"));
        assert_eq!(cli.baud, 115200);
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert!(cli.confirm_port);
        assert!(cli.list_all_ports);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        let result = Cli::try_parse_from(["edlink"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_upload_requires_rom() {
        let result = Cli::try_parse_from(["edlink", "upload"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_invalid_baud() {
        let result = Cli::try_parse_from(["edlink", "--baud", "not-a-number", "probe"]);
        assert!(result.is_err());
    }
}
