//! Interactive serial port selection.
//!
//! Port selection works like espflash and friends:
//! - Explicit `--port` always wins
//! - A remembered port from the config file is used next
//! - Auto-detection prefers known USB bridges (FTDI for EverDrive carts)
//! - Multiple candidates trigger an interactive picker via dialoguer
//! - Non-interactive mode never prompts

use {
    crate::config::Config,
    anyhow::{Result, bail},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    edlink::{DetectedPort, DeviceKind, TransportKind, device},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    // Non-interactive mode must be deterministic and never prompt.
    match selection_ports.len().cmp(&1) {
        Ordering::Equal => {
            let port = selection_ports
                .into_iter()
                .next()
                .expect("selection_ports has exactly 1 element here");
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        }
        Ordering::Greater => bail!(
            "Multiple serial ports found; specify one with --port or EDLINK_PORT"
        ),
        Ordering::Less => bail!("No serial ports available"),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    // If port explicitly specified, use it
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    // If port in config, use it
    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    // Detect available ports
    let ports = device::detect_ports();

    if ports.is_empty() {
        bail!("No serial ports found; is the cart plugged in?");
    }

    // Filter to known devices (built-in + config)
    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();

    // Select candidate set: known first unless user asks for all
    let selection_ports: Vec<DetectedPort> = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    // Non-interactive mode must never prompt
    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports, config)
        }
        Ordering::Equal => {
            let port = selection_ports
                .into_iter()
                .next()
                .expect("selection_ports has exactly 1 element here");
            let is_known = is_known_device(&port, config);

            if is_known && !options.confirm_port {
                info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        }
        Ordering::Less => bail!("No serial ports available"),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        bail!(
            "Port selection needs a terminal; use --port or --non-interactive in scripts"
        )
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                anyhow::anyhow!("Port selection cancelled")
            } else {
                anyhow::anyhow!("Port selection prompt failed: {io_err}")
            }
        }
    }
}

/// Find a port by name.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = device::detect_ports();

    // Try exact match first
    if let Some(port) = ports.iter().find(|p| p.name == name) {
        return SelectedPort {
            port: port.clone(),
            is_known: port.device.is_known(),
        };
    }

    // Try case-insensitive match (Windows)
    if let Some(port) = ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)) {
        return SelectedPort {
            port: port.clone(),
            is_known: port.device.is_known(),
        };
    }

    // Port not found in detected list, but user explicitly specified it
    // Create a placeholder port info
    SelectedPort {
        port: DetectedPort {
            name: name.to_string(),
            transport: TransportKind::Serial,
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        },
        is_known: false,
    }
}

/// Check if a port matches a known device (from config or built-in list).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    // Check built-in device types
    if port.device.is_known() {
        return true;
    }

    // Check configured USB devices
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        for device in &config.port.usb_device {
            if device.matches(vid, pid) {
                return true;
            }
        }
    }

    false
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Sort: known devices first
    ports.sort_by_key(|p| !is_known_device(p, config));

    // Build display names
    let port_names: Vec<String> = ports
        .iter()
        .map(|port| {
            let name = if is_known_device(port, config) {
                style(&port.name).bold().to_string()
            } else {
                port.name.clone()
            };

            let device_info = if port.device.is_known() {
                format!(" [{}]", style(port.device.name()).yellow())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" ({vid:04X}:{pid:04X})")
            } else {
                String::new()
            };

            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {}", style(p).dim()))
                .unwrap_or_default();

            format!("{name}{device_info}{product}")
        })
        .collect();

    // Truncate labels to fit terminal width to prevent wrapping in narrow
    // terminals.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let port_names: Vec<String> = port_names
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the port your cart is attached to")
        .items(&port_names)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        }
        None => bail!("Port selection cancelled"),
    }
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use port {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        bail!("Port selection cancelled")
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        // Check if already known
        for device in &config.port.usb_device {
            if device.matches(vid, pid) {
                return Ok(()); // Already saved
            }
        }

        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Remember this adapter for future auto-detection?")
            .default(false)
            .interact_opt()
            .map_err(map_prompt_error)?
            .unwrap_or(false);

        if confirmed {
            if let Err(e) = config.remember_usb_device(vid, pid) {
                error!("Failed to save port configuration: {e}");
            }
        }
    }

    Ok(())
}
