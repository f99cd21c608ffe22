//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Connection type argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    /// HTTP polling over Wi-Fi
    #[value(alias = "http")]
    Wifi,
    /// BLE notifications
    #[value(alias = "ble")]
    Bluetooth,
}

impl From<TransportArg> for aquamon_types::ConnectionType {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Wifi => aquamon_types::ConnectionType::Wifi,
            TransportArg::Bluetooth => aquamon_types::ConnectionType::Bluetooth,
        }
    }
}

/// Reusable output format arguments
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl OutputArgs {
    /// The effective format; the global `--json` flag wins.
    pub fn resolve(&self, json: bool) -> OutputFormat {
        if json { OutputFormat::Json } else { self.format }
    }
}

#[derive(Parser)]
#[command(name = "aquamon")]
#[command(author, version, about = "CLI for ESP32 tank water-quality sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Configuration file path
    #[arg(long, global = true, env = "AQUAMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path (overrides config)
    #[arg(long, global = true, env = "AQUAMON_DATABASE")]
    pub database: Option<PathBuf>,

    /// Readings API base URL for sync (overrides config)
    #[arg(long, global = true, env = "AQUAMON_API_URL")]
    pub api_url: Option<String>,

    /// Relay service base URL for HTTP devices (overrides config)
    #[arg(long, global = true, env = "AQUAMON_RELAY_URL")]
    pub relay_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show and change the device configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Read the sensor once
    Read {
        /// Give up after this many seconds
        #[arg(short = 'T', long, default_value = "15")]
        timeout: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Continuously monitor the sensor
    Watch {
        /// Poll interval in milliseconds (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many readings (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Record and inspect manual readings
    Reading {
        #[command(subcommand)]
        action: ReadingAction,
    },

    /// Upload pending readings now
    Sync,

    /// Manage tanks
    Tank {
        #[command(subcommand)]
        action: TankAction,
    },

    /// Offline sign-in cache
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Scan for nearby BLE sensors
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Device configuration subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Show the CLI settings and both device configurations
    Show,

    /// Show the CLI configuration file path
    Path,

    /// Change a CLI setting
    Set {
        /// Setting name
        #[arg(value_enum)]
        key: ConfigKey,
        /// New value
        value: String,
    },

    /// Configure the HTTP (Wi-Fi) device
    Http {
        /// Device IP address or host name
        ip: String,

        /// TCP port
        #[arg(short, long, default_value = "80")]
        port: String,

        /// Endpoint path
        #[arg(short, long, default_value = "turbidez")]
        endpoint: String,
    },

    /// Configure the BLE device
    Ble {
        /// Preferred advertised name
        #[arg(short = 'N', long)]
        name: Option<String>,

        /// GATT service UUID (defaults to Nordic UART)
        #[arg(long)]
        service: Option<String>,

        /// Notify characteristic UUID (defaults to Nordic UART TX)
        #[arg(long)]
        characteristic: Option<String>,
    },

    /// Select the active connection type
    Use {
        #[arg(value_enum)]
        transport: TransportArg,
    },

    /// Forget a device configuration
    Clear {
        #[arg(value_enum)]
        transport: TransportArg,
    },
}

/// CLI settings that `config set` can change
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    Database,
    ApiUrl,
    RelayUrl,
    PollIntervalMs,
    UnauthenticatedDevMode,
    SyncStatusDisplayMs,
}

/// Manual reading subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ReadingAction {
    /// Save a manual reading (queued for sync)
    Add {
        /// Turbidity in NTU
        turbidity: f64,

        /// Water temperature in °C
        #[arg(short, long)]
        temperature: Option<f64>,

        /// pH
        #[arg(long)]
        ph: Option<f64>,

        /// Dissolved oxygen in mg/L
        #[arg(long)]
        oxygen: Option<f64>,

        /// Ammonia in mg/L
        #[arg(long)]
        ammonia: Option<f64>,

        /// Tank the reading was taken in
        #[arg(long)]
        tank: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List saved readings
    List {
        /// Only readings not yet uploaded
        #[arg(long)]
        pending: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Remove readings that were already uploaded
    ClearSynced,
}

/// Tank subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum TankAction {
    /// Register a tank
    Add {
        /// Display name
        name: String,

        /// Construction type (earthen, concrete, liner, fiberglass, other)
        #[arg(short, long, default_value = "other")]
        construction: String,

        /// Fish species raised
        #[arg(short, long, default_value = "")]
        species: String,

        /// Number of fish
        #[arg(long, default_value = "0")]
        fish_count: u32,

        /// Average fish weight in grams
        #[arg(long, default_value = "0")]
        average_weight: f64,

        /// Water surface area in m²
        #[arg(long, default_value = "0")]
        area: f64,
    },

    /// List tanks
    List {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Remove a tank by id or name
    Remove {
        /// Tank id or name
        tank: String,
    },
}

/// Offline sign-in subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum AuthAction {
    /// Cache a signed-in user for offline access
    Login {
        /// Provider user id
        #[arg(long)]
        id: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// E-mail address
        #[arg(long)]
        email: String,

        /// Administrator
        #[arg(long)]
        admin: bool,

        /// Additional roles (comma-separated)
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },

    /// Clear the cached user
    Logout,

    /// Show whether access is allowed
    Status {
        /// Treat the network as offline
        #[arg(long)]
        offline: bool,

        /// The live provider reports a valid session
        #[arg(long)]
        provider_session: bool,

        #[command(flatten)]
        output: OutputArgs,
    },
}
