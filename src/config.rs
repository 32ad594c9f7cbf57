use crate::tokens::TokenTable;
use crate::types::{parse_bytes32, ChainFamily, LedgerBackend, RelayError, RelayerConfig};
use alloy_primitives::Address;
use clap::{Arg, ArgAction, ArgMatches, Command};
use config::{Config, Environment, File, FileFormat};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

const DEFAULTS: &str = r#"
[wormhole]
api_url = "https://api.testnet.wormholescan.io"
poll_interval_ms = 5000
request_timeout_secs = 10
sequence_file = "./orbital-sequences.json"

[chains.sui]
chain_id = 21
family = "sui"
rpc_url = "https://fullnode.testnet.sui.io:443"
emitter = "0xb872e9e85580f1b53e1bdb4f7abccb5c523a99f47cc8876106387971781f19a0"
contract = "0xabb45ed94ba7366b631bee1dce8ecb456508f66b66bf7135841d8d57d2026270"
starting_sequence = 0
relay_to = "avalanche"
amount_width = 64
private_key = ""
collateral_token = "BTC"
loan_token = "USDT"
confirmation_timeout_secs = 60

[chains.sui.sui]
module = "orbital"
state = "0xfb27fa6eac7fa42133e8c414cd066175ffecff49d4343306a0db7a4b1ac61082"
owner_cap = "0xdf170db1a8fa28aa9840f18e307778bb038f74f91f1d1b6ec82001cc8454b2af"
clock = "0x6"
gas_budget = 50000000

[chains.avalanche]
chain_id = 6
family = "evm"
rpc_url = "https://api.avax-test.network/ext/bc/C/rpc"
emitter = "0xDdA5368dA176762d1964B868101e6592fba25b15"
contract = "0xDdA5368dA176762d1964B868101e6592fba25b15"
starting_sequence = 0
relay_to = "sui"
amount_width = 256
private_key = ""
collateral_token = "BTC"
loan_token = "USDT"
confirmation_timeout_secs = 60

[tokens.btc]
token_type = 0
addresses.avalanche = "0xB01c55634AB82268d0C0F915598858dEBD40d5C5"
addresses.sui = "0xf3c0743c760b0288112d1d68dddef36300c7351bad3b9c908078c01f02482f33::btc::BTC"

[tokens.usdt]
token_type = 1
addresses.avalanche = "0x49321b62D46A72d9F0D0275f1CDBED2CB7753306"
addresses.sui = "0xf3c0743c760b0288112d1d68dddef36300c7351bad3b9c908078c01f02482f33::usdt::USDT"

[tokens.fud]
token_type = 2
addresses.avalanche = "0x65203C47fD727AB55974Ded62F01c53F7aB98fE4"
addresses.sui = "0xae28fd09dc8df11e5b3a1d3389723cd9469988944661e708f6ddf4fb2f1fd644::fud::FUD"

[processing]
max_concurrent_dispatches = 8
submission_timeout_secs = 120
channel_capacity = 256

[monitoring]
health_check_port = 8080
log_level = "info"

[ledger]
backend = "file"
path = "./orbital-ledger"
"#;

/// Configuration builder for the relayer
pub struct ConfigBuilder {
    config: Config,
}

/// CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<String>,
    pub api_url: Option<String>,
    pub log_level: Option<String>,
    pub health_port: Option<u16>,
    pub ledger_path: Option<String>,
    pub print_sample_config: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(&cli_command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        CliArgs {
            config_file: matches.get_one::<String>("config").cloned(),
            api_url: matches.get_one::<String>("api-url").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            health_port: matches
                .get_one::<String>("health-port")
                .and_then(|s| s.parse().ok()),
            ledger_path: matches.get_one::<String>("ledger-path").cloned(),
            print_sample_config: matches.get_flag("sample-config"),
        }
    }
}

fn cli_command() -> Command {
    Command::new("orbital-relayer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Orbital cross-chain lending relayer")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .env("ORBITAL_CONFIG_FILE"),
        )
        .arg(
            Arg::new("api-url")
                .long("api-url")
                .value_name("URL")
                .help("Wormhole API URL")
                .env("WORMHOLE_API_URL"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .env("LOG_LEVEL"),
        )
        .arg(
            Arg::new("health-port")
                .long("health-port")
                .value_name("PORT")
                .help("Health server port")
                .env("PORT"),
        )
        .arg(
            Arg::new("ledger-path")
                .long("ledger-path")
                .value_name("DIR")
                .help("Directory of the file-backed loan ledger"),
        )
        .arg(
            Arg::new("sample-config")
                .long("sample-config")
                .action(ArgAction::SetTrue)
                .help("Print a sample configuration file and exit"),
        )
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Load configuration in order of precedence: defaults, config file,
    /// environment (`ORBITAL_` prefix), CLI arguments.
    pub fn load(cli_args: &CliArgs) -> Result<RelayerConfig, RelayError> {
        let mut builder = ConfigBuilder::new();

        builder.load_defaults()?;

        if let Some(config_file) = &cli_args.config_file {
            builder.load_file(config_file)?;
        } else {
            builder.try_load_default_files()?;
        }

        builder.load_environment()?;
        builder.apply_cli_overrides(cli_args)?;

        let config = builder.build()?;
        validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    fn build(&self) -> Result<RelayerConfig, RelayError> {
        self.config
            .clone()
            .try_deserialize()
            .map_err(|e| RelayError::ConfigError(format!("Configuration parsing error: {}", e)))
    }

    fn load_defaults(&mut self) -> Result<(), RelayError> {
        self.config = Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .build()
            .map_err(|e| RelayError::ConfigError(format!("Default config error: {}", e)))?;

        Ok(())
    }

    fn load_file(&mut self, path: &str) -> Result<(), RelayError> {
        if !Path::new(path).exists() {
            return Err(RelayError::ConfigError(format!("Config file not found: {}", path)));
        }

        info!("Loading configuration from: {}", path);

        self.config = Config::builder()
            .add_source(self.config.clone())
            .add_source(File::with_name(path))
            .build()
            .map_err(|e| RelayError::ConfigError(format!("Config file error: {}", e)))?;

        Ok(())
    }

    fn try_load_default_files(&mut self) -> Result<(), RelayError> {
        let default_paths = ["./config.toml", "./relayer.toml", "/etc/orbital/relayer.toml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                info!("Found default config file: {}", path);
                return self.load_file(path);
            }
        }

        warn!("No default config file found, using defaults and environment variables");
        Ok(())
    }

    fn load_environment(&mut self) -> Result<(), RelayError> {
        self.config = Config::builder()
            .add_source(self.config.clone())
            .add_source(
                Environment::with_prefix("ORBITAL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| RelayError::ConfigError(format!("Environment config error: {}", e)))?;

        Ok(())
    }

    fn apply_cli_overrides(&mut self, cli_args: &CliArgs) -> Result<(), RelayError> {
        let override_err =
            |e: config::ConfigError| RelayError::ConfigError(format!("CLI override error: {}", e));
        let mut builder = Config::builder().add_source(self.config.clone());

        if let Some(ref url) = cli_args.api_url {
            builder = builder
                .set_override("wormhole.api_url", url.as_str())
                .map_err(override_err)?;
        }

        if let Some(ref level) = cli_args.log_level {
            builder = builder
                .set_override("monitoring.log_level", level.as_str())
                .map_err(override_err)?;
        }

        if let Some(port) = cli_args.health_port {
            builder = builder
                .set_override("monitoring.health_check_port", port as i64)
                .map_err(override_err)?;
        }

        if let Some(ref path) = cli_args.ledger_path {
            builder = builder
                .set_override("ledger.path", path.as_str())
                .map_err(override_err)?;
        }

        self.config = builder
            .build()
            .map_err(|e| RelayError::ConfigError(format!("CLI config build error: {}", e)))?;

        Ok(())
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration
pub fn validate_config(config: &RelayerConfig) -> Result<(), RelayError> {
    let invalid = |msg: String| Err(RelayError::ConfigError(msg));

    if config.wormhole.api_url.is_empty() {
        return invalid("Wormhole API URL is required".to_string());
    }

    if config.chains.is_empty() {
        return invalid("At least one chain must be configured".to_string());
    }

    let mut chain_ids = HashSet::new();
    for (name, chain) in &config.chains {
        if !chain_ids.insert(chain.chain_id) {
            return invalid(format!("Duplicate chain id {} ({})", chain.chain_id, name));
        }

        if chain.rpc_url.is_empty() {
            return invalid(format!("RPC URL is required for chain {}", name));
        }

        if let Err(e) = parse_bytes32(&chain.emitter) {
            return invalid(format!("Invalid emitter for chain {}: {}", name, e));
        }

        if chain.private_key.is_empty() {
            return invalid(format!(
                "Private key is required for chain {} (ORBITAL_CHAINS__{}__PRIVATE_KEY)",
                name,
                name.to_uppercase()
            ));
        }

        if chain.confirmation_timeout_secs == 0 {
            return invalid(format!("Confirmation timeout must be greater than 0 for chain {}", name));
        }

        match chain.family {
            ChainFamily::Evm => {
                if chain.contract.parse::<Address>().is_err() {
                    return invalid(format!(
                        "Contract for EVM chain {} must be a 20-byte hex address",
                        name
                    ));
                }
            }
            ChainFamily::Sui => {
                if let Err(e) = parse_bytes32(&chain.contract) {
                    return invalid(format!("Invalid package id for chain {}: {}", name, e));
                }
                let Some(objects) = &chain.sui else {
                    return invalid(format!("Sui chain {} requires a [chains.{}.sui] section", name, name));
                };
                for (field, id) in [
                    ("state", &objects.state),
                    ("owner_cap", &objects.owner_cap),
                    ("clock", &objects.clock),
                ] {
                    if parse_bytes32(id).is_err() {
                        return invalid(format!("Invalid Sui object id {} for chain {}", field, name));
                    }
                }
                if objects.gas_budget == 0 {
                    return invalid(format!("Gas budget must be greater than 0 for chain {}", name));
                }
            }
        }

        if let Some(target) = &chain.relay_to {
            if target == name {
                return invalid(format!("Chain {} cannot relay to itself", name));
            }
            if !config.chains.contains_key(target) {
                return invalid(format!("Chain {} relays to unknown chain {}", name, target));
            }
        }
    }

    let tokens = TokenTable::from_config(&config.tokens, &config.chains)?;
    for (name, chain) in &config.chains {
        tokens
            .route_tokens(chain.chain_id, &chain.collateral_token, &chain.loan_token)
            .map_err(|e| RelayError::ConfigError(format!("Chain {}: {}", name, e)))?;
    }

    if config.processing.max_concurrent_dispatches == 0 {
        return invalid("Max concurrent dispatches must be greater than 0".to_string());
    }

    if config.processing.channel_capacity == 0 {
        return invalid("Channel capacity must be greater than 0".to_string());
    }

    if config.processing.submission_timeout_secs == 0 {
        return invalid("Submission timeout must be greater than 0".to_string());
    }

    if config.wormhole.sequence_file.as_deref() == Some("") {
        return invalid("Sequence file path must not be empty".to_string());
    }

    if config.ledger.backend == LedgerBackend::File && config.ledger.path.is_empty() {
        return invalid("Ledger path is required for the file backend".to_string());
    }

    info!("Configuration validation passed");
    Ok(())
}

/// Load configuration from the process arguments and environment.
pub fn load_config() -> Result<RelayerConfig, RelayError> {
    ConfigBuilder::load(&CliArgs::parse())
}

/// Create a sample configuration file
pub fn create_sample_config() -> String {
    r#"# Orbital Relayer Configuration
# Copy this file to config.toml and update the values.
# Private keys are best supplied through the environment:
#   ORBITAL_CHAINS__SUI__PRIVATE_KEY, ORBITAL_CHAINS__AVALANCHE__PRIVATE_KEY

[wormhole]
# Wormholescan API used to fetch signed VAAs
api_url = "https://api.testnet.wormholescan.io"
# Delay between polls when no new VAA is available
poll_interval_ms = 5000
request_timeout_secs = 10
# Next sequence per emitter, saved so a restart does not replay history
sequence_file = "./orbital-sequences.json"

[chains.sui]
chain_id = 21
family = "sui"
rpc_url = "https://fullnode.testnet.sui.io:443"
# Wormhole emitter of the Orbital Sui package
emitter = "0xYOUR_SUI_EMITTER"
# Orbital package id
contract = "0xYOUR_SUI_PACKAGE"
# First sequence to fetch when nothing was saved yet
starting_sequence = 0
relay_to = "avalanche"
# Integer width of amount arguments on this chain (64, 128 or 256)
amount_width = 64
collateral_token = "BTC"
loan_token = "USDT"
confirmation_timeout_secs = 60

[chains.sui.sui]
module = "orbital"
state = "0xYOUR_STATE_OBJECT"
owner_cap = "0xYOUR_OWNER_CAP"
clock = "0x6"
gas_budget = 50000000

[chains.avalanche]
chain_id = 6
family = "evm"
rpc_url = "https://api.avax-test.network/ext/bc/C/rpc"
emitter = "0xYOUR_ORBITAL_CONTRACT"
contract = "0xYOUR_ORBITAL_CONTRACT"
starting_sequence = 0
relay_to = "sui"
amount_width = 256
collateral_token = "BTC"
loan_token = "USDT"
confirmation_timeout_secs = 60

# One entry per symbol, one address per configured chain
[tokens.btc]
token_type = 0
addresses.avalanche = "0xYOUR_BTC_TOKEN"
addresses.sui = "0xYOUR_COIN_PACKAGE::btc::BTC"

[processing]
# Messages dispatched concurrently
max_concurrent_dispatches = 8
# Upper bound on one submission, confirmation included
submission_timeout_secs = 120
channel_capacity = 256

[monitoring]
# Port of the health and ledger lookup server
health_check_port = 8080
# Log level (trace, debug, info, warn, error)
log_level = "info"

[ledger]
# memory or file
backend = "file"
path = "./orbital-ledger"
"#
    .to_string()
}
