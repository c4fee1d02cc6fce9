//! Configuration for the racer
//!
//! Options come from the command line with environment fallbacks (a `.env`
//! file is loaded first by the binary). `Config::validate` turns the raw
//! options into an immutable `RaceConfig`; anything missing or malformed is a
//! `RaceError::Configuration`.

use crate::errors::RaceError;
use crate::executor::SubmitPolicy;
use crate::tx_builder::{ComputeBudget, ConstructionParams};
use crate::types::InstructionKind;
use clap::Args;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Raw options
#[derive(Args, Debug, Clone, Default)]
pub struct Config {
    /// JSON-RPC endpoint
    #[arg(long, env = "RPC_URL", default_value = "")]
    pub rpc_url: String,

    /// Streaming (pubsub websocket) endpoint
    #[arg(long, env = "WS_URL", default_value = "")]
    pub ws_url: String,

    /// Access token for the streaming endpoint
    #[arg(long, env = "STREAM_TOKEN")]
    pub stream_token: Option<String>,

    /// Payer keypair file
    #[arg(long, env = "KEYPAIR_PATH", default_value = "")]
    pub keypair_path: String,

    /// Program whose transactions are watched
    #[arg(long, env = "TARGET_PROGRAM", default_value = "")]
    pub target_program: String,

    /// Launch instance to correlate triggers with
    #[arg(long, env = "TARGET_ID")]
    pub target_id: Option<String>,

    /// Instruction kind that fires the race
    #[arg(long, env = "TARGET_KIND", default_value = "CompleteLaunch")]
    pub target_kind: String,

    /// TOML instruction templates
    #[arg(long, env = "PAYLOAD_TEMPLATES", default_value = "")]
    pub payload_templates: String,

    /// Maximum token A amount committed
    #[arg(long, env = "AMOUNT_A", default_value_t = 0)]
    pub amount_a: u64,

    /// Maximum token B amount committed
    #[arg(long, env = "AMOUNT_B", default_value_t = 0)]
    pub amount_b: u64,

    #[arg(long, env = "PRIORITY_FEE_MICROLAMPORTS", default_value_t = 0)]
    pub priority_fee_microlamports: u64,

    #[arg(long, env = "COMPUTE_UNIT_LIMIT", default_value_t = 0)]
    pub compute_unit_limit: u32,

    /// Cached anchors older than this are refetched at submission
    #[arg(long, env = "STALENESS_MS", default_value_t = 5_000)]
    pub staleness_ms: u64,

    /// Periodic anchor refresh interval
    #[arg(long, env = "ANCHOR_REFRESH_MS", default_value_t = 2_000)]
    pub anchor_refresh_ms: u64,

    #[arg(long, env = "CLAIM_RETRIES", default_value_t = 3)]
    pub claim_retries: u32,

    /// Give up after this long without completing (0 = wait forever)
    #[arg(long, env = "MAX_MONITORING_SECS", default_value_t = 0)]
    pub max_monitoring_secs: u64,

    /// processed | confirmed | finalized
    #[arg(long, env = "COMMITMENT", default_value = "confirmed")]
    pub commitment: String,

    #[arg(long, env = "CONFIRM_TIMEOUT_SECS", default_value_t = 30)]
    pub confirm_timeout_secs: u64,

    /// Skip the claim leg (allocation already claimed out of band)
    #[arg(long, env = "SKIP_CLAIM")]
    pub skip_claim: bool,
}

/// Validated, immutable run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RaceConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub stream_token: Option<String>,
    pub keypair_path: PathBuf,
    pub payload_templates: PathBuf,
    pub target_program: Pubkey,
    pub target_kind: InstructionKind,
    pub target_id: Option<String>,
    pub amount_a: u64,
    pub amount_b: u64,
    pub compute_budget: ComputeBudget,
    pub commitment: CommitmentConfig,
    pub anchor_refresh: Duration,
    pub max_monitoring: Option<Duration>,
    pub submit: SubmitPolicy,
    pub skip_claim: bool,
}

impl RaceConfig {
    /// Defaults for everything but the target program
    pub fn new(target_program: Pubkey) -> Self {
        Self {
            rpc_url: String::new(),
            ws_url: String::new(),
            stream_token: None,
            keypair_path: PathBuf::new(),
            payload_templates: PathBuf::new(),
            target_program,
            target_kind: InstructionKind::CompleteLaunch,
            target_id: None,
            amount_a: 0,
            amount_b: 0,
            compute_budget: ComputeBudget::default(),
            commitment: CommitmentConfig::confirmed(),
            anchor_refresh: Duration::from_millis(2_000),
            max_monitoring: None,
            submit: SubmitPolicy::default(),
            skip_claim: false,
        }
    }

    /// Construction parameters for a payer
    pub fn construction_params(&self, payer: Pubkey) -> ConstructionParams {
        ConstructionParams {
            payer,
            target_program: self.target_program,
            target_id: self
                .target_id
                .as_deref()
                .and_then(|id| Pubkey::from_str(id).ok()),
            amount_a: self.amount_a,
            amount_b: self.amount_b,
        }
    }
}

fn required(value: &str, name: &str) -> Result<String, RaceError> {
    let value = value.trim();
    if value.is_empty() {
        Err(RaceError::Configuration(format!("{} is required", name)))
    } else {
        Ok(value.to_string())
    }
}

pub fn parse_commitment(value: &str) -> Result<CommitmentConfig, RaceError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "processed" => Ok(CommitmentConfig::processed()),
        "confirmed" => Ok(CommitmentConfig::confirmed()),
        "finalized" => Ok(CommitmentConfig::finalized()),
        other => Err(RaceError::Configuration(format!(
            "COMMITMENT must be processed, confirmed or finalized (got '{}')",
            other
        ))),
    }
}

impl Config {
    pub fn validate(&self) -> Result<RaceConfig, RaceError> {
        let rpc_url = required(&self.rpc_url, "RPC_URL")?;
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            return Err(RaceError::Configuration(format!(
                "RPC_URL must be an http(s) URL (got '{}')",
                rpc_url
            )));
        }
        let ws_url = required(&self.ws_url, "WS_URL")?;
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(RaceError::Configuration(format!(
                "WS_URL must be a ws(s) URL (got '{}')",
                ws_url
            )));
        }
        let keypair_path = PathBuf::from(required(&self.keypair_path, "KEYPAIR_PATH")?);
        let payload_templates =
            PathBuf::from(required(&self.payload_templates, "PAYLOAD_TEMPLATES")?);

        let target_program = Pubkey::from_str(&required(&self.target_program, "TARGET_PROGRAM")?)
            .map_err(|e| RaceError::Configuration(format!("TARGET_PROGRAM: {}", e)))?;
        let target_kind = InstructionKind::from_str(&self.target_kind)
            .map_err(|e| RaceError::Configuration(format!("TARGET_KIND: {}", e)))?;
        if target_kind == InstructionKind::Unknown {
            return Err(RaceError::Configuration(
                "TARGET_KIND cannot be Unknown".to_string(),
            ));
        }
        let target_id = match self.target_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(id) => {
                Pubkey::from_str(id)
                    .map_err(|e| RaceError::Configuration(format!("TARGET_ID: {}", e)))?;
                Some(id.to_string())
            }
        };

        if self.amount_a == 0 || self.amount_b == 0 {
            return Err(RaceError::Configuration(
                "AMOUNT_A and AMOUNT_B must both be greater than zero".to_string(),
            ));
        }
        if self.staleness_ms == 0 {
            return Err(RaceError::Configuration(
                "STALENESS_MS must be greater than zero".to_string(),
            ));
        }
        if self.anchor_refresh_ms == 0 {
            return Err(RaceError::Configuration(
                "ANCHOR_REFRESH_MS must be greater than zero".to_string(),
            ));
        }

        Ok(RaceConfig {
            rpc_url,
            ws_url,
            stream_token: self
                .stream_token
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            keypair_path,
            payload_templates,
            target_program,
            target_kind,
            target_id,
            amount_a: self.amount_a,
            amount_b: self.amount_b,
            compute_budget: ComputeBudget {
                unit_limit: self.compute_unit_limit,
                unit_price_micro_lamports: self.priority_fee_microlamports,
            },
            commitment: parse_commitment(&self.commitment)?,
            anchor_refresh: Duration::from_millis(self.anchor_refresh_ms),
            max_monitoring: (self.max_monitoring_secs > 0)
                .then(|| Duration::from_secs(self.max_monitoring_secs)),
            submit: SubmitPolicy {
                staleness_bound: Duration::from_millis(self.staleness_ms),
                claim_retries: self.claim_retries,
                confirm_timeout: Duration::from_secs(self.confirm_timeout_secs),
                ..SubmitPolicy::default()
            },
            skip_claim: self.skip_claim,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: Config,
    }

    const PROGRAM: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";

    fn base() -> Config {
        Config {
            rpc_url: "https://api.devnet.solana.com".into(),
            ws_url: "wss://api.devnet.solana.com".into(),
            keypair_path: "/tmp/id.json".into(),
            target_program: PROGRAM.into(),
            target_kind: "CompleteLaunch".into(),
            payload_templates: "templates.toml".into(),
            amount_a: 1_000,
            amount_b: 2_000,
            staleness_ms: 5_000,
            anchor_refresh_ms: 2_000,
            claim_retries: 3,
            commitment: "confirmed".into(),
            confirm_timeout_secs: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from([
            "racer",
            "--rpc-url",
            "https://api.devnet.solana.com",
            "--amount-a",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.config.target_kind, "CompleteLaunch");
        assert_eq!(cli.config.staleness_ms, 5_000);
        assert_eq!(cli.config.anchor_refresh_ms, 2_000);
        assert_eq!(cli.config.claim_retries, 3);
        assert_eq!(cli.config.commitment, "confirmed");
        assert_eq!(cli.config.amount_a, 5);
        assert!(!cli.config.skip_claim);
    }

    #[test]
    fn test_validate_ok() {
        let race = base().validate().unwrap();
        assert_eq!(race.target_program.to_string(), PROGRAM);
        assert_eq!(race.target_kind, InstructionKind::CompleteLaunch);
        assert_eq!(race.submit.staleness_bound, Duration::from_secs(5));
        assert_eq!(race.max_monitoring, None);
        assert_eq!(race.stream_token, None);
    }

    #[test]
    fn test_validate_max_monitoring() {
        let mut config = base();
        config.max_monitoring_secs = 90;
        assert_eq!(
            config.validate().unwrap().max_monitoring,
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn test_validate_rejects_missing_and_invalid() {
        let cases: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c| c.rpc_url.clear()),
            Box::new(|c| c.rpc_url = "ftp://x".into()),
            Box::new(|c| c.ws_url.clear()),
            Box::new(|c| c.ws_url = "https://not-a-socket".into()),
            Box::new(|c| c.target_program = "not-a-key".into()),
            Box::new(|c| c.target_kind = "Launchpad".into()),
            Box::new(|c| c.target_kind = "unknown".into()),
            Box::new(|c| c.target_id = Some("0OIl".into())),
            Box::new(|c| c.amount_b = 0),
            Box::new(|c| c.commitment = "max".into()),
            Box::new(|c| c.keypair_path.clear()),
            Box::new(|c| c.staleness_ms = 0),
        ];
        for mutate in cases {
            let mut config = base();
            mutate(&mut config);
            assert!(matches!(
                config.validate(),
                Err(RaceError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_construction_params() {
        let mut config = base();
        config.target_id = Some(PROGRAM.into());
        let race = config.validate().unwrap();
        let payer = Pubkey::new_unique();
        let params = race.construction_params(payer);
        assert_eq!(params.payer, payer);
        assert_eq!(params.target_id.map(|k| k.to_string()).as_deref(), Some(PROGRAM));
        assert_eq!(params.amount_b, 2_000);
    }
}
