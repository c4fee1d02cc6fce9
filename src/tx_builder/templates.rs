//! Instruction-template payload constructor
//!
//! Payload layouts are described in TOML rather than compiled in, so one
//! binary can race any launch program whose account layout is known:
//!
//! ```toml
//! program = "<base58 program id>"     # optional, defaults to the target program
//!
//! [[derive]]
//! name = "resourceAccount"
//! seeds = ["pool", "$target"]
//!
//! [claim]
//! discriminator = "<base58 bytes>"
//! args = ["$amount_a"]
//! accounts = [
//!     { key = "$payer", signer = true, writable = true },
//!     { key = "$target", writable = true },
//! ]
//!
//! [create_resource]
//! # ...
//! [add_to_existing_resource]
//! # ...
//! ```
//!
//! Placeholders: `$payer`, `$program`, `$system`, `$target`, `$position`
//! (one-time keypair generated per build) and the name of any `[[derive]]`
//! entry. Anything else must be a literal base58 address. Args are u64
//! literals or `$amount_a`/`$amount_b`, encoded little-endian after the
//! discriminator.

use super::{
    ConstructedPayload, ConstructionParams, Deposit, PayloadConstructor, TransactionBuilderError,
    RESOURCE_POSITION,
};
use crate::types::PayloadKind;
use async_trait::async_trait;
use serde::Deserialize;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::{Pubkey, MAX_SEEDS, MAX_SEED_LEN};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk_ids::system_program;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const BUILTINS: &[&str] = &["payer", "program", "system", "target", "position"];

#[derive(Debug, Clone, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    program: Option<String>,
    #[serde(default, rename = "derive")]
    derives: Vec<DeriveSpec>,
    claim: InstructionTemplate,
    create_resource: InstructionTemplate,
    add_to_existing_resource: InstructionTemplate,
}

#[derive(Debug, Clone, Deserialize)]
struct DeriveSpec {
    name: String,
    #[serde(default)]
    program: Option<String>,
    seeds: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct InstructionTemplate {
    #[serde(default)]
    program: Option<String>,
    discriminator: String,
    #[serde(default)]
    args: Vec<String>,
    accounts: Vec<AccountTemplate>,
}

#[derive(Debug, Clone, Deserialize)]
struct AccountTemplate {
    key: String,
    #[serde(default)]
    signer: bool,
    #[serde(default)]
    writable: bool,
}

impl InstructionTemplate {
    fn signs_with_position(&self) -> bool {
        self.accounts
            .iter()
            .any(|a| a.signer && a.key == "$position")
    }
}

/// `PayloadConstructor` driven by TOML instruction templates
#[derive(Debug, Clone)]
pub struct TemplateConstructor {
    file: TemplateFile,
}

impl TemplateConstructor {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TransactionBuilderError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransactionBuilderError::Configuration(format!(
                "cannot read templates {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TransactionBuilderError> {
        let file: TemplateFile = toml::from_str(content)
            .map_err(|e| TransactionBuilderError::template(e.to_string()))?;
        let constructor = Self { file };
        constructor.validate()?;
        Ok(constructor)
    }

    /// Check every placeholder, address and discriminator up front
    fn validate(&self) -> Result<(), TransactionBuilderError> {
        let mut known: HashSet<&str> = BUILTINS.iter().copied().collect();

        if let Some(program) = &self.file.program {
            check_token(program, &known)?;
        }
        for derive in &self.file.derives {
            if BUILTINS.contains(&derive.name.as_str()) {
                return Err(TransactionBuilderError::template(format!(
                    "derive name '{}' shadows a builtin",
                    derive.name
                )));
            }
            if derive.seeds.len() > MAX_SEEDS {
                return Err(TransactionBuilderError::template(format!(
                    "derive '{}' has {} seeds (max {})",
                    derive.name,
                    derive.seeds.len(),
                    MAX_SEEDS
                )));
            }
            if let Some(program) = &derive.program {
                check_token(program, &known)?;
            }
            for seed in &derive.seeds {
                match seed.strip_prefix('$') {
                    Some(_) => check_token(seed, &known)?,
                    None if seed.len() > MAX_SEED_LEN => {
                        return Err(TransactionBuilderError::template(format!(
                            "seed '{}' exceeds {} bytes",
                            seed, MAX_SEED_LEN
                        )))
                    }
                    None => {}
                }
            }
            known.insert(derive.name.as_str());
        }

        for (label, template) in [
            ("claim", &self.file.claim),
            ("create_resource", &self.file.create_resource),
            ("add_to_existing_resource", &self.file.add_to_existing_resource),
        ] {
            if let Some(program) = &template.program {
                check_token(program, &known)?;
            }
            bs58::decode(&template.discriminator)
                .into_vec()
                .map_err(|e| {
                    TransactionBuilderError::template(format!("{} discriminator: {}", label, e))
                })?;
            for arg in &template.args {
                if !matches!(arg.as_str(), "$amount_a" | "$amount_b") && arg.parse::<u64>().is_err()
                {
                    return Err(TransactionBuilderError::template(format!(
                        "{} arg '{}' is not a u64 or amount placeholder",
                        label, arg
                    )));
                }
            }
            if template.accounts.is_empty() {
                return Err(TransactionBuilderError::template(format!(
                    "{} has no accounts",
                    label
                )));
            }
            for account in &template.accounts {
                check_token(&account.key, &known)?;
            }
        }
        Ok(())
    }

    fn template(&self, kind: PayloadKind) -> &InstructionTemplate {
        match kind {
            PayloadKind::Claim => &self.file.claim,
            PayloadKind::CreateResource => &self.file.create_resource,
            PayloadKind::AddToExistingResource => &self.file.add_to_existing_resource,
        }
    }

    fn build(
        &self,
        kind: PayloadKind,
        params: &ConstructionParams,
        amounts: (u64, u64),
        existing: Option<&BTreeMap<String, Pubkey>>,
    ) -> Result<ConstructedPayload, TransactionBuilderError> {
        let template = self.template(kind);
        let position = template.signs_with_position().then(Keypair::new);

        let mut bindings = Bindings::default();
        bindings.insert("payer", params.payer);
        bindings.insert("system", system_program::id());
        let program = match &self.file.program {
            Some(token) => {
                bindings.insert("program", params.target_program);
                bindings.resolve(token)?
            }
            None => params.target_program,
        };
        bindings.insert("program", program);
        if let Some(target) = params.target_id {
            bindings.insert("target", target);
        }
        if let Some(position) = &position {
            bindings.insert("position", position.pubkey());
        }

        let mut derived = BTreeMap::new();
        for derive in &self.file.derives {
            let derive_program = match &derive.program {
                Some(token) => bindings.resolve(token)?,
                None => program,
            };
            let seeds = derive
                .seeds
                .iter()
                .map(|seed| match seed.strip_prefix('$') {
                    Some(_) => bindings.resolve(seed).map(|key| key.to_bytes().to_vec()),
                    None => Ok(seed.as_bytes().to_vec()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let seed_refs: Vec<&[u8]> = seeds.iter().map(Vec::as_slice).collect();
            let (address, _bump) = Pubkey::find_program_address(&seed_refs, &derive_program);
            bindings.insert(&derive.name, address);
            derived.insert(derive.name.clone(), address);
        }

        // On-chain addresses of an existing resource take precedence
        if let Some(existing) = existing {
            for (name, address) in existing {
                if name != RESOURCE_POSITION {
                    bindings.insert(name, *address);
                    derived.insert(name.clone(), *address);
                }
            }
        }
        if let Some(position) = &position {
            derived.insert(RESOURCE_POSITION.to_string(), position.pubkey());
        }

        let ix_program = match &template.program {
            Some(token) => bindings.resolve(token)?,
            None => program,
        };

        let mut data = bs58::decode(&template.discriminator)
            .into_vec()
            .map_err(|e| TransactionBuilderError::template(e.to_string()))?;
        for arg in &template.args {
            let value = match arg.as_str() {
                "$amount_a" => amounts.0,
                "$amount_b" => amounts.1,
                literal => literal.parse::<u64>().map_err(|_| {
                    TransactionBuilderError::template(format!("bad arg '{}'", literal))
                })?,
            };
            data.extend_from_slice(&value.to_le_bytes());
        }

        let accounts = template
            .accounts
            .iter()
            .map(|account| {
                let key = bindings.resolve(&account.key)?;
                Ok(if account.writable {
                    AccountMeta::new(key, account.signer)
                } else {
                    AccountMeta::new_readonly(key, account.signer)
                })
            })
            .collect::<Result<Vec<_>, TransactionBuilderError>>()?;

        debug!(%kind, program = %ix_program, accounts = accounts.len(), data_len = data.len(), "Built instruction from template");

        Ok(ConstructedPayload {
            instructions: vec![Instruction::new_with_bytes(ix_program, &data, accounts)],
            signers: position.into_iter().collect(),
            derived_addresses: derived,
        })
    }
}

fn check_token(token: &str, known: &HashSet<&str>) -> Result<(), TransactionBuilderError> {
    match token.strip_prefix('$') {
        Some(name) if known.contains(name) => Ok(()),
        Some(name) => Err(TransactionBuilderError::template(format!(
            "unknown placeholder ${}",
            name
        ))),
        None => Pubkey::from_str(token).map(|_| ()).map_err(|_| {
            TransactionBuilderError::template(format!("invalid address '{}'", token))
        }),
    }
}

#[derive(Default)]
struct Bindings(HashMap<String, Pubkey>);

impl Bindings {
    fn insert(&mut self, name: &str, key: Pubkey) {
        self.0.insert(name.to_string(), key);
    }

    fn resolve(&self, token: &str) -> Result<Pubkey, TransactionBuilderError> {
        match token.strip_prefix('$') {
            Some(name) => self
                .0
                .get(name)
                .copied()
                .ok_or_else(|| TransactionBuilderError::missing_address(name)),
            None => Pubkey::from_str(token).map_err(|_| {
                TransactionBuilderError::template(format!("invalid address '{}'", token))
            }),
        }
    }
}

#[async_trait]
impl PayloadConstructor for TemplateConstructor {
    async fn build_claim(
        &self,
        params: &ConstructionParams,
    ) -> Result<ConstructedPayload, TransactionBuilderError> {
        self.build(
            PayloadKind::Claim,
            params,
            (params.amount_a, params.amount_b),
            None,
        )
    }

    async fn build_create_resource(
        &self,
        params: &ConstructionParams,
    ) -> Result<ConstructedPayload, TransactionBuilderError> {
        if params.amount_a == 0 || params.amount_b == 0 {
            return Err(TransactionBuilderError::InvalidAmount(
                "resource creation needs non-zero amounts on both sides".to_string(),
            ));
        }
        self.build(
            PayloadKind::CreateResource,
            params,
            (params.amount_a, params.amount_b),
            None,
        )
    }

    async fn build_add_to_existing(
        &self,
        params: &ConstructionParams,
        deposit: &Deposit,
        existing: &BTreeMap<String, Pubkey>,
    ) -> Result<ConstructedPayload, TransactionBuilderError> {
        self.build(
            PayloadKind::AddToExistingResource,
            params,
            (deposit.amount_a, deposit.amount_b),
            Some(existing),
        )
    }
}
