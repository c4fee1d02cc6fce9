//! Payload construction and pre-building
//!
//! Payloads are built in two phases:
//! - **build time** (before or right after the trigger): a `PayloadConstructor`
//!   returns program instructions plus any freshly generated signers, and the
//!   `Prebuilder` wraps them with compute budget instructions into a
//!   `PreparedPayload` that is cached for the run.
//! - **submit time**: the executor stamps the freshest anchor and signs.
//!
//! A prepared payload never embeds an anchor, so it stays valid for the
//! whole run. Generated signers (e.g. the one-time position keypair) are kept
//! alongside the instructions because the addresses derived from them are
//! already baked into the instruction accounts.
//!
//! ## Modules
//! - **errors**: construction error taxonomy
//! - **instructions**: compute budget planning
//! - **prebuild**: `Prebuilder` and the write-once `PayloadCache`
//! - **templates**: TOML instruction-template constructor
//! - **deposit**: proportional deposit math for the fallback path

pub mod deposit;
pub mod errors;
pub mod instructions;
pub mod prebuild;
pub mod templates;

pub use deposit::{proportional_deposit, Deposit};
pub use errors::TransactionBuilderError;
pub use instructions::{plan_instructions, ComputeBudget};
pub use prebuild::{PayloadCache, PreparedSet, Prebuilder};
pub use templates::TemplateConstructor;

use crate::types::PayloadKind;
use async_trait::async_trait;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signature::Keypair};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Logical name of the resource (pool) account
pub const RESOURCE_ACCOUNT: &str = "resourceAccount";
/// Logical name of the generated position account
pub const RESOURCE_POSITION: &str = "resourcePosition";
/// Logical names of the resource's token reserves
pub const RESERVE_A: &str = "reserveA";
pub const RESERVE_B: &str = "reserveB";

/// Parameters handed to the construction logic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructionParams {
    /// Fee payer and owner of the claimed/deposited funds
    pub payer: Pubkey,
    /// Program whose instructions are being raced
    pub target_program: Pubkey,
    /// Launch instance the run is correlated with, when known
    pub target_id: Option<Pubkey>,
    /// Maximum amount of token A committed to the resource
    pub amount_a: u64,
    /// Maximum amount of token B committed to the resource
    pub amount_b: u64,
}

/// Raw output of the construction logic
#[derive(Default)]
pub struct ConstructedPayload {
    pub instructions: Vec<Instruction>,
    /// Signers generated during construction, besides the payer
    pub signers: Vec<Keypair>,
    pub derived_addresses: BTreeMap<String, Pubkey>,
}

/// External construction logic (instruction encoding, pool math)
#[async_trait]
pub trait PayloadConstructor: Send + Sync {
    async fn build_claim(
        &self,
        params: &ConstructionParams,
    ) -> Result<ConstructedPayload, TransactionBuilderError>;

    async fn build_create_resource(
        &self,
        params: &ConstructionParams,
    ) -> Result<ConstructedPayload, TransactionBuilderError>;

    /// Deposit into the resource described by `existing` (the addresses the
    /// create payload derived).
    async fn build_add_to_existing(
        &self,
        params: &ConstructionParams,
        deposit: &Deposit,
        existing: &BTreeMap<String, Pubkey>,
    ) -> Result<ConstructedPayload, TransactionBuilderError>;
}

/// Unsigned, anchor-free payload ready for submission
#[derive(Clone)]
pub struct PreparedPayload {
    pub kind: PayloadKind,
    pub instructions: Vec<Instruction>,
    /// Signers required besides the payer, in order
    pub required_signers: Vec<Arc<Keypair>>,
    pub derived_addresses: BTreeMap<String, Pubkey>,
}

impl PreparedPayload {
    pub fn address(&self, name: &str) -> Option<Pubkey> {
        self.derived_addresses.get(name).copied()
    }
}

impl fmt::Debug for ConstructedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructedPayload")
            .field("instructions", &self.instructions.len())
            .field("signers", &self.signers.len())
            .field("derived_addresses", &self.derived_addresses)
            .finish()
    }
}

impl fmt::Debug for PreparedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedPayload")
            .field("kind", &self.kind)
            .field("instructions", &self.instructions.len())
            .field("required_signers", &self.required_signers.len())
            .field("derived_addresses", &self.derived_addresses)
            .finish()
    }
}
