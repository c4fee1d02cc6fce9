//! Pre-building and the write-once payload cache

use super::{
    plan_instructions, ComputeBudget, ConstructedPayload, ConstructionParams, Deposit,
    PayloadConstructor, PreparedPayload, TransactionBuilderError,
};
use crate::types::PayloadKind;
use solana_sdk::pubkey::Pubkey;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// The two payloads prepared ahead of the trigger
#[derive(Debug, Clone)]
pub struct PreparedSet {
    pub claim: PreparedPayload,
    pub create: PreparedPayload,
}

/// Wraps constructor output into prepared payloads
pub struct Prebuilder {
    constructor: Arc<dyn PayloadConstructor>,
    budget: ComputeBudget,
}

impl Prebuilder {
    pub fn new(constructor: Arc<dyn PayloadConstructor>, budget: ComputeBudget) -> Self {
        Self {
            constructor,
            budget,
        }
    }

    /// Build claim and create-resource payloads. Both must succeed.
    pub async fn prebuild(
        &self,
        params: &ConstructionParams,
    ) -> Result<PreparedSet, TransactionBuilderError> {
        let (claim, create) = tokio::join!(
            self.constructor.build_claim(params),
            self.constructor.build_create_resource(params),
        );
        let claim = self.prepare(PayloadKind::Claim, claim?)?;
        let create = self.prepare(PayloadKind::CreateResource, create?)?;
        info!(
            claim_ixs = claim.instructions.len(),
            create_ixs = create.instructions.len(),
            addresses = ?create.derived_addresses,
            "Payloads pre-built"
        );
        Ok(PreparedSet { claim, create })
    }

    /// Just-in-time build of the add-to-existing fallback
    pub async fn build_fallback(
        &self,
        params: &ConstructionParams,
        deposit: &Deposit,
        existing: &BTreeMap<String, Pubkey>,
    ) -> Result<PreparedPayload, TransactionBuilderError> {
        let constructed = self
            .constructor
            .build_add_to_existing(params, deposit, existing)
            .await?;
        self.prepare(PayloadKind::AddToExistingResource, constructed)
    }

    fn prepare(
        &self,
        kind: PayloadKind,
        constructed: ConstructedPayload,
    ) -> Result<PreparedPayload, TransactionBuilderError> {
        let instructions = plan_instructions(self.budget, constructed.instructions)?;
        debug!(%kind, signers = constructed.signers.len(), "Prepared payload");
        Ok(PreparedPayload {
            kind,
            instructions,
            required_signers: constructed.signers.into_iter().map(Arc::new).collect(),
            derived_addresses: constructed.derived_addresses,
        })
    }
}

/// Written once per run, read-only afterwards
#[derive(Debug, Default)]
pub struct PayloadCache {
    slot: OnceLock<Arc<PreparedSet>>,
}

impl PayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the prepared set. Returns the set that ends up cached, which
    /// is the earlier one if the cache was already filled.
    pub fn store(&self, set: PreparedSet) -> Arc<PreparedSet> {
        Arc::clone(self.slot.get_or_init(|| Arc::new(set)))
    }

    pub fn get(&self) -> Option<Arc<PreparedSet>> {
        self.slot.get().cloned()
    }
}
