//! Instruction planning
//!
//! Every prepared payload is laid out as:
//! 1. Compute budget instructions (CU limit, priority fee)
//! 2. Program instructions from the constructor

use crate::tx_builder::errors::TransactionBuilderError;
use solana_sdk::{compute_budget::ComputeBudgetInstruction, instruction::Instruction};

/// Compute budget applied to every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComputeBudget {
    /// Compute unit limit (0 = skip this instruction)
    pub unit_limit: u32,
    /// Priority fee in micro-lamports per CU (0 = skip this instruction)
    pub unit_price_micro_lamports: u64,
}

/// Prepend compute budget instructions to the program instructions.
///
/// # Errors
///
/// Returns `TransactionBuilderError::Configuration` if there are no program
/// instructions or one of them carries no accounts.
pub fn plan_instructions(
    budget: ComputeBudget,
    program_ixs: Vec<Instruction>,
) -> Result<Vec<Instruction>, TransactionBuilderError> {
    if program_ixs.is_empty() {
        return Err(TransactionBuilderError::Configuration(
            "Payload has no program instructions".to_string(),
        ));
    }
    if let Some(ix) = program_ixs.iter().find(|ix| ix.accounts.is_empty()) {
        return Err(TransactionBuilderError::instruction_failed(
            ix.program_id.to_string(),
            "instruction has no accounts",
        ));
    }

    // Maximum: compute_budget (2) + program instructions
    let mut instructions = Vec::with_capacity(program_ixs.len() + 2);
    if budget.unit_limit > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(
            budget.unit_limit,
        ));
    }
    if budget.unit_price_micro_lamports > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
            budget.unit_price_micro_lamports,
        ));
    }
    instructions.extend(program_ixs);
    Ok(instructions)
}
