pub mod in_memory_ledger;
pub mod loan_contract;
