use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::{
    gateway::{Contract, ContractCall, SessionError},
    loan::{LoanId, LoanStatus},
};

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction {transaction} was rejected: {reason}")]
    TransactionRejected { transaction: String, reason: String },
    #[error("Transaction {transaction} was not committed within {waited:?}")]
    TransactionTimeout {
        transaction: String,
        waited: Duration,
    },
    #[error("Query {transaction} failed: {reason}")]
    QueryError { transaction: String, reason: String },
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TransactionError {
    /// The network gave up waiting, the transaction may still have been
    /// committed.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, TransactionError::TransactionTimeout { .. })
    }
}

impl Contract<'_> {
    /// Sends a state-changing transaction and blocks until it is committed
    /// or rejected. Never retried here: resubmitting a transaction that is
    /// not idempotent could apply it twice.
    pub fn submit_transaction(
        &self,
        transaction: &str,
        args: &[String],
    ) -> Result<Vec<u8>, TransactionError> {
        debug!(
            channel = %self.channel,
            contract = %self.name,
            transaction,
            ?args,
            "submit"
        );
        self.session.connection()?.submit(self.call(transaction, args))
    }

    /// Read-only query against one peer. The answer may lag commits made
    /// by other clients.
    pub fn evaluate_transaction(
        &self,
        transaction: &str,
        args: &[String],
    ) -> Result<Vec<u8>, TransactionError> {
        debug!(
            channel = %self.channel,
            contract = %self.name,
            transaction,
            ?args,
            "evaluate"
        );
        self.session.connection()?.evaluate(self.call(transaction, args))
    }

    /// Submits or evaluates `tx` depending on whether it writes.
    pub fn invoke(&self, tx: &LoanTransaction) -> Result<Vec<u8>, TransactionError> {
        let args = tx.args();
        if tx.is_read_only() {
            self.evaluate_transaction(tx.name(), &args)
        } else {
            self.submit_transaction(tx.name(), &args)
        }
    }

    fn call<'a>(&'a self, transaction: &'a str, args: &'a [String]) -> ContractCall<'a> {
        ContractCall {
            channel: &self.channel,
            contract: &self.name,
            transaction,
            args,
        }
    }
}

/// Functions exposed by the loan contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanTransaction {
    ApplyForLoan {
        loan_id: LoanId,
        applicant_name: String,
        amount: Decimal,
        term_months: u32,
        interest_rate: Decimal,
    },
    ApproveLoan {
        loan_id: LoanId,
        status: LoanStatus,
    },
    MakeRepayment {
        loan_id: LoanId,
        amount: Decimal,
    },
    CheckLoanBalance {
        loan_id: LoanId,
    },
}

impl LoanTransaction {
    pub const APPLY_FOR_LOAN: &'static str = "ApplyForLoan";
    pub const APPROVE_LOAN: &'static str = "ApproveLoan";
    pub const MAKE_REPAYMENT: &'static str = "MakeRepayment";
    pub const CHECK_LOAN_BALANCE: &'static str = "CheckLoanBalance";

    pub fn name(&self) -> &'static str {
        match self {
            LoanTransaction::ApplyForLoan { .. } => Self::APPLY_FOR_LOAN,
            LoanTransaction::ApproveLoan { .. } => Self::APPROVE_LOAN,
            LoanTransaction::MakeRepayment { .. } => Self::MAKE_REPAYMENT,
            LoanTransaction::CheckLoanBalance { .. } => Self::CHECK_LOAN_BALANCE,
        }
    }

    pub fn loan_id(&self) -> &str {
        match self {
            LoanTransaction::ApplyForLoan { loan_id, .. }
            | LoanTransaction::ApproveLoan { loan_id, .. }
            | LoanTransaction::MakeRepayment { loan_id, .. }
            | LoanTransaction::CheckLoanBalance { loan_id } => loan_id,
        }
    }

    /// Contract arguments, all passed as strings.
    pub fn args(&self) -> Vec<String> {
        match self {
            LoanTransaction::ApplyForLoan {
                loan_id,
                applicant_name,
                amount,
                term_months,
                interest_rate,
            } => vec![
                loan_id.clone(),
                applicant_name.clone(),
                amount.to_string(),
                term_months.to_string(),
                interest_rate.to_string(),
            ],
            LoanTransaction::ApproveLoan { loan_id, status } => {
                vec![loan_id.clone(), status.to_string()]
            }
            LoanTransaction::MakeRepayment { loan_id, amount } => {
                vec![loan_id.clone(), amount.to_string()]
            }
            LoanTransaction::CheckLoanBalance { loan_id } => vec![loan_id.clone()],
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, LoanTransaction::CheckLoanBalance { .. })
    }
}
