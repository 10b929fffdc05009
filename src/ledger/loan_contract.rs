use std::{collections::HashMap, str::FromStr};

use rust_decimal::{Decimal, prelude::Zero};
use thiserror::Error;

use crate::{
    loan::{CodecError, Loan, LoanId, LoanStatus},
    transaction::LoanTransaction,
};

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Function {0} is not defined by the loan contract")]
    UnknownFunction(String),
    #[error("{function} expects {expected} arguments, got {got}")]
    ArgumentCount {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("Invalid {field} `{value}`")]
    InvalidArgument { field: &'static str, value: String },
    #[error("Loan {loan_id} already exists")]
    LoanExists { loan_id: LoanId },
    #[error("Loan {loan_id} does not exist")]
    LoanNotFound { loan_id: LoanId },
    #[error("{field} must be positive")]
    NonPositiveAmount { field: &'static str },
    #[error("Loan {loan_id} cannot move from {from} to {to}")]
    InvalidTransition {
        loan_id: LoanId,
        from: LoanStatus,
        to: LoanStatus,
    },
    #[error("Loan {loan_id} is {status}, repayments are not accepted")]
    NotRepayable { loan_id: LoanId, status: LoanStatus },
    #[error("Repayment {amount} exceeds outstanding balance {outstanding}")]
    Overpayment {
        amount: Decimal,
        outstanding: Decimal,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanEvent {
    Applied(Loan),
    StatusChanged { loan_id: LoanId, status: LoanStatus },
    Repaid { loan_id: LoanId, amount: Decimal },
}

/// Result of running a function: what the caller gets back and the write,
/// if any, to commit.
#[derive(Debug)]
pub struct Execution {
    pub response: Vec<u8>,
    pub event: Option<LoanEvent>,
}

/// World state of the loan contract. Functions are validated against the
/// current state and produce events; only committed events change state.
#[derive(Debug, Default, Clone)]
pub struct LoanContract {
    loans: HashMap<LoanId, Loan>,
}

impl LoanContract {
    pub fn loan(&self, loan_id: &str) -> Option<&Loan> {
        self.loans.get(loan_id)
    }

    pub fn execute(&self, function: &str, args: &[String]) -> Result<Execution, ContractError> {
        let tx = parse_transaction(function, args)?;
        self.handle(&tx)
    }

    pub fn apply(&mut self, event: &LoanEvent) {
        match event {
            LoanEvent::Applied(loan) => {
                self.loans.insert(loan.loan_id.clone(), loan.clone());
            }
            LoanEvent::StatusChanged { loan_id, status } => {
                if let Some(loan) = self.loans.get_mut(loan_id) {
                    loan.status = *status;
                }
            }
            LoanEvent::Repaid { loan_id, amount } => {
                if let Some(loan) = self.loans.get_mut(loan_id) {
                    loan.outstanding -= *amount;
                    loan.repayments.push(*amount);
                    loan.status = if loan.outstanding.is_zero() {
                        LoanStatus::Closed
                    } else {
                        LoanStatus::Repaying
                    };
                }
            }
        }
    }

    pub fn handle(&self, tx: &LoanTransaction) -> Result<Execution, ContractError> {
        match tx {
            LoanTransaction::ApplyForLoan {
                loan_id,
                applicant_name,
                amount,
                term_months,
                interest_rate,
            } => {
                if self.loans.contains_key(loan_id) {
                    return Err(ContractError::LoanExists {
                        loan_id: loan_id.clone(),
                    });
                }
                if *amount <= Decimal::zero() {
                    return Err(ContractError::NonPositiveAmount { field: "amount" });
                }
                if *term_months == 0 {
                    return Err(ContractError::NonPositiveAmount {
                        field: "termMonths",
                    });
                }
                Ok(Execution::write(LoanEvent::Applied(Loan {
                    loan_id: loan_id.clone(),
                    applicant_name: applicant_name.clone(),
                    principal: *amount,
                    term_months: *term_months,
                    interest_rate: *interest_rate,
                    outstanding: *amount,
                    status: LoanStatus::Applied,
                    repayments: Vec::new(),
                })))
            }
            LoanTransaction::ApproveLoan { loan_id, status } => {
                let loan = self.existing(loan_id)?;
                let allowed = loan.status == LoanStatus::Applied
                    && matches!(status, LoanStatus::Approved | LoanStatus::Rejected);
                if !allowed {
                    return Err(ContractError::InvalidTransition {
                        loan_id: loan_id.clone(),
                        from: loan.status,
                        to: *status,
                    });
                }
                Ok(Execution::write(LoanEvent::StatusChanged {
                    loan_id: loan_id.clone(),
                    status: *status,
                }))
            }
            LoanTransaction::MakeRepayment { loan_id, amount } => {
                let loan = self.existing(loan_id)?;
                if !matches!(loan.status, LoanStatus::Approved | LoanStatus::Repaying) {
                    return Err(ContractError::NotRepayable {
                        loan_id: loan_id.clone(),
                        status: loan.status,
                    });
                }
                if *amount <= Decimal::zero() {
                    return Err(ContractError::NonPositiveAmount { field: "amount" });
                }
                if *amount > loan.outstanding {
                    return Err(ContractError::Overpayment {
                        amount: *amount,
                        outstanding: loan.outstanding,
                    });
                }
                Ok(Execution::write(LoanEvent::Repaid {
                    loan_id: loan_id.clone(),
                    amount: *amount,
                }))
            }
            LoanTransaction::CheckLoanBalance { loan_id } => Ok(Execution {
                response: self.existing(loan_id)?.encode()?,
                event: None,
            }),
        }
    }

    fn existing(&self, loan_id: &str) -> Result<&Loan, ContractError> {
        self.loans
            .get(loan_id)
            .ok_or_else(|| ContractError::LoanNotFound {
                loan_id: loan_id.to_string(),
            })
    }
}

impl Execution {
    fn write(event: LoanEvent) -> Self {
        Self {
            response: Vec::new(),
            event: Some(event),
        }
    }
}

/// Decodes the string arguments a client sends into a typed call.
pub fn parse_transaction(
    function: &str,
    args: &[String],
) -> Result<LoanTransaction, ContractError> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ContractError::ArgumentCount {
                function: function.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    match function {
        LoanTransaction::APPLY_FOR_LOAN => {
            arity(5)?;
            Ok(LoanTransaction::ApplyForLoan {
                loan_id: args[0].clone(),
                applicant_name: args[1].clone(),
                amount: parse_arg("amount", &args[2])?,
                term_months: parse_arg("termMonths", &args[3])?,
                interest_rate: parse_arg("interestRate", &args[4])?,
            })
        }
        LoanTransaction::APPROVE_LOAN => {
            arity(2)?;
            Ok(LoanTransaction::ApproveLoan {
                loan_id: args[0].clone(),
                status: parse_arg("status", &args[1])?,
            })
        }
        LoanTransaction::MAKE_REPAYMENT => {
            arity(2)?;
            Ok(LoanTransaction::MakeRepayment {
                loan_id: args[0].clone(),
                amount: parse_arg("amount", &args[1])?,
            })
        }
        LoanTransaction::CHECK_LOAN_BALANCE => {
            arity(1)?;
            Ok(LoanTransaction::CheckLoanBalance {
                loan_id: args[0].clone(),
            })
        }
        other => Err(ContractError::UnknownFunction(other.to_string())),
    }
}

fn parse_arg<T: FromStr>(field: &'static str, value: &str) -> Result<T, ContractError> {
    value.parse().map_err(|_| ContractError::InvalidArgument {
        field,
        value: value.to_string(),
    })
}
