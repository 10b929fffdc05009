use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    gateway::Contract,
    loan::{CodecError, Loan, LoanId, LoanStatus},
    transaction::{LoanTransaction, TransactionError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    ApplyForLoan,
    ApproveLoan,
    MakeRepayment,
    CheckLoanBalance,
    VerifyRecord,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlowStep::ApplyForLoan => "apply for loan",
            FlowStep::ApproveLoan => "approve loan",
            FlowStep::MakeRepayment => "make repayment for loan",
            FlowStep::CheckLoanBalance => "get loan balance",
            FlowStep::VerifyRecord => "verify loan record",
        })
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Ledger returned loan {found} instead of {expected}")]
    UnexpectedRecord { expected: LoanId, found: LoanId },
}

#[derive(Debug, Error)]
#[error("Failed to {step}: {source}")]
pub struct FlowError {
    pub step: FlowStep,
    #[source]
    pub source: StepError,
}

impl FlowError {
    fn new(step: FlowStep, source: impl Into<StepError>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

/// `Start → Applied → Approved → Repaid → Queried → Done`. The first
/// failure moves the flow to `Failed` and no further step runs.
#[derive(Debug)]
pub enum FlowState {
    Start,
    Applied,
    Approved,
    Repaid,
    Queried(Loan),
    Done(Loan),
    Failed(FlowError),
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Done(_) | FlowState::Failed(_))
    }

    /// Step that runs when leaving this state.
    pub fn next_step(&self) -> Option<FlowStep> {
        match self {
            FlowState::Start => Some(FlowStep::ApplyForLoan),
            FlowState::Applied => Some(FlowStep::ApproveLoan),
            FlowState::Approved => Some(FlowStep::MakeRepayment),
            FlowState::Repaid => Some(FlowStep::CheckLoanBalance),
            FlowState::Queried(_) => Some(FlowStep::VerifyRecord),
            FlowState::Done(_) | FlowState::Failed(_) => None,
        }
    }
}

/// What to do when a step's outcome is unknown: a submit that timed out,
/// or a query that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResubmitPolicy {
    /// Surface the error.
    Never,
    /// Query the ledger first and resubmit only if the step is not visible.
    PreCheck,
    /// Resubmit as is.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per step, including the first one.
    pub max_attempts: u32,
    pub apply: ResubmitPolicy,
    pub approve: ResubmitPolicy,
    pub repay: ResubmitPolicy,
    pub query: ResubmitPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            apply: ResubmitPolicy::PreCheck,
            approve: ResubmitPolicy::PreCheck,
            repay: ResubmitPolicy::Never,
            query: ResubmitPolicy::Always,
        }
    }
}

impl RetryPolicy {
    pub fn for_step(&self, step: FlowStep) -> ResubmitPolicy {
        match step {
            FlowStep::ApplyForLoan => self.apply,
            FlowStep::ApproveLoan => self.approve,
            FlowStep::MakeRepayment => self.repay,
            FlowStep::CheckLoanBalance => self.query,
            FlowStep::VerifyRecord => ResubmitPolicy::Never,
        }
    }
}

/// Loan to drive through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanPlan {
    pub loan_id: LoanId,
    pub applicant_name: String,
    pub amount: Decimal,
    pub term_months: u32,
    pub interest_rate: Decimal,
    pub repayment: Decimal,
}

impl Default for LoanPlan {
    fn default() -> Self {
        Self {
            loan_id: "loan1".to_string(),
            applicant_name: "John Doe".to_string(),
            amount: Decimal::from(5000),
            term_months: 12,
            interest_rate: Decimal::new(55, 1),
            repayment: Decimal::from(1000),
        }
    }
}

impl LoanPlan {
    pub fn transaction(&self, step: FlowStep) -> Option<LoanTransaction> {
        let loan_id = self.loan_id.clone();
        match step {
            FlowStep::ApplyForLoan => Some(LoanTransaction::ApplyForLoan {
                loan_id,
                applicant_name: self.applicant_name.clone(),
                amount: self.amount,
                term_months: self.term_months,
                interest_rate: self.interest_rate,
            }),
            FlowStep::ApproveLoan => Some(LoanTransaction::ApproveLoan {
                loan_id,
                status: LoanStatus::Approved,
            }),
            FlowStep::MakeRepayment => Some(LoanTransaction::MakeRepayment {
                loan_id,
                amount: self.repayment,
            }),
            FlowStep::CheckLoanBalance => Some(LoanTransaction::CheckLoanBalance { loan_id }),
            FlowStep::VerifyRecord => None,
        }
    }

    /// Whether `current` shows the effect of `step`. `baseline` is the
    /// record as it was before the step was first submitted.
    fn is_reflected(&self, step: FlowStep, baseline: Option<&Loan>, current: &Loan) -> bool {
        match step {
            FlowStep::ApplyForLoan => {
                baseline.is_none()
                    && current.applicant_name == self.applicant_name
                    && current.principal == self.amount
            }
            FlowStep::ApproveLoan => current.status.is_approved(),
            FlowStep::MakeRepayment => {
                current.repayments.len() > baseline.map_or(0, |loan| loan.repayments.len())
            }
            FlowStep::CheckLoanBalance | FlowStep::VerifyRecord => false,
        }
    }
}

/// Drives one loan through apply, approve, repay and balance query over a
/// single contract handle, strictly one transaction at a time.
#[derive(Debug)]
pub struct LoanFlow {
    plan: LoanPlan,
    policy: RetryPolicy,
    state: FlowState,
}

impl LoanFlow {
    pub fn new(plan: LoanPlan, policy: RetryPolicy) -> Self {
        Self {
            plan,
            policy,
            state: FlowState::Start,
        }
    }

    pub fn plan(&self) -> &LoanPlan {
        &self.plan
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn into_state(self) -> FlowState {
        self.state
    }

    /// Runs the next step. Terminal states are left as they are.
    pub fn step(&mut self, contract: &Contract<'_>) -> &FlowState {
        let state = std::mem::replace(&mut self.state, FlowState::Start);
        if state.is_terminal() {
            self.state = state;
            return &self.state;
        }
        self.state = match state {
            FlowState::Start => {
                self.advance(contract, FlowStep::ApplyForLoan, FlowState::Applied)
            }
            FlowState::Applied => {
                self.advance(contract, FlowStep::ApproveLoan, FlowState::Approved)
            }
            FlowState::Approved => {
                self.advance(contract, FlowStep::MakeRepayment, FlowState::Repaid)
            }
            FlowState::Repaid => match self.query(contract) {
                Ok(loan) => FlowState::Queried(loan),
                Err(err) => FlowState::Failed(err),
            },
            FlowState::Queried(loan) if loan.loan_id != self.plan.loan_id => {
                FlowState::Failed(FlowError::new(
                    FlowStep::VerifyRecord,
                    StepError::UnexpectedRecord {
                        expected: self.plan.loan_id.clone(),
                        found: loan.loan_id,
                    },
                ))
            }
            FlowState::Queried(loan) => FlowState::Done(loan),
            terminal => terminal,
        };
        if let FlowState::Failed(err) = &self.state {
            warn!(step = %err.step, error = %err.source, "loan flow halted");
        }
        &self.state
    }

    /// Steps until a terminal state and returns the final loan record.
    pub fn run(mut self, contract: &Contract<'_>) -> Result<Loan, FlowError> {
        loop {
            self.step(contract);
            match std::mem::replace(&mut self.state, FlowState::Start) {
                FlowState::Done(loan) => return Ok(loan),
                FlowState::Failed(err) => return Err(err),
                state => self.state = state,
            }
        }
    }

    fn advance(&self, contract: &Contract<'_>, step: FlowStep, next: FlowState) -> FlowState {
        match self.submit(contract, step) {
            Ok(()) => next,
            Err(err) => FlowState::Failed(err),
        }
    }

    fn submit(&self, contract: &Contract<'_>, step: FlowStep) -> Result<(), FlowError> {
        let Some(tx) = self.plan.transaction(step) else {
            return Ok(());
        };
        let policy = self.policy.for_step(step);
        let baseline = if policy == ResubmitPolicy::PreCheck && self.policy.max_attempts > 1 {
            self.observe(contract)
        } else {
            None
        };

        let mut attempt = 1;
        loop {
            let err = match contract.invoke(&tx) {
                Ok(_) => {
                    info!(transaction = tx.name(), loan_id = tx.loan_id(), attempt, "committed");
                    return Ok(());
                }
                Err(err) => err,
            };
            if !err.is_ambiguous()
                || policy == ResubmitPolicy::Never
                || attempt >= self.policy.max_attempts
            {
                return Err(FlowError::new(step, err));
            }
            warn!(transaction = tx.name(), attempt, error = %err, "outcome unknown");
            if policy == ResubmitPolicy::PreCheck {
                if let Some(current) = self.observe(contract) {
                    if self.plan.is_reflected(step, baseline.as_ref(), &current) {
                        info!(transaction = tx.name(), "already committed, not resubmitting");
                        return Ok(());
                    }
                }
            }
            attempt += 1;
        }
    }

    fn query(&self, contract: &Contract<'_>) -> Result<Loan, FlowError> {
        let step = FlowStep::CheckLoanBalance;
        let tx = LoanTransaction::CheckLoanBalance {
            loan_id: self.plan.loan_id.clone(),
        };
        let retry = self.policy.for_step(step) != ResubmitPolicy::Never;
        let mut attempt = 1;
        let bytes = loop {
            match contract.invoke(&tx) {
                Ok(bytes) => break bytes,
                Err(err @ TransactionError::QueryError { .. })
                    if retry && attempt < self.policy.max_attempts =>
                {
                    warn!(transaction = tx.name(), attempt, error = %err, "query failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(FlowError::new(step, err)),
            }
        };
        let loan = Loan::decode(&bytes).map_err(|err| FlowError::new(step, err))?;
        info!(loan_id = %loan.loan_id, outstanding = %loan.outstanding, "balance queried");
        Ok(loan)
    }

    /// Current ledger view of the planned loan, if it can be read.
    fn observe(&self, contract: &Contract<'_>) -> Option<Loan> {
        let tx = LoanTransaction::CheckLoanBalance {
            loan_id: self.plan.loan_id.clone(),
        };
        let bytes = contract.invoke(&tx).ok()?;
        Loan::decode(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gateway::{
            ConnectOptions, Session,
            profile::{ConnectionProfile, tests::ORG1_PROFILE},
        },
        identity::Identity,
        ledger::in_memory_ledger::{Fault, InMemoryLedger},
    };

    fn connect(ledger: &InMemoryLedger) -> Session {
        let identity = Identity {
            msp_id: "Org1MSP".to_string(),
            certificate: "cert".to_string(),
            private_key: "key".to_string(),
        };
        let profile = ConnectionProfile::from_yaml(ORG1_PROFILE).unwrap();
        Session::connect(ledger, &profile, &identity, ConnectOptions::default())
            .ok()
            .unwrap()
    }

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::with_loan_contract("mychannel", "loan")
    }

    #[test]
    fn full_lifecycle() {
        let ledger = ledger();
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");

        let loan = LoanFlow::new(LoanPlan::default(), RetryPolicy::default())
            .run(&contract)
            .unwrap();
        assert_eq!(loan.loan_id, "loan1");
        assert_eq!(loan.principal, Decimal::from(5000));
        assert_eq!(loan.outstanding, Decimal::from(4000));
        assert_eq!(loan.outstanding, loan.principal - Decimal::from(1000));
        assert_eq!(loan.status, LoanStatus::Repaying);
        assert_eq!(ledger.block_height(), 3);
    }

    #[test]
    fn states_advance_one_step_at_a_time() {
        let ledger = ledger();
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");
        let mut flow = LoanFlow::new(LoanPlan::default(), RetryPolicy::default());

        assert_eq!(flow.state().next_step(), Some(FlowStep::ApplyForLoan));
        assert!(matches!(flow.step(&contract), FlowState::Applied));
        assert!(matches!(flow.step(&contract), FlowState::Approved));
        assert!(matches!(flow.step(&contract), FlowState::Repaid));
        assert!(matches!(flow.step(&contract), FlowState::Queried(_)));
        assert!(matches!(flow.step(&contract), FlowState::Done(_)));
        // terminal states stay put
        assert!(matches!(flow.step(&contract), FlowState::Done(_)));
        assert_eq!(ledger.block_height(), 3);
    }

    #[test]
    fn failure_skips_remaining_steps() {
        let ledger = ledger();
        ledger.inject_fault(
            "ApproveLoan",
            Fault::Reject("endorsement policy failure".to_string()),
        );
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");

        let err = LoanFlow::new(LoanPlan::default(), RetryPolicy::default())
            .run(&contract)
            .unwrap_err();
        assert_eq!(err.step, FlowStep::ApproveLoan);
        assert_eq!(
            err.to_string(),
            "Failed to approve loan: Transaction ApproveLoan was rejected: endorsement policy failure"
        );
        let loan = ledger.loan("mychannel", "loan", "loan1").unwrap();
        assert_eq!(loan.status, LoanStatus::Applied);
        assert!(loan.repayments.is_empty());
        assert_eq!(ledger.block_height(), 1);
    }

    #[test]
    fn fail_fast_by_default_on_timeout() {
        let ledger = ledger();
        ledger.inject_fault("ApplyForLoan", Fault::TimeoutAfterCommit);
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");

        let err = LoanFlow::new(LoanPlan::default(), RetryPolicy::default())
            .run(&contract)
            .unwrap_err();
        assert_eq!(err.step, FlowStep::ApplyForLoan);
        assert!(matches!(
            err.source,
            StepError::Transaction(TransactionError::TransactionTimeout { .. })
        ));
    }

    #[test]
    fn precheck_detects_commit_behind_timeout() {
        let ledger = ledger();
        ledger.inject_fault("ApplyForLoan", Fault::TimeoutAfterCommit);
        ledger.inject_fault("ApproveLoan", Fault::TimeoutAfterCommit);
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };

        let loan = LoanFlow::new(LoanPlan::default(), policy)
            .run(&contract)
            .unwrap();
        // nothing was applied twice
        assert_eq!(loan.outstanding, Decimal::from(4000));
        assert_eq!(ledger.block_height(), 3);
    }

    #[test]
    fn precheck_resubmits_when_nothing_landed() {
        let ledger = ledger();
        ledger.inject_fault("MakeRepayment", Fault::TimeoutBeforeCommit);
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");
        let policy = RetryPolicy {
            max_attempts: 2,
            repay: ResubmitPolicy::PreCheck,
            ..RetryPolicy::default()
        };

        let loan = LoanFlow::new(LoanPlan::default(), policy)
            .run(&contract)
            .unwrap();
        assert_eq!(loan.repayments, vec![Decimal::from(1000)]);
        assert_eq!(loan.outstanding, Decimal::from(4000));
    }

    #[test]
    fn repayment_is_never_resubmitted_by_default() {
        let ledger = ledger();
        ledger.inject_fault("MakeRepayment", Fault::TimeoutAfterCommit);
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");
        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };

        let err = LoanFlow::new(LoanPlan::default(), policy)
            .run(&contract)
            .unwrap_err();
        assert_eq!(err.step, FlowStep::MakeRepayment);
        let loan = ledger.loan("mychannel", "loan", "loan1").unwrap();
        assert_eq!(loan.repayments.len(), 1);
    }

    #[test]
    fn rejection_is_never_retried() {
        let ledger = ledger();
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");
        LoanFlow::new(LoanPlan::default(), RetryPolicy::default())
            .run(&contract)
            .unwrap();

        // same loan id again: the contract refuses the duplicate
        let policy = RetryPolicy {
            max_attempts: 3,
            apply: ResubmitPolicy::Always,
            ..RetryPolicy::default()
        };
        let err = LoanFlow::new(LoanPlan::default(), policy)
            .run(&contract)
            .unwrap_err();
        assert_eq!(err.step, FlowStep::ApplyForLoan);
        assert!(err.to_string().contains("already exists"));
        assert_eq!(ledger.block_height(), 3);
    }

    #[test]
    fn query_retries_when_allowed() {
        let ledger = ledger();
        ledger.inject_fault("CheckLoanBalance", Fault::TimeoutBeforeCommit);
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("loan");

        let err = LoanFlow::new(LoanPlan::default(), RetryPolicy::default())
            .run(&contract)
            .unwrap_err();
        assert_eq!(err.step, FlowStep::CheckLoanBalance);

        ledger.inject_fault("CheckLoanBalance", Fault::TimeoutBeforeCommit);
        let plan = LoanPlan {
            loan_id: "loan2".to_string(),
            ..LoanPlan::default()
        };
        // no pre-checks, so the only query issued is the balance check
        let policy = RetryPolicy {
            max_attempts: 2,
            apply: ResubmitPolicy::Never,
            approve: ResubmitPolicy::Never,
            ..RetryPolicy::default()
        };
        let loan = LoanFlow::new(plan, policy).run(&contract).unwrap();
        assert_eq!(loan.loan_id, "loan2");
    }

    #[test]
    fn unknown_contract_fails_at_first_step() {
        let ledger = ledger();
        let session = connect(&ledger);
        let contract = session.network("mychannel").unwrap().contract("mortgage");
        let mut flow = LoanFlow::new(LoanPlan::default(), RetryPolicy::default());

        assert!(matches!(flow.step(&contract), FlowState::Failed(_)));
        assert!(flow.state().is_terminal());
        assert_eq!(flow.state().next_step(), None);
    }
}
