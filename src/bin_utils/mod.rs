//! Bootstraps the library for the binary. The integration test drives the
//! same [`Service`], so it lives in the library rather than next to `main`.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    config::ClientConfig,
    flow::{FlowState, LoanFlow, LoanPlan, RetryPolicy},
    gateway::{ConnectOptions, LedgerTransport, Session, profile::ConnectionProfile},
    identity::{CredentialBundle, ensure_identity, fs_wallet::FileSystemWallet},
    loan::Loan,
};
use report::print_progress;

pub mod logging;
pub mod report;

pub struct Service<'w, T, W: 'w> {
    pub config: ClientConfig,
    pub transport: T,
    pub plan: LoanPlan,
    pub retry: RetryPolicy,
    pub output: &'w mut W,
}

impl<'w, T, W> Service<'w, T, W>
where
    T: LedgerTransport,
    W: Write + 'w,
{
    pub fn run(self) -> Result<Loan> {
        let config = &self.config;
        let mut wallet =
            FileSystemWallet::open(&config.wallet_dir).context("Failed to create wallet")?;
        let bundle = CredentialBundle::from_msp_dir(&config.msp_dir);
        let identity = ensure_identity(
            &mut wallet,
            &bundle,
            &config.identity_alias,
            &config.msp_id,
        )
        .context("Failed to populate wallet contents")?;

        let profile = ConnectionProfile::from_file(&config.connection_profile)
            .context("Failed to load connection profile")?;
        let options = ConnectOptions::for_profile(&profile, config.discovery_as_localhost);
        let mut session = Session::connect(&self.transport, &profile, &identity, options)
            .context("Failed to connect to gateway")?;

        let outcome = Self::drive(
            &session,
            config,
            LoanFlow::new(self.plan, self.retry),
            self.output,
        );
        session.close();
        outcome
    }

    fn drive(
        session: &Session,
        config: &ClientConfig,
        mut flow: LoanFlow,
        output: &mut W,
    ) -> Result<Loan> {
        let network = session
            .network(&config.channel_name)
            .context("Failed to get network")?;
        let contract = network.contract(&config.chaincode_name);
        info!(
            channel = %config.channel_name,
            chaincode = %config.chaincode_name,
            loan_id = %flow.plan().loan_id,
            "starting loan flow"
        );

        while !flow.state().is_terminal() {
            print_progress(output, flow.step(&contract))?;
        }
        match flow.into_state() {
            FlowState::Done(loan) => Ok(loan),
            FlowState::Failed(err) => Err(err.into()),
            state => anyhow::bail!("Loan flow stopped before finishing: {state:?}"),
        }
    }
}
