use std::io::Write;

use crate::flow::FlowState;

/// Prints one line for every step the flow completes. Failures are not
/// printed here, they are returned to the caller. The balance is printed
/// with six decimal places.
pub fn print_progress<W>(output: &mut W, state: &FlowState) -> anyhow::Result<()>
where
    W: Write,
{
    let line = match state {
        FlowState::Applied => "Loan successfully applied".to_string(),
        FlowState::Approved => "Loan status updated to Approved".to_string(),
        FlowState::Repaid => "Repayment recorded. Outstanding balance updated.".to_string(),
        FlowState::Done(loan) => format!("Outstanding Balance: {:.6}", loan.outstanding),
        FlowState::Start | FlowState::Queried(_) | FlowState::Failed(_) => return Ok(()),
    };
    if let Err(err) = writeln!(output, "{line}") {
        anyhow::bail!("Failed to write progress: {err}")
    }
    Ok(())
}
