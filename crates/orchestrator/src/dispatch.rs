//! Command hand-off shared by the manager and the recovery worker.

use saga::Saga;
use saga_store::SagaRepository;

use crate::error::Result;
use crate::mediator::CommandMediator;

/// Drains the saga's command queue into the mediator.
///
/// Each accepted command is flagged dispatched; a rejected hand-off is
/// logged and the flag stays down so the recovery worker can resend it.
/// The updated flags are persisted in one save at the end.
pub(crate) async fn forward_commands<R, M>(
    repository: &R,
    mediator: &M,
    saga: &mut Saga,
) -> Result<()>
where
    R: SagaRepository,
    M: CommandMediator,
{
    let commands = saga.collect_commands();
    if commands.is_empty() {
        return Ok(());
    }

    for command in &commands {
        match mediator.send(command).await {
            Ok(()) => {
                saga.mark_command_dispatched(command.id)?;
                metrics::counter!("saga_commands_dispatched_total").increment(1);
            }
            Err(e) => {
                tracing::warn!(
                    saga_id = %saga.id(),
                    command_id = %command.id,
                    command_type = %command.command_type,
                    error = %e,
                    "command hand-off rejected, leaving for recovery"
                );
                metrics::counter!("saga_command_dispatch_failures_total").increment(1);
            }
        }
    }

    repository.save(saga.state_mut()).await?;
    Ok(())
}
