//! Response chaining. When the provider retains responses, a turn that only
//! answers tool calls can reference the previous response id instead of
//! resending the whole log.

use crate::error::PreconditionError;
use crate::types::Message;

/// The trailing run of tool results in the log: everything the model has not
/// seen yet when chaining.
pub fn pending_results(log: &[Message]) -> &[Message] {
    let start = log
        .iter()
        .rposition(|m| !m.is_tool_result())
        .map(|i| i + 1)
        .unwrap_or(0);
    &log[start..]
}

/// Previous response id to chain to, if chaining applies this turn.
///
/// Chaining applies only with zero data retention off and a tool result as
/// the last message. The id is taken from the assistant message that asked
/// for those results, which must sit immediately before them.
pub fn should_chain(
    zdr_enabled: bool,
    log: &[Message],
) -> Result<Option<String>, PreconditionError> {
    if zdr_enabled {
        return Ok(None);
    }
    if !log.last().is_some_and(Message::is_tool_result) {
        return Ok(None);
    }

    let results = pending_results(log);
    let requester = log.len() - results.len();
    let assistant = requester
        .checked_sub(1)
        .and_then(|i| log[i].as_assistant())
        .ok_or(PreconditionError::OrphanToolResult(requester))?;

    Ok(assistant.response_id.clone())
}
