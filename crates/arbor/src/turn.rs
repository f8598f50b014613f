//! The request/dispatch cycle.
//!
//! One "turn" covers everything between a user message and the next reply
//! that requests no tools: stream the model's output, execute any function
//! calls in the order they arrived, feed the results back, and repeat.

use futures::StreamExt;
use tracing::{debug, warn};

use crate::errors::TurnError;
use crate::models::part::{FunctionCall, FunctionResponse, Part};
use crate::providers::base::Agent;
use crate::tools::runner::ToolRunner;
use crate::tools::ToolContext;

/// Ceiling on consecutive tool rounds within one turn. A model stuck in a
/// call loop fails the turn instead of burning requests forever.
pub const MAX_TOOL_ROUNDS: usize = 32;

/// Runs one full turn. `on_part` observes every part the model streams,
/// including fragments, in arrival order.
pub async fn run_turn<F>(
    agent: &mut dyn Agent,
    tools: &ToolRunner,
    cx: &ToolContext,
    parts: Vec<Part>,
    mut on_part: F,
) -> Result<(), TurnError>
where
    F: FnMut(&Part),
{
    let mut pending = parts;
    let mut rounds = 0usize;

    loop {
        let mut calls: Vec<FunctionCall> = Vec::new();
        {
            let mut stream = agent.send_message_stream(pending);
            while let Some(item) = stream.next().await {
                let part = item.map_err(TurnError::Stream)?;
                on_part(&part);
                if let Some(call) = part.as_function_call() {
                    calls.push(call.clone());
                }
            }
        }

        if calls.is_empty() {
            return Ok(());
        }

        rounds += 1;
        if rounds > MAX_TOOL_ROUNDS {
            return Err(TurnError::RoundLimit(MAX_TOOL_ROUNDS));
        }
        debug!(round = rounds, calls = calls.len(), "dispatching tool calls");

        let mut responses: Vec<Part> = Vec::with_capacity(calls.len());
        for call in calls {
            match tools.run(cx, &call).await {
                Ok(output) => {
                    responses.push(Part::FunctionResponse(FunctionResponse::ok(
                        call.id,
                        call.name,
                        output.response,
                        output.parts,
                    )));
                }
                Err(err) if err.is_fatal() => return Err(TurnError::Dispatch(err)),
                Err(err) => {
                    // Reported to the model rather than failing the turn; it
                    // can retry with different arguments or move on.
                    warn!(tool = %call.name, error = %err, "tool call failed");
                    responses.push(Part::FunctionResponse(FunctionResponse::err(
                        call.id,
                        call.name,
                        err.to_string(),
                    )));
                }
            }
        }
        pending = responses;
    }
}
