//! Turn decisions: whether the session ends after a command, and how the next
//! request is folded from the previous step.

use super::suggestion::CommandSuggestion;

/// What the session does after a command has been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The task is complete.
    Terminate,
    /// Ask the model for another step using the given folding rule.
    Continue(Fold),
}

/// How the previous step is folded into the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// Embed the command and its full captured output.
    WithOutput,
    /// Embed only an acknowledgement that the command ran.
    Acknowledge,
}

/// Decide the next transition from the suggestion that was just executed.
///
/// `needs_output_for_next_step` is authoritative: a suggestion that is marked
/// final but still asks for its output gets one more turn with that output.
pub fn decide(suggestion: &CommandSuggestion) -> Decision {
    match (suggestion.is_final, suggestion.needs_output_for_next_step) {
        (true, false) => Decision::Terminate,
        (_, true) => Decision::Continue(Fold::WithOutput),
        (false, false) => Decision::Continue(Fold::Acknowledge),
    }
}

/// Build the next request text.
///
/// `original_query` is always the user's initial request, never a previously
/// folded query, so the text does not grow with the number of turns.
pub fn fold_query(fold: Fold, command: &str, output: &str, original_query: &str) -> String {
    match fold {
        Fold::WithOutput => format!(
            "I ran the command '{command}' and got the output:\n{output}\nPlease provide the next command to continue with my original request: {original_query}"
        ),
        Fold::Acknowledge => format!(
            "I successfully ran '{command}'. What's the next command to continue with my original request: {original_query}"
        ),
    }
}
