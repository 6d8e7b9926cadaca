pub mod callback;
pub mod message;

use crate::commands::{self, Command};
use teloxide::{
    RequestError,
    dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler},
    prelude::*,
};

/// Update routing: commands first, then plain text, then button presses.
///
/// Handlers expect an `Arc<App>` in the dispatcher's dependencies.
#[must_use]
pub fn schema() -> UpdateHandler<RequestError> {
    let commands = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(commands::answer);

    let text = Update::filter_message().endpoint(message::handle_text);

    let callbacks = Update::filter_callback_query().endpoint(callback::handle_callback);

    dptree::entry()
        .branch(commands)
        .branch(text)
        .branch(callbacks)
}
