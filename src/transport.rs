//! Transport boundary.
//!
//! Sessions, prompts and retries live outside this crate. The engine only
//! needs something that runs one command and returns what the device
//! printed.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::record::DomainRecord;
use tracing::{debug, info, warn};

/// Runs one CLI command on a device.
#[cfg_attr(test, mockall::automock)]
pub trait CommandExecutor {
    /// Executes `command` and returns its output.
    fn execute(&self, command: &str) -> Result<String>;
}

/// Applies the commands that move `previous` to `desired`, then reads the
/// record back and checks that the device now holds it.
///
/// Returns the record as read back, reconciled with `desired` so write-only
/// fields keep their declared values.
pub fn apply_and_confirm<X>(
    engine: &Engine,
    executor: &X,
    desired: &DomainRecord,
    previous: Option<&DomainRecord>,
) -> Result<DomainRecord>
where
    X: CommandExecutor + ?Sized,
{
    let commands = engine.synthesize(desired, previous)?;
    let key = desired.key();
    info!(record = %key, commands = commands.len(), "Applying");

    for command in &commands {
        debug!(command = %command, "Executing");
        executor.execute(command)?;
    }

    let show = engine.show_command(desired)?;
    let output = executor.execute(&show)?;
    let parsed = engine.parse(&output);
    for diagnostic in &parsed.diagnostics {
        warn!(%diagnostic, "Read-back diagnostic");
    }

    let observed = parsed.find(&key).ok_or_else(|| Error::NotConverged {
        record: key.to_string(),
        message: format!("'{}' does not show the record", show),
    })?;
    let expected = engine.canonicalize(desired)?;
    if !observed.matches(&expected) {
        let changes = crate::reconcile::diff(observed, &expected)?;
        let message = changes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::NotConverged {
            record: key.to_string(),
            message,
        });
    }
    engine.reconcile(observed, &expected)
}
