//! `--service {install|uninstall|start|stop|restart|status}` (spec §6).
//! Packaging and OS-service integration are out of scope for this codebase
//! (spec §1); this module still parses and dispatches the flag so the CLI
//! surface matches spec.md exactly, but each action reports that the
//! platform-specific installer lives outside this crate rather than
//! silently doing nothing.

use crate::cli::ServiceAction;

pub fn run(action: ServiceAction) -> anyhow::Result<()> {
    let verb = match action {
        ServiceAction::Install => "install",
        ServiceAction::Uninstall => "uninstall",
        ServiceAction::Start => "start",
        ServiceAction::Stop => "stop",
        ServiceAction::Restart => "restart",
        ServiceAction::Status => "status",
    };
    tracing::warn!(
        action = verb,
        "OS service integration is not built into this binary; use the platform's packaging \
         (systemd unit, Windows service wrapper, launchd plist) to {verb} it"
    );
    anyhow::bail!("--service {verb} is not implemented by this binary")
}
