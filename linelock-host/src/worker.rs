//! The single command worker.
//!
//! All file mutations go through this thread, which gives them a total
//! order. Actions are applied after the coordinator lock is released so a
//! slow socket never holds up readers of the coordinator.
//!
//! The worker also sweeps idle entries out of the rate limiters, so keys
//! of departed clients do not pile up.

use std::thread;
use std::time::Instant;

use linelock_core::Command;
use tracing::{debug, error, warn};

use crate::server::{lock, write, Host, HostMetrics};

pub(crate) fn run(host: &Host) {
    let poll = host.config.limits.poll_interval();
    let sweep = host.config.limits.limiter_sweep();
    let mut last_sweep = Instant::now();
    while host.is_running() {
        if last_sweep.elapsed() >= sweep {
            host.limits.shrink();
            last_sweep = Instant::now();
            debug!(keys = host.limits.message_keys_count(), "rate limiters swept");
        }
        let next = lock(&host.pool).pop();
        match next {
            Some(command) => execute(host, command),
            None => thread::sleep(poll),
        }
    }
    debug!("worker stopped");
}

/// Execute one command and carry out its actions.
pub(crate) fn execute(host: &Host, command: Command) {
    let client = command.client;
    let (actions, failure) = {
        let mut coordinator = write(&host.coordinator);
        let actions = coordinator.execute(command);
        (actions, coordinator.take_last_error())
    };
    HostMetrics::bump(&host.metrics.commands_total);

    if let Some(failure) = failure {
        if client.is_host() {
            error!(error = %failure, "host request failed");
        } else {
            warn!(%client, error = %failure, "client command failed");
        }
        host.record_error(failure);
    }
    host.apply(actions);
}
