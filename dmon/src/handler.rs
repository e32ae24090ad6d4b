//! The single async-signal-safe handler and the global flags it writes
//!. Only flag writes and the
//! two `kill()` calls documented safe in signal(7) happen here; every
//! status-sink line this triggers is written later, from the main loop
//! observing these flags.

use dmon_common::task::{self, TaskSlot, NO_PID};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

pub static RUNNING: AtomicBool = AtomicBool::new(true);
pub static CHECK_CHILD: AtomicBool = AtomicBool::new(false);
pub static CMD_SIGNALS: AtomicBool = AtomicBool::new(false);
pub static LOG_SIGNALS: AtomicBool = AtomicBool::new(false);
pub static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
pub static CMD_TIMEOUT: AtomicU64 = AtomicU64::new(0);
/// Set by the handler whenever it fires the timeout restart; cleared by the
/// main loop after it writes the matching status line.
pub static CMD_TIMEOUT_FIRED: AtomicI32 = AtomicI32::new(0);

pub static CMD_SLOT: TaskSlot = TaskSlot::new();
pub static LOG_SLOT: TaskSlot = TaskSlot::new();

pub fn take_timeout_fired() -> bool {
    CMD_TIMEOUT_FIRED.swap(0, Ordering::SeqCst) != 0
}

/// Installed for [`dmon_common::signals::INSTALLED_SIGNALS`].
pub extern "C" fn handle_signal(signum: libc::c_int) {
    if signum == libc::SIGINT || signum == libc::SIGTERM {
        RUNNING.store(false, Ordering::SeqCst);
        return;
    }

    if signum == libc::SIGCHLD {
        CHECK_CHILD.store(true, Ordering::SeqCst);
        return;
    }

    let cmd_timeout = CMD_TIMEOUT.load(Ordering::SeqCst);
    if cmd_timeout > 0 && signum == libc::SIGALRM {
        let pid = CMD_SLOT.pid();
        if pid != NO_PID {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
                libc::kill(pid, libc::SIGCONT);
            }
        }
        CMD_SLOT.queue_action(task::Action::Start);
        CMD_TIMEOUT_FIRED.store(1, Ordering::SeqCst);
        unsafe {
            libc::alarm(cmd_timeout as libc::c_uint);
        }
        return;
    }

    // Any other signal that reaches here was one we chose to install a
    // handler for, so it is always a forwarding candidate (see the
    // `signals` module doc comment on the original's table-truncation).
    if CMD_SIGNALS.load(Ordering::SeqCst) {
        CMD_SLOT.queue_action(task::Action::Signal);
        CMD_SLOT.queue_signal(signum);
    }
    if LOG_SIGNALS.load(Ordering::SeqCst) && LOG_ENABLED.load(Ordering::SeqCst) {
        LOG_SLOT.queue_action(task::Action::Signal);
        LOG_SLOT.queue_signal(signum);
    }
}
