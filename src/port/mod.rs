//! Port inspection, ownership classification and reclaim.

mod inspect;
mod ownership;
mod reclaim;

pub use inspect::{
    command_line, inspect, is_port_available, process_name, PortInspector, ProcessInfo,
    SystemInspector,
};
pub use ownership::{classify, format_conflict_message, Ownership, Probe};
pub use reclaim::{
    reclaim_port, terminate_and_wait, ProcessControl, ReclaimOutcome, SystemProcessControl,
    RECLAIM_POLL_INTERVAL, TERMINATE_GRACE,
};
