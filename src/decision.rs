/// Halt-vs-reboot classification of an accumulated edge count.
///
/// The power controller requests a shutdown by driving rising edges on the
/// communication line during one interval window. A single edge means halt;
/// any other nonzero count means reboot. The controller firmware defines no
/// finer meaning for larger counts, so neither do we.

/// System action requested by the power controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCommand {
    /// Power the system down.
    Halt,
    /// Restart the system.
    Reboot,
}

impl std::fmt::Display for ShutdownCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownCommand::Halt => write!(f, "halt"),
            ShutdownCommand::Reboot => write!(f, "reboot"),
        }
    }
}

/// Map an edge count observed at a window boundary to a command.
///
/// Callers only invoke this with a nonzero count; a zero count means the
/// window was quiet and no decision is due.
pub fn classify(edges: u32) -> ShutdownCommand {
    if edges == 1 {
        ShutdownCommand::Halt
    } else {
        ShutdownCommand::Reboot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_edge_means_halt() {
        assert_eq!(classify(1), ShutdownCommand::Halt);
    }

    #[test]
    fn test_two_edges_mean_reboot() {
        assert_eq!(classify(2), ShutdownCommand::Reboot);
    }

    #[test]
    fn test_larger_counts_mean_reboot() {
        assert_eq!(classify(3), ShutdownCommand::Reboot);
        assert_eq!(classify(7), ShutdownCommand::Reboot);
        assert_eq!(classify(250), ShutdownCommand::Reboot);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ShutdownCommand::Halt.to_string(), "halt");
        assert_eq!(ShutdownCommand::Reboot.to_string(), "reboot");
    }
}
