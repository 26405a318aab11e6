//! Legal-transition adjacency table.
//!
//! The monitor consults it before accepting a reported state change and the
//! agent consults it before running a local transition procedure. A pair that
//! is not listed here is an impossible jump.

use super::NodeState::{self, *};

const TRANSITIONS: &[(NodeState, &[NodeState])] = &[
    (Init, &[Single, WaitStandby, CatchingUp, Dropped]),
    (Single, &[WaitPrimary, JoinPrimary, Primary, Draining, Demoted, Maintenance, Dropped]),
    (WaitStandby, &[CatchingUp, Dropped]),
    (CatchingUp, &[Secondary, ReportLsn, WaitMaintenance, Maintenance, JoinSecondary, Dropped]),
    (
        Secondary,
        &[CatchingUp, PreparePromotion, ReportLsn, JoinSecondary, WaitMaintenance, Maintenance, Dropped],
    ),
    (
        WaitPrimary,
        &[
            Primary,
            Single,
            JoinPrimary,
            ApplySettings,
            Draining,
            DemoteTimeout,
            Demoted,
            PrepareMaintenance,
            Dropped,
        ],
    ),
    (
        Primary,
        &[
            WaitPrimary,
            JoinPrimary,
            ApplySettings,
            Single,
            Draining,
            DemoteTimeout,
            Demoted,
            PrepareMaintenance,
            Dropped,
        ],
    ),
    (JoinPrimary, &[Primary, WaitPrimary, Single, Draining, DemoteTimeout, Demoted, Dropped]),
    (ApplySettings, &[Primary, WaitPrimary, Single, Draining, DemoteTimeout, Demoted, Dropped]),
    (Draining, &[DemoteTimeout, Demoted, Dropped]),
    (DemoteTimeout, &[Demoted, Dropped]),
    (Demoted, &[CatchingUp, ReportLsn, Dropped]),
    (PreparePromotion, &[StopReplication, WaitPrimary, ReportLsn, Dropped]),
    (StopReplication, &[WaitPrimary, ReportLsn, Dropped]),
    (ReportLsn, &[PreparePromotion, JoinSecondary, Secondary, CatchingUp, Dropped]),
    (JoinSecondary, &[Secondary, CatchingUp, ReportLsn, Dropped]),
    (PrepareMaintenance, &[Maintenance, Demoted, Dropped]),
    (WaitMaintenance, &[Maintenance, Dropped]),
    (Maintenance, &[CatchingUp, Dropped]),
    (Dropped, &[]),
];

/// Targets reachable in one step from `from`.
pub fn successors(from: NodeState) -> &'static [NodeState] {
    TRANSITIONS
        .iter()
        .find(|(state, _)| *state == from)
        .map(|(_, next)| *next)
        .unwrap_or(&[])
}

/// Whether `from → to` is a single legal step. Staying put is always legal.
pub fn is_legal_transition(from: NodeState, to: NodeState) -> bool {
    from == to || successors(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_state_has_a_row() {
        for state in NodeState::ALL {
            assert!(
                TRANSITIONS.iter().any(|(from, _)| *from == state),
                "missing row for {state}"
            );
        }
    }

    #[test]
    fn promotion_path_is_legal() {
        let path = [Secondary, PreparePromotion, StopReplication, WaitPrimary, Primary];
        for pair in path.windows(2) {
            assert!(is_legal_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn rejoin_path_is_legal() {
        let path = [Primary, Draining, DemoteTimeout, Demoted, CatchingUp, Secondary];
        for pair in path.windows(2) {
            assert!(is_legal_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn impossible_jumps_are_rejected() {
        assert!(!is_legal_transition(Secondary, Primary));
        assert!(!is_legal_transition(CatchingUp, WaitPrimary));
        assert!(!is_legal_transition(Demoted, Primary));
        assert!(!is_legal_transition(Init, Primary));
        assert!(!is_legal_transition(Dropped, Init));
        assert!(is_legal_transition(Dropped, Dropped));
    }

    #[test]
    fn no_standby_reaches_a_writable_state_without_promotion() {
        for from in [Secondary, CatchingUp, WaitStandby, ReportLsn, JoinSecondary, Demoted, Maintenance] {
            assert!(
                successors(from).iter().all(|to| !to.is_writable()),
                "{from} may jump straight to a writable state"
            );
        }
    }
}
