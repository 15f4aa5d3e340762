use core::fmt;
use std::str::FromStr;

/// Flight state of the whole aircraft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnyxState {
    Startup,
    Landed,
    Airborne,
    Landing,
    Calibration,
    Error,
    Recovery,
    Shutdown,
}

impl OnyxState {
    pub const ALL: [OnyxState; 8] = [
        OnyxState::Startup,
        OnyxState::Landed,
        OnyxState::Airborne,
        OnyxState::Landing,
        OnyxState::Calibration,
        OnyxState::Error,
        OnyxState::Recovery,
        OnyxState::Shutdown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OnyxState::Startup => "STARTUP",
            OnyxState::Landed => "LANDED",
            OnyxState::Airborne => "AIRBORNE",
            OnyxState::Landing => "LANDING",
            OnyxState::Calibration => "CALIBRATION",
            OnyxState::Error => "ERROR",
            OnyxState::Recovery => "RECOVERY",
            OnyxState::Shutdown => "SHUTDOWN",
        }
    }

    /// States that may be requested from outside the monitor.
    pub fn is_requestable(self) -> bool {
        matches!(
            self,
            OnyxState::Landed
                | OnyxState::Airborne
                | OnyxState::Landing
                | OnyxState::Calibration
                | OnyxState::Shutdown
        )
    }
}

impl fmt::Display for OnyxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OnyxState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|state| state.name().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Current and previous state plus the edge flag for entry actions.
#[derive(Debug, Clone)]
pub struct StateCell {
    current: OnyxState,
    previous: OnyxState,
    changed: bool,
}

impl StateCell {
    /// Start in `state` with its entry action pending.
    pub fn new(state: OnyxState) -> Self {
        Self {
            current: state,
            previous: state,
            changed: true,
        }
    }

    pub fn current(&self) -> OnyxState {
        self.current
    }

    pub fn previous(&self) -> OnyxState {
        self.previous
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn transition(&mut self, next: OnyxState) {
        self.previous = self.current;
        self.current = next;
        self.changed = true;
    }

    /// Undo a refused transition without firing the old state's entry action.
    pub fn revert(&mut self) {
        let refused = self.current;
        self.current = self.previous;
        self.previous = refused;
        self.changed = false;
    }

    /// Consume the edge flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::replace(&mut self.changed, false)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(OnyxState::Startup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_case_insensitively() {
        for state in OnyxState::ALL {
            assert_eq!(state.name().to_lowercase().parse(), Ok(state));
        }
        assert_eq!("HOVER".parse::<OnyxState>(), Err(()));
    }

    #[test]
    fn entry_edge_fires_once() {
        let mut cell = StateCell::default();
        assert!(cell.take_changed());
        assert!(!cell.take_changed());

        cell.transition(OnyxState::Landed);
        assert_eq!(cell.previous(), OnyxState::Startup);
        assert!(cell.take_changed());
        assert!(!cell.take_changed());
    }

    #[test]
    fn revert_restores_without_an_edge() {
        let mut cell = StateCell::new(OnyxState::Airborne);
        cell.take_changed();
        cell.transition(OnyxState::Shutdown);
        cell.revert();

        assert_eq!(cell.current(), OnyxState::Airborne);
        assert_eq!(cell.previous(), OnyxState::Shutdown);
        assert!(!cell.is_changed());
    }
}
