use log::{debug, info};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    /// Another search was running when the workflow began; waiting for it to stop.
    AwaitingStop,
    /// The workflow's own search is running.
    Searching,
}

/// What the session has to do after a search-and-connect workflow advanced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchAction {
    Nothing,
    StartSearch { seconds: u64 },
    Connect { band: String },
    Finished { band: String, found: bool },
}

/// One invocation of the composite search-and-connect workflow.
///
/// The workflow watches discovery results for its target for its whole
/// lifetime and connects the target on the first match. It completes on the
/// stop of its own search. Cancelling its token abandons it silently.
#[derive(Debug)]
pub struct SearchAndConnect {
    target: String,
    seconds: u64,
    phase: SearchPhase,
    found: bool,
    cancel: CancellationToken,
}

impl SearchAndConnect {
    pub fn begin(target: &str, seconds: u64, currently_searching: bool, cancel: CancellationToken) -> (Self, SearchAction) {
        let (phase, action) = if currently_searching {
            debug!("Search already running, search-and-connect for {} waits for it to stop", target);
            (SearchPhase::AwaitingStop, SearchAction::Nothing)
        } else {
            (SearchPhase::Searching, SearchAction::StartSearch { seconds })
        };

        let workflow = SearchAndConnect {
            target: target.to_string(),
            seconds,
            phase,
            found: false,
            cancel,
        };
        (workflow, action)
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn on_search_result(&mut self, address: &str) -> SearchAction {
        if self.found || address != self.target {
            return SearchAction::Nothing;
        }

        info!("Found {} during search, connecting", self.target);
        self.found = true;
        SearchAction::Connect { band: self.target.clone() }
    }

    pub fn on_search_stopped(&mut self) -> SearchAction {
        match self.phase {
            SearchPhase::AwaitingStop => {
                self.phase = SearchPhase::Searching;
                SearchAction::StartSearch { seconds: self.seconds }
            },
            SearchPhase::Searching => self.finish(),
        }
    }

    /// Completes the workflow with whatever it has found so far.
    pub fn finish(&mut self) -> SearchAction {
        self.cancel.cancel();
        SearchAction::Finished {
            band: self.target.clone(),
            found: self.found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_engine_starts_search_immediately() {
        let (workflow, action) = SearchAndConnect::begin("X", 5, false, CancellationToken::new());
        assert_eq!(action, SearchAction::StartSearch { seconds: 5 });
        assert_eq!(workflow.phase(), SearchPhase::Searching);
    }

    #[test]
    fn connects_on_first_match_only() {
        let (mut workflow, _) = SearchAndConnect::begin("X", 5, false, CancellationToken::new());

        assert_eq!(workflow.on_search_result("Y"), SearchAction::Nothing);
        assert_eq!(workflow.on_search_result("X"), SearchAction::Connect { band: "X".to_string() });
        assert_eq!(workflow.on_search_result("X"), SearchAction::Nothing);
        assert_eq!(workflow.on_search_stopped(), SearchAction::Finished { band: "X".to_string(), found: true });
        assert!(workflow.is_cancelled());
    }

    #[test]
    fn waits_for_running_search_before_starting_its_own() {
        let (mut workflow, action) = SearchAndConnect::begin("X", 5, true, CancellationToken::new());
        assert_eq!(action, SearchAction::Nothing);
        assert_eq!(workflow.phase(), SearchPhase::AwaitingStop);

        assert_eq!(workflow.on_search_stopped(), SearchAction::StartSearch { seconds: 5 });
        assert_eq!(workflow.on_search_stopped(), SearchAction::Finished { band: "X".to_string(), found: false });
    }
}
