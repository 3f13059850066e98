//! The ordered pipeline a robot execution moves through, plus the
//! out-of-band Host phase used for human interaction.

use serde::{Deserialize, Serialize};

/// A stage of a robot execution. `Inspiration` through `Learning` form the
/// pipeline proper, walked in order by `PhaseRunner`; `Host` is never
/// entered by the pipeline loop itself — it names the interaction surface
/// `HostMediator` mediates while an execution is `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Inspiration,
    Goals,
    Tasks,
    Run,
    Delivery,
    Learning,
    Host,
}

/// The fixed pipeline order. `Host` is intentionally excluded: it is not a
/// pipeline stage an execution advances through, only a label for the
/// interaction channel.
pub const PIPELINE_ORDER: [Phase; 6] = [
    Phase::Inspiration,
    Phase::Goals,
    Phase::Tasks,
    Phase::Run,
    Phase::Delivery,
    Phase::Learning,
];

impl Phase {
    /// The phase that follows this one in pipeline order, or `None` after
    /// `Learning`. Returns `None` for `Host`, which has no position in the
    /// ordering.
    pub fn next(self) -> Option<Phase> {
        let position = PIPELINE_ORDER.iter().position(|p| *p == self)?;
        PIPELINE_ORDER.get(position + 1).copied()
    }

    pub fn is_pipeline_phase(self) -> bool {
        self != Phase::Host
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Inspiration => "inspiration",
            Phase::Goals => "goals",
            Phase::Tasks => "tasks",
            Phase::Run => "run",
            Phase::Delivery => "delivery",
            Phase::Learning => "learning",
            Phase::Host => "host",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
