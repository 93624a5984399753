//! Scenario file: backend setup, user breakpoints and a list of backend actions.

use anyhow::Context;
use haltpoint::debugger::backend::scripted::ScriptedBackend;
use haltpoint::debugger::backend::{NativeRequest, RawEvent, StopReason, Tracee};
use haltpoint::debugger::{BreakpointRequest, DebugSession};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Locations the backend creates for a request.
#[derive(Debug, Deserialize)]
pub struct Site {
    pub request: NativeRequest,
    #[serde(default)]
    pub addresses: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioTracee {
    pub id: u64,
    pub reason: String,
    #[serde(default)]
    pub data: Vec<u64>,
}

impl ScenarioTracee {
    fn to_tracee(&self) -> anyhow::Result<Tracee> {
        let reason = StopReason::from_str(&self.reason)
            .with_context(|| format!("unknown stop reason `{}`", self.reason))?;
        Ok(Tracee::new(self.id, reason, self.data.clone()))
    }
}

/// Something that happens in the debuggee or in the backend.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Thread reaches a breakpoint location.
    Hit {
        breakpoint: u32,
        location: u32,
        tracee: u64,
    },
    /// Thread writes watched memory.
    HitWatchpoint { watchpoint: u32, tracee: u64 },
    /// Raw stop with explicit thread states.
    Stop { tracees: Vec<ScenarioTracee> },
    /// Signal that doesn't stop the debuggee.
    SilenceSignal { signal: i32 },
    /// New location appears for a backend breakpoint.
    AddLocation { breakpoint: u32, address: u64 },
    /// Location of a backend breakpoint disappears.
    RemoveLocation { breakpoint: u32, location: u32 },
    StructuredData { data: String },
    Interrupt,
    Exit,
    Detach,
    /// User asks to kill the debuggee.
    Terminate,
    /// User asks to detach from the debuggee.
    UserDetach,
    /// Backend event channel breaks.
    Failure { message: String },
}

impl Action {
    pub fn apply(&self, session: &DebugSession, backend: &ScriptedBackend) -> anyhow::Result<()> {
        match self {
            Action::Hit {
                breakpoint,
                location,
                tracee,
            } => {
                if !backend.hit(*breakpoint, *location, *tracee) {
                    log::info!(
                        target: "replay",
                        "hit {breakpoint}.{location} doesn't stop the debuggee"
                    );
                }
            }
            Action::HitWatchpoint { watchpoint, tracee } => {
                if !backend.hit_watchpoint(*watchpoint, *tracee) {
                    log::info!(
                        target: "replay",
                        "hit of watchpoint {watchpoint} doesn't stop the debuggee"
                    );
                }
            }
            Action::Stop { tracees } => {
                let tracees = tracees
                    .iter()
                    .map(ScenarioTracee::to_tracee)
                    .collect::<anyhow::Result<Vec<_>>>()?;
                backend.push_stop(tracees);
            }
            Action::SilenceSignal { signal } => backend.silence_signal(*signal),
            Action::AddLocation {
                breakpoint,
                address,
            } => {
                backend
                    .add_location(*breakpoint, Some(*address))
                    .with_context(|| format!("unknown backend breakpoint {breakpoint}"))?;
                backend.breakpoint_changed(*breakpoint);
            }
            Action::RemoveLocation {
                breakpoint,
                location,
            } => {
                if !backend.remove_location(*breakpoint, *location) {
                    anyhow::bail!("unknown location {breakpoint}.{location}");
                }
                backend.breakpoint_changed(*breakpoint);
            }
            Action::StructuredData { data } => {
                backend.push_event(RawEvent::StructuredData(data.clone()))
            }
            Action::Interrupt => backend.push_event(RawEvent::Interrupt),
            Action::Exit => backend.exit(),
            Action::Detach => backend.detach(),
            Action::Terminate => {
                session.request_terminate();
                backend.exit();
            }
            Action::UserDetach => {
                session.request_detach();
                backend.detach();
            }
            Action::Failure { message } => backend.push_failure(message),
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    #[serde(rename = "site")]
    pub sites: Vec<Site>,
    #[serde(rename = "breakpoint")]
    pub breakpoints: Vec<BreakpointRequest>,
    #[serde(rename = "action")]
    pub actions: Vec<Action>,
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read scenario {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parse scenario {}", path.display()))
    }

    /// Teach the backend where requested locations are.
    pub fn prepare(&self, backend: &ScriptedBackend) {
        for site in &self.sites {
            let addresses: Vec<_> = site.addresses.iter().copied().map(Some).collect();
            backend.define_locations(site.request.clone(), &addresses);
        }
    }
}
