//! Built-in domains, user domains and the sync relation.
//!
//! `register_phases` builds the fixed `common` and `uvm` domains exactly once
//! per graph. User domains each get their own copy of the runtime schedule
//! and run in parallel with `run`.

use crate::core::graph::{PhaseGraph, Placement};
use crate::core::types::{FunctionOrder, NodeId, PhaseBehavior, PhaseKind};
use crate::error::PhaseError;

pub const COMMON_DOMAIN: &str = "common";
pub const UVM_DOMAIN: &str = "uvm";
pub const RUNTIME_SCHEDULE: &str = "uvm_sched";

const TOP_DOWN: PhaseBehavior = PhaseBehavior::Function(FunctionOrder::TopDown);
const BOTTOM_UP: PhaseBehavior = PhaseBehavior::Function(FunctionOrder::BottomUp);

/// Phases of the common domain, in schedule order.
pub const COMMON_PHASES: [(&str, PhaseBehavior); 9] = [
    ("build", TOP_DOWN),
    ("connect", BOTTOM_UP),
    ("end_of_elaboration", BOTTOM_UP),
    ("start_of_simulation", BOTTOM_UP),
    ("run", PhaseBehavior::Task),
    ("extract", BOTTOM_UP),
    ("check", BOTTOM_UP),
    ("report", BOTTOM_UP),
    ("final", TOP_DOWN),
];

/// Task phases of the runtime schedule, in schedule order.
pub const RUNTIME_PHASES: [&str; 12] = [
    "pre_reset",
    "reset",
    "post_reset",
    "pre_configure",
    "configure",
    "post_configure",
    "pre_main",
    "main",
    "post_main",
    "pre_shutdown",
    "shutdown",
    "post_shutdown",
];

/// Name of the task phase every runtime schedule runs beside.
pub const RUN_PHASE: &str = "run";

/// Imp that is only skipped on already-built components.
pub const BUILD_PHASE: &str = "build";

impl PhaseGraph {
    /// Builds the `common` and `uvm` domains.
    ///
    /// A second call changes nothing, reports a warning and returns
    /// [`PhaseError::AlreadyRegistered`].
    pub fn register_phases(&mut self) -> Result<(), PhaseError> {
        if self.common.is_some() {
            self.diagnostics
                .warn("phases-registered", "built-in phases are already registered");
            return Err(PhaseError::AlreadyRegistered);
        }

        let common = self.new_domain_node(COMMON_DOMAIN);
        for (name, behavior) in COMMON_PHASES {
            let imp = self.define_imp(name, behavior)?;
            self.add_imp(common, imp, Placement::at_end())?;
        }
        self.common = Some(common);
        self.domains.insert(COMMON_DOMAIN.to_string(), common);

        let uvm = self.new_domain_node(UVM_DOMAIN);
        self.add_runtime_schedule(uvm)?;
        self.graft_beside_run(uvm)?;
        self.uvm = Some(uvm);
        self.domains.insert(UVM_DOMAIN.to_string(), uvm);
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.common.is_some()
    }

    /// The common domain, registering the built-ins on first use.
    pub fn common_domain(&mut self) -> Result<NodeId, PhaseError> {
        self.ensure_registered()?;
        self.common
            .ok_or_else(|| PhaseError::NotADomain(COMMON_DOMAIN.to_string()))
    }

    /// The default domain holding the runtime schedule.
    pub fn uvm_domain(&mut self) -> Result<NodeId, PhaseError> {
        self.ensure_registered()?;
        self.uvm
            .ok_or_else(|| PhaseError::NotADomain(UVM_DOMAIN.to_string()))
    }

    /// Common domain of an already registered graph.
    pub fn common(&self) -> Option<NodeId> {
        self.common
    }

    /// Default domain of an already registered graph.
    pub fn uvm(&self) -> Option<NodeId> {
        self.uvm
    }

    fn ensure_registered(&mut self) -> Result<(), PhaseError> {
        if self.common.is_none() {
            self.register_phases()?;
        }
        Ok(())
    }

    /// Creates a domain with its own runtime schedule, running beside `run`.
    ///
    /// An existing name is reused with a warning.
    pub fn create_domain(&mut self, name: &str) -> Result<NodeId, PhaseError> {
        self.ensure_registered()?;
        if let Some(existing) = self.domains.get(name).copied() {
            self.diagnostics.warn(
                "domain-exists",
                format!("domain '{name}' already exists; reusing it"),
            );
            return Ok(existing);
        }
        let domain = self.new_domain_node(name);
        self.add_runtime_schedule(domain)?;
        self.graft_beside_run(domain)?;
        self.domains.insert(name.to_string(), domain);
        Ok(domain)
    }

    pub fn domain_by_name(&self, name: &str) -> Option<NodeId> {
        self.domains.get(name).copied()
    }

    /// Registered domains by name.
    pub fn domains(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.domains.iter().map(|(name, id)| (name.as_str(), *id))
    }

    fn add_runtime_schedule(&mut self, domain: NodeId) -> Result<NodeId, PhaseError> {
        let schedule = self.new_schedule(RUNTIME_SCHEDULE);
        for name in RUNTIME_PHASES {
            let imp = self.define_imp(name, PhaseBehavior::Task)?;
            self.add_imp(schedule, imp, Placement::at_end())?;
        }
        self.add_schedule(domain, schedule, Placement::at_end())?;
        Ok(schedule)
    }

    fn graft_beside_run(&mut self, domain: NodeId) -> Result<(), PhaseError> {
        let common = self
            .common
            .ok_or_else(|| PhaseError::NotADomain(COMMON_DOMAIN.to_string()))?;
        let run = self
            .find(common, RUN_PHASE, true)
            .ok_or_else(|| PhaseError::UnknownPhase {
                name: RUN_PHASE.to_string(),
                scope: COMMON_DOMAIN.to_string(),
            })?;
        self.add_schedule(common, domain, Placement::with(run))
    }

    /// Imp nodes whose enclosing domain is `domain`.
    pub fn imp_nodes_in(&self, domain: NodeId) -> Vec<NodeId> {
        self.ids()
            .filter(|id| {
                self.node(*id).kind() == PhaseKind::Imp && self.domain_of(*id) == Some(domain)
            })
            .collect()
    }

    /// Pairs phases of domains `a` and `b`.
    ///
    /// Without `phase` every like-named imp pair is synced. With `phase`, the
    /// node of that name in `a` is synced to `with_phase` (default: the same
    /// name) in `b`. Returns the number of pairs.
    pub fn sync(
        &mut self,
        a: NodeId,
        b: NodeId,
        phase: Option<&str>,
        with_phase: Option<&str>,
    ) -> Result<usize, PhaseError> {
        let pairs = self.sync_pairs(a, b, phase, with_phase)?;
        for (left, right) in &pairs {
            self.sync_nodes(*left, *right);
        }
        Ok(pairs.len())
    }

    /// Reverses [`sync`](Self::sync) for the same arguments.
    pub fn unsync(
        &mut self,
        a: NodeId,
        b: NodeId,
        phase: Option<&str>,
        with_phase: Option<&str>,
    ) -> Result<usize, PhaseError> {
        let pairs = self.sync_pairs(a, b, phase, with_phase)?;
        for (left, right) in &pairs {
            self.unsync_nodes(*left, *right);
        }
        Ok(pairs.len())
    }

    fn sync_pairs(
        &self,
        a: NodeId,
        b: NodeId,
        phase: Option<&str>,
        with_phase: Option<&str>,
    ) -> Result<Vec<(NodeId, NodeId)>, PhaseError> {
        for domain in [a, b] {
            if !self.contains(domain) {
                return Err(PhaseError::UnknownNode(domain));
            }
            if self.node(domain).kind() != PhaseKind::Domain || self.node(domain).is_end() {
                return Err(PhaseError::NotADomain(self.node(domain).name().to_string()));
            }
        }
        let Some(phase) = phase else {
            let right = self.imp_nodes_in(b);
            return Ok(self
                .imp_nodes_in(a)
                .into_iter()
                .filter_map(|left| {
                    right
                        .iter()
                        .find(|r| self.node(**r).name() == self.node(left).name())
                        .map(|r| (left, *r))
                })
                .collect());
        };
        let other = with_phase.unwrap_or(phase);
        let left = self.imp_in(a, phase)?;
        let right = self.imp_in(b, other)?;
        Ok(vec![(left, right)])
    }

    fn imp_in(&self, domain: NodeId, name: &str) -> Result<NodeId, PhaseError> {
        self.imp_nodes_in(domain)
            .into_iter()
            .find(|id| self.node(*id).name() == name)
            .ok_or_else(|| PhaseError::UnknownPhase {
                name: name.to_string(),
                scope: self.node(domain).name().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;

    fn registered() -> PhaseGraph {
        let mut graph = PhaseGraph::new(Diagnostics::new());
        graph.register_phases().expect("register");
        graph
    }

    fn node_named(graph: &PhaseGraph, domain: NodeId, name: &str) -> NodeId {
        graph.find(domain, name, true).expect("phase")
    }

    #[test]
    fn second_registration_is_rejected_with_warning() {
        let mut graph = registered();
        let nodes = graph.len();
        assert_eq!(graph.register_phases(), Err(PhaseError::AlreadyRegistered));
        assert_eq!(graph.len(), nodes);
        assert_eq!(graph.diagnostics().count_id("phases-registered"), 1);
    }

    #[test]
    fn common_phases_are_chained() {
        let graph = registered();
        let common = graph.common().expect("common");
        let build = node_named(&graph, common, "build");
        let final_phase = node_named(&graph, common, "final");
        let run = node_named(&graph, common, "run");
        assert!(graph.is_before(build, run));
        assert!(graph.is_before(run, final_phase));
        assert_eq!(graph.domain_name(run), COMMON_DOMAIN);
    }

    /// The runtime schedule runs beside `run`: after start_of_simulation and
    /// before extract, but unordered relative to `run` itself.
    #[test]
    fn runtime_schedule_runs_beside_run() {
        let graph = registered();
        let common = graph.common().expect("common");
        let uvm = graph.uvm().expect("uvm");
        let run = node_named(&graph, common, "run");
        let sos = node_named(&graph, common, "start_of_simulation");
        let extract = node_named(&graph, common, "extract");
        let main = node_named(&graph, uvm, "main");
        let post_shutdown = node_named(&graph, uvm, "post_shutdown");

        assert!(graph.is_before(sos, main));
        assert!(graph.is_before(main, extract));
        assert!(!graph.is_before(main, run) && !graph.is_before(run, main));
        assert_eq!(graph.domain_name(main), UVM_DOMAIN);
        assert_eq!(graph.label(main), "uvm.main");
        assert_eq!(graph.siblings(run), [post_shutdown].into_iter().collect());
        assert_eq!(graph.imp_nodes_in(uvm).len(), RUNTIME_PHASES.len());
    }

    #[test]
    fn duplicate_domain_is_reused_with_warning() {
        let mut graph = registered();
        let first = graph.create_domain("d1").expect("create");
        let again = graph.create_domain("d1").expect("create");
        assert_eq!(first, again);
        assert_eq!(graph.diagnostics().count_id("domain-exists"), 1);
        assert_eq!(graph.domains().count(), 3);
    }

    #[test]
    fn user_domains_share_imps_but_not_nodes() {
        let mut graph = registered();
        let uvm = graph.uvm().expect("uvm");
        let d1 = graph.create_domain("d1").expect("create");
        let uvm_main = node_named(&graph, uvm, "main");
        let d1_main = node_named(&graph, d1, "main");
        assert_ne!(uvm_main, d1_main);
        assert_eq!(graph.node(uvm_main).imp(), graph.node(d1_main).imp());
        assert_eq!(graph.label(d1_main), "d1.main");
    }

    #[test]
    fn sync_pairs_like_named_phases() {
        let mut graph = registered();
        let uvm = graph.uvm().expect("uvm");
        let d1 = graph.create_domain("d1").expect("create");
        assert_eq!(graph.sync(uvm, d1, None, None), Ok(RUNTIME_PHASES.len()));
        let uvm_reset = node_named(&graph, uvm, "reset");
        let d1_reset = node_named(&graph, d1, "reset");
        assert!(graph.node(uvm_reset).syncs().contains(&d1_reset));
        assert!(graph.node(d1_reset).syncs().contains(&uvm_reset));

        assert_eq!(graph.unsync(uvm, d1, Some("reset"), None), Ok(1));
        assert!(graph.node(uvm_reset).syncs().is_empty());
    }

    #[test]
    fn sync_with_explicit_phases_and_errors() {
        let mut graph = registered();
        let uvm = graph.uvm().expect("uvm");
        let d1 = graph.create_domain("d1").expect("create");
        assert_eq!(graph.sync(uvm, d1, Some("main"), Some("shutdown")), Ok(1));
        let d1_shutdown = node_named(&graph, d1, "shutdown");
        assert_eq!(graph.node(d1_shutdown).syncs().len(), 1);

        let missing = graph.sync(uvm, d1, Some("nope"), None);
        assert!(matches!(missing, Err(PhaseError::UnknownPhase { .. })));
        let main = node_named(&graph, uvm, "main");
        assert!(matches!(
            graph.sync(main, d1, None, None),
            Err(PhaseError::NotADomain(_))
        ));
    }
}
