use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::{
    CellId, ConnectionPattern, EditResult, EditorError, GraphModel, LinkSpec, PatternKind,
    PatternOptions, PortAllocator, PortPair, PortRef, builtin_pattern,
};

/// What an expansion actually produced. Partial results are reported, not rolled back.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SynthesisOutcome {
    pub pattern: PatternKind,
    pub specs: Vec<LinkSpec>,
    pub created: Vec<CellId>,
    pub failed: Vec<LinkSpec>,
}

impl SynthesisOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.created.len() == self.specs.len()
    }

    pub fn created_count(&self) -> usize {
        self.created.len()
    }
}

pub struct ConnectionSynthesizer {
    patterns: BTreeMap<PatternKind, Box<dyn ConnectionPattern>>,
    options: PatternOptions,
}

impl fmt::Debug for ConnectionSynthesizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSynthesizer")
            .field(
                "patterns",
                &self.patterns.values().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish()
    }
}

impl Default for ConnectionSynthesizer {
    fn default() -> Self {
        Self::new(PatternOptions::default())
    }
}

impl ConnectionSynthesizer {
    pub fn new(options: PatternOptions) -> Self {
        let patterns = PatternKind::ALL
            .into_iter()
            .map(|kind| (kind, builtin_pattern(kind)))
            .collect();
        Self { patterns, options }
    }

    pub fn register_pattern(&mut self, pattern: Box<dyn ConnectionPattern>) {
        self.patterns.insert(pattern.kind(), pattern);
    }

    pub fn unregister_pattern(&mut self, kind: PatternKind) -> bool {
        self.patterns.remove(&kind).is_some()
    }

    pub fn pattern(&self, kind: PatternKind) -> EditResult<&dyn ConnectionPattern> {
        self.patterns
            .get(&kind)
            .map(|pattern| pattern.as_ref())
            .ok_or_else(|| EditorError::structural(format!("no pattern registered for '{kind}'")))
    }

    pub fn options(&self) -> &PatternOptions {
        &self.options
    }

    pub fn pair_free_ports(
        ports: &PortAllocator,
        source: &CellId,
        target: &CellId,
        limit: usize,
    ) -> Vec<PortPair> {
        let source_free = ports.free_ports(source);
        let target_free = ports.free_ports(target);
        pair_lists(&source_free, &target_free, limit)
    }

    pub fn plan_between(
        &self,
        ports: &PortAllocator,
        source: &CellId,
        target: &CellId,
        kind: PatternKind,
    ) -> EditResult<Vec<LinkSpec>> {
        if source == target {
            return Err(EditorError::Validation(crate::ValidationFailure::single(
                "no-self-connection",
                "self-connection",
            )));
        }
        let pattern = self.pattern(kind)?;
        let pairs = Self::pair_free_ports(ports, source, target, pattern.max_connections());
        if pairs.is_empty() {
            let starved = if ports.free_ports(source).is_empty() {
                source
            } else {
                target
            };
            return Err(EditorError::allocation(starved, "no free port to pair"));
        }
        Ok(pattern.generate(&pairs, &self.options))
    }

    pub fn create_between(
        &self,
        graph: &mut dyn GraphModel,
        ports: &mut PortAllocator,
        source: &CellId,
        target: &CellId,
        kind: PatternKind,
    ) -> EditResult<SynthesisOutcome> {
        let specs = self.plan_between(ports, source, target, kind)?;
        if specs.len() < kind.max_connections() {
            warn!(
                source = %source,
                target = %target,
                pattern = %kind,
                planned = specs.len(),
                "not enough free ports, degrading multiplicity"
            );
        }
        Ok(realize(graph, ports, kind, specs))
    }

    pub fn replace_single_with_multiple(
        &self,
        graph: &mut dyn GraphModel,
        ports: &mut PortAllocator,
        link: &CellId,
        kind: PatternKind,
    ) -> EditResult<SynthesisOutcome> {
        let record = graph
            .get(link)
            .filter(|record| record.is_link())
            .cloned()
            .ok_or_else(|| EditorError::missing_cell(link))?;

        let (Some(source), Some(target)) = (record.source.clone(), record.target.clone()) else {
            return Err(EditorError::structural(format!("link '{link}' lacks endpoints")));
        };
        let (Some(source_port), Some(target_port)) = (source.port.clone(), target.port.clone())
        else {
            return Err(EditorError::structural(format!(
                "link '{link}' is not attached to ports"
            )));
        };

        let pattern = self.pattern(kind)?;
        let (Some(first_source), Some(first_target)) = (
            ports.port_ref(&source.id, &source_port),
            ports.port_ref(&target.id, &target_port),
        ) else {
            return Err(EditorError::structural(format!(
                "ports of link '{link}' are not registered"
            )));
        };

        ports.release_link(graph, link);
        debug!(link = %link, pattern = %kind, "expanding single link");

        let source_rest: Vec<PortRef> = ports
            .free_ports(&source.id)
            .into_iter()
            .filter(|port| port != &first_source)
            .collect();
        let target_rest: Vec<PortRef> = ports
            .free_ports(&target.id)
            .into_iter()
            .filter(|port| port != &first_target)
            .collect();

        let mut pairs = vec![PortPair {
            source: first_source,
            target: first_target,
        }];
        pairs.extend(pair_lists(
            &source_rest,
            &target_rest,
            pattern.max_connections().saturating_sub(1),
        ));

        let specs = pattern.generate(&pairs, &self.options);
        Ok(realize(graph, ports, kind, specs))
    }
}

fn pair_lists(source: &[PortRef], target: &[PortRef], limit: usize) -> Vec<PortPair> {
    let count = limit.min(source.len()).min(target.len());
    (0..count)
        .map(|i| PortPair {
            source: source[i % source.len()].clone(),
            target: target[i % target.len()].clone(),
        })
        .collect()
}

/// Creates a link per spec and claims its ports. A link whose ports cannot both be
/// claimed is removed again so no claim outlives its link.
fn realize(
    graph: &mut dyn GraphModel,
    ports: &mut PortAllocator,
    pattern: PatternKind,
    specs: Vec<LinkSpec>,
) -> SynthesisOutcome {
    let mut outcome = SynthesisOutcome {
        pattern,
        specs: specs.clone(),
        created: Vec::new(),
        failed: Vec::new(),
    };

    for spec in specs {
        let (Some(source_port), Some(target_port)) =
            (spec.source.port.clone(), spec.target.port.clone())
        else {
            outcome.failed.push(spec);
            continue;
        };
        if !ports.is_available(&spec.source.id, &source_port)
            || !ports.is_available(&spec.target.id, &target_port)
        {
            outcome.failed.push(spec);
            continue;
        }

        let created = graph.create_link(spec.source.clone(), spec.target.clone(), Some(spec.attrs()));
        let link = match created {
            Ok(link) => link,
            Err(err) => {
                warn!(lane = spec.lane, error = %err, "link creation failed during synthesis");
                outcome.failed.push(spec);
                continue;
            }
        };

        if !ports.occupy(&spec.source.id, &source_port, &link) {
            graph.remove_cell(&link);
            outcome.failed.push(spec);
            continue;
        }
        if !ports.occupy(&spec.target.id, &target_port, &link) {
            ports.free(&spec.source.id, &source_port);
            graph.remove_cell(&link);
            outcome.failed.push(spec);
            continue;
        }
        outcome.created.push(link);
    }

    if !outcome.is_complete() {
        warn!(
            pattern = %pattern,
            created = outcome.created.len(),
            failed = outcome.failed.len(),
            "synthesis finished partially"
        );
    }
    outcome
}
