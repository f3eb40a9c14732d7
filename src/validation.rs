use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use crate::{
    BBox, CellId, EditResult, EditorConfig, EditorError, GraphModel, Point, PortAllocator,
    PortId, RuleFailure, Size, ValidationFailure,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Connection,
    Move,
    Creation,
    Graph,
}

impl RuleCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleCategory::Connection => "connection",
            RuleCategory::Move => "move",
            RuleCategory::Creation => "creation",
            RuleCategory::Graph => "graph",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionAttempt {
    pub source: CellId,
    pub source_port: Option<PortId>,
    pub target: CellId,
    pub target_port: Option<PortId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveAttempt {
    pub element: CellId,
    pub position: Point,
    pub moving: Vec<CellId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreationAttempt {
    pub kind: String,
    pub position: Point,
    pub size: Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphCheck {
    pub added_elements: usize,
    pub added_links: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    Connection(ConnectionAttempt),
    Move(MoveAttempt),
    Creation(CreationAttempt),
    Graph(GraphCheck),
}

impl Subject {
    pub fn category(&self) -> RuleCategory {
        match self {
            Subject::Connection(_) => RuleCategory::Connection,
            Subject::Move(_) => RuleCategory::Move,
            Subject::Creation(_) => RuleCategory::Creation,
            Subject::Graph(_) => RuleCategory::Graph,
        }
    }
}

pub struct ValidationContext<'a> {
    pub graph: &'a dyn GraphModel,
    pub ports: &'a PortAllocator,
    pub config: &'a EditorConfig,
    pub subject: Subject,
}

impl<'a> ValidationContext<'a> {
    pub fn new(
        graph: &'a dyn GraphModel,
        ports: &'a PortAllocator,
        config: &'a EditorConfig,
        subject: Subject,
    ) -> Self {
        Self {
            graph,
            ports,
            config,
            subject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Warn(String),
    Fail(String),
}

pub type Rule = Box<dyn Fn(&ValidationContext<'_>) -> anyhow::Result<Verdict>>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<RuleFailure>,
    pub warnings: Vec<RuleFailure>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn fail(rule: &str, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![RuleFailure::new(rule, reason)],
            warnings: Vec::new(),
        }
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn has_error(&self, rule: &str) -> bool {
        self.errors.iter().any(|failure| failure.rule == rule)
    }

    pub fn into_result(self) -> EditResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(EditorError::Validation(ValidationFailure {
                failures: self.errors,
            }))
        }
    }
}

#[derive(Default)]
pub struct ValidationEngine {
    rules: HashMap<RuleCategory, BTreeMap<String, Rule>>,
}

impl fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        let mut categories: Vec<_> = self.rules.keys().collect();
        categories.sort();
        for category in categories {
            map.entry(&category.as_str(), &self.rule_names(*category));
        }
        map.finish()
    }
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_rules() -> Self {
        let mut engine = Self::new();
        engine.install_default_rules();
        engine
    }

    pub fn add_rule<F>(&mut self, category: RuleCategory, name: impl Into<String>, rule: F)
    where
        F: Fn(&ValidationContext<'_>) -> anyhow::Result<Verdict> + 'static,
    {
        self.rules
            .entry(category)
            .or_default()
            .insert(name.into(), Box::new(rule));
    }

    pub fn remove_rule(&mut self, category: RuleCategory, name: &str) -> bool {
        self.rules
            .get_mut(&category)
            .and_then(|rules| rules.remove(name))
            .is_some()
    }

    pub fn rule_names(&self, category: RuleCategory) -> Vec<String> {
        self.rules
            .get(&category)
            .map(|rules| rules.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Runs every rule of `category`; no short-circuit.
    pub fn validate(&self, category: RuleCategory, context: &ValidationContext<'_>) -> ValidationReport {
        if context.subject.category() != category {
            return ValidationReport::fail(
                "context-category",
                format!(
                    "{} context cannot be validated as {}",
                    context.subject.category(),
                    category
                ),
            );
        }

        let mut report = ValidationReport::ok();
        let Some(rules) = self.rules.get(&category) else {
            return report;
        };

        for (name, rule) in rules {
            match rule(context) {
                Ok(Verdict::Pass) => {}
                Ok(Verdict::Warn(reason)) => {
                    report.warnings.push(RuleFailure::new(name.as_str(), reason));
                }
                Ok(Verdict::Fail(reason)) => {
                    report.valid = false;
                    report.errors.push(RuleFailure::new(name.as_str(), reason));
                }
                Err(err) => {
                    report.valid = false;
                    report
                        .errors
                        .push(RuleFailure::new(name.as_str(), format!("rule error: {err:#}")));
                }
            }
        }

        if !report.valid {
            debug!(category = %category, errors = report.errors.len(), "validation rejected");
        }
        report
    }

    pub fn check(
        &self,
        graph: &dyn GraphModel,
        ports: &PortAllocator,
        config: &EditorConfig,
        subject: Subject,
    ) -> ValidationReport {
        let category = subject.category();
        let context = ValidationContext::new(graph, ports, config, subject);
        self.validate(category, &context)
    }

    pub fn install_default_rules(&mut self) {
        self.add_rule(RuleCategory::Connection, "endpoints-exist", endpoints_exist);
        self.add_rule(RuleCategory::Connection, "no-self-connection", no_self_connection);
        self.add_rule(RuleCategory::Connection, "source-port-available", |ctx| {
            let Subject::Connection(attempt) = &ctx.subject else {
                return Ok(Verdict::Pass);
            };
            Ok(port_available(ctx.ports, &attempt.source, attempt.source_port.as_ref()))
        });
        self.add_rule(RuleCategory::Connection, "target-port-available", |ctx| {
            let Subject::Connection(attempt) = &ctx.subject else {
                return Ok(Verdict::Pass);
            };
            Ok(port_available(ctx.ports, &attempt.target, attempt.target_port.as_ref()))
        });
        self.add_rule(
            RuleCategory::Connection,
            "no-duplicate-connection",
            no_duplicate_connection,
        );

        self.add_rule(RuleCategory::Move, "element-exists", |ctx| {
            let Subject::Move(attempt) = &ctx.subject else {
                return Ok(Verdict::Pass);
            };
            Ok(match ctx.graph.get(&attempt.element) {
                Some(cell) if !cell.is_link() => Verdict::Pass,
                Some(_) => Verdict::Fail(format!("'{}' is a link", attempt.element)),
                None => Verdict::Fail(format!("element '{}' does not exist", attempt.element)),
            })
        });
        self.add_rule(RuleCategory::Move, "within-canvas", |ctx| {
            let Some(bbox) = moved_bbox(ctx) else {
                return Ok(Verdict::Pass);
            };
            Ok(within_canvas(ctx.config, &bbox))
        });
        self.add_rule(RuleCategory::Move, "no-overlap", |ctx| {
            let Subject::Move(attempt) = &ctx.subject else {
                return Ok(Verdict::Pass);
            };
            let Some(bbox) = moved_bbox(ctx) else {
                return Ok(Verdict::Pass);
            };
            let mut ignore = attempt.moving.clone();
            ignore.push(attempt.element.clone());
            Ok(overlap_verdict(ctx, &bbox, &ignore))
        });

        self.add_rule(RuleCategory::Creation, "within-canvas", |ctx| {
            let Subject::Creation(attempt) = &ctx.subject else {
                return Ok(Verdict::Pass);
            };
            Ok(within_canvas(ctx.config, &BBox::new(attempt.position, attempt.size)))
        });
        self.add_rule(RuleCategory::Creation, "size-limits", size_limits);
        self.add_rule(RuleCategory::Creation, "no-overlap", |ctx| {
            let Subject::Creation(attempt) = &ctx.subject else {
                return Ok(Verdict::Pass);
            };
            Ok(overlap_verdict(
                ctx,
                &BBox::new(attempt.position, attempt.size),
                &[],
            ))
        });

        self.add_rule(RuleCategory::Graph, "max-elements", |ctx| {
            let Subject::Graph(check) = &ctx.subject else {
                return Ok(Verdict::Pass);
            };
            let total = ctx.graph.element_count() + check.added_elements;
            Ok(if check.added_elements > 0 && total > ctx.config.max_elements {
                Verdict::Fail(format!(
                    "element limit of {} reached",
                    ctx.config.max_elements
                ))
            } else {
                Verdict::Pass
            })
        });
        self.add_rule(RuleCategory::Graph, "max-links", |ctx| {
            let Subject::Graph(check) = &ctx.subject else {
                return Ok(Verdict::Pass);
            };
            let total = ctx.graph.link_count() + check.added_links;
            Ok(if check.added_links > 0 && total > ctx.config.max_links {
                Verdict::Fail(format!("link limit of {} reached", ctx.config.max_links))
            } else {
                Verdict::Pass
            })
        });
    }
}

fn endpoints_exist(ctx: &ValidationContext<'_>) -> anyhow::Result<Verdict> {
    let Subject::Connection(attempt) = &ctx.subject else {
        return Ok(Verdict::Pass);
    };
    for shape in [&attempt.source, &attempt.target] {
        match ctx.graph.get(shape) {
            Some(cell) if !cell.is_link() => {}
            Some(_) => return Ok(Verdict::Fail(format!("'{shape}' is a link"))),
            None => return Ok(Verdict::Fail(format!("element '{shape}' does not exist"))),
        }
    }
    Ok(Verdict::Pass)
}

fn no_self_connection(ctx: &ValidationContext<'_>) -> anyhow::Result<Verdict> {
    let Subject::Connection(attempt) = &ctx.subject else {
        return Ok(Verdict::Pass);
    };
    Ok(if attempt.source == attempt.target {
        Verdict::Fail("self-connection".to_string())
    } else {
        Verdict::Pass
    })
}

fn port_available(ports: &PortAllocator, shape: &CellId, port: Option<&PortId>) -> Verdict {
    match port {
        Some(port) => match ports.port(shape, port) {
            Some(found) if found.is_available() => Verdict::Pass,
            Some(found) if found.is_occupied() => {
                Verdict::Fail(format!("port '{port}' on '{shape}' is occupied"))
            }
            Some(_) => Verdict::Fail(format!("port '{port}' on '{shape}' does not accept links")),
            None => Verdict::Fail(format!("port '{port}' does not exist on '{shape}'")),
        },
        None => {
            if ports.free_ports(shape).is_empty() {
                Verdict::Fail(format!("no free port on '{shape}'"))
            } else {
                Verdict::Pass
            }
        }
    }
}

fn no_duplicate_connection(ctx: &ValidationContext<'_>) -> anyhow::Result<Verdict> {
    let Subject::Connection(attempt) = &ctx.subject else {
        return Ok(Verdict::Pass);
    };
    for link_id in ctx.graph.connected_links(&attempt.source) {
        let Some(link) = ctx.graph.get(&link_id) else {
            continue;
        };
        if link.touches(&attempt.source) && link.touches(&attempt.target) {
            return Ok(Verdict::Fail(format!(
                "'{}' and '{}' are already connected by '{}'",
                attempt.source, attempt.target, link.id
            )));
        }
    }
    Ok(Verdict::Pass)
}

fn size_limits(ctx: &ValidationContext<'_>) -> anyhow::Result<Verdict> {
    let Subject::Creation(attempt) = &ctx.subject else {
        return Ok(Verdict::Pass);
    };
    let min = ctx.config.min_size;
    let max = ctx.config.max_size;
    let size = attempt.size;
    Ok(
        if size.width < min.width || size.height < min.height {
            Verdict::Fail(format!(
                "size {}x{} is below the minimum {}x{}",
                size.width, size.height, min.width, min.height
            ))
        } else if size.width > max.width || size.height > max.height {
            Verdict::Fail(format!(
                "size {}x{} exceeds the maximum {}x{}",
                size.width, size.height, max.width, max.height
            ))
        } else {
            Verdict::Pass
        },
    )
}

fn moved_bbox(ctx: &ValidationContext<'_>) -> Option<BBox> {
    let Subject::Move(attempt) = &ctx.subject else {
        return None;
    };
    let current = ctx.graph.bbox(&attempt.element)?;
    Some(BBox {
        x: attempt.position.x,
        y: attempt.position.y,
        ..current
    })
}

fn within_canvas(config: &EditorConfig, bbox: &BBox) -> Verdict {
    if config.canvas.bounds().contains(bbox) {
        Verdict::Pass
    } else {
        Verdict::Fail(format!(
            "box at ({}, {}) sized {}x{} leaves the {}x{} canvas",
            bbox.x, bbox.y, bbox.width, bbox.height, config.canvas.width, config.canvas.height
        ))
    }
}

fn overlap_verdict(ctx: &ValidationContext<'_>, bbox: &BBox, ignore: &[CellId]) -> Verdict {
    let hit = ctx
        .graph
        .elements()
        .into_iter()
        .filter(|id| !ignore.contains(id))
        .find(|id| ctx.graph.bbox(id).is_some_and(|other| other.intersects(bbox)));

    match hit {
        Some(other) if ctx.config.allow_overlap => Verdict::Warn(format!("overlaps '{other}'")),
        Some(other) => Verdict::Fail(format!("overlaps '{other}'")),
        None => Verdict::Pass,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Endpoint, MemoryGraph};

    struct Fixture {
        graph: MemoryGraph,
        ports: PortAllocator,
        config: EditorConfig,
        a: CellId,
        b: CellId,
    }

    fn fixture() -> Fixture {
        let mut graph = MemoryGraph::new();
        let a = graph.create_element("rectangle", Point::new(0.0, 0.0), Size::default(), None);
        let b = graph.create_element("rectangle", Point::new(400.0, 0.0), Size::default(), None);
        let mut ports = PortAllocator::new(1);
        ports.register_shape(&a);
        ports.register_shape(&b);
        Fixture {
            graph,
            ports,
            config: EditorConfig::default(),
            a,
            b,
        }
    }

    fn connection(source: &CellId, target: &CellId) -> Subject {
        Subject::Connection(ConnectionAttempt {
            source: source.clone(),
            source_port: None,
            target: target.clone(),
            target_port: None,
        })
    }

    #[test]
    fn self_connection_is_rejected_with_reason() {
        let fx = fixture();
        let engine = ValidationEngine::with_default_rules();
        let report = engine.check(&fx.graph, &fx.ports, &fx.config, connection(&fx.a, &fx.a));
        assert!(!report.valid);
        assert!(report.has_error("no-self-connection"));
        assert!(report.errors.iter().any(|e| e.reason == "self-connection"));
    }

    #[test]
    fn duplicate_connection_is_checked_both_ways() {
        let mut fx = fixture();
        fx.graph
            .create_link(
                Endpoint::new(fx.a.clone(), None),
                Endpoint::new(fx.b.clone(), None),
                None,
            )
            .unwrap();
        let engine = ValidationEngine::with_default_rules();
        let report = engine.check(&fx.graph, &fx.ports, &fx.config, connection(&fx.b, &fx.a));
        assert!(report.has_error("no-duplicate-connection"));
    }

    #[test]
    fn all_rules_run_and_failures_accumulate() {
        let mut fx = fixture();
        let engine = ValidationEngine::with_default_rules();
        for port in ["top-0", "right-1", "bottom-2", "left-3"] {
            fx.ports
                .occupy(&fx.a, &PortId::from(port), &CellId::from("busy"));
        }
        let report = engine.check(&fx.graph, &fx.ports, &fx.config, connection(&fx.a, &fx.a));
        assert!(report.has_error("no-self-connection"));
        assert!(report.has_error("source-port-available"));
        assert!(report.has_error("target-port-available"));
    }

    #[test]
    fn erroring_rule_invalidates_without_propagating() {
        let fx = fixture();
        let mut engine = ValidationEngine::new();
        engine.add_rule(RuleCategory::Graph, "broken", |_| anyhow::bail!("boom"));
        engine.add_rule(RuleCategory::Graph, "fine", |_| Ok(Verdict::Pass));
        let report = engine.check(
            &fx.graph,
            &fx.ports,
            &fx.config,
            Subject::Graph(GraphCheck::default()),
        );
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].reason.contains("boom"));
    }

    #[test]
    fn removed_rule_no_longer_runs() {
        let fx = fixture();
        let mut engine = ValidationEngine::with_default_rules();
        assert!(engine.remove_rule(RuleCategory::Connection, "no-self-connection"));
        assert!(!engine.remove_rule(RuleCategory::Connection, "no-self-connection"));
        let report = engine.check(&fx.graph, &fx.ports, &fx.config, connection(&fx.a, &fx.a));
        assert!(!report.has_error("no-self-connection"));
    }

    #[test]
    fn overlap_warns_or_fails_by_config() {
        let mut fx = fixture();
        let engine = ValidationEngine::with_default_rules();
        let subject = Subject::Creation(CreationAttempt {
            kind: "rectangle".into(),
            position: Point::new(20.0, 20.0),
            size: Size::default(),
        });

        let report = engine.check(&fx.graph, &fx.ports, &fx.config, subject.clone());
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);

        fx.config.allow_overlap = false;
        let report = engine.check(&fx.graph, &fx.ports, &fx.config, subject);
        assert!(report.has_error("no-overlap"));
    }

    #[test]
    fn moves_outside_the_canvas_fail() {
        let fx = fixture();
        let engine = ValidationEngine::with_default_rules();
        let report = engine.check(
            &fx.graph,
            &fx.ports,
            &fx.config,
            Subject::Move(MoveAttempt {
                element: fx.a.clone(),
                position: Point::new(-10.0, 0.0),
                moving: Vec::new(),
            }),
        );
        assert!(report.has_error("within-canvas"));
    }

    #[test]
    fn mismatched_context_fails() {
        let fx = fixture();
        let engine = ValidationEngine::with_default_rules();
        let context = ValidationContext::new(
            &fx.graph,
            &fx.ports,
            &fx.config,
            Subject::Graph(GraphCheck::default()),
        );
        let report = engine.validate(RuleCategory::Move, &context);
        assert!(report.has_error("context-category"));
    }

    #[test]
    fn element_cap_counts_pending_additions() {
        let mut fx = fixture();
        fx.config.max_elements = 2;
        let engine = ValidationEngine::with_default_rules();
        let report = engine.check(
            &fx.graph,
            &fx.ports,
            &fx.config,
            Subject::Graph(GraphCheck {
                added_elements: 1,
                added_links: 0,
            }),
        );
        assert!(report.has_error("max-elements"));
    }
}
