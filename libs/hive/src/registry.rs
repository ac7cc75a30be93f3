//! Cell registry: the flattened, validated view of the declared cells.
//!
//! Building the registry evaluates nothing. It only checks that the
//! declarations are structurally sound (module ids, one provider per type,
//! one owner per flag) and records the provider/requirement adjacency the
//! resolver walks, plus a tree for inspection.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::sync::OnceLock;

use regex::Regex;

use crate::cell::{self, Cell, CtorFn, ExtractFn, InvokeFn, RegisterMetricsFn};
use crate::error::HiveError;
use crate::flags::{self, FlagSet};
use crate::inject::{TypeKey, Value};
use crate::lifecycle::Lifecycle;
use crate::metrics::MetricsRegistry;
use crate::naming::{self, Symbol};
use crate::runtime::Shutdowner;

pub const MODULE_ID_PATTERN: &str = r"^[a-z][a-z0-9_-]{1,30}$";

const BUILTIN: &str = "hive (built-in)";
const METRICS_PROVIDER: &str = "metrics registry (built-in)";

/// How a provider produces its values.
pub(crate) enum Construct {
    Ctor(CtorFn),
    /// Bound configuration section of this type.
    Config(TypeKey),
    /// The built-in metrics registry.
    Metrics,
}

pub struct ProviderEntry {
    pub name: String,
    pub inputs: Vec<TypeKey>,
    pub outputs: Vec<TypeKey>,
    pub(crate) symbol: Symbol,
    pub(crate) construct: Construct,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

pub struct InvokeEntry {
    pub name: String,
    pub inputs: Vec<TypeKey>,
    pub(crate) call: InvokeFn,
}

pub struct ConfigEntry {
    pub name: String,
    pub key: TypeKey,
    pub flags: FlagSet,
    pub(crate) defaults: Value,
    pub(crate) extract: ExtractFn,
}

pub struct MetricEntry {
    pub name: String,
    pub key: TypeKey,
    pub(crate) register: RegisterMetricsFn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    Provider,
    Invoke,
    Config,
    Metric,
}

impl CellKind {
    fn label(self) -> &'static str {
        match self {
            CellKind::Provider => "provide",
            CellKind::Invoke => "invoke",
            CellKind::Config => "config",
            CellKind::Metric => "metric",
        }
    }
}

/// Node of the declaration tree, in declaration order.
#[derive(Clone, Debug)]
pub enum TreeNode {
    Module {
        id: String,
        title: String,
        children: Vec<TreeNode>,
    },
    Leaf {
        kind: CellKind,
        name: String,
        provides: Vec<TypeKey>,
        requires: Vec<TypeKey>,
        flags: Vec<String>,
    },
}

pub struct CellRegistry {
    providers: Vec<ProviderEntry>,
    by_type: HashMap<TypeKey, usize>,
    builtins: HashSet<TypeKey>,
    invokes: Vec<InvokeEntry>,
    configs: Vec<ConfigEntry>,
    metrics: Vec<MetricEntry>,
    tree: Vec<TreeNode>,
}

impl std::fmt::Debug for CellRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<&str> = self.providers.iter().map(|p| p.name.as_str()).collect();
        let invokes: Vec<&str> = self.invokes.iter().map(|i| i.name.as_str()).collect();
        f.debug_struct("CellRegistry")
            .field("providers", &providers)
            .field("invokes", &invokes)
            .field("configs_count", &self.configs.len())
            .field("metrics_count", &self.metrics.len())
            .finish()
    }
}

impl CellRegistry {
    pub fn build(cells: Vec<Cell>) -> Result<Self, HiveError> {
        let mut b = RegistryBuilder::default();
        b.register_builtin::<Lifecycle>();
        b.register_builtin::<Shutdowner>();
        let tree = b.add_cells(cells)?;
        b.finish(tree)
    }

    pub fn providers(&self) -> &[ProviderEntry] {
        &self.providers
    }

    pub fn provider_for(&self, key: &TypeKey) -> Option<(usize, &ProviderEntry)> {
        self.by_type.get(key).map(|&i| (i, &self.providers[i]))
    }

    pub fn is_builtin(&self, key: &TypeKey) -> bool {
        self.builtins.contains(key)
    }

    pub fn invokes(&self) -> &[InvokeEntry] {
        &self.invokes
    }

    /// Configuration sections in registration order.
    pub fn configs(&self) -> &[ConfigEntry] {
        &self.configs
    }

    pub fn metrics(&self) -> &[MetricEntry] {
        &self.metrics
    }

    pub fn tree(&self) -> &[TreeNode] {
        &self.tree
    }

    pub fn write_tree(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "Cells:")?;
        for node in &self.tree {
            write_node(w, node, 1)?;
        }
        Ok(())
    }
}

fn write_node(w: &mut dyn Write, node: &TreeNode, depth: usize) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    match node {
        TreeNode::Module {
            id,
            title,
            children,
        } => {
            writeln!(w, "{indent}module {id}: {title}")?;
            for child in children {
                write_node(w, child, depth + 1)?;
            }
        }
        TreeNode::Leaf {
            kind,
            name,
            provides,
            requires,
            flags,
        } => {
            writeln!(w, "{indent}{} {name}", kind.label())?;
            if !provides.is_empty() {
                writeln!(w, "{indent}  provides: {}", join_types(provides))?;
            }
            if !requires.is_empty() {
                writeln!(w, "{indent}  requires: {}", join_types(requires))?;
            }
            if !flags.is_empty() {
                writeln!(w, "{indent}  flags: {}", flags.join(" "))?;
            }
        }
    }
    Ok(())
}

fn join_types(keys: &[TypeKey]) -> String {
    keys.iter().map(TypeKey::pretty).collect::<Vec<_>>().join(", ")
}

fn module_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MODULE_ID_PATTERN).expect("module id pattern is valid"))
}

#[derive(Default)]
struct RegistryBuilder {
    providers: Vec<ProviderEntry>,
    by_type: HashMap<TypeKey, usize>,
    builtins: HashSet<TypeKey>,
    invokes: Vec<InvokeEntry>,
    configs: Vec<ConfigEntry>,
    metrics: Vec<MetricEntry>,
    flag_owners: HashMap<String, String>,
}

impl RegistryBuilder {
    fn register_builtin<T: 'static>(&mut self) {
        self.builtins.insert(TypeKey::of::<T>());
    }

    fn add_cells(&mut self, cells: Vec<Cell>) -> Result<Vec<TreeNode>, HiveError> {
        let mut nodes = Vec::with_capacity(cells.len());
        for cell in cells {
            match cell {
                Cell::Module(m) => {
                    if !module_id_regex().is_match(&m.id) {
                        return Err(HiveError::InvalidModuleId {
                            id: m.id,
                            pattern: MODULE_ID_PATTERN,
                        });
                    }
                    let children = self.add_cells(m.cells)?;
                    nodes.push(TreeNode::Module {
                        id: m.id,
                        title: m.title,
                        children,
                    });
                }
                Cell::Group(cells) => nodes.extend(self.add_cells(cells)?),
                Cell::Provider(p) => nodes.push(self.add_provider(p)?),
                Cell::Invoke(i) => nodes.push(self.add_invoke(i)),
                Cell::Config(c) => nodes.push(self.add_config(c)?),
                Cell::Metric(m) => nodes.push(self.add_metric(m)?),
            }
        }
        Ok(nodes)
    }

    fn register_provider(&mut self, entry: ProviderEntry) -> Result<(), HiveError> {
        for key in &entry.outputs {
            let first = if self.builtins.contains(key) {
                Some(BUILTIN.to_string())
            } else {
                self.by_type
                    .get(key)
                    .map(|&i| self.providers[i].name.clone())
            };
            if let Some(first) = first {
                return Err(HiveError::DuplicateProvider {
                    type_name: key.pretty(),
                    first,
                    second: entry.name,
                });
            }
        }
        let idx = self.providers.len();
        for key in &entry.outputs {
            self.by_type.insert(*key, idx);
        }
        self.providers.push(entry);
        Ok(())
    }

    fn add_provider(&mut self, p: cell::Provider) -> Result<TreeNode, HiveError> {
        let name = naming::func_name_and_location(&p.symbol);
        let node = TreeNode::Leaf {
            kind: CellKind::Provider,
            name: name.clone(),
            provides: p.outputs.clone(),
            requires: p.inputs.clone(),
            flags: Vec::new(),
        };
        self.register_provider(ProviderEntry {
            name,
            inputs: p.inputs,
            outputs: p.outputs,
            symbol: p.symbol,
            construct: Construct::Ctor(p.ctor),
        })?;
        Ok(node)
    }

    fn add_invoke(&mut self, i: cell::Invoke) -> TreeNode {
        let name = naming::func_name_and_location(&i.symbol);
        let node = TreeNode::Leaf {
            kind: CellKind::Invoke,
            name: name.clone(),
            provides: Vec::new(),
            requires: i.inputs.clone(),
            flags: Vec::new(),
        };
        self.invokes.push(InvokeEntry {
            name,
            inputs: i.inputs,
            call: i.call,
        });
        node
    }

    fn add_config(&mut self, c: cell::Config) -> Result<TreeNode, HiveError> {
        let name = naming::func_name_and_location(&c.symbol);
        for flag in c.flags.iter() {
            if let Some(first) = self.flag_owners.get(&flag.name) {
                return Err(HiveError::DuplicateFlag {
                    flag: flag.name.clone(),
                    first: first.clone(),
                    second: name,
                });
            }
            self.flag_owners.insert(flag.name.clone(), name.clone());
        }

        let flag_list = c
            .flags
            .iter()
            .map(|f| match flags::render_default(&f.default) {
                Some(d) => format!("--{}={}", f.name, d),
                None => format!("--{}", f.name),
            })
            .collect();
        let node = TreeNode::Leaf {
            kind: CellKind::Config,
            name: name.clone(),
            provides: vec![c.key],
            requires: Vec::new(),
            flags: flag_list,
        };

        self.register_provider(ProviderEntry {
            name: name.clone(),
            inputs: Vec::new(),
            outputs: vec![c.key],
            symbol: c.symbol,
            construct: Construct::Config(c.key),
        })?;
        self.configs.push(ConfigEntry {
            name,
            key: c.key,
            flags: c.flags,
            defaults: c.defaults,
            extract: c.extract,
        });
        Ok(node)
    }

    fn add_metric(&mut self, m: cell::Metric) -> Result<TreeNode, HiveError> {
        let name = naming::func_name_and_location(&m.symbol);
        let node = TreeNode::Leaf {
            kind: CellKind::Metric,
            name: name.clone(),
            provides: vec![m.key],
            requires: Vec::new(),
            flags: Vec::new(),
        };
        self.register_provider(ProviderEntry {
            name: name.clone(),
            inputs: Vec::new(),
            outputs: vec![m.key],
            symbol: m.symbol,
            construct: Construct::Ctor(m.ctor),
        })?;
        self.metrics.push(MetricEntry {
            name,
            key: m.key,
            register: m.register,
        });
        Ok(node)
    }

    fn finish(mut self, tree: Vec<TreeNode>) -> Result<CellRegistry, HiveError> {
        // The metrics registry requires every declared metric set, so building
        // it forces them all; nothing is built unless someone requires it.
        let inputs = self.metrics.iter().map(|m| m.key).collect();
        self.register_provider(ProviderEntry {
            name: METRICS_PROVIDER.to_string(),
            inputs,
            outputs: vec![TypeKey::of::<MetricsRegistry>()],
            symbol: Symbol::named(METRICS_PROVIDER),
            construct: Construct::Metrics,
        })?;

        tracing::debug!(
            providers = self.providers.len(),
            invokes = self.invokes.len(),
            configs = self.configs.len(),
            metrics = self.metrics.len(),
            "Cell registry built"
        );

        Ok(CellRegistry {
            providers: self.providers,
            by_type: self.by_type,
            builtins: self.builtins,
            invokes: self.invokes,
            configs: self.configs,
            metrics: self.metrics,
            tree,
        })
    }
}
