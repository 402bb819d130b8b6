//! Problem definitions.
//!
//! A [`Problem`] bundles everything a design run needs: simulator heads,
//! analyses, measures, corners, parameters and requirements. Problems are
//! usually read from TOML:
//!
//! ```
//! use cbd::problem::Problem;
//!
//! let problem = Problem::from_toml_str(r#"
//!     [heads.spice]
//!     simulator = "spice"
//!
//!     [analyses.op]
//!     head = "spice"
//!     command = "op()"
//!
//!     [measures.gain]
//!     analysis = "op"
//!     expression = "v('out') / v('in')"
//!
//!     [params.w]
//!     lo = 1.0
//!     hi = 10.0
//!     init = 2.0
//!
//!     [requirements.gain]
//!     lower = 10.0
//! "#).unwrap();
//!
//! assert_eq!(problem.corner_map().len(), 1);
//! assert!(problem.corner_map().contains_key("default"));
//! ```

use std::path::{Path, PathBuf};

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name of the corner synthesized when a problem defines no corners.
pub const DEFAULT_CORNER: &str = "default";

/// A mapping from parameter names to values.
pub type ParamMap = IndexMap<ArcStr, f64>;

/// A simulator option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// A flag.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A real number.
    Real(f64),
    /// A string.
    Str(ArcStr),
}

/// A mapping from simulator option names to values.
pub type OptionMap = IndexMap<ArcStr, OptionValue>;

/// A module a head can load, such as a netlist or a model library section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    /// The file containing the module.
    pub file: PathBuf,
    /// The library section to load, if any.
    #[serde(default)]
    pub section: Option<ArcStr>,
}

/// A simulator configuration bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Head {
    /// The id of the simulator backend running this head's jobs.
    pub simulator: ArcStr,
    /// Modules this head can load, by name.
    #[serde(default)]
    pub modules: IndexMap<ArcStr, ModuleDef>,
    /// Default simulator options.
    #[serde(default)]
    pub options: OptionMap,
    /// Default parameter values.
    #[serde(default)]
    pub params: ParamMap,
}

impl Head {
    /// Creates a head running on the given simulator.
    pub fn new(simulator: impl Into<ArcStr>) -> Self {
        Self {
            simulator: simulator.into(),
            modules: IndexMap::new(),
            options: OptionMap::new(),
            params: ParamMap::new(),
        }
    }

    /// Adds a module definition.
    pub fn module(mut self, name: impl Into<ArcStr>, file: impl Into<PathBuf>) -> Self {
        self.modules.insert(
            name.into(),
            ModuleDef {
                file: file.into(),
                section: None,
            },
        );
        self
    }

    /// Adds a default parameter value.
    pub fn param(mut self, name: impl Into<ArcStr>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Adds a default option value.
    pub fn option(mut self, name: impl Into<ArcStr>, value: OptionValue) -> Self {
        self.options.insert(name.into(), value);
        self
    }
}

/// One simulator invocation recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// The head this analysis runs on.
    pub head: ArcStr,
    /// Additional modules to load.
    #[serde(default)]
    pub modules: Vec<ArcStr>,
    /// Option overrides.
    #[serde(default)]
    pub options: OptionMap,
    /// Parameter overrides.
    #[serde(default)]
    pub params: ParamMap,
    /// Quantities the simulator must save.
    #[serde(default)]
    pub saves: Vec<ArcStr>,
    /// The analysis command passed to the simulator.
    #[serde(default)]
    pub command: Option<ArcStr>,
}

impl Analysis {
    /// Creates an analysis running on the given head.
    pub fn new(head: impl Into<ArcStr>) -> Self {
        Self {
            head: head.into(),
            modules: Vec::new(),
            options: OptionMap::new(),
            params: ParamMap::new(),
            saves: Vec::new(),
            command: None,
        }
    }

    /// Sets the analysis command.
    pub fn command(mut self, command: impl Into<ArcStr>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Adds a module.
    pub fn module(mut self, name: impl Into<ArcStr>) -> Self {
        self.modules.push(name.into());
        self
    }

    /// Adds a parameter override.
    pub fn param(mut self, name: impl Into<ArcStr>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Adds an option override.
    pub fn option(mut self, name: impl Into<ArcStr>, value: OptionValue) -> Self {
        self.options.insert(name.into(), value);
        self
    }
}

/// A named combination of model and parameter choices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    /// The heads this corner applies to. An empty list applies to every head.
    #[serde(default)]
    pub heads: Vec<ArcStr>,
    /// Modules this corner forces.
    #[serde(default)]
    pub modules: Vec<ArcStr>,
    /// Parameter overrides.
    #[serde(default)]
    pub params: ParamMap,
}

impl Corner {
    /// Creates a corner that applies to every head.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the corner to the given heads.
    pub fn heads(mut self, heads: impl IntoIterator<Item = impl Into<ArcStr>>) -> Self {
        self.heads = heads.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a forced module.
    pub fn module(mut self, name: impl Into<ArcStr>) -> Self {
        self.modules.push(name.into());
        self
    }

    /// Adds a parameter override.
    pub fn param(mut self, name: impl Into<ArcStr>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// The corners of a problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "Option<IndexMap<ArcStr, Corner>>",
    into = "Option<IndexMap<ArcStr, Corner>>"
)]
pub enum Corners {
    /// Explicitly defined corners.
    Explicit(IndexMap<ArcStr, Corner>),
    /// A single corner named [`DEFAULT_CORNER`] that applies to every head.
    #[default]
    Default,
}

impl Corners {
    /// Resolves the corners into an explicit map.
    pub fn resolve(&self) -> IndexMap<ArcStr, Corner> {
        match self {
            Self::Explicit(corners) => corners.clone(),
            Self::Default => IndexMap::from_iter([(ArcStr::from(DEFAULT_CORNER), Corner::new())]),
        }
    }
}

impl From<Option<IndexMap<ArcStr, Corner>>> for Corners {
    fn from(value: Option<IndexMap<ArcStr, Corner>>) -> Self {
        match value {
            Some(corners) => Self::Explicit(corners),
            None => Self::Default,
        }
    }
}

impl From<Corners> for Option<IndexMap<ArcStr, Corner>> {
    fn from(value: Corners) -> Self {
        match value {
            Corners::Explicit(corners) => Some(corners),
            Corners::Default => None,
        }
    }
}

/// A named performance metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    /// The analysis this measure is computed from.
    ///
    /// [`None`] marks a dependent measure, computed from other measures.
    #[serde(default)]
    pub analysis: Option<ArcStr>,
    /// The corners this measure is evaluated in.
    ///
    /// [`None`] means every admissible corner.
    #[serde(default)]
    pub corners: Option<Vec<ArcStr>>,
    /// The expression or script computing the measure.
    pub expression: ArcStr,
    /// Whether the measure produces a vector.
    #[serde(default)]
    pub vector: bool,
    /// An expression naming the components of a vector measure.
    #[serde(default)]
    pub components: Option<ArcStr>,
    /// Measures this measure depends on.
    #[serde(default)]
    pub depends: Vec<ArcStr>,
}

impl Measure {
    /// Creates an independent measure computed from the results of `analysis`.
    pub fn new(analysis: impl Into<ArcStr>, expression: impl Into<ArcStr>) -> Self {
        Self {
            analysis: Some(analysis.into()),
            ..Self::dependent(expression)
        }
    }

    /// Creates a dependent measure computed from other measures.
    pub fn dependent(expression: impl Into<ArcStr>) -> Self {
        Self {
            analysis: None,
            corners: None,
            expression: expression.into(),
            vector: false,
            components: None,
            depends: Vec::new(),
        }
    }

    /// Restricts the measure to the given corners.
    pub fn corners(mut self, corners: impl IntoIterator<Item = impl Into<ArcStr>>) -> Self {
        self.corners = Some(corners.into_iter().map(Into::into).collect());
        self
    }

    /// Declares dependencies on other measures.
    pub fn depends(mut self, depends: impl IntoIterator<Item = impl Into<ArcStr>>) -> Self {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the measure as producing a vector.
    pub fn vector(mut self) -> Self {
        self.vector = true;
        self
    }

    /// Sets the expression naming the vector's components.
    pub fn components(mut self, components: impl Into<ArcStr>) -> Self {
        self.components = Some(components.into());
        self
    }

    /// Returns `true` if this measure is computed from other measures.
    #[inline]
    pub fn is_dependent(&self) -> bool {
        self.analysis.is_none()
    }
}

/// A fixed variable visible to measure expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Variable {
    /// A real number.
    Real(f64),
    /// A real array.
    Array(Vec<f64>),
    /// A string.
    Str(ArcStr),
}

impl From<Variable> for mexpr::Value {
    fn from(value: Variable) -> Self {
        match value {
            Variable::Real(x) => mexpr::Value::Real(x),
            Variable::Array(v) => mexpr::Value::Array(v),
            Variable::Str(s) => mexpr::Value::Str(s),
        }
    }
}

/// A design parameter and its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DesignParam {
    /// The lower bound.
    pub lo: f64,
    /// The upper bound.
    pub hi: f64,
    /// The initial value.
    pub init: f64,
}

/// Bounds a measure must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// The measure must be at least this value.
    #[serde(default)]
    pub lower: Option<f64>,
    /// The measure must be at most this value.
    #[serde(default)]
    pub upper: Option<f64>,
    /// The normalization scale. Derived from the bounds if not given.
    #[serde(default)]
    pub norm: Option<f64>,
    /// The cost of a failed evaluation. Falls back to the design-wide penalty.
    #[serde(default)]
    pub failure: Option<f64>,
    /// The weight given to exceeding the goal.
    #[serde(default)]
    pub tradeoff: f64,
    /// Report the measure without letting it affect the cost.
    #[serde(default)]
    pub exclude: bool,
}

impl Requirement {
    /// A requirement with a lower bound.
    pub fn above(lower: f64) -> Self {
        Self {
            lower: Some(lower),
            ..Default::default()
        }
    }

    /// A requirement with an upper bound.
    pub fn below(upper: f64) -> Self {
        Self {
            upper: Some(upper),
            ..Default::default()
        }
    }
}

/// The optimization method used by the design loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Evaluate the initial point only.
    None,
    /// Local pattern search.
    #[default]
    Local,
}

/// Design-wide fallbacks for options a problem leaves unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Defaults {
    /// The cost of a failed evaluation.
    pub failure_penalty: f64,
    /// The maximum number of cost evaluations per optimization run.
    pub max_iter: usize,
    /// The normalized step size at which optimization stops.
    pub step_tol: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            failure_penalty: 10000.0,
            max_iter: 200,
            step_tol: 1e-3,
        }
    }
}

impl From<&config::DesignConfig> for Defaults {
    fn from(value: &config::DesignConfig) -> Self {
        Self {
            failure_penalty: value.failure_penalty,
            max_iter: value.max_iter,
            step_tol: value.step_tol,
        }
    }
}

/// Options controlling the design loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignOptions {
    /// The optimization method.
    pub method: Method,
    /// Grow the corner set of each measure only as needed.
    pub incremental_corners: bool,
    /// Start each optimization from the previous pass's result.
    pub forward_solution: bool,
    /// The maximum number of cost evaluations per optimization run.
    pub max_iter: Option<usize>,
    /// The normalized step size at which optimization stops.
    pub step_tol: Option<f64>,
    /// Stop optimizing as soon as every requirement is satisfied.
    ///
    /// Defaults to `true` when no requirement has a tradeoff.
    pub stop_when_all_satisfied: Option<bool>,
    /// The cost of a failed evaluation.
    pub failure_penalty: Option<f64>,
    /// The order in which corners are reported.
    pub corner_order: Option<Vec<ArcStr>>,
}

impl Default for DesignOptions {
    fn default() -> Self {
        Self {
            method: Method::default(),
            incremental_corners: true,
            forward_solution: true,
            max_iter: None,
            step_tol: None,
            stop_when_all_satisfied: None,
            failure_penalty: None,
            corner_order: None,
        }
    }
}

/// A corner-based design problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Simulator configurations, by name.
    #[serde(default)]
    pub heads: IndexMap<ArcStr, Head>,
    /// Analyses, by name.
    #[serde(default)]
    pub analyses: IndexMap<ArcStr, Analysis>,
    /// Measures, by name.
    #[serde(default)]
    pub measures: IndexMap<ArcStr, Measure>,
    /// Corners.
    #[serde(default)]
    pub corners: Corners,
    /// Parameters passed to every job that are not optimized.
    #[serde(default)]
    pub fixed_params: ParamMap,
    /// Variables visible to every measure expression.
    #[serde(default)]
    pub variables: IndexMap<ArcStr, Variable>,
    /// Design parameters, by name.
    #[serde(default)]
    pub params: IndexMap<ArcStr, DesignParam>,
    /// Requirements, by measure name.
    #[serde(default)]
    pub requirements: IndexMap<ArcStr, Requirement>,
    /// Design loop options.
    #[serde(default)]
    pub options: DesignOptions,
}

impl Problem {
    /// Parses a problem from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reads a problem from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// The problem's corners, with the default corner synthesized if none are defined.
    pub fn corner_map(&self) -> IndexMap<ArcStr, Corner> {
        self.corners.resolve()
    }

    /// The measures with requirements, or every measure if there are no requirements.
    pub fn active_measures(&self) -> Vec<ArcStr> {
        if self.requirements.is_empty() {
            self.measures.keys().cloned().collect()
        } else {
            self.requirements.keys().cloned().collect()
        }
    }

    /// The initial design parameter values.
    pub fn initial_params(&self) -> ParamMap {
        self.params
            .iter()
            .map(|(name, p)| (name.clone(), p.init))
            .collect()
    }
}
