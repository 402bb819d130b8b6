//! Combinatorial corner generation.

use arcstr::ArcStr;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::error::{Error, Result};
use crate::problem::Corner;

/// The choices along one corner dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Choices {
    /// Alternative modules, such as process model sections.
    Models(Vec<ArcStr>),
    /// Alternative values of one parameter.
    Params(Vec<f64>),
}

impl Choices {
    fn len(&self) -> usize {
        match self {
            Self::Models(v) => v.len(),
            Self::Params(v) => v.len(),
        }
    }
}

/// One dimension of a corner space.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    name: ArcStr,
    choices: Choices,
    aliases: Option<Vec<Option<ArcStr>>>,
}

impl Dimension {
    /// A dimension choosing between modules.
    pub fn models(
        name: impl Into<ArcStr>,
        values: impl IntoIterator<Item = impl Into<ArcStr>>,
    ) -> Self {
        Self {
            name: name.into(),
            choices: Choices::Models(values.into_iter().map(Into::into).collect()),
            aliases: None,
        }
    }

    /// A dimension choosing between values of the parameter `name`.
    pub fn params(name: impl Into<ArcStr>, values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            name: name.into(),
            choices: Choices::Params(values.into_iter().collect()),
            aliases: None,
        }
    }

    /// Names each choice for use in corner names.
    ///
    /// Choices aliased with [`None`] do not contribute to corner names.
    pub fn aliases<S: Into<ArcStr>>(mut self, aliases: impl IntoIterator<Item = Option<S>>) -> Self {
        self.aliases = Some(aliases.into_iter().map(|a| a.map(Into::into)).collect());
        self
    }

    /// The dimension name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The dimension's choices.
    #[inline]
    pub fn choices(&self) -> &Choices {
        &self.choices
    }

    /// The number of choices along this dimension.
    #[inline]
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// Returns `true` if the dimension has no choices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<()> {
        match &self.aliases {
            Some(aliases) if aliases.len() != self.len() => Err(Error::AliasMismatch {
                name: self.name.clone(),
                values: self.len(),
                aliases: aliases.len(),
            }),
            _ => Ok(()),
        }
    }
}

/// The output of [`generate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generated {
    /// Generated corners, by name.
    ///
    /// If two corners share a name, the one generated last is kept.
    pub corners: IndexMap<ArcStr, Corner>,
    /// Corner names in generation order, including duplicates.
    pub names: Vec<ArcStr>,
}

impl Generated {
    /// Names that were generated more than once.
    pub fn duplicates(&self) -> Vec<ArcStr> {
        self.names.iter().duplicates().cloned().collect()
    }
}

/// Generates the cartesian product of `dims`.
///
/// The last dimension varies fastest. Every corner applies to `heads`.
/// Corner names are `prefix`, then the enumeration number (if `enum_start`
/// is given), then `_<alias>` for each aliased choice.
///
/// ```
/// use cbd::corner::{generate, Dimension};
///
/// let dims = [
///     Dimension::models("model", ["tm", "wp"]).aliases([Some("tm"), Some("wp")]),
///     Dimension::params("vdd", [1.6, 2.0]).aliases([Some("lo"), Some("hi")]),
/// ];
/// let generated = generate(&dims, &[], "c", None).unwrap();
///
/// assert_eq!(generated.names, ["c_tm_lo", "c_tm_hi", "c_wp_lo", "c_wp_hi"]);
/// assert_eq!(generated.corners["c_wp_lo"].modules, ["wp"]);
/// assert_eq!(generated.corners["c_wp_lo"].params["vdd"], 1.6);
/// ```
pub fn generate(
    dims: &[Dimension],
    heads: &[ArcStr],
    prefix: &str,
    enum_start: Option<usize>,
) -> Result<Generated> {
    for dim in dims {
        dim.validate()?;
    }

    let mut generated = Generated::default();
    // An empty product still has one (empty) combination.
    let combinations: Vec<Vec<usize>> = if dims.is_empty() {
        vec![Vec::new()]
    } else {
        dims.iter()
            .map(|dim| 0..dim.len())
            .multi_cartesian_product()
            .collect()
    };

    for (n, index) in combinations.into_iter().enumerate() {
        let mut name = String::from(prefix);
        if let Some(start) = enum_start {
            name.push_str(&(start + n).to_string());
        }
        let mut corner = Corner::new().heads(heads.iter().cloned());
        for (dim, &i) in dims.iter().zip(&index) {
            match &dim.choices {
                Choices::Models(models) => corner.modules.push(models[i].clone()),
                Choices::Params(values) => {
                    corner.params.insert(dim.name.clone(), values[i]);
                }
            }
            if let Some(Some(alias)) = dim.aliases.as_ref().map(|a| &a[i]) {
                name.push('_');
                name.push_str(alias);
            }
        }
        let name = ArcStr::from(name);
        generated.names.push(name.clone());
        generated.corners.insert(name, corner);
    }
    Ok(generated)
}
