//! Problem definition validation.
//!
//! Consistency checks performed by the job graph compiler are collected as
//! [`Issue`]s. Each issue is logged as soon as it is found; compilation only
//! fails if at least one issue has [`Severity::Error`].

use std::fmt::Display;

use arcstr::ArcStr;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::Level;

lazy_static! {
    /// Names that can be referenced from measure expressions without quoting.
    pub static ref IDENT_REGEX: Regex = Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// An enumeration of possible severity levels.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    /// An informational message.
    Info,
    /// A warning.
    #[default]
    Warning,
    /// An error. Compilation fails if any issue has this severity.
    Error,
}

impl Severity {
    /// Returns the log level corresponding to this severity.
    #[inline]
    pub const fn as_tracing_level(&self) -> Level {
        match *self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }

    /// Returns `true` if the severity is [`Severity::Error`].
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(*self, Self::Error)
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// An issue identified while compiling a problem definition.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    cause: Cause,
    severity: Severity,
}

/// The reason an [`Issue`] was raised.
#[allow(missing_docs)]
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Cause {
    /// An analysis references a head that is not defined.
    UndefinedHead { analysis: ArcStr, head: ArcStr },
    /// A corner claims to apply to a head that is not defined.
    UndefinedCornerHead { corner: ArcStr, head: ArcStr },
    /// A corner forces a module its head does not define.
    UndefinedCornerModule {
        corner: ArcStr,
        head: ArcStr,
        module: ArcStr,
    },
    /// An analysis uses a module its head does not define.
    UndefinedAnalysisModule {
        analysis: ArcStr,
        head: ArcStr,
        module: ArcStr,
    },
    /// A job would load the same module twice.
    DuplicateModule {
        corner: ArcStr,
        analysis: ArcStr,
        module: ArcStr,
    },
    /// A measure references an analysis that is not defined.
    UndefinedAnalysis { measure: ArcStr, analysis: ArcStr },
    /// A measure depends on a measure that is not defined.
    UndefinedDependency { measure: ArcStr, dependency: ArcStr },
    /// Measures depend on each other in a cycle.
    DependencyCycle { measures: Vec<ArcStr> },
    /// A measure or requirement names a measure that is not defined.
    UndefinedMeasure { name: ArcStr },
    /// A measure has no corner it could be evaluated in.
    NoAdmissibleCorners { measure: ArcStr },
    /// A measure lists a corner that is not defined.
    UndefinedCorner { measure: ArcStr, corner: ArcStr },
    /// A measure lists a corner it cannot be evaluated in.
    InadmissibleCorner { measure: ArcStr, corner: ArcStr },
    /// A measure lists the same corner more than once.
    DuplicateCorner { measure: ArcStr, corner: ArcStr },
    /// A head uses a simulator that has not been registered.
    UnknownSimulator { head: ArcStr, simulator: ArcStr },
    /// A head applies to no corner, so none of its analyses will ever run.
    UnusedHead { head: ArcStr },
    /// A name cannot be referenced from measure expressions without quoting.
    NonIdentifierName { kind: ArcStr, name: ArcStr },
}

impl Issue {
    /// Creates a new issue from the given cause and severity.
    pub(crate) fn new(cause: Cause, severity: Severity) -> Self {
        Self { cause, severity }
    }

    /// Creates a new issue and logs it immediately.
    ///
    /// The log level will be selected according to the given severity.
    pub(crate) fn new_and_log(cause: Cause, severity: Severity) -> Self {
        let result = Self::new(cause, severity);
        match severity {
            Severity::Info => tracing::event!(Level::INFO, issue = ?result.cause, "{}", result),
            Severity::Warning => tracing::event!(Level::WARN, issue = ?result.cause, "{}", result),
            Severity::Error => tracing::event!(Level::ERROR, issue = ?result.cause, "{}", result),
        }
        result
    }

    /// Gets the underlying cause of this issue.
    #[inline]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Gets the severity of this issue.
    #[inline]
    pub fn severity(&self) -> Severity {
        self.severity
    }
}

impl Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.cause)
    }
}

impl Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UndefinedHead { analysis, head } => write!(
                f,
                "undefined head: analysis `{}` runs on head `{}`, which is not defined",
                analysis, head
            ),
            Self::UndefinedCornerHead { corner, head } => write!(
                f,
                "undefined head: corner `{}` applies to head `{}`, which is not defined",
                corner, head
            ),
            Self::UndefinedCornerModule {
                corner,
                head,
                module,
            } => write!(
                f,
                "undefined module: corner `{}` uses module `{}`, which head `{}` does not define",
                corner, module, head
            ),
            Self::UndefinedAnalysisModule {
                analysis,
                head,
                module,
            } => write!(
                f,
                "undefined module: analysis `{}` uses module `{}`, which head `{}` does not define",
                analysis, module, head
            ),
            Self::DuplicateModule {
                corner,
                analysis,
                module,
            } => write!(
                f,
                "duplicate module: module `{}` is loaded by both corner `{}` and analysis `{}`",
                module, corner, analysis
            ),
            Self::UndefinedAnalysis { measure, analysis } => write!(
                f,
                "undefined analysis: measure `{}` is computed by analysis `{}`, which is not defined",
                measure, analysis
            ),
            Self::UndefinedDependency {
                measure,
                dependency,
            } => write!(
                f,
                "undefined dependency: measure `{}` depends on measure `{}`, which is not defined",
                measure, dependency
            ),
            Self::DependencyCycle { measures } => {
                write!(f, "dependency cycle between measures ")?;
                for (i, m) in measures.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "`{}`", m)?;
                }
                Ok(())
            }
            Self::UndefinedMeasure { name } => {
                write!(f, "undefined measure: measure `{}` is not defined", name)
            }
            Self::NoAdmissibleCorners { measure } => write!(
                f,
                "no admissible corners: measure `{}` cannot be evaluated in any corner",
                measure
            ),
            Self::UndefinedCorner { measure, corner } => write!(
                f,
                "undefined corner: measure `{}` lists corner `{}`, which is not defined",
                measure, corner
            ),
            Self::InadmissibleCorner { measure, corner } => write!(
                f,
                "inadmissible corner: measure `{}` cannot be evaluated in corner `{}`",
                measure, corner
            ),
            Self::DuplicateCorner { measure, corner } => write!(
                f,
                "duplicate corner: measure `{}` lists corner `{}` more than once",
                measure, corner
            ),
            Self::UnknownSimulator { head, simulator } => write!(
                f,
                "unknown simulator: head `{}` uses simulator `{}`, which is not registered",
                head, simulator
            ),
            Self::UnusedHead { head } => write!(
                f,
                "unused head: head `{}` applies to no corner, so its analyses never run",
                head
            ),
            Self::NonIdentifierName { kind, name } => write!(
                f,
                "{} name `{}` is not an identifier and must be quoted in expressions",
                kind, name
            ),
        }
    }
}

/// A collection of issues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Issues {
    issues: Vec<Issue>,
    num_errors: usize,
    num_warnings: usize,
}

impl Issues {
    /// Creates a new, empty issue collection.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the given issue to the collection.
    pub fn add(&mut self, issue: Issue) {
        match issue.severity() {
            Severity::Error => self.num_errors += 1,
            Severity::Warning => self.num_warnings += 1,
            Severity::Info => (),
        };
        self.issues.push(issue);
    }

    /// Creates, logs and adds an error.
    pub(crate) fn error(&mut self, cause: Cause) {
        self.add(Issue::new_and_log(cause, Severity::Error));
    }

    /// Creates, logs and adds a warning.
    pub(crate) fn warn(&mut self, cause: Cause) {
        self.add(Issue::new_and_log(cause, Severity::Warning));
    }

    /// Warns if `name` is not an identifier.
    pub(crate) fn check_name(&mut self, kind: &str, name: &ArcStr) {
        if !IDENT_REGEX.is_match(name) {
            self.warn(Cause::NonIdentifierName {
                kind: ArcStr::from(kind),
                name: name.clone(),
            });
        }
    }

    /// Returns an iterator over all issues in the collection.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    /// The number of issues in the collection.
    #[inline]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Returns `true` if the collection is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns `true` if the collection contains an error.
    #[inline]
    pub fn has_error(&self) -> bool {
        self.num_errors > 0
    }

    /// The number of errors in the collection.
    #[inline]
    pub fn num_errors(&self) -> usize {
        self.num_errors
    }

    /// Returns `true` if the collection contains a warning.
    #[inline]
    pub fn has_warning(&self) -> bool {
        self.num_warnings > 0
    }

    /// The number of warnings in the collection.
    #[inline]
    pub fn num_warnings(&self) -> usize {
        self.num_warnings
    }
}

impl IntoIterator for Issues {
    type Item = Issue;
    type IntoIter = std::vec::IntoIter<Issue>;
    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}

impl Display for Issues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for issue in self.issues.iter() {
            writeln!(f, "{}", issue)?;
        }
        Ok(())
    }
}
