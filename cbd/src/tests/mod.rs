use arcstr::ArcStr;
use indexmap::IndexMap;

use crate::compile::Definitions;
use crate::error::Error;
use crate::problem::{Analysis, Corner, Head};
use crate::validation::Cause;

pub(crate) mod aggregate;
pub(crate) mod postprocess;

/// Two heads: `spice` with corners `nom` and `fast`, and `xyce` with corner `xnom`.
pub(crate) fn definitions() -> Definitions {
    let spice = Head::new("spice")
        .module("tm", "models.lib")
        .module("wp", "models.lib")
        .module("amp", "amp.cir")
        .param("temp", 27.0)
        .param("vdd", 1.8);
    let xyce = Head::new("xyce").module("amp", "amp.cir");

    Definitions {
        heads: IndexMap::from_iter([(arcstr::literal!("spice"), spice), (arcstr::literal!("xyce"), xyce)]),
        analyses: IndexMap::from_iter([
            (
                arcstr::literal!("op"),
                Analysis::new("spice")
                    .module("amp")
                    .command("op()")
                    .param("vdd", 1.5),
            ),
            (
                arcstr::literal!("ac"),
                Analysis::new("spice").module("amp").command("ac()"),
            ),
            (arcstr::literal!("tran"), Analysis::new("xyce").module("amp")),
        ]),
        corners: IndexMap::from_iter([
            (arcstr::literal!("nom"), Corner::new().heads(["spice"]).module("tm")),
            (
                arcstr::literal!("fast"),
                Corner::new().heads(["spice"]).module("wp").param("temp", 0.0),
            ),
            (arcstr::literal!("xnom"), Corner::new().heads(["xyce"])),
        ]),
        fixed_params: IndexMap::from_iter([(arcstr::literal!("vdd"), 1.2), (arcstr::literal!("len"), 1.0)]),
    }
}

/// The causes of a compilation error.
pub(crate) fn causes(err: Error) -> Vec<Cause> {
    match err {
        Error::Compile(issues) => issues
            .iter()
            .filter(|issue| issue.severity().is_error())
            .map(|issue| issue.cause().clone())
            .collect(),
        other => panic!("expected a compilation error, got {other}"),
    }
}

pub(crate) fn names<const N: usize>(names: [&str; N]) -> Vec<ArcStr> {
    names.into_iter().map(ArcStr::from).collect()
}
